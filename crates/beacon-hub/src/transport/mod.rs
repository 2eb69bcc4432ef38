//! Transport collaborator interface.
//!
//! The hub never touches sockets. A transport hands it [`RawConnection`]s,
//! each a pair of frame reader and frame writer plus the credentials the
//! peer presented.

use std::net::SocketAddr;

use async_trait::async_trait;
use beacon_core::TransportError;
use bytes::Bytes;

pub mod memory;

/// A unit of transport traffic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Opaque application payload.
    Data(Bytes),
    /// Liveness probe. Peers answer with [`Frame::ProbeReply`].
    Probe,
    /// Answer to a liveness probe.
    ProbeReply,
}

/// What a peer presented when connecting.
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    /// Bearer token, if any.
    pub token: Option<String>,
    /// Remote address, if the transport has one.
    pub remote_addr: Option<SocketAddr>,
}

impl Credentials {
    /// Credentials carrying only a token.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            remote_addr: None,
        }
    }
}

/// Inbound half of a connection.
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Next frame, or `None` once the peer has closed the connection.
    async fn read_frame(&mut self) -> Result<Option<Frame>, TransportError>;
}

/// Outbound half of a connection.
#[async_trait]
pub trait FrameWriter: Send + 'static {
    /// Transmit one frame.
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the connection from the hub side.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A newly accepted, not yet authenticated connection.
pub struct RawConnection {
    /// Credentials presented by the peer.
    pub credentials: Credentials,
    /// Inbound half.
    pub reader: Box<dyn FrameReader>,
    /// Outbound half.
    pub writer: Box<dyn FrameWriter>,
}

impl std::fmt::Debug for RawConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawConnection")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

/// Source of new connections.
#[async_trait]
pub trait Acceptor: Send + 'static {
    /// Wait for the next connection. [`TransportError::Closed`] ends the
    /// accept loop; any other error is logged and accepting continues.
    async fn accept(&mut self) -> Result<RawConnection, TransportError>;
}
