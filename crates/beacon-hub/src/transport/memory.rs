//! In-process transport over `mpsc` channels.
//!
//! Useful for embedding the hub without a network and for tests. A
//! [`MemoryPeer`] plays the remote side of one connection.

use async_trait::async_trait;
use beacon_core::TransportError;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{Acceptor, Credentials, Frame, FrameReader, FrameWriter, RawConnection};

/// Default per-direction frame buffer.
pub const DEFAULT_FRAME_BUFFER: usize = 64;

/// Create a connected connector/acceptor pair.
pub fn listener(backlog: usize) -> (MemoryConnector, MemoryAcceptor) {
    let (tx, rx) = mpsc::channel(backlog);
    (
        MemoryConnector {
            tx,
            frame_buffer: DEFAULT_FRAME_BUFFER,
        },
        MemoryAcceptor { rx },
    )
}

/// Create one connection without an acceptor, for [`Hub::attach`](crate::Hub::attach).
pub fn pair(credentials: Credentials, frame_buffer: usize) -> (RawConnection, MemoryPeer) {
    let (to_hub_tx, to_hub_rx) = mpsc::channel(frame_buffer);
    let (to_peer_tx, to_peer_rx) = mpsc::channel(frame_buffer);
    let raw = RawConnection {
        credentials,
        reader: Box::new(MemoryReader { rx: to_hub_rx }),
        writer: Box::new(MemoryWriter { tx: Some(to_peer_tx) }),
    };
    let peer = MemoryPeer {
        tx: to_hub_tx,
        rx: to_peer_rx,
    };
    (raw, peer)
}

/// Client side of [`listener`].
#[derive(Clone)]
pub struct MemoryConnector {
    tx: mpsc::Sender<RawConnection>,
    frame_buffer: usize,
}

impl MemoryConnector {
    /// Set the per-direction frame buffer for future connections.
    #[must_use]
    pub fn with_frame_buffer(mut self, frame_buffer: usize) -> Self {
        self.frame_buffer = frame_buffer;
        self
    }

    /// Open a connection to the acceptor.
    pub async fn connect(&self, credentials: Credentials) -> Result<MemoryPeer, TransportError> {
        let (raw, peer) = pair(credentials, self.frame_buffer);
        self.tx.send(raw).await.map_err(|_| TransportError::Closed)?;
        Ok(peer)
    }
}

/// Hub side of [`listener`]. Accepting ends once every connector is dropped.
pub struct MemoryAcceptor {
    rx: mpsc::Receiver<RawConnection>,
}

#[async_trait]
impl Acceptor for MemoryAcceptor {
    async fn accept(&mut self) -> Result<RawConnection, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Closed)
    }
}

struct MemoryReader {
    rx: mpsc::Receiver<Frame>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn read_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

struct MemoryWriter {
    tx: Option<mpsc::Sender<Frame>>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

/// The remote end of an in-memory connection.
///
/// Dropping it closes the connection from the peer side.
pub struct MemoryPeer {
    tx: mpsc::Sender<Frame>,
    rx: mpsc::Receiver<Frame>,
}

impl MemoryPeer {
    /// Send a data frame to the hub.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<(), TransportError> {
        self.send_frame(Frame::Data(payload.into())).await
    }

    /// Send any frame to the hub.
    pub async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        self.tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    /// Next frame from the hub, or `None` once the hub closed the connection.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Next data payload, answering any probes on the way.
    pub async fn recv_data(&mut self) -> Option<Bytes> {
        loop {
            match self.rx.recv().await? {
                Frame::Data(payload) => return Some(payload),
                Frame::Probe => {
                    let _ = self.send_frame(Frame::ProbeReply).await;
                }
                Frame::ProbeReply => {}
            }
        }
    }

    /// A frame if one is already waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }
}
