//! Error hierarchy for the hub.
//!
//! - [`HubError`]: every failure the hub core can observe
//! - [`TransportError`]: failures reported by the transport collaborator
//! - [`DeathReason`]: why a connection was reclaimed
//!
//! Connection-scoped errors (see [`HubError::is_connection_scoped`]) are
//! contained to the affected connection and never stop the broadcaster or the
//! heartbeat monitor.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::ids::ConnectionId;
use crate::message::Priority;

/// Failure reported by the transport collaborator.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer or the listener went away.
    #[error("transport closed")]
    Closed,
    /// Underlying socket error.
    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// A frame could not be written within the write timeout.
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),
    /// The peer sent something the transport cannot frame.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Why a connection was reclaimed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeathReason {
    /// No traffic observed within the pong-wait bound.
    HeartbeatTimeout,
    /// Consecutive dropped sends exceeded the threshold.
    ChronicDrops {
        /// Consecutive drops at the moment of eviction.
        consecutive: u32,
    },
    /// The transport failed.
    Transport(String),
    /// The peer closed the connection.
    PeerClosed,
    /// The hub is shutting down.
    Shutdown,
}

impl DeathReason {
    /// Short label for metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::ChronicDrops { .. } => "chronic_drops",
            Self::Transport(_) => "transport",
            Self::PeerClosed => "peer_closed",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for DeathReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeartbeatTimeout => f.write_str("heartbeat timeout"),
            Self::ChronicDrops { consecutive } => {
                write!(f, "{consecutive} consecutive dropped sends")
            }
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::PeerClosed => f.write_str("closed by peer"),
            Self::Shutdown => f.write_str("hub shutdown"),
        }
    }
}

/// Errors raised by the hub core.
#[derive(Debug, Error)]
pub enum HubError {
    /// Registration attempted after shutdown began.
    #[error("connection registry is closed")]
    RegistryClosed,

    /// Enqueue attempted after shutdown began.
    #[error("dispatch queue is closed")]
    QueueClosed,

    /// The queue is at capacity with messages of equal or higher priority.
    #[error("dispatch queue full, {priority} message rejected")]
    QueueFull {
        /// Priority of the rejected message.
        priority: Priority,
    },

    /// A single non-blocking send to one destination failed.
    #[error("send to {conn_id} dropped ({consecutive} consecutive)")]
    DestinationDropped {
        /// Destination connection.
        conn_id: ConnectionId,
        /// Consecutive drops for this destination, including this one.
        consecutive: u32,
    },

    /// A connection was declared dead and reclaimed.
    #[error("peer {conn_id} is dead: {reason}")]
    PeerDead {
        /// The reclaimed connection.
        conn_id: ConnectionId,
        /// Why it was reclaimed.
        reason: DeathReason,
    },

    /// The authentication collaborator refused the connection.
    #[error("connection rejected: {reason}")]
    Unauthorized {
        /// Reason supplied by the authenticator.
        reason: String,
    },

    /// Transport collaborator failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl HubError {
    /// Whether the error concerns a single connection only.
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            Self::DestinationDropped { .. }
                | Self::PeerDead { .. }
                | Self::Unauthorized { .. }
                | Self::Transport(_)
        )
    }

    /// Whether the error is caused by shutdown having begun.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::RegistryClosed | Self::QueueClosed)
    }
}

/// Result type for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;
