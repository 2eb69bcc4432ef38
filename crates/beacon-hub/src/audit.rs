//! Audit collaborator. Receives a copy of each accepted message.
//!
//! Recording is fire-and-forget: a failing sink is logged and never affects
//! delivery.

use std::sync::Arc;

use beacon_core::Message;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Why a message could not be recorded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuditError {
    /// The sink is backed up.
    #[error("audit sink full")]
    Full,
    /// The sink has gone away.
    #[error("audit sink closed")]
    Closed,
}

/// Receives copies of accepted messages.
pub trait AuditSink: Send + Sync + 'static {
    /// Record one message. Must not block.
    fn record(&self, message: Arc<Message>) -> Result<(), AuditError>;
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAudit;

impl AuditSink for NoopAudit {
    fn record(&self, _message: Arc<Message>) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Forwards copies over a bounded channel.
#[derive(Clone, Debug)]
pub struct ChannelAuditSink {
    tx: mpsc::Sender<Arc<Message>>,
}

impl ChannelAuditSink {
    /// Create a sink and the receiver its copies arrive on.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<Message>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, message: Arc<Message>) -> Result<(), AuditError> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => AuditError::Full,
            TrySendError::Closed(_) => AuditError::Closed,
        })
    }
}
