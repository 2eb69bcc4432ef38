//! Priority classification of inbound peer messages.

use beacon_core::{ConnectionId, Priority};
use bytes::Bytes;

/// Assigns a priority to a payload received from a peer.
pub trait PriorityClassifier: Send + Sync + 'static {
    /// Priority for `payload` sent by `origin`.
    fn classify(&self, origin: &ConnectionId, payload: &Bytes) -> Priority;
}

/// Assigns the same priority to everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedPriority(pub Priority);

impl PriorityClassifier for FixedPriority {
    fn classify(&self, _origin: &ConnectionId, _payload: &Bytes) -> Priority {
        self.0
    }
}
