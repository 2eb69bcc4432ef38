use beacon_core::Priority;
use serde::{Deserialize, Serialize};

/// Broadcast hub tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Slots in each connection's outbound channel.
    pub outbound_capacity: usize,
    /// Maximum messages held by the dispatch queue.
    pub queue_capacity: usize,
    /// Consecutive dropped sends tolerated before a peer is evicted.
    pub drop_threshold: u32,
    /// Heartbeat sweep period in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence tolerated before a peer is declared dead, in milliseconds.
    pub pong_wait_ms: u64,
    /// Upper bound on one frame write, in milliseconds.
    pub write_timeout_ms: u64,
    /// Upper bound on each graceful shutdown step, in milliseconds.
    pub shutdown_step_timeout_ms: u64,
    /// Priority assigned to inbound peer messages.
    pub default_priority: Priority,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            queue_capacity: 1000,
            drop_threshold: 5,
            heartbeat_interval_ms: 30_000,
            pong_wait_ms: 60_000,
            write_timeout_ms: 10_000,
            shutdown_step_timeout_ms: 5_000,
            default_priority: Priority::Normal,
        }
    }
}
