//! Hub configuration.

use std::time::Duration;

use beacon_core::Priority;
use beacon_settings::HubSettings;

/// Runtime configuration for a [`Hub`](crate::Hub).
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Slots in each connection's outbound channel.
    pub outbound_capacity: usize,
    /// Maximum messages held by the dispatch queue.
    pub queue_capacity: usize,
    /// Consecutive dropped sends tolerated before eviction.
    pub drop_threshold: u32,
    /// Heartbeat sweep period.
    pub heartbeat_interval: Duration,
    /// Silence tolerated before a peer is declared dead.
    pub pong_wait: Duration,
    /// Upper bound on one frame write.
    pub write_timeout: Duration,
    /// Upper bound on each graceful shutdown step.
    pub shutdown_step_timeout: Duration,
    /// Priority assigned to inbound peer messages by the default classifier.
    pub default_priority: Priority,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::from(&HubSettings::default())
    }
}

impl From<&HubSettings> for HubConfig {
    fn from(s: &HubSettings) -> Self {
        Self {
            outbound_capacity: s.outbound_capacity,
            queue_capacity: s.queue_capacity,
            drop_threshold: s.drop_threshold,
            heartbeat_interval: Duration::from_millis(s.heartbeat_interval_ms),
            pong_wait: Duration::from_millis(s.pong_wait_ms),
            write_timeout: Duration::from_millis(s.write_timeout_ms),
            shutdown_step_timeout: Duration::from_millis(s.shutdown_step_timeout_ms),
            default_priority: s.default_priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.outbound_capacity, 256);
        assert_eq!(cfg.queue_capacity, 1000);
        assert_eq!(cfg.drop_threshold, 5);
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(cfg.pong_wait, Duration::from_secs(60));
        assert_eq!(cfg.write_timeout, Duration::from_secs(10));
        assert_eq!(cfg.default_priority, Priority::Normal);
    }

    #[test]
    fn from_settings() {
        let settings = HubSettings {
            queue_capacity: 10,
            heartbeat_interval_ms: 250,
            default_priority: Priority::Low,
            ..HubSettings::default()
        };
        let cfg = HubConfig::from(&settings);
        assert_eq!(cfg.queue_capacity, 10);
        assert_eq!(cfg.heartbeat_interval, Duration::from_millis(250));
        assert_eq!(cfg.default_priority, Priority::Low);
    }
}
