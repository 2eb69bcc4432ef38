//! Liveness probing and dead-peer reclamation.

use std::time::Duration;

use beacon_core::{ConnectionId, DeathReason, HubError};
use metrics::counter;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::HEARTBEAT_EVICTIONS_TOTAL;
use crate::registry::ConnectionRegistry;

/// Result of one sweep over the registry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections asked to send a probe.
    pub probed: usize,
    /// Connections closed for silence beyond the pong wait.
    pub evicted: Vec<ConnectionId>,
}

/// Periodically probes every registered connection and closes those that
/// have been silent for longer than the pong wait.
pub struct HeartbeatMonitor {
    registry: ConnectionRegistry,
    interval: Duration,
    pong_wait: Duration,
}

impl HeartbeatMonitor {
    /// Create a monitor.
    pub fn new(registry: ConnectionRegistry, interval: Duration, pong_wait: Duration) -> Self {
        Self {
            registry,
            interval,
            pong_wait,
        }
    }

    /// Sweep every `interval` until `cancel` fires. Returns the number of
    /// connections reclaimed.
    pub async fn run(self, cancel: CancellationToken) -> u64 {
        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reclaimed = 0u64;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.sweep();
                    reclaimed += report.evicted.len() as u64;
                }
            }
        }
        debug!(reclaimed, "heartbeat monitor stopped");
        reclaimed
    }

    /// Check every registered connection once.
    ///
    /// Silent beyond the pong wait: closed and unregistered. Otherwise: a
    /// probe is requested and the connection awaits a reply.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for handle in self.registry.snapshot() {
            let silence = handle.silence();
            if silence > self.pong_wait {
                if handle.close(DeathReason::HeartbeatTimeout) {
                    let dead = HubError::PeerDead {
                        conn_id: handle.id().clone(),
                        reason: DeathReason::HeartbeatTimeout,
                    };
                    info!(
                        conn_id = %handle.id(),
                        error = %dead,
                        silent_ms = u64::try_from(silence.as_millis()).unwrap_or(u64::MAX),
                        "peer missed heartbeat, reclaiming"
                    );
                    counter!(HEARTBEAT_EVICTIONS_TOTAL).increment(1);
                    report.evicted.push(handle.id().clone());
                }
            } else {
                handle.request_probe();
                report.probed += 1;
            }
        }
        debug!(probed = report.probed, evicted = report.evicted.len(), "heartbeat sweep");
        report
    }
}
