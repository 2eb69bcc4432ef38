//! Fan-out of queued messages to registered connections.

use std::sync::Arc;

use beacon_core::{ConnectionId, DeathReason, HubError, Message};
use metrics::{counter, gauge, histogram};
use tracing::{debug, info, warn};

use crate::metrics::{
    FANOUT_DELIVERIES_TOTAL, FANOUT_DROPS_TOTAL, QUEUE_DEPTH, QUEUE_WAIT_SECONDS,
    SLOW_PEER_EVICTIONS_TOTAL,
};
use crate::queue::DispatchQueue;
use crate::registry::ConnectionRegistry;

/// Result of fanning one message out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Destinations whose outbound channel accepted the message.
    pub delivered: usize,
    /// Destinations whose outbound channel was full or closed.
    pub dropped: usize,
    /// Destinations excluded as origin, by audience, or already closing.
    pub skipped: usize,
    /// Destinations closed for exceeding the drop threshold.
    pub evicted: Vec<ConnectionId>,
}

/// Cumulative totals over a broadcaster's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Messages taken from the queue.
    pub messages: u64,
    /// Successful per-destination sends.
    pub deliveries: u64,
    /// Dropped per-destination sends.
    pub drops: u64,
    /// Connections evicted for chronic drops.
    pub evictions: u64,
}

impl BroadcastStats {
    fn record(&mut self, report: &FanOutReport) {
        self.messages += 1;
        self.deliveries += report.delivered as u64;
        self.drops += report.dropped as u64;
        self.evictions += report.evicted.len() as u64;
    }
}

/// Drains the dispatch queue and delivers each message to a registry
/// snapshot.
///
/// Sends never block: a destination whose outbound channel is full misses the
/// message. Once a destination's consecutive drops exceed the threshold it is
/// closed, which unregisters it.
pub struct Broadcaster {
    queue: Arc<DispatchQueue>,
    registry: ConnectionRegistry,
    drop_threshold: u32,
}

impl Broadcaster {
    /// Create a broadcaster.
    pub fn new(queue: Arc<DispatchQueue>, registry: ConnectionRegistry, drop_threshold: u32) -> Self {
        Self {
            queue,
            registry,
            drop_threshold,
        }
    }

    /// Run until the queue is closed and drained.
    pub async fn run(self) -> BroadcastStats {
        let mut stats = BroadcastStats::default();
        while let Some(message) = self.queue.dequeue().await {
            #[allow(clippy::cast_precision_loss)]
            gauge!(QUEUE_DEPTH).set(self.queue.len() as f64);
            histogram!(QUEUE_WAIT_SECONDS, "priority" => message.priority().as_str())
                .record(message.age().as_secs_f64());
            let report = self.fan_out(&message);
            stats.record(&report);
        }
        info!(
            messages = stats.messages,
            deliveries = stats.deliveries,
            drops = stats.drops,
            evictions = stats.evictions,
            "broadcaster drained"
        );
        stats
    }

    /// Deliver one message to every eligible registered connection.
    pub fn fan_out(&self, message: &Arc<Message>) -> FanOutReport {
        let mut report = FanOutReport::default();
        for handle in self.registry.snapshot() {
            if !handle.is_open() || !message.is_addressed_to(handle.id(), handle.principal()) {
                report.skipped += 1;
                continue;
            }
            match handle.send(Arc::clone(message)) {
                Ok(()) => report.delivered += 1,
                Err(HubError::DestinationDropped { consecutive, .. }) => {
                    report.dropped += 1;
                    if consecutive > self.drop_threshold {
                        let reason = DeathReason::ChronicDrops { consecutive };
                        if handle.close(reason.clone()) {
                            let dead = HubError::PeerDead {
                                conn_id: handle.id().clone(),
                                reason,
                            };
                            info!(conn_id = %handle.id(), error = %dead, "evicting slow peer");
                            counter!(SLOW_PEER_EVICTIONS_TOTAL).increment(1);
                            report.evicted.push(handle.id().clone());
                        }
                    } else {
                        warn!(conn_id = %handle.id(), consecutive, "send dropped, outbound buffer full");
                    }
                }
                Err(e) => warn!(conn_id = %handle.id(), error = %e, "send failed"),
            }
        }
        counter!(FANOUT_DELIVERIES_TOTAL).increment(report.delivered as u64);
        counter!(FANOUT_DROPS_TOTAL).increment(report.dropped as u64);
        debug!(
            msg_id = %message.id(),
            priority = %message.priority(),
            recipients = report.delivered,
            drops = report.dropped,
            skipped = report.skipped,
            "fan-out complete"
        );
        report
    }
}
