//! Metric name constants shared by the hub and the server.
//!
//! Values are recorded through the `metrics` facade; whichever recorder the
//! embedding binary installs collects them.

/// Connections registered total (counter).
pub const CONNECTIONS_TOTAL: &str = "hub_connections_total";
/// Connections closed total (counter, labels: reason).
pub const DISCONNECTIONS_TOTAL: &str = "hub_disconnections_total";
/// Currently registered connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "hub_connections_active";
/// Connections refused by the authenticator (counter).
pub const CONNECTIONS_REJECTED_TOTAL: &str = "hub_connections_rejected_total";
/// Messages accepted into the dispatch queue (counter, labels: priority).
pub const MESSAGES_ENQUEUED_TOTAL: &str = "hub_messages_enqueued_total";
/// Queued messages evicted by higher-priority ones (counter, labels: priority).
pub const MESSAGES_EVICTED_TOTAL: &str = "hub_messages_evicted_total";
/// Messages rejected by a full queue (counter, labels: priority).
pub const MESSAGES_REJECTED_TOTAL: &str = "hub_messages_rejected_total";
/// Messages currently queued (gauge).
pub const QUEUE_DEPTH: &str = "hub_queue_depth";
/// Time from enqueue to fan-out in seconds (histogram, labels: priority).
pub const QUEUE_WAIT_SECONDS: &str = "hub_queue_wait_seconds";
/// Successful per-destination sends (counter).
pub const FANOUT_DELIVERIES_TOTAL: &str = "hub_fanout_deliveries_total";
/// Dropped per-destination sends (counter).
pub const FANOUT_DROPS_TOTAL: &str = "hub_fanout_drops_total";
/// Connections evicted for chronic drops (counter).
pub const SLOW_PEER_EVICTIONS_TOTAL: &str = "hub_slow_peer_evictions_total";
/// Connections reclaimed by the heartbeat monitor (counter).
pub const HEARTBEAT_EVICTIONS_TOTAL: &str = "hub_heartbeat_evictions_total";
