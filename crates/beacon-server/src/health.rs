//! `/health` endpoint.

use beacon_hub::Hub;
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while running, `"draining"` once shutdown has begun.
    pub status: String,
    /// Seconds since the hub started.
    pub uptime_secs: u64,
    /// Registered connections.
    pub connections: usize,
    /// Messages waiting for fan-out.
    pub queue_depth: usize,
    /// Dispatch queue capacity.
    pub queue_capacity: usize,
    /// Whether graceful shutdown has begun.
    pub shutting_down: bool,
}

/// Build a health response from the hub's live counters.
pub fn health_check(hub: &Hub) -> HealthResponse {
    let shutting_down = hub.is_shutting_down();
    HealthResponse {
        status: if shutting_down { "draining" } else { "ok" }.into(),
        uptime_secs: hub.uptime().as_secs(),
        connections: hub.connection_count(),
        queue_depth: hub.queue_depth(),
        queue_capacity: hub.queue_capacity(),
        shutting_down,
    }
}
