//! Server configuration.

use beacon_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the HTTP/WebSocket listener.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_frame_size: usize,
    /// Upgraded sockets waiting to be attached.
    pub accept_backlog: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            max_frame_size: 1024 * 1024,
            accept_backlog: 128,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_connections: s.max_connections,
            max_frame_size: s.max_frame_size,
            ..Self::default()
        }
    }
}
