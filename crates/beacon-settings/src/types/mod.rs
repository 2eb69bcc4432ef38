//! Settings type definitions.

mod hub;
mod server;

pub use hub::HubSettings;
pub use server::{AuthSettings, LoggingSettings, ServerSettings};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object, serialized as `~/.beacon/settings.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BeaconSettings {
    /// Network listener settings.
    pub server: ServerSettings,
    /// Broadcast hub tuning.
    pub hub: HubSettings,
    /// Connection authentication.
    pub auth: AuthSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl BeaconSettings {
    /// Reject values the hub cannot run with.
    pub fn validate(&self) -> Result<()> {
        let hub = &self.hub;
        if hub.queue_capacity == 0 {
            return Err(SettingsError::InvalidValue("hub.queueCapacity must be > 0".into()));
        }
        if hub.outbound_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.outboundCapacity must be > 0".into(),
            ));
        }
        if hub.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.heartbeatIntervalMs must be > 0".into(),
            ));
        }
        if hub.pong_wait_ms < hub.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "hub.pongWaitMs ({}) must be >= hub.heartbeatIntervalMs ({})",
                hub.pong_wait_ms, hub.heartbeat_interval_ms
            )));
        }
        if self.server.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be > 0".into(),
            ));
        }
        Ok(())
    }
}
