//! # beacon-agent
//!
//! Beacon hub binary. Loads settings, starts the hub and its HTTP/WebSocket
//! front end, and runs a graceful shutdown on SIGINT or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use beacon_hub::auth::StaticTokenAuthenticator;
use beacon_hub::{Hub, HubCollaborators, HubConfig};
use beacon_server::{BeaconServer, ServerConfig};
use beacon_settings::BeaconSettings;
use clap::Parser;

/// Beacon broadcast hub.
#[derive(Parser, Debug)]
#[command(name = "beacon", about = "Beacon broadcast hub")]
struct Cli {
    /// Settings file (defaults to `~/.beacon/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level filter, e.g. `debug` or `beacon_hub=trace` (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON-lines logs.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Apply command-line overrides on top of loaded settings.
    fn apply(&self, settings: &mut BeaconSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

fn collaborators(settings: &BeaconSettings) -> HubCollaborators {
    let collaborators = HubCollaborators::default();
    if settings.auth.tokens.is_empty() {
        tracing::warn!("no auth tokens configured, accepting every connection");
        return collaborators;
    }
    let auth = StaticTokenAuthenticator::from_settings(&settings.auth);
    tracing::info!(tokens = auth.len(), "token authentication enabled");
    collaborators.with_authenticator(auth)
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c"),
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(beacon_settings::settings_path);
    let mut settings = beacon_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);

    if settings.logging.json {
        beacon_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        beacon_core::logging::init_subscriber(&settings.logging.level);
    }
    tracing::info!(path = %settings_path.display(), "settings loaded");

    let metrics_handle = beacon_server::metrics::install_recorder();

    let hub = Hub::start(HubConfig::from(&settings.hub), collaborators(&settings));
    let server = BeaconServer::new(ServerConfig::from(&settings.server), hub.clone(), metrics_handle);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;

    tracing::info!("Beacon listening on ws://{addr}/ws");

    shutdown_signal().await?;

    tracing::info!("Shutting down...");
    let report = hub.shutdown().await;
    for step in &report.steps {
        tracing::info!(
            step = %step.step,
            completed = step.completed,
            elapsed_ms = u64::try_from(step.elapsed.as_millis()).unwrap_or(u64::MAX),
            "shutdown step"
        );
    }
    if !report.is_clean() {
        tracing::warn!("shutdown overran a step timeout");
    }
    let _ = handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["beacon"]);
        let mut settings = BeaconSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9850);
        assert!(!settings.logging.json);
        assert!(cli.settings.is_none());
    }

    #[test]
    fn cli_custom_port() {
        let cli = Cli::parse_from(["beacon", "--port", "8080"]);
        assert_eq!(cli.port, Some(8080));
    }

    #[test]
    fn cli_overrides_apply() {
        let cli = Cli::parse_from([
            "beacon",
            "--host",
            "0.0.0.0",
            "--port",
            "0",
            "--log-level",
            "debug",
            "--json-logs",
        ]);
        let mut settings = BeaconSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn cli_settings_path() {
        let cli = Cli::parse_from(["beacon", "--settings", "/tmp/beacon.json"]);
        assert_eq!(cli.settings, Some(PathBuf::from("/tmp/beacon.json")));
    }

    #[test]
    fn cli_rejects_bad_port() {
        assert!(Cli::try_parse_from(["beacon", "--port", "70000"]).is_err());
    }
}
