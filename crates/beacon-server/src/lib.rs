//! # beacon-server
//!
//! Axum HTTP + `WebSocket` front end for the broadcast hub.
//!
//! - `GET /ws` upgrades to a `WebSocket` and hands the socket to the hub
//! - `GET /health` reports liveness, connection count, and queue depth
//! - `GET /metrics` renders the Prometheus recorder
//! - Graceful shutdown follows the hub's drain signal

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod websocket;

pub use config::ServerConfig;
pub use server::BeaconServer;
