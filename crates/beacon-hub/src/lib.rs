//! # beacon-hub
//!
//! The real-time broadcast core.
//!
//! - [`registry::ConnectionRegistry`]: concurrency-safe set of live connections
//! - [`queue::DispatchQueue`]: bounded priority queue with eviction
//! - [`broadcaster::Broadcaster`]: drains the queue and fans out with per-peer backpressure
//! - [`heartbeat::HeartbeatMonitor`]: probes peers and reclaims dead ones
//! - [`controller::Hub`]: startup, connection intake, and graceful shutdown
//!
//! Transport, authentication, audit, and priority classification are
//! collaborators behind the traits in [`transport`], [`auth`], [`audit`],
//! and [`classify`].

#![deny(unsafe_code)]

pub mod audit;
pub mod auth;
pub mod broadcaster;
pub mod classify;
pub mod config;
pub mod connection;
pub mod controller;
pub mod heartbeat;
pub mod metrics;
pub mod queue;
pub mod registry;
mod session;
pub mod shutdown;
pub mod transport;

pub use config::HubConfig;
pub use connection::ConnectionHandle;
pub use controller::{Hub, HubCollaborators};
pub use queue::{DispatchQueue, Enqueued};
pub use registry::ConnectionRegistry;
