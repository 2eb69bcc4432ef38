//! # beacon-core
//!
//! Foundation types shared by every Beacon crate:
//!
//! - **Branded IDs**: [`ConnectionId`], [`MessageId`], [`PrincipalId`]
//! - **Messages**: immutable [`Message`] with a [`Priority`] tag and an [`Audience`]
//! - **Errors**: [`HubError`] / [`TransportError`] hierarchy via `thiserror`
//! - **Logging**: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod message;

pub use errors::{DeathReason, HubError, Result, TransportError};
pub use ids::{ConnectionId, MessageId, PrincipalId};
pub use message::{Audience, Message, Priority};
