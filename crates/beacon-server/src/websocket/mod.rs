//! `WebSocket` transport: frame adapters and the acceptor the hub drains.

pub mod acceptor;
pub mod frames;

pub use acceptor::{WsAcceptor, intake};
pub use frames::{WsFrameReader, WsFrameWriter, split};
