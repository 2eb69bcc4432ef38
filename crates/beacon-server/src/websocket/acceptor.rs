//! Hand-off from HTTP upgrade handlers to the hub's accept loop.

use async_trait::async_trait;
use beacon_core::TransportError;
use beacon_hub::transport::{Acceptor, RawConnection};
use tokio::sync::mpsc;

/// Create the intake channel. Upgrade handlers send on the returned sender;
/// the hub accepts from the [`WsAcceptor`].
pub fn intake(backlog: usize) -> (mpsc::Sender<RawConnection>, WsAcceptor) {
    let (tx, rx) = mpsc::channel(backlog.max(1));
    (tx, WsAcceptor { rx })
}

/// Yields upgraded `WebSocket` connections. Closed once every sender is gone.
pub struct WsAcceptor {
    rx: mpsc::Receiver<RawConnection>,
}

#[async_trait]
impl Acceptor for WsAcceptor {
    async fn accept(&mut self) -> Result<RawConnection, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Closed)
    }
}
