//! Per-connection handle shared by the registry, broadcaster, heartbeat
//! monitor, and the connection's own reader/writer tasks.

use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use beacon_core::{ConnectionId, DeathReason, HubError, Message, PrincipalId};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::metrics::DISCONNECTIONS_TOTAL;
use crate::registry::RegistryInner;

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

const ALIVE: u8 = 0;
const AWAITING_PONG: u8 = 1;

/// Heartbeat view of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Liveness {
    /// Traffic observed since the last probe.
    Alive,
    /// A probe was requested and no traffic has been observed since.
    AwaitingPong,
}

/// A connected peer.
///
/// The outbound side is a bounded channel drained by the connection's writer
/// task. Sends never block: a full channel is a dropped send.
pub struct ConnectionHandle {
    id: ConnectionId,
    principal: Option<PrincipalId>,
    tx: mpsc::Sender<Arc<Message>>,
    connected_at: Instant,
    last_seen: Mutex<Instant>,
    liveness: AtomicU8,
    state: AtomicU8,
    consecutive_drops: AtomicU32,
    dropped_messages: AtomicU64,
    probe: Notify,
    closed: CancellationToken,
    close_reason: OnceLock<DeathReason>,
    registry: OnceLock<Weak<RegistryInner>>,
}

impl ConnectionHandle {
    /// Create a handle around an existing outbound sender.
    pub fn new(tx: mpsc::Sender<Arc<Message>>, principal: Option<PrincipalId>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::generate(),
            principal,
            tx,
            connected_at: now,
            last_seen: Mutex::new(now),
            liveness: AtomicU8::new(ALIVE),
            state: AtomicU8::new(OPEN),
            consecutive_drops: AtomicU32::new(0),
            dropped_messages: AtomicU64::new(0),
            probe: Notify::new(),
            closed: CancellationToken::new(),
            close_reason: OnceLock::new(),
            registry: OnceLock::new(),
        }
    }

    /// Create a handle together with the receiving end of its outbound channel.
    pub fn channel(
        capacity: usize,
        principal: Option<PrincipalId>,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<Message>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Self::new(tx, principal)), rx)
    }

    /// Connection ID.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Authenticated principal, if any.
    pub fn principal(&self) -> Option<&PrincipalId> {
        self.principal.as_ref()
    }

    /// Queue a message for the writer task without blocking.
    ///
    /// A full or closed outbound channel is a dropped send: the message is
    /// discarded and the error carries the consecutive drop count including
    /// this one. A successful send resets that count.
    pub fn send(&self, message: Arc<Message>) -> Result<(), HubError> {
        if self.tx.try_send(message).is_ok() {
            self.consecutive_drops.store(0, Ordering::Relaxed);
            Ok(())
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            let consecutive = self.consecutive_drops.fetch_add(1, Ordering::Relaxed) + 1;
            Err(HubError::DestinationDropped {
                conn_id: self.id.clone(),
                consecutive,
            })
        }
    }

    /// Consecutive dropped sends since the last successful one.
    pub fn consecutive_drops(&self) -> u32 {
        self.consecutive_drops.load(Ordering::Relaxed)
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record peer traffic.
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
        self.liveness.store(ALIVE, Ordering::Relaxed);
    }

    /// Time since traffic was last observed (or since connect).
    pub fn silence(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Current heartbeat state.
    pub fn liveness(&self) -> Liveness {
        match self.liveness.load(Ordering::Relaxed) {
            ALIVE => Liveness::Alive,
            _ => Liveness::AwaitingPong,
        }
    }

    /// Ask the writer task to send a liveness probe.
    ///
    /// Probes bypass the outbound data channel, so a backed-up peer is still
    /// probed. Requests made while the writer is busy coalesce into one.
    pub fn request_probe(&self) {
        self.liveness.store(AWAITING_PONG, Ordering::Relaxed);
        self.probe.notify_one();
    }

    /// Resolves when a probe has been requested.
    pub(crate) async fn probe_requested(&self) {
        self.probe.notified().await;
    }

    /// Close the connection.
    ///
    /// Only the first call has any effect: it records `reason`, signals the
    /// connection's tasks, and removes the handle from its registry. Returns
    /// whether this call performed the transition.
    pub fn close(&self, reason: DeathReason) -> bool {
        if self
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        counter!(DISCONNECTIONS_TOTAL, "reason" => reason.kind()).increment(1);
        let _ = self.close_reason.set(reason);
        self.closed.cancel();
        if let Some(registry) = self.registry.get().and_then(Weak::upgrade) {
            let _ = registry.remove(&self.id);
        }
        self.state.store(CLOSED, Ordering::Release);
        true
    }

    /// Whether [`close`](Self::close) has not been called yet.
    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == OPEN
    }

    /// Why the connection was closed, once it has been.
    pub fn close_reason(&self) -> Option<&DeathReason> {
        self.close_reason.get()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub(crate) fn bind_registry(&self, registry: Weak<RegistryInner>) {
        let _ = self.registry.set(registry);
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("principal", &self.principal)
            .field("open", &self.is_open())
            .field("consecutive_drops", &self.consecutive_drops())
            .finish_non_exhaustive()
    }
}
