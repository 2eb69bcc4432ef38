//! Concurrency-safe set of live connections.
//!
//! All locking is internal. The lock is held only for structural mutation or
//! to copy membership out; callers iterate over snapshots and never touch the
//! map.

use std::collections::HashMap;
use std::sync::Arc;

use beacon_core::{ConnectionId, HubError, Result};
use metrics::gauge;
use parking_lot::RwLock;
use tracing::debug;

use crate::connection::ConnectionHandle;
use crate::metrics::CONNECTIONS_ACTIVE;

struct Entry {
    seq: u64,
    handle: Arc<ConnectionHandle>,
}

#[derive(Default)]
struct RegistryState {
    closed: bool,
    next_seq: u64,
    handles: HashMap<ConnectionId, Entry>,
}

/// Shared registry state. Handles keep a weak reference to it so that
/// closing a handle removes it.
#[derive(Default)]
pub(crate) struct RegistryInner {
    state: RwLock<RegistryState>,
}

impl RegistryInner {
    pub(crate) fn remove(&self, id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        let (removed, remaining) = {
            let mut state = self.state.write();
            let removed = state.handles.remove(id).map(|e| e.handle);
            (removed, state.handles.len())
        };
        if removed.is_some() {
            #[allow(clippy::cast_precision_loss)]
            gauge!(CONNECTIONS_ACTIVE).set(remaining as f64);
            debug!(conn_id = %id, remaining, "connection unregistered");
        }
        removed
    }
}

/// The set of registered connections.
///
/// Cheap to clone; clones share membership.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    /// Create an empty, open registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handle.
    ///
    /// Fails with [`HubError::RegistryClosed`] once [`close`](Self::close)
    /// has been called. Closing the handle later removes it again.
    pub fn register(&self, handle: Arc<ConnectionHandle>) -> Result<ConnectionId> {
        let id = handle.id().clone();
        handle.bind_registry(Arc::downgrade(&self.inner));
        let count = {
            let mut state = self.inner.state.write();
            if state.closed {
                return Err(HubError::RegistryClosed);
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            let _ = state.handles.insert(id.clone(), Entry { seq, handle: Arc::clone(&handle) });
            state.handles.len()
        };
        // A close that raced the insert found nothing to remove.
        if !handle.is_open() {
            let _ = self.inner.remove(&id);
            return Ok(id);
        }
        #[allow(clippy::cast_precision_loss)]
        gauge!(CONNECTIONS_ACTIVE).set(count as f64);
        Ok(id)
    }

    /// Remove a handle. Removing an absent ID is a no-op.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.inner.remove(id)
    }

    /// Look up a handle by ID.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.inner.state.read().handles.get(id).map(|e| Arc::clone(&e.handle))
    }

    /// Current members in registration order.
    pub fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        let mut entries: Vec<(u64, Arc<ConnectionHandle>)> = {
            let state = self.inner.state.read();
            state
                .handles
                .values()
                .map(|e| (e.seq, Arc::clone(&e.handle)))
                .collect()
        };
        entries.sort_unstable_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, handle)| handle).collect()
    }

    /// Refuse further registrations. Returns whether this call closed it.
    pub fn close(&self) -> bool {
        let mut state = self.inner.state.write();
        !std::mem::replace(&mut state.closed, true)
    }

    /// Whether registrations are refused.
    pub fn is_closed(&self) -> bool {
        self.inner.state.read().closed
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.inner.state.read().handles.len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
