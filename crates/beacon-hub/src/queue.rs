//! Bounded priority dispatch queue.
//!
//! One FIFO band per [`Priority`]. `dequeue` always pops the oldest message
//! of the highest non-empty band. At capacity, a message of strictly higher
//! priority than the lowest occupied band evicts that band's oldest message;
//! anything else is rejected.

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::Arc;

use beacon_core::{HubError, Message, Priority, Result};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Outcome of a successful [`DispatchQueue::enqueue`].
#[derive(Debug)]
pub enum Enqueued {
    /// Inserted without displacing anything.
    Accepted,
    /// Inserted after evicting this lower-priority message.
    EvictedLowest(Arc<Message>),
}

#[derive(Default)]
struct QueueState {
    bands: [VecDeque<Arc<Message>>; 3],
    len: usize,
    closed: bool,
}

impl QueueState {
    fn lowest_occupied(&self) -> Option<Priority> {
        Priority::ALL
            .into_iter()
            .find(|p| !self.bands[p.index()].is_empty())
    }

    fn pop_highest(&mut self) -> Option<Arc<Message>> {
        let message = Priority::ALL
            .into_iter()
            .rev()
            .find_map(|p| self.bands[p.index()].pop_front())?;
        self.len -= 1;
        Some(message)
    }
}

/// Bounded multi-producer priority queue drained by the broadcaster.
pub struct DispatchQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    available: Notify,
}

impl DispatchQueue {
    /// Create a queue holding at most `capacity` messages.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "dispatch queue capacity must be positive");
        Self {
            capacity,
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
        }
    }

    /// Insert a message. Never blocks.
    pub fn enqueue(&self, message: impl Into<Arc<Message>>) -> Result<Enqueued> {
        let message = message.into();
        let priority = message.priority();
        let evicted = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(HubError::QueueClosed);
            }
            let evicted = if state.len >= self.capacity {
                match state.lowest_occupied() {
                    Some(lowest) if priority > lowest => {
                        let evicted = state.bands[lowest.index()].pop_front();
                        state.len -= 1;
                        evicted
                    }
                    _ => return Err(HubError::QueueFull { priority }),
                }
            } else {
                None
            };
            state.bands[priority.index()].push_back(message);
            state.len += 1;
            evicted
        };
        self.available.notify_one();
        Ok(evicted.map_or(Enqueued::Accepted, Enqueued::EvictedLowest))
    }

    /// Wait for the next message.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn dequeue(&self) -> Option<Arc<Message>> {
        loop {
            let mut notified = pin!(self.available.notified());
            // Register before checking so a concurrent enqueue or close
            // cannot slip between the check and the wait.
            let _ = notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if let Some(message) = state.pop_highest() {
                    return Some(message);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Pop the next message if one is available.
    pub fn try_dequeue(&self) -> Option<Arc<Message>> {
        self.state.lock().pop_highest()
    }

    /// Refuse further enqueues. Queued messages remain available to
    /// `dequeue`, which returns `None` once they are drained.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_waiters();
    }

    /// Whether enqueues are refused.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Messages currently queued.
    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum messages held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queued messages per priority, lowest first.
    pub fn depth_by_priority(&self) -> [usize; 3] {
        let state = self.state.lock();
        [
            state.bands[0].len(),
            state.bands[1].len(),
            state.bands[2].len(),
        ]
    }
}
