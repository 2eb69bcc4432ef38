//! Graceful shutdown coordination via `CancellationToken`.
//!
//! Tasks receive their token at construction:
//! - the accept loop and the HTTP server watch [`ShutdownCoordinator::draining`]
//! - connection tasks watch [`ShutdownCoordinator::connections`], cancelled
//!   only when closing connections overruns its timeout
//! - the heartbeat monitor watches [`ShutdownCoordinator::background`]

use std::fmt;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::broadcaster::BroadcastStats;

/// The ordered steps of a graceful shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownStep {
    /// Refuse registrations and stop the accept loop.
    StopAccepting,
    /// Refuse enqueues; the broadcaster keeps draining.
    CloseQueue,
    /// Wait for the broadcaster to drain and exit.
    DrainBroadcaster,
    /// Close remaining connections and wait for their tasks.
    CloseConnections,
    /// Stop the heartbeat monitor.
    StopHeartbeat,
}

impl fmt::Display for ShutdownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StopAccepting => "stop_accepting",
            Self::CloseQueue => "close_queue",
            Self::DrainBroadcaster => "drain_broadcaster",
            Self::CloseConnections => "close_connections",
            Self::StopHeartbeat => "stop_heartbeat",
        })
    }
}

/// How one step went.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepReport {
    /// Which step.
    pub step: ShutdownStep,
    /// `false` if the step hit its timeout and its tasks were aborted.
    pub completed: bool,
    /// Time spent in the step.
    pub elapsed: Duration,
}

/// Summary returned by [`Hub::shutdown`](crate::Hub::shutdown).
#[derive(Clone, Debug, Default)]
pub struct ShutdownReport {
    /// Steps in execution order. Empty if shutdown had already run.
    pub steps: Vec<StepReport>,
    /// Messages still queued when the queue was closed.
    pub queued_at_close: usize,
    /// Broadcaster totals, if it exited on its own.
    pub broadcast: Option<BroadcastStats>,
    /// Connections closed by the shutdown itself.
    pub closed_connections: usize,
}

impl ShutdownReport {
    /// Whether every step finished within its timeout.
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|s| s.completed)
    }

    pub(crate) fn record(&mut self, step: ShutdownStep, completed: bool, elapsed: Duration) {
        self.steps.push(StepReport {
            step,
            completed,
            elapsed,
        });
    }
}

/// Coordinates graceful shutdown across all hub tasks.
pub struct ShutdownCoordinator {
    draining: CancellationToken,
    connections: CancellationToken,
    background: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            draining: CancellationToken::new(),
            connections: CancellationToken::new(),
            background: CancellationToken::new(),
        }
    }

    /// Cancelled when shutdown begins.
    pub fn draining(&self) -> CancellationToken {
        self.draining.clone()
    }

    /// Cancelled when connection tasks must stop immediately.
    pub fn connections(&self) -> CancellationToken {
        self.connections.clone()
    }

    /// Cancelled when background tasks must stop.
    pub fn background(&self) -> CancellationToken {
        self.background.clone()
    }

    /// Signal that shutdown has begun. Returns `false` if it already had.
    pub fn begin(&self) -> bool {
        if self.draining.is_cancelled() {
            return false;
        }
        self.draining.cancel();
        true
    }

    /// Force connection tasks to stop.
    pub fn force_connections(&self) {
        self.connections.cancel();
    }

    /// Stop background tasks.
    pub fn stop_background(&self) {
        self.background.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.draining.is_cancelled()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait up to `timeout` for a task. On timeout the task is aborted.
///
/// Returns the task's output, or `None` if it timed out or panicked.
pub async fn await_bounded<T>(
    step: ShutdownStep,
    mut handle: JoinHandle<T>,
    timeout: Duration,
) -> Option<T> {
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!(%step, error = %e, "shutdown task failed");
            None
        }
        Err(_) => {
            warn!(%step, ?timeout, "shutdown step timed out, aborting task");
            handle.abort();
            None
        }
    }
}
