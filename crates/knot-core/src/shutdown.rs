//! Graceful Shutdown Manager
//!
//! Coordinates process-wide shutdown: a drain step (terminating live terminal
//! sessions) runs first, then open connections are cancelled and given a
//! bounded window to finish.
//!
//! ## Usage
//!
//! ```ignore
//! let shutdown = ShutdownController::new();
//!
//! // Hand out tokens / guards to connection tasks
//! let guard = shutdown.track_connection();
//! let token = shutdown.token();
//!
//! // On SIGINT/SIGTERM
//! shutdown.shutdown_with(drain_sessions()).await;
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default connection drain timeout in seconds
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Shutdown phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Normal operation
    Running,
    /// Terminating live sessions; no new sessions are accepted
    Draining,
    /// Cancelling open connections
    Stopping,
    /// Shutdown complete
    Terminated,
}

impl ShutdownPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Running,
            1 => Self::Draining,
            2 => Self::Stopping,
            _ => Self::Terminated,
        }
    }
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Draining => write!(f, "Draining"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Shutdown controller for coordinating graceful shutdown
pub struct ShutdownController {
    /// Cancelled once sessions are drained; connection tasks select on it
    cancel_token: CancellationToken,
    /// Broadcast channel for phase changes
    phase_tx: broadcast::Sender<ShutdownPhase>,
    phase: AtomicU8,
    shutdown_initiated: AtomicBool,
    /// Open connection count (shared with guards)
    active_connections: Arc<AtomicU32>,
    /// How long to wait for connections after cancellation
    timeout: Duration,
}

impl ShutdownController {
    /// Create a new shutdown controller with default timeout
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS))
    }

    /// Create a new shutdown controller with custom timeout
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Arc<Self> {
        let (phase_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            cancel_token: CancellationToken::new(),
            phase_tx,
            phase: AtomicU8::new(ShutdownPhase::Running as u8),
            shutdown_initiated: AtomicBool::new(false),
            active_connections: Arc::new(AtomicU32::new(0)),
            timeout,
        })
    }

    /// Get a cancellation token for a connection task
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// Subscribe to phase changes
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownPhase> {
        self.phase_tx.subscribe()
    }

    /// Get current shutdown phase
    #[must_use]
    pub fn phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Check if shutdown has been initiated
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Register an open connection. The count drops when the guard is dropped.
    pub fn track_connection(&self) -> ConnectionGuard {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            counter: Arc::clone(&self.active_connections),
        }
    }

    /// Number of open connections
    #[must_use]
    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
        let _ = self.phase_tx.send(phase);
        info!(phase = %phase, "Shutdown phase changed");
    }

    /// Initiate graceful shutdown.
    ///
    /// 1. Run `drain` (terminate sessions) to completion
    /// 2. Cancel every connection token
    /// 3. Wait for open connections to close, up to the timeout
    ///
    /// Only the first call does anything.
    pub async fn shutdown_with<F>(self: &Arc<Self>, drain: F)
    where
        F: Future<Output = ()>,
    {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Shutdown already initiated");
            return;
        }

        info!("Initiating graceful shutdown...");

        self.set_phase(ShutdownPhase::Draining);
        drain.await;

        self.set_phase(ShutdownPhase::Stopping);
        self.cancel_token.cancel();

        let start = std::time::Instant::now();
        let check_interval = Duration::from_millis(50);
        loop {
            let open = self.active_connections();
            if open == 0 {
                info!("All connections closed");
                break;
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                warn!(
                    open_connections = open,
                    timeout_secs = self.timeout.as_secs(),
                    "Shutdown timeout exceeded, abandoning open connections"
                );
                break;
            }

            debug!(open_connections = open, "Waiting for connections to close...");
            tokio::time::sleep(check_interval).await;
        }

        self.set_phase(ShutdownPhase::Terminated);
        info!("Graceful shutdown complete");
    }

    /// Shutdown without a drain step
    pub async fn shutdown(self: &Arc<Self>) {
        self.shutdown_with(async {}).await;
    }
}

/// Tracks one open connection
///
/// Decrements the open connection count when dropped.
pub struct ConnectionGuard {
    counter: Arc<AtomicU32>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

#[cfg(test)]
mod tests;
