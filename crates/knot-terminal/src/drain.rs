//! Process-wide shutdown of every terminal session

use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::registry::SessionRegistry;

/// Default time each process gets to report its exit
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Outcome of a drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Sessions whose process was asked to terminate
    pub terminated: usize,
    /// Sessions that had not reported exit when the grace period ran out
    pub timed_out: usize,
}

/// Empties the registry and kills every live process
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    registry: SessionRegistry,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            registry,
            grace: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn grace_period(&self) -> Duration {
        self.grace
    }

    /// Close the registry, terminate all sessions and wait (bounded) for them
    /// to end. Sessions exiting on their own meanwhile are handled the same way.
    pub async fn run(&self) -> DrainReport {
        let sessions = self.registry.drain_all().await;
        if sessions.is_empty() {
            info!("No terminal sessions to drain");
            return DrainReport::default();
        }

        info!(count = sessions.len(), "Terminating terminal sessions");
        for session in &sessions {
            session.terminate();
        }

        let waits = sessions.iter().map(|session| async move {
            let ended = tokio::time::timeout(self.grace, session.closed())
                .await
                .is_ok();
            if !ended {
                warn!(
                    user = %session.identity(),
                    pid = ?session.pid(),
                    grace_secs = self.grace.as_secs_f64(),
                    "Terminal process did not exit within grace period"
                );
            }
            ended
        });
        let timed_out = join_all(waits).await.into_iter().filter(|ok| !ok).count();

        let report = DrainReport {
            terminated: sessions.len(),
            timed_out,
        };
        info!(
            terminated = report.terminated,
            timed_out = report.timed_out,
            "Terminal sessions drained"
        );
        report
    }
}
