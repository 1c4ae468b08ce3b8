//! Periodic expiry sweeps.
//!
//! The `CleanupReaper` runs as a background task in long-lived processes,
//! calling [`SessionEventStore::cleanup_expired_sessions`] on an interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::store::SessionEventStore;

/// Default sweep spacing.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Background task removing expired session data.
pub struct CleanupReaper {
    store: Arc<SessionEventStore>,
    interval: Duration,
}

impl CleanupReaper {
    pub fn new(store: Arc<SessionEventStore>) -> Self {
        Self {
            store,
            interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }

    /// Set custom cleanup interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the reaper as a background task.
    ///
    /// Returns a handle that can be used to abort the task. The first sweep
    /// runs immediately.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                let removed = self.run_once().await;
                if removed > 0 {
                    info!(removed, "Cleanup reaper removed expired session keys");
                } else {
                    debug!("Cleanup reaper found nothing to remove");
                }
            }
        })
    }

    /// Run cleanup once (for testing or manual invocation).
    pub async fn run_once(&self) -> usize {
        self.store.cleanup_expired_sessions().await
    }
}
