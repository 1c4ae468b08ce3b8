use serde::Serialize;

use super::BackendState;
use crate::storage::BackendMetrics;

/// Snapshot returned by [`SessionEventStore::health_check`](super::SessionEventStore::health_check).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub state: BackendState,
    /// Name of the configured durable backend, if any.
    pub durable_backend: Option<&'static str>,
    pub durable_available: bool,
    /// Whether the durable backend answered a ping just now.
    pub durable_connected: bool,
    pub using_fallback: bool,
    pub fallback_enabled: bool,
    pub durable_sessions: Option<usize>,
    pub fallback_sessions: usize,
    pub total_sessions: usize,
    /// Best effort; absent when the backend does not report any.
    pub durable_metrics: Option<BackendMetrics>,
}

impl HealthReport {
    /// The store can accept writes.
    pub fn is_serving(&self) -> bool {
        match self.state {
            BackendState::DurableActive => true,
            BackendState::Degraded => self.fallback_enabled,
            BackendState::Disconnected => false,
        }
    }
}
