//! Storage backends.
//!
//! Two interchangeable implementations of [`EventBackend`]:
//!
//! - `RedisEventBackend` (feature: redis): durable, sorted sets per
//!   session/stream key, atomic insert + trim + expiry refresh
//! - [`InMemoryEventBackend`]: in-process ordered lists, always available
//!
//! Backends never decide about fallback; the store facade does.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::event::StoredEvent;
use crate::payload::CodecError;

pub mod memory;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::InMemoryEventBackend;
#[cfg(feature = "redis")]
pub use self::redis::RedisEventBackend;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Backend not connected: {0}")]
    NotConnected(&'static str),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl StorageError {
    /// Whether the error means the backend is unreachable, as opposed to a
    /// problem with one record or request.
    pub fn is_connectivity(&self) -> bool {
        match self {
            StorageError::NotConnected(_)
            | StorageError::Connection(_)
            | StorageError::Timeout(_) => true,
            #[cfg(feature = "redis")]
            StorageError::Redis(e) => {
                e.is_io_error()
                    || e.is_connection_refusal()
                    || e.is_connection_dropped()
                    || e.is_timeout()
            }
            StorageError::Codec(_) => false,
        }
    }
}

/// Retention settings shared by every backend.
///
/// Time-based expiry travels on each event (`StoredEvent::ttl`); the store
/// resolves its default before the event reaches a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionSettings {
    /// Upper bound on events kept per session/stream key.
    pub max_events_per_session: usize,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            max_events_per_session: 1000,
        }
    }
}

/// Read request for one session/stream key.
#[derive(Debug, Clone, Copy)]
pub struct FetchQuery<'a> {
    pub session_id: &'a str,
    pub stream_id: &'a str,
    pub event_type: Option<&'a str>,
    /// Maximum number of stored records read, oldest first.
    pub limit: usize,
    /// Current time in epoch seconds, for expiry filtering.
    pub now: f64,
}

/// Operational metrics reported by a backend server. Every field is
/// best-effort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackendMetrics {
    pub connected_clients: Option<u64>,
    pub used_memory_human: Option<String>,
    pub uptime_in_seconds: Option<u64>,
}

/// Interface for session event persistence.
///
/// Implementations:
/// - `RedisEventBackend`: durable networked storage
/// - `InMemoryEventBackend`: in-process fallback
#[async_trait]
pub trait EventBackend: Send + Sync {
    /// Short name for logs and health reports.
    fn name(&self) -> &'static str;

    /// Establish the backend's connection. Bounded in time.
    async fn connect(&self) -> Result<()>;

    /// Release the backend's connection.
    async fn disconnect(&self);

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<()>;

    /// Insert an event in order, trim the key to the retention bound and
    /// refresh the key's expiry.
    async fn store(&self, event: &StoredEvent) -> Result<()>;

    /// Read up to `limit` records oldest first, dropping undecodable,
    /// expired and non-matching events.
    async fn fetch(&self, query: &FetchQuery<'_>) -> Result<Vec<StoredEvent>>;

    /// Remove every key belonging to the session. Returns keys removed.
    async fn delete_session(&self, session_id: &str) -> Result<usize>;

    /// Remove expired data. Returns keys removed entirely.
    async fn cleanup_expired(&self, now: f64) -> Result<usize>;

    /// Number of distinct sessions holding data.
    async fn session_count(&self) -> Result<usize>;

    /// Server metrics, if the backend has a server.
    async fn metrics(&self) -> Result<Option<BackendMetrics>> {
        Ok(None)
    }
}

/// Drop expired and non-matching events, then order by identifier.
pub(crate) fn retain_visible(events: &mut Vec<StoredEvent>, query: &FetchQuery<'_>) {
    events.retain(|e| !e.is_expired_at(query.now) && e.matches_type(query.event_type));
    events.sort_by(|a, b| a.event_id.cmp(&b.event_id));
}
