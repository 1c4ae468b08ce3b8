//! Event data model.
//!
//! A [`StoredEvent`] is created only by the store's write path and is
//! immutable afterwards. It leaves a backend by count trimming, session
//! deletion, or a cleanup sweep.

mod id;

pub use id::{
    session_id_for, EventId, EventIdError, EventIdGenerator, ID_SEPARATOR, SEQUENCE_WIDTH,
};

use serde::{Deserialize, Serialize};

/// Event type used when the caller does not classify the event.
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// One record in a session/stream log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub session_id: String,
    pub stream_id: String,
    pub event_id: EventId,
    pub event_type: String,
    /// Normalized, serialization-safe form of the original message.
    pub payload: serde_json::Value,
    /// Wall-clock write time, seconds since the Unix epoch.
    pub created_at: f64,
    /// Lifetime in seconds. `None` never expires by time.
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl StoredEvent {
    /// Expired iff a TTL is set and `now - created_at > ttl`.
    pub fn is_expired_at(&self, now: f64) -> bool {
        match self.ttl {
            Some(ttl) => now - self.created_at > ttl as f64,
            None => false,
        }
    }

    pub fn expires_at(&self) -> Option<f64> {
        self.ttl.map(|ttl| self.created_at + ttl as f64)
    }

    /// `None` matches every type.
    pub fn matches_type(&self, event_type: Option<&str>) -> bool {
        event_type.map_or(true, |t| self.event_type == t)
    }
}
