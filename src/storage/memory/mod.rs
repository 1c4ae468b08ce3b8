//! In-process event backend.
//!
//! Ordered `Vec` per (session, stream) key behind a single store-wide lock.
//! Events almost always arrive with increasing identifiers, so insertion
//! scans for its position from the tail. Nothing survives a restart.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{retain_visible, EventBackend, FetchQuery, Result, RetentionSettings};
use crate::event::StoredEvent;

/// Key type: (session_id, stream_id).
type StreamKey = (String, String);

/// In-memory event backend. Always available.
#[derive(Debug, Default)]
pub struct InMemoryEventBackend {
    streams: RwLock<HashMap<StreamKey, Vec<StoredEvent>>>,
    retention: RetentionSettings,
}

impl InMemoryEventBackend {
    pub fn new(retention: RetentionSettings) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// Total events held across all keys, expired or not.
    pub async fn event_count(&self) -> usize {
        self.streams.read().await.values().map(Vec::len).sum()
    }

    /// Number of session/stream keys held.
    pub async fn key_count(&self) -> usize {
        self.streams.read().await.len()
    }

    pub async fn has_key(&self, session_id: &str, stream_id: &str) -> bool {
        self.streams
            .read()
            .await
            .contains_key(&(session_id.to_string(), stream_id.to_string()))
    }
}

/// Insert keeping ascending identifier order. An event with an identifier
/// already present replaces it.
fn insert_ordered(events: &mut Vec<StoredEvent>, event: StoredEvent) {
    match events
        .iter()
        .rposition(|existing| existing.event_id <= event.event_id)
    {
        Some(i) if events[i].event_id == event.event_id => events[i] = event,
        Some(i) => events.insert(i + 1, event),
        None => events.insert(0, event),
    }
}

/// Keep only the newest `max` events.
fn trim_oldest(events: &mut Vec<StoredEvent>, max: usize) -> usize {
    let excess = events.len().saturating_sub(max);
    if excess > 0 {
        events.drain(..excess);
    }
    excess
}

#[async_trait]
impl EventBackend for InMemoryEventBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn store(&self, event: &StoredEvent) -> Result<()> {
        let key = (event.session_id.clone(), event.stream_id.clone());
        let mut streams = self.streams.write().await;
        let events = streams.entry(key).or_default();

        insert_ordered(events, event.clone());
        let trimmed = trim_oldest(events, self.retention.max_events_per_session);

        debug!(
            session_id = %event.session_id,
            stream_id = %event.stream_id,
            event_id = %event.event_id,
            trimmed,
            "Stored event in memory"
        );
        Ok(())
    }

    async fn fetch(&self, query: &FetchQuery<'_>) -> Result<Vec<StoredEvent>> {
        let key = (query.session_id.to_string(), query.stream_id.to_string());
        let streams = self.streams.read().await;

        let mut events: Vec<StoredEvent> = streams
            .get(&key)
            .map(|events| events.iter().take(query.limit).cloned().collect())
            .unwrap_or_default();
        drop(streams);

        retain_visible(&mut events, query);
        Ok(events)
    }

    async fn delete_session(&self, session_id: &str) -> Result<usize> {
        let mut streams = self.streams.write().await;
        let before = streams.len();
        streams.retain(|(session, _), _| session != session_id);
        let removed = before - streams.len();

        debug!(session_id = %session_id, keys_deleted = removed, "Deleted session from memory");
        Ok(removed)
    }

    async fn cleanup_expired(&self, now: f64) -> Result<usize> {
        let mut streams = self.streams.write().await;
        let mut pruned = 0usize;

        for events in streams.values_mut() {
            let before = events.len();
            events.retain(|e| !e.is_expired_at(now));
            pruned += before - events.len();
        }

        let before = streams.len();
        streams.retain(|_, events| !events.is_empty());
        let removed = before - streams.len();

        debug!(
            keys_removed = removed,
            events_pruned = pruned,
            "Cleaned up expired events in memory"
        );
        Ok(removed)
    }

    async fn session_count(&self) -> Result<usize> {
        let streams = self.streams.read().await;
        let sessions: HashSet<&str> = streams.keys().map(|(s, _)| s.as_str()).collect();
        Ok(sessions.len())
    }
}

#[cfg(test)]
mod tests;
