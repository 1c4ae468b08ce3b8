//! Session event store facade.
//!
//! The only entry point the rest of a process talks to. Owns backend
//! selection: writes and reads go to the durable backend while it is healthy
//! and to the in-process backend once it is not.
//!
//! ```text
//! Disconnected --connect ok--> DurableActive
//! Disconnected --connect failed, fallback on--> Degraded
//! DurableActive --connectivity error--> Degraded
//! Degraded --recovery probe ok--> DurableActive
//! ```
//!
//! Recovery is opportunistic: while degraded, an operation pings the durable
//! backend at most once per probe interval. There is no background loop.

mod health;
pub mod shared;

pub use health::HealthReport;

use std::convert::Infallible;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, StoreConfig};
use crate::event::{
    session_id_for, EventId, EventIdError, EventIdGenerator, StoredEvent, DEFAULT_EVENT_TYPE,
};
use crate::payload::{normalize, MessageSource};
use crate::storage::{
    retain_visible, EventBackend, FetchQuery, InMemoryEventBackend, StorageError,
};

/// Default `limit` for [`SessionEventStore::get_events`].
pub const DEFAULT_FETCH_LIMIT: usize = 100;

/// Errors surfaced by the store. Backend connectivity problems are absorbed
/// by falling back; these are the cases that cannot be.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store is not connected; call connect() first")]
    NotConnected,

    #[error("Stream id must not be empty")]
    EmptyStreamId,

    #[error("Durable backend unavailable and fallback is disabled: {0}")]
    DurableUnavailable(#[source] StorageError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Which backend is the source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendState {
    Disconnected,
    DurableActive,
    Degraded,
}

/// Lifetime applied to a stored event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Ttl {
    /// The configured default TTL.
    #[default]
    Default,
    /// No time-based expiry.
    Never,
    Seconds(u64),
}

/// Per-write options for [`SessionEventStore::store_event_with`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Classification tag; `"message"` when unset.
    pub event_type: Option<String>,
    pub ttl: Ttl,
}

impl StoreOptions {
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Result of a replay.
#[derive(Debug)]
pub enum ReplayOutcome<E = Infallible> {
    /// At least one event was delivered.
    Delivered { last_event_id: EventId, count: usize },
    /// The cursor parsed but no later event exists.
    NothingToReplay,
    /// The cursor could not be parsed.
    InvalidCursor(EventIdError),
    /// `deliver` failed; replay stopped after `delivered` events.
    Interrupted {
        last_event_id: Option<EventId>,
        delivered: usize,
        error: E,
    },
}

impl<E> ReplayOutcome<E> {
    /// Identifier of the last event handed to `deliver` successfully.
    pub fn last_event_id(&self) -> Option<&EventId> {
        match self {
            ReplayOutcome::Delivered { last_event_id, .. } => Some(last_event_id),
            ReplayOutcome::Interrupted { last_event_id, .. } => last_event_id.as_ref(),
            ReplayOutcome::NothingToReplay | ReplayOutcome::InvalidCursor(_) => None,
        }
    }

    pub fn delivered(&self) -> usize {
        match self {
            ReplayOutcome::Delivered { count, .. } => *count,
            ReplayOutcome::Interrupted { delivered, .. } => *delivered,
            ReplayOutcome::NothingToReplay | ReplayOutcome::InvalidCursor(_) => 0,
        }
    }
}

enum Route {
    Durable(Arc<dyn EventBackend>),
    Fallback,
}

/// Append-only session event log with cursor replay.
///
/// Create one per process (see [`shared::shared_store`]); the identifier
/// generator's ordering guarantee holds per instance.
pub struct SessionEventStore {
    config: StoreConfig,
    durable: Option<Arc<dyn EventBackend>>,
    fallback: Arc<InMemoryEventBackend>,
    ids: EventIdGenerator,
    clock: Arc<dyn Clock>,
    state: RwLock<BackendState>,
    last_probe: Mutex<Option<Instant>>,
}

impl SessionEventStore {
    /// Create a store with an explicit durable backend (or none).
    pub fn new(config: StoreConfig, durable: Option<Arc<dyn EventBackend>>) -> Self {
        let fallback = Arc::new(InMemoryEventBackend::new(config.retention()));
        Self {
            config,
            durable,
            fallback,
            ids: EventIdGenerator::new(),
            clock: Arc::new(SystemClock),
            state: RwLock::new(BackendState::Disconnected),
            last_probe: Mutex::new(None),
        }
    }

    /// Create a store whose durable backend is built from configuration.
    pub fn from_config(config: StoreConfig) -> Self {
        let durable = durable_from_config(&config);
        Self::new(config, durable)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub async fn state(&self) -> BackendState {
        *self.state.read().await
    }

    /// The in-process backend.
    pub fn fallback(&self) -> &InMemoryEventBackend {
        &self.fallback
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connect the durable backend.
    ///
    /// Returns `true` when the durable backend is active and `false` when
    /// serving from the in-process backend.
    pub async fn connect(&self) -> Result<bool, StoreError> {
        let Some(durable) = &self.durable else {
            if !self.config.fallback_enabled {
                return Err(StoreError::DurableUnavailable(StorageError::NotConnected(
                    "durable backend not configured",
                )));
            }
            info!("No durable backend configured; serving from memory");
            self.set_state(BackendState::Degraded).await;
            return Ok(false);
        };

        match durable.connect().await {
            Ok(()) => {
                self.set_state(BackendState::DurableActive).await;
                Ok(true)
            }
            Err(e) if self.config.fallback_enabled => {
                warn!(backend = durable.name(), error = %e, "Durable backend unavailable; using fallback");
                self.set_state(BackendState::Degraded).await;
                self.mark_probed();
                Ok(false)
            }
            Err(e) => Err(StoreError::DurableUnavailable(e)),
        }
    }

    /// Release the durable connection. In-process data is kept.
    pub async fn disconnect(&self) {
        if let Some(durable) = &self.durable {
            durable.disconnect().await;
        }
        self.set_state(BackendState::Disconnected).await;
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Store a message on a stream with the default type and TTL.
    pub async fn store_event(
        &self,
        stream_id: &str,
        message: &dyn MessageSource,
    ) -> Result<EventId, StoreError> {
        self.store_event_with(stream_id, message, StoreOptions::default())
            .await
    }

    /// Store a message on a stream.
    pub async fn store_event_with(
        &self,
        stream_id: &str,
        message: &dyn MessageSource,
        options: StoreOptions,
    ) -> Result<EventId, StoreError> {
        if stream_id.is_empty() {
            return Err(StoreError::EmptyStreamId);
        }

        let route = self.route().await?;
        let event = self.build_event(stream_id, message, options);

        if let Route::Durable(durable) = route {
            match durable.store(&event).await {
                Ok(()) => {
                    self.durable_succeeded().await;
                    return Ok(event.event_id);
                }
                Err(e) => {
                    self.durable_failed("store", &e).await;
                    if !self.config.fallback_enabled {
                        return Err(StoreError::DurableUnavailable(e));
                    }
                }
            }
        }

        self.fallback.store(&event).await?;
        Ok(event.event_id)
    }

    fn build_event(
        &self,
        stream_id: &str,
        message: &dyn MessageSource,
        options: StoreOptions,
    ) -> StoredEvent {
        let now_ms = self.clock.now_millis();
        let event_id = self.ids.next(stream_id, now_ms);
        let ttl = match options.ttl {
            Ttl::Default => self.config.default_ttl_secs,
            Ttl::Never => None,
            Ttl::Seconds(secs) => Some(secs),
        };

        StoredEvent {
            session_id: session_id_for(stream_id).to_string(),
            stream_id: stream_id.to_string(),
            event_id,
            event_type: options
                .event_type
                .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
            payload: normalize(message),
            created_at: now_ms as f64 / 1000.0,
            ttl,
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Live events of one session/stream, oldest first.
    ///
    /// `stream_id` defaults to the session id. With fallback disabled, a
    /// failed durable read returns no events (logged) instead of an error;
    /// writes in the same situation fail with `DurableUnavailable`.
    pub async fn get_events(
        &self,
        session_id: &str,
        stream_id: Option<&str>,
        event_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let query = FetchQuery {
            session_id,
            stream_id: stream_id.unwrap_or(session_id),
            event_type,
            limit,
            now: self.clock.now_secs(),
        };

        let route = self.route().await?;
        let Route::Durable(durable) = route else {
            return Ok(self.fallback.fetch(&query).await?);
        };

        // Events written while degraded stay visible after recovery, so a
        // merged read starts from both raw retained windows and filters last.
        let merge = self.config.fallback_enabled;
        let retained = self.config.max_events_per_session;
        let window = FetchQuery {
            event_type: None,
            limit: retained,
            now: f64::NEG_INFINITY,
            ..query
        };

        match durable.fetch(if merge { &window } else { &query }).await {
            Ok(events) => {
                self.durable_succeeded().await;
                if !merge {
                    return Ok(events);
                }
                let local = self.fallback.fetch(&window).await?;
                let mut merged = merge_ordered(events, local, retained, limit);
                retain_visible(&mut merged, &query);
                Ok(merged)
            }
            Err(e) => {
                self.durable_failed("fetch", &e).await;
                if merge {
                    return Ok(self.fallback.fetch(&query).await?);
                }
                warn!(
                    session_id = %query.session_id,
                    stream_id = %query.stream_id,
                    error = %e,
                    "Durable read failed and fallback is disabled; returning no events"
                );
                Ok(Vec::new())
            }
        }
    }

    /// Number of sessions holding data in the active backend.
    pub async fn get_session_count(&self) -> usize {
        let route = match self.route().await {
            Ok(route) => route,
            Err(e) => {
                debug!(error = %e, "Session count unavailable");
                return 0;
            }
        };

        if let Route::Durable(durable) = route {
            match durable.session_count().await {
                Ok(count) => {
                    self.durable_succeeded().await;
                    return count;
                }
                Err(e) => self.durable_failed("session_count", &e).await,
            }
        }

        self.fallback.session_count().await.unwrap_or_default()
    }

    // ========================================================================
    // Replay
    // ========================================================================

    /// Deliver every event after `last_event_id`, in order, one at a time.
    ///
    /// Returns the identifier of the last delivered event, or `None` when
    /// nothing qualified or the cursor could not be parsed.
    pub async fn replay_events_after<F, Fut>(
        &self,
        last_event_id: &str,
        mut deliver: F,
    ) -> Result<Option<EventId>, StoreError>
    where
        F: FnMut(StoredEvent) -> Fut,
        Fut: Future<Output = ()>,
    {
        let outcome = self
            .replay_events_after_with(last_event_id, |event| {
                let delivery = deliver(event);
                async move {
                    delivery.await;
                    Ok::<(), Infallible>(())
                }
            })
            .await?;
        Ok(outcome.last_event_id().cloned())
    }

    /// Replay with a fallible `deliver`; stops at the first delivery error.
    ///
    /// Each call to `deliver` completes before the next event is handed
    /// over, so a slow consumer slows the replay.
    pub async fn replay_events_after_with<F, Fut, E>(
        &self,
        last_event_id: &str,
        mut deliver: F,
    ) -> Result<ReplayOutcome<E>, StoreError>
    where
        F: FnMut(StoredEvent) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let cursor = match self.ids.parse(last_event_id) {
            Ok(cursor) => cursor,
            Err(e) => {
                debug!(cursor = %last_event_id, error = %e, "Unparseable replay cursor");
                return Ok(ReplayOutcome::InvalidCursor(e));
            }
        };

        let mut events = self
            .get_events(
                cursor.session_id(),
                Some(cursor.stream_id()),
                None,
                self.config
                    .replay_fetch_limit
                    .max(self.config.max_events_per_session),
            )
            .await?;
        events.retain(|e| e.event_id.order() > cursor.order());
        events.sort_by(|a, b| a.event_id.cmp(&b.event_id));

        let mut last_delivered: Option<EventId> = None;
        let mut delivered = 0usize;

        for event in events {
            let event_id = event.event_id.clone();
            if let Err(error) = deliver(event).await {
                warn!(
                    cursor = %cursor,
                    delivered,
                    "Replay interrupted by delivery failure"
                );
                return Ok(ReplayOutcome::Interrupted {
                    last_event_id: last_delivered,
                    delivered,
                    error,
                });
            }
            last_delivered = Some(event_id);
            delivered += 1;
        }

        Ok(match last_delivered {
            Some(last_event_id) => {
                debug!(cursor = %cursor, delivered, last = %last_event_id, "Replay complete");
                ReplayOutcome::Delivered {
                    last_event_id,
                    count: delivered,
                }
            }
            None => ReplayOutcome::NothingToReplay,
        })
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Delete a session from both backends.
    ///
    /// Idempotent. Returns `false` only if both deletions failed.
    pub async fn delete_session(&self, session_id: &str) -> bool {
        let mut durable_ok = false;
        if let Some(durable) = self.connected_durable().await {
            match durable.delete_session(session_id).await {
                Ok(_) => durable_ok = true,
                Err(e) => self.durable_failed("delete_session", &e).await,
            }
        }

        let fallback_ok = match self.fallback.delete_session(session_id).await {
            Ok(_) => true,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Fallback delete failed");
                false
            }
        };

        durable_ok || fallback_ok
    }

    /// Remove expired data from both backends. Returns keys removed.
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let now = self.clock.now_secs();
        let mut removed = 0usize;

        if let Some(durable) = self.connected_durable().await {
            match durable.cleanup_expired(now).await {
                Ok(count) => removed += count,
                Err(e) => self.durable_failed("cleanup_expired", &e).await,
            }
        }

        match self.fallback.cleanup_expired(now).await {
            Ok(count) => removed += count,
            Err(e) => warn!(error = %e, "Fallback cleanup failed"),
        }

        if removed > 0 {
            info!(removed, "Cleaned up expired session keys");
        }
        removed
    }

    /// Backend status, session counts and durable server metrics.
    pub async fn health_check(&self) -> HealthReport {
        let state = self.state().await;
        let fallback_sessions = self.fallback.session_count().await.unwrap_or_default();

        let mut report = HealthReport {
            state,
            durable_backend: self.durable.as_ref().map(|d| d.name()),
            durable_available: self.durable.is_some(),
            durable_connected: false,
            using_fallback: state == BackendState::Degraded && self.config.fallback_enabled,
            fallback_enabled: self.config.fallback_enabled,
            durable_sessions: None,
            fallback_sessions,
            total_sessions: fallback_sessions,
            durable_metrics: None,
        };

        if let Some(durable) = self.connected_durable().await {
            report.durable_connected = durable.ping().await.is_ok();
            if report.durable_connected {
                report.durable_sessions = durable.session_count().await.ok();
                report.durable_metrics = durable.metrics().await.ok().flatten();
            }
        }

        if let Some(durable_sessions) = report.durable_sessions {
            report.total_sessions += durable_sessions;
        }
        report
    }

    // ========================================================================
    // Backend selection
    // ========================================================================

    async fn set_state(&self, next: BackendState) {
        let mut state = self.state.write().await;
        if *state != next {
            info!(from = ?*state, to = ?next, "Session store backend state changed");
            *state = next;
        }
    }

    /// The durable backend, unless the store was never connected.
    async fn connected_durable(&self) -> Option<Arc<dyn EventBackend>> {
        if self.state().await == BackendState::Disconnected {
            return None;
        }
        self.durable.clone()
    }

    fn mark_probed(&self) {
        *self.last_probe.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }

    /// Claim the next recovery probe if the interval has elapsed.
    fn claim_probe(&self) -> bool {
        let mut last = self.last_probe.lock().unwrap_or_else(|e| e.into_inner());
        let due = last.map_or(true, |at| {
            at.elapsed() >= self.config.recovery_probe_interval()
        });
        if due {
            *last = Some(Instant::now());
        }
        due
    }

    async fn route(&self) -> Result<Route, StoreError> {
        let state = self.state().await;
        let fallback_enabled = self.config.fallback_enabled;

        match (state, &self.durable) {
            (BackendState::Disconnected, _) if fallback_enabled => Ok(Route::Fallback),
            (BackendState::Disconnected, _) => Err(StoreError::NotConnected),
            (_, None) if fallback_enabled => Ok(Route::Fallback),
            (_, None) => Err(StoreError::NotConnected),
            (BackendState::DurableActive, Some(durable)) => Ok(Route::Durable(Arc::clone(durable))),
            // Without a fallback every call is a recovery attempt.
            (BackendState::Degraded, Some(durable)) if !fallback_enabled => {
                Ok(Route::Durable(Arc::clone(durable)))
            }
            (BackendState::Degraded, Some(durable)) => {
                if self.claim_probe() && durable.ping().await.is_ok() {
                    info!(backend = durable.name(), "Durable backend recovered");
                    self.set_state(BackendState::DurableActive).await;
                    return Ok(Route::Durable(Arc::clone(durable)));
                }
                Ok(Route::Fallback)
            }
        }
    }

    /// A durable call succeeded; a degraded store is healthy again.
    async fn durable_succeeded(&self) {
        if self.state().await != BackendState::Degraded {
            return;
        }
        let mut state = self.state.write().await;
        if *state == BackendState::Degraded {
            info!("Durable backend recovered");
            *state = BackendState::DurableActive;
        }
    }

    async fn durable_failed(&self, operation: &str, error: &StorageError) {
        warn!(
            operation,
            error = %error,
            fallback = self.config.fallback_enabled,
            "Durable backend operation failed"
        );
        if error.is_connectivity() {
            if self.state().await == BackendState::DurableActive {
                self.mark_probed();
            }
            self.set_state(BackendState::Degraded).await;
        }
    }
}

/// Merge two reads of the same key, dropping duplicates.
///
/// The result is the key as one backend would hold it: at most `retained`
/// events, oldest evicted first, then the oldest `limit` of those.
fn merge_ordered(
    mut primary: Vec<StoredEvent>,
    secondary: Vec<StoredEvent>,
    retained: usize,
    limit: usize,
) -> Vec<StoredEvent> {
    primary.extend(secondary);
    primary.sort_by(|a, b| a.event_id.cmp(&b.event_id));
    primary.dedup_by(|a, b| a.event_id == b.event_id);

    let excess = primary.len().saturating_sub(retained);
    primary.drain(..excess);
    primary.truncate(limit);
    primary
}

#[cfg(feature = "redis")]
fn durable_from_config(config: &StoreConfig) -> Option<Arc<dyn EventBackend>> {
    use crate::payload::EventCodec;
    use crate::storage::RedisEventBackend;

    if !config.durable_enabled {
        return None;
    }
    let backend = RedisEventBackend::new(
        &config.redis_url,
        Some(&config.key_prefix),
        config.retention(),
    )
    .with_codec(EventCodec::new(config.compression))
    .with_timeouts(config.connect_timeout(), config.operation_timeout());
    Some(Arc::new(backend))
}

#[cfg(not(feature = "redis"))]
fn durable_from_config(config: &StoreConfig) -> Option<Arc<dyn EventBackend>> {
    if config.durable_enabled {
        warn!("Durable backend requested but 'redis' feature is not enabled");
    }
    None
}
