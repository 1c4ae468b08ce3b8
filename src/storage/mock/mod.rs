//! Mock backend for testing fallback behaviour.
//!
//! Wraps an [`InMemoryEventBackend`] and can be told to fail like an
//! unreachable durable store.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    BackendMetrics, EventBackend, FetchQuery, InMemoryEventBackend, Result, RetentionSettings,
    StorageError,
};
use crate::event::StoredEvent;

/// Mock durable backend with switchable failures.
#[derive(Debug, Default)]
pub struct MockEventBackend {
    inner: InMemoryEventBackend,
    unreachable: RwLock<bool>,
    fail_on_connect: RwLock<bool>,
    fail_on_store: RwLock<bool>,
    fail_on_fetch: RwLock<bool>,
    store_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl MockEventBackend {
    pub fn new(retention: RetentionSettings) -> Self {
        Self {
            inner: InMemoryEventBackend::new(retention),
            ..Self::default()
        }
    }

    /// Every operation fails with a connectivity error while set.
    pub async fn set_unreachable(&self, fail: bool) {
        *self.unreachable.write().await = fail;
    }

    pub async fn set_fail_on_connect(&self, fail: bool) {
        *self.fail_on_connect.write().await = fail;
    }

    pub async fn set_fail_on_store(&self, fail: bool) {
        *self.fail_on_store.write().await = fail;
    }

    pub async fn set_fail_on_fetch(&self, fail: bool) {
        *self.fail_on_fetch.write().await = fail;
    }

    /// Store attempts, including failed ones.
    pub fn store_calls(&self) -> usize {
        self.store_calls.load(Ordering::SeqCst)
    }

    /// Fetch attempts, including failed ones.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Direct access to what the mock holds.
    pub fn inner(&self) -> &InMemoryEventBackend {
        &self.inner
    }

    async fn check(&self, flag: &RwLock<bool>) -> Result<()> {
        if *self.unreachable.read().await || *flag.read().await {
            return Err(StorageError::Connection("mock backend unreachable".to_string()));
        }
        Ok(())
    }

    async fn check_reachable(&self) -> Result<()> {
        if *self.unreachable.read().await {
            return Err(StorageError::Connection("mock backend unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EventBackend for MockEventBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self) -> Result<()> {
        self.check(&self.fail_on_connect).await
    }

    async fn disconnect(&self) {}

    async fn ping(&self) -> Result<()> {
        self.check_reachable().await
    }

    async fn store(&self, event: &StoredEvent) -> Result<()> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        self.check(&self.fail_on_store).await?;
        self.inner.store(event).await
    }

    async fn fetch(&self, query: &FetchQuery<'_>) -> Result<Vec<StoredEvent>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.check(&self.fail_on_fetch).await?;
        self.inner.fetch(query).await
    }

    async fn delete_session(&self, session_id: &str) -> Result<usize> {
        self.check_reachable().await?;
        self.inner.delete_session(session_id).await
    }

    async fn cleanup_expired(&self, now: f64) -> Result<usize> {
        self.check_reachable().await?;
        self.inner.cleanup_expired(now).await
    }

    async fn session_count(&self) -> Result<usize> {
        self.check_reachable().await?;
        self.inner.session_count().await
    }

    async fn metrics(&self) -> Result<Option<BackendMetrics>> {
        self.check_reachable().await?;
        Ok(Some(BackendMetrics {
            connected_clients: Some(1),
            used_memory_human: None,
            uptime_in_seconds: None,
        }))
    }
}
