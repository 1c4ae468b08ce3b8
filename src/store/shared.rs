//! Process-wide store instance.
//!
//! The durable connection and the in-process fallback are process-wide
//! resources, so a process should hold one store. The first caller builds it
//! from [`StoreConfig::load`] and connects it; later callers share it.

use std::sync::{Arc, LazyLock};

use tokio::sync::OnceCell;

use super::{SessionEventStore, StoreError};
use crate::config::StoreConfig;

static SHARED: LazyLock<OnceCell<Arc<SessionEventStore>>> = LazyLock::new(OnceCell::new);

/// Get the shared store, creating and connecting it on first use.
///
/// Concurrent first calls wait for a single initialization. A failed
/// initialization is not cached; the next call retries.
pub async fn shared_store() -> Result<Arc<SessionEventStore>, StoreError> {
    SHARED
        .get_or_try_init(|| async {
            let config = StoreConfig::load(None)?;
            let store = Arc::new(SessionEventStore::from_config(config));
            store.connect().await?;
            Ok::<_, StoreError>(store)
        })
        .await
        .map(Arc::clone)
}

/// The shared store if it has been initialized.
pub fn try_shared_store() -> Option<Arc<SessionEventStore>> {
    SHARED.get().map(Arc::clone)
}
