//! session-store-sweeper: expiry maintenance for the session event store
//!
//! Connects to the configured store, sweeps expired session data on an
//! interval and logs a health report after each sweep.
//!
//! ## Configuration
//! - `--config <path>`: YAML configuration file
//! - SESSION_STORE_CONFIG: configuration file (alternative to `--config`)
//! - SESSION_STORE__*: per-field overrides, e.g. SESSION_STORE__REDIS_URL
//! - SESSION_STORE_LOG: tracing filter (default "info")
//! - SESSION_STORE_LOG_FORMAT=json: JSON log lines

use std::sync::Arc;

use tracing::{error, info, warn};

use session_event_store::config::StoreConfig;
use session_event_store::reaper::CleanupReaper;
use session_event_store::store::SessionEventStore;
use session_event_store::utils::bootstrap::{init_tracing, parse_config_path};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = StoreConfig::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    let interval = config.cleanup_interval();

    info!(
        redis_url = %config.redis_url,
        durable_enabled = config.durable_enabled,
        cleanup_interval_secs = interval.as_secs(),
        "Starting session-store-sweeper"
    );

    let store = Arc::new(SessionEventStore::from_config(config));
    if !store.connect().await? {
        warn!("Durable backend unavailable; sweeping in-process data only");
    }

    let reaper = CleanupReaper::new(Arc::clone(&store))
        .with_interval(interval)
        .spawn();

    let health_store = Arc::clone(&store);
    let health = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let report = health_store.health_check().await;
            info!(
                state = ?report.state,
                durable_connected = report.durable_connected,
                using_fallback = report.using_fallback,
                total_sessions = report.total_sessions,
                "Session store health"
            );
        }
    });

    info!("Sweeper running, press Ctrl+C to exit");
    tokio::signal::ctrl_c().await?;

    reaper.abort();
    health.abort();
    store.disconnect().await;
    info!("Sweeper stopped");

    Ok(())
}
