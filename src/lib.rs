//! Session Event Store
//!
//! Append-only, per-session event log with cursor-based replay, so clients
//! of a streaming service can reconnect and receive the events they missed.
//! Redis is the durable backend; an in-process backend takes over whenever
//! Redis is unreachable.

pub mod clock;
pub mod config;
pub mod event;
pub mod payload;
pub mod reaper;
pub mod storage;
pub mod store;
pub mod utils;

pub use config::StoreConfig;
pub use event::{EventId, EventIdError, EventIdGenerator, StoredEvent};
pub use payload::MessageSource;
pub use store::{
    BackendState, HealthReport, ReplayOutcome, SessionEventStore, StoreError, StoreOptions, Ttl,
};
