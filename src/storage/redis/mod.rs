//! Redis storage implementation.

mod event_store;

pub use event_store::RedisEventBackend;
