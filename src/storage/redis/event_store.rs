//! Redis event backend.
//!
//! One sorted set per (session, stream) key, scored by the identifier's
//! millisecond timestamp. Members are encoded events behind a fixed-width
//! `ts:seq:` prefix, so members sharing a score still rank in identifier
//! order. Each write runs ZADD + ZREMRANGEBYRANK + EXPIRE (or PERSIST) as one
//! MULTI/EXEC batch.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisResult};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::event::{EventId, StoredEvent};
use crate::payload::EventCodec;
use crate::storage::{
    retain_visible, BackendMetrics, EventBackend, FetchQuery, Result, RetentionSettings,
    StorageError,
};

/// Default prefix for all keys.
pub const DEFAULT_KEY_PREFIX: &str = "session_events";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(2);
const SCAN_COUNT: usize = 100;

/// `{ts:020}:{seq:06}:`
const ORDER_PREFIX_LEN: usize = 28;

/// Redis event backend.
///
/// Uses sorted sets so range reads per key come back oldest first.
pub struct RedisEventBackend {
    url: String,
    key_prefix: String,
    retention: RetentionSettings,
    codec: EventCodec,
    connect_timeout: Duration,
    operation_timeout: Duration,
    conn: RwLock<Option<ConnectionManager>>,
}

impl RedisEventBackend {
    /// Create a disconnected Redis backend.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., redis://localhost:6379)
    /// * `key_prefix` - Prefix for all keys (default: "session_events")
    /// * `retention` - Per-key count bound
    pub fn new(url: &str, key_prefix: Option<&str>, retention: RetentionSettings) -> Self {
        Self {
            url: url.to_string(),
            key_prefix: key_prefix.unwrap_or(DEFAULT_KEY_PREFIX).to_string(),
            retention,
            codec: EventCodec::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            conn: RwLock::new(None),
        }
    }

    pub fn with_codec(mut self, codec: EventCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, operation: Duration) -> Self {
        self.connect_timeout = connect;
        self.operation_timeout = operation;
        self
    }

    /// Build the events key for a session/stream.
    pub(super) fn events_key(&self, session_id: &str, stream_id: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, session_id, stream_id)
    }

    /// SCAN pattern matching every key of a session.
    pub(super) fn session_pattern(&self, session_id: &str) -> String {
        format!("{}:{}:*", self.key_prefix, escape_glob(session_id))
    }

    fn all_keys_pattern(&self) -> String {
        format!("{}:*", escape_glob(&self.key_prefix))
    }

    /// Extract the session component of an events key.
    pub(super) fn session_from_key<'k>(&self, key: &'k str) -> Option<&'k str> {
        let rest = key.strip_prefix(&self.key_prefix)?.strip_prefix(':')?;
        rest.split_once(':').map(|(session, _)| session)
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        self.conn
            .read()
            .await
            .clone()
            .ok_or(StorageError::NotConnected("redis"))
    }

    /// Run one Redis round trip under the operation timeout.
    async fn bounded<T, F>(&self, op: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match timeout(self.operation_timeout, op).await {
            Ok(result) => result.map_err(StorageError::from),
            Err(_) => Err(StorageError::Timeout(self.operation_timeout)),
        }
    }

    /// Collect keys matching a pattern with non-blocking SCAN iteration.
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let mut cursor = 0u64;
        let mut keys: Vec<String> = Vec::new();

        loop {
            let (next_cursor, batch): (u64, Vec<String>) = self
                .bounded(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_COUNT)
                        .query_async(&mut conn),
                )
                .await?;

            keys.extend(batch);
            cursor = next_cursor;

            if cursor == 0 {
                break;
            }
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    fn decode_member(&self, key: &str, member: &[u8]) -> Option<StoredEvent> {
        match self.codec.deserialize(member_payload(member)) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(key = %key, error = %e, "Dropping undecodable event record");
                None
            }
        }
    }

    /// Decode members, logging and skipping any that fail.
    fn decode_members(&self, key: &str, members: Vec<Vec<u8>>) -> Vec<StoredEvent> {
        members
            .iter()
            .filter_map(|member| self.decode_member(key, member))
            .collect()
    }

    /// Raw members of a key whose events have expired at `now`.
    ///
    /// Undecodable members are never selected.
    pub(super) fn expired_members(
        &self,
        key: &str,
        members: Vec<Vec<u8>>,
        now: f64,
    ) -> Vec<Vec<u8>> {
        members
            .into_iter()
            .filter(|member| {
                self.decode_member(key, member)
                    .is_some_and(|event| event.is_expired_at(now))
            })
            .collect()
    }
}

#[async_trait]
impl EventBackend for RedisEventBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn connect(&self) -> Result<()> {
        let client = Client::open(self.url.as_str())?;

        let conn = match timeout(self.connect_timeout, ConnectionManager::new(client)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(StorageError::Connection(e.to_string())),
            Err(_) => return Err(StorageError::Timeout(self.connect_timeout)),
        };

        let mut probe = conn.clone();
        let ping: std::result::Result<RedisResult<String>, _> =
            timeout(self.connect_timeout, redis::cmd("PING").query_async(&mut probe)).await;
        match ping {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(StorageError::Connection(e.to_string())),
            Err(_) => return Err(StorageError::Timeout(self.connect_timeout)),
        }

        *self.conn.write().await = Some(conn);
        info!(url = %self.url, prefix = %self.key_prefix, "Connected to Redis");
        Ok(())
    }

    async fn disconnect(&self) {
        if self.conn.write().await.take().is_some() {
            info!(url = %self.url, "Disconnected from Redis");
        }
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = self
            .bounded(redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn store(&self, event: &StoredEvent) -> Result<()> {
        let key = self.events_key(&event.session_id, &event.stream_id);
        let member = encode_member(&event.event_id, self.codec.serialize(event)?);
        let keep = self.retention.max_events_per_session as isize;
        let mut conn = self.connection().await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .zadd(&key, member, event.event_id.score())
            .ignore()
            .zremrangebyrank(&key, 0, -keep - 1)
            .ignore();
        // The key's expiry follows its newest event.
        match event.ttl {
            Some(ttl) => pipe.expire(&key, ttl as i64).ignore(),
            None => pipe.persist(&key).ignore(),
        };

        let _: () = self.bounded(pipe.query_async(&mut conn)).await?;

        debug!(
            session_id = %event.session_id,
            stream_id = %event.stream_id,
            event_id = %event.event_id,
            "Stored event in Redis"
        );
        Ok(())
    }

    async fn fetch(&self, query: &FetchQuery<'_>) -> Result<Vec<StoredEvent>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }

        let key = self.events_key(query.session_id, query.stream_id);
        let mut conn = self.connection().await?;

        let members: Vec<Vec<u8>> = self
            .bounded(conn.zrange(&key, 0, range_stop(query.limit)))
            .await?;

        let mut events = self.decode_members(&key, members);
        retain_visible(&mut events, query);
        Ok(events)
    }

    async fn delete_session(&self, session_id: &str) -> Result<usize> {
        let keys = self.scan_keys(&self.session_pattern(session_id)).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection().await?;
        let _: () = self.bounded(conn.del(&keys)).await?;

        debug!(
            session_id = %session_id,
            keys_deleted = keys.len(),
            "Deleted session from Redis"
        );
        Ok(keys.len())
    }

    async fn cleanup_expired(&self, now: f64) -> Result<usize> {
        let keys = self.scan_keys(&self.all_keys_pattern()).await?;
        let mut conn = self.connection().await?;
        let mut removed = 0usize;

        let mut pruned = 0usize;

        for key in &keys {
            let members: Vec<Vec<u8>> = self.bounded(conn.zrange(key, 0, -1)).await?;
            let expired = self.expired_members(key, members, now);
            if expired.is_empty() {
                continue;
            }

            // Only the members judged expired are removed; Redis drops the
            // key itself once it is empty. Members stored since the read stay.
            let (zremmed, exists): (usize, bool) = self
                .bounded(
                    redis::pipe()
                        .atomic()
                        .zrem(key, &expired)
                        .exists(key)
                        .query_async(&mut conn),
                )
                .await?;

            pruned += zremmed;
            if !exists {
                removed += 1;
            }
        }

        debug!(
            keys_scanned = keys.len(),
            keys_removed = removed,
            members_pruned = pruned,
            "Cleaned up expired Redis keys"
        );
        Ok(removed)
    }

    async fn session_count(&self) -> Result<usize> {
        let keys = self.scan_keys(&self.all_keys_pattern()).await?;
        let sessions: HashSet<&str> = keys
            .iter()
            .filter_map(|k| self.session_from_key(k))
            .collect();
        Ok(sessions.len())
    }

    async fn metrics(&self) -> Result<Option<BackendMetrics>> {
        let mut conn = self.connection().await?;
        let info: String = self
            .bounded(redis::cmd("INFO").query_async(&mut conn))
            .await?;
        Ok(Some(parse_info(&info)))
    }
}

/// Prefix the codec bytes with the identifier's order.
pub(super) fn encode_member(event_id: &EventId, payload: Vec<u8>) -> Vec<u8> {
    let (ts, seq) = event_id.order();
    let mut member = format!("{ts:020}:{seq:06}:").into_bytes();
    member.extend(payload);
    member
}

/// The codec bytes of a member. Members without an order prefix are
/// returned whole.
pub(super) fn member_payload(member: &[u8]) -> &[u8] {
    match member.get(..ORDER_PREFIX_LEN) {
        Some(head) if is_order_prefix(head) => &member[ORDER_PREFIX_LEN..],
        _ => member,
    }
}

fn is_order_prefix(head: &[u8]) -> bool {
    head.iter().enumerate().all(|(i, b)| match i {
        20 | 27 => *b == b':',
        _ => b.is_ascii_digit(),
    })
}

/// ZRANGE stop index covering the first `limit` members.
pub(super) fn range_stop(limit: usize) -> isize {
    isize::try_from(limit).map_or(-1, |l| l - 1)
}

/// Pull the metrics we report out of an INFO reply.
pub(super) fn parse_info(info: &str) -> BackendMetrics {
    let mut metrics = BackendMetrics::default();
    for line in info.lines() {
        let Some((field, value)) = line.trim().split_once(':') else {
            continue;
        };
        match field {
            "connected_clients" => metrics.connected_clients = value.parse().ok(),
            "used_memory_human" => metrics.used_memory_human = Some(value.to_string()),
            "uptime_in_seconds" => metrics.uptime_in_seconds = value.parse().ok(),
            _ => {}
        }
    }
    metrics
}

/// Escape glob metacharacters for SCAN MATCH.
fn escape_glob(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
