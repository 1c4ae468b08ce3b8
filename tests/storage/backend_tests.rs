//! EventBackend interface tests.
//!
//! These tests verify the contract of the EventBackend trait.
//! Each backend should run these tests, constructed with
//! [`contract_retention`] and already connected.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;
use uuid::Uuid;

use session_event_store::event::{session_id_for, EventId, StoredEvent};
use session_event_store::storage::{EventBackend, FetchQuery, RetentionSettings};

/// Retention every backend under test must be built with.
pub fn contract_retention() -> RetentionSettings {
    RetentionSettings {
        max_events_per_session: 5,
    }
}

pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// A session id no other test uses.
pub fn unique_session(name: &str) -> String {
    format!("{}-{}", name, &Uuid::new_v4().simple().to_string()[..8])
}

/// Create a test event on `stream` at `ts` ms with sequence `seq`.
pub fn make_event(stream: &str, ts: u64, seq: u64) -> StoredEvent {
    StoredEvent {
        session_id: session_id_for(stream).to_string(),
        stream_id: stream.to_string(),
        event_id: EventId::new(stream, ts, seq),
        event_type: "message".to_string(),
        payload: json!({"seq": seq}),
        created_at: ts as f64 / 1000.0,
        ttl: None,
    }
}

fn query<'a>(session: &'a str, stream: &'a str) -> FetchQuery<'a> {
    FetchQuery {
        session_id: session,
        stream_id: stream,
        event_type: None,
        limit: 100,
        now: now_secs(),
    }
}

fn ids(events: &[StoredEvent]) -> Vec<String> {
    events.iter().map(|e| e.event_id.to_string()).collect()
}

/// Millisecond base close to the current time.
fn base_ms() -> u64 {
    (now_secs() * 1000.0) as u64
}

// =============================================================================
// store / fetch
// =============================================================================

pub async fn test_store_single_event<B: EventBackend>(backend: &B) {
    let session = unique_session("single");
    let event = make_event(&session, base_ms(), 1);

    backend.store(&event).await.expect("store should succeed");

    let events = backend
        .fetch(&query(&session, &session))
        .await
        .expect("fetch should succeed");
    assert_eq!(events.len(), 1, "should have 1 event");
    assert_eq!(events[0].event_id, event.event_id);
    assert_eq!(events[0].session_id, session);
    assert_eq!(events[0].event_type, "message");
    assert_eq!(events[0].payload, json!({"seq": 1}));
}

pub async fn test_fetch_empty_key<B: EventBackend>(backend: &B) {
    let session = unique_session("empty");
    let events = backend
        .fetch(&query(&session, &session))
        .await
        .expect("fetch should succeed");
    assert!(events.is_empty(), "unknown key should read as empty");
}

pub async fn test_fetch_orders_by_event_id<B: EventBackend>(backend: &B) {
    let session = unique_session("order");
    let base = base_ms();

    for (ts, seq) in [(base + 2, 3), (base, 1), (base + 1, 2), (base + 1, 9)] {
        backend
            .store(&make_event(&session, ts, seq))
            .await
            .expect("store should succeed");
    }

    let events = backend.fetch(&query(&session, &session)).await.unwrap();
    let order: Vec<(u64, u64)> = events.iter().map(|e| e.event_id.order()).collect();
    assert_eq!(
        order,
        vec![(base, 1), (base + 1, 2), (base + 1, 9), (base + 2, 3)],
        "events should come back in identifier order"
    );
}

pub async fn test_fetch_respects_limit<B: EventBackend>(backend: &B) {
    let session = unique_session("limit");
    let base = base_ms();
    for i in 0..4 {
        backend
            .store(&make_event(&session, base + i, i + 1))
            .await
            .unwrap();
    }

    let mut q = query(&session, &session);
    q.limit = 2;
    let events = backend.fetch(&q).await.unwrap();
    assert_eq!(
        ids(&events),
        vec![
            EventId::new(session.as_str(), base, 1).to_string(),
            EventId::new(session.as_str(), base + 1, 2).to_string()
        ],
        "limit should take the oldest events"
    );

    q.limit = 0;
    assert!(backend.fetch(&q).await.unwrap().is_empty());
}

pub async fn test_fetch_unbounded_limit<B: EventBackend>(backend: &B) {
    let session = unique_session("unbounded");
    let base = base_ms();
    for i in 0..3 {
        backend
            .store(&make_event(&session, base + i, i + 1))
            .await
            .unwrap();
    }

    let mut q = query(&session, &session);
    q.limit = usize::MAX;
    let events = backend.fetch(&q).await.unwrap();
    assert_eq!(events.len(), 3, "an unbounded limit should return every event");
    assert_eq!(events[2].event_id.order(), (base + 2, 3));
}

pub async fn test_same_millisecond_trim_evicts_lowest_sequence<B: EventBackend>(backend: &B) {
    let session = unique_session("tie");
    let base = base_ms();
    let max = contract_retention().max_events_per_session as u64;

    // Payloads vary so encoded records do not sort like their sequences.
    for seq in (1..=max + 2).rev() {
        let mut event = make_event(&session, base, seq);
        event.payload = json!({"seq": seq, "pad": "z".repeat((seq * 7 % 5) as usize)});
        backend.store(&event).await.unwrap();
    }

    let events = backend.fetch(&query(&session, &session)).await.unwrap();
    let seqs: Vec<u64> = events.iter().map(|e| e.event_id.sequence()).collect();
    assert_eq!(seqs, (3..=max + 2).collect::<Vec<_>>());

    let mut q = query(&session, &session);
    q.limit = 2;
    let oldest = backend.fetch(&q).await.unwrap();
    let seqs: Vec<u64> = oldest.iter().map(|e| e.event_id.sequence()).collect();
    assert_eq!(seqs, vec![3, 4], "limit should take the lowest sequences");
}

pub async fn test_fetch_filters_event_type<B: EventBackend>(backend: &B) {
    let session = unique_session("types");
    let base = base_ms();

    let mut status = make_event(&session, base, 1);
    status.event_type = "status".to_string();
    backend.store(&status).await.unwrap();
    backend
        .store(&make_event(&session, base + 1, 2))
        .await
        .unwrap();

    let mut q = query(&session, &session);
    q.event_type = Some("status");
    let events = backend.fetch(&q).await.unwrap();
    assert_eq!(
        ids(&events),
        vec![status.event_id.to_string()],
        "only matching type should be returned"
    );
}

pub async fn test_fetch_hides_expired<B: EventBackend>(backend: &B) {
    let session = unique_session("expired");
    let now = now_secs();
    let base = (now * 1000.0) as u64;

    let mut stale = make_event(&session, base - 100_000, 1);
    stale.ttl = Some(10);
    let mut fresh = make_event(&session, base, 2);
    fresh.ttl = Some(600);
    backend.store(&stale).await.unwrap();
    backend.store(&fresh).await.unwrap();

    let events = backend.fetch(&query(&session, &session)).await.unwrap();
    assert_eq!(
        ids(&events),
        vec![fresh.event_id.to_string()],
        "expired events must not be returned"
    );
}

pub async fn test_store_trims_to_retention<B: EventBackend>(backend: &B) {
    let session = unique_session("trim");
    let base = base_ms();
    let max = contract_retention().max_events_per_session as u64;

    for i in 0..max + 3 {
        backend
            .store(&make_event(&session, base + i, i + 1))
            .await
            .unwrap();
    }

    let events = backend.fetch(&query(&session, &session)).await.unwrap();
    assert_eq!(events.len() as u64, max, "key should hold at most the bound");
    assert_eq!(
        events[0].event_id.order(),
        (base + 3, 4),
        "oldest events should be trimmed first"
    );
}

pub async fn test_streams_are_separate<B: EventBackend>(backend: &B) {
    let session = unique_session("streams");
    let chat = format!("{session}:chat");
    let base = base_ms();

    backend.store(&make_event(&session, base, 1)).await.unwrap();
    backend.store(&make_event(&chat, base, 2)).await.unwrap();

    let main = backend.fetch(&query(&session, &session)).await.unwrap();
    let side = backend.fetch(&query(&session, &chat)).await.unwrap();
    assert_eq!(main.len(), 1);
    assert_eq!(side.len(), 1);
    assert_eq!(side[0].stream_id, chat);
}

// =============================================================================
// delete / cleanup / count
// =============================================================================

pub async fn test_delete_session_removes_all_streams<B: EventBackend>(backend: &B) {
    let session = unique_session("delete");
    let chat = format!("{session}:chat");
    let base = base_ms();

    backend.store(&make_event(&session, base, 1)).await.unwrap();
    backend.store(&make_event(&chat, base, 2)).await.unwrap();

    let removed = backend.delete_session(&session).await.unwrap();
    assert_eq!(removed, 2, "both keys of the session should be removed");
    assert!(backend
        .fetch(&query(&session, &chat))
        .await
        .unwrap()
        .is_empty());
}

pub async fn test_delete_missing_session<B: EventBackend>(backend: &B) {
    let session = unique_session("missing");
    let removed = backend
        .delete_session(&session)
        .await
        .expect("deleting nothing should succeed");
    assert_eq!(removed, 0);
}

pub async fn test_delete_does_not_touch_prefixed_sessions<B: EventBackend>(backend: &B) {
    let session = unique_session("near");
    let neighbour = format!("{session}x");
    let base = base_ms();

    backend.store(&make_event(&neighbour, base, 1)).await.unwrap();
    backend.delete_session(&session).await.unwrap();

    let kept = backend.fetch(&query(&neighbour, &neighbour)).await.unwrap();
    assert_eq!(kept.len(), 1, "a session sharing a name prefix must survive");
}

pub async fn test_cleanup_removes_fully_expired_keys<B: EventBackend>(backend: &B) {
    let session = unique_session("cleanup");
    let base = base_ms();

    let mut event = make_event(&session, base, 1);
    event.ttl = Some(60);
    backend.store(&event).await.unwrap();

    let later = now_secs() + 120.0;
    let removed = backend.cleanup_expired(later).await.unwrap();
    assert!(removed >= 1, "expired key should be removed");

    let mut q = query(&session, &session);
    q.now = 0.0;
    assert!(
        backend.fetch(&q).await.unwrap().is_empty(),
        "removed key should be gone even ignoring expiry"
    );
}

pub async fn test_cleanup_keeps_live_keys<B: EventBackend>(backend: &B) {
    let session = unique_session("live");
    backend
        .store(&make_event(&session, base_ms(), 1))
        .await
        .unwrap();

    backend.cleanup_expired(now_secs()).await.unwrap();

    let events = backend.fetch(&query(&session, &session)).await.unwrap();
    assert_eq!(events.len(), 1, "events without TTL survive cleanup");
}

pub async fn test_cleanup_prunes_expired_members_of_live_keys<B: EventBackend>(backend: &B) {
    let session = unique_session("partial");
    let base = base_ms();

    let mut stale = make_event(&session, base - 100_000, 1);
    stale.ttl = Some(10);
    let keeper = make_event(&session, base, 2);
    backend.store(&stale).await.unwrap();
    backend.store(&keeper).await.unwrap();

    backend.cleanup_expired(now_secs()).await.unwrap();

    let mut q = query(&session, &session);
    q.now = 0.0;
    assert_eq!(
        ids(&backend.fetch(&q).await.unwrap()),
        vec![keeper.event_id.to_string()],
        "cleanup should drop the expired member and keep the live one"
    );
}

pub async fn test_untimed_event_outlives_earlier_ttl<B: EventBackend>(backend: &B) {
    let session = unique_session("persist");
    let base = base_ms();

    let mut brief = make_event(&session, base, 1);
    brief.ttl = Some(1);
    backend.store(&brief).await.unwrap();
    let forever = make_event(&session, base + 1, 2);
    backend.store(&forever).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(2100)).await;

    let events = backend.fetch(&query(&session, &session)).await.unwrap();
    assert_eq!(
        ids(&events),
        vec![forever.event_id.to_string()],
        "an event without TTL must not expire with the key"
    );
}

pub async fn test_session_count_tracks_sessions<B: EventBackend>(backend: &B) {
    let before = backend.session_count().await.unwrap();

    let session = unique_session("count");
    let base = base_ms();
    backend.store(&make_event(&session, base, 1)).await.unwrap();
    backend
        .store(&make_event(&format!("{session}:chat"), base, 2))
        .await
        .unwrap();

    assert_eq!(
        backend.session_count().await.unwrap(),
        before + 1,
        "two streams of one session count once"
    );

    backend.delete_session(&session).await.unwrap();
    assert_eq!(backend.session_count().await.unwrap(), before);
}

pub async fn test_ping<B: EventBackend>(backend: &B) {
    backend.ping().await.expect("connected backend should answer");
}

/// Run all EventBackend contract tests against a backend.
#[macro_export]
macro_rules! run_backend_tests {
    ($backend:expr) => {
        use $crate::storage::backend_tests::*;

        test_ping($backend).await;
        println!("  test_ping: PASSED");

        // store / fetch
        test_store_single_event($backend).await;
        println!("  test_store_single_event: PASSED");

        test_fetch_empty_key($backend).await;
        println!("  test_fetch_empty_key: PASSED");

        test_fetch_orders_by_event_id($backend).await;
        println!("  test_fetch_orders_by_event_id: PASSED");

        test_fetch_respects_limit($backend).await;
        println!("  test_fetch_respects_limit: PASSED");

        test_fetch_unbounded_limit($backend).await;
        println!("  test_fetch_unbounded_limit: PASSED");

        test_same_millisecond_trim_evicts_lowest_sequence($backend).await;
        println!("  test_same_millisecond_trim_evicts_lowest_sequence: PASSED");

        test_fetch_filters_event_type($backend).await;
        println!("  test_fetch_filters_event_type: PASSED");

        test_fetch_hides_expired($backend).await;
        println!("  test_fetch_hides_expired: PASSED");

        test_store_trims_to_retention($backend).await;
        println!("  test_store_trims_to_retention: PASSED");

        test_streams_are_separate($backend).await;
        println!("  test_streams_are_separate: PASSED");

        // delete / cleanup / count
        test_delete_session_removes_all_streams($backend).await;
        println!("  test_delete_session_removes_all_streams: PASSED");

        test_delete_missing_session($backend).await;
        println!("  test_delete_missing_session: PASSED");

        test_delete_does_not_touch_prefixed_sessions($backend).await;
        println!("  test_delete_does_not_touch_prefixed_sessions: PASSED");

        test_cleanup_removes_fully_expired_keys($backend).await;
        println!("  test_cleanup_removes_fully_expired_keys: PASSED");

        test_cleanup_keeps_live_keys($backend).await;
        println!("  test_cleanup_keeps_live_keys: PASSED");

        test_cleanup_prunes_expired_members_of_live_keys($backend).await;
        println!("  test_cleanup_prunes_expired_members_of_live_keys: PASSED");

        test_untimed_event_outlives_earlier_ttl($backend).await;
        println!("  test_untimed_event_outlives_earlier_ttl: PASSED");

        test_session_count_tracks_sessions($backend).await;
        println!("  test_session_count_tracks_sessions: PASSED");
    };
}
