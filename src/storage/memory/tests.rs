use super::*;
use crate::event::EventId;
use serde_json::json;

fn event(stream: &str, ts: u64, seq: u64, ttl: Option<u64>) -> StoredEvent {
    StoredEvent {
        session_id: crate::event::session_id_for(stream).to_string(),
        stream_id: stream.to_string(),
        event_id: EventId::new(stream, ts, seq),
        event_type: "message".to_string(),
        payload: json!({"seq": seq}),
        created_at: ts as f64 / 1000.0,
        ttl,
    }
}

fn query<'a>(session: &'a str, stream: &'a str, now: f64) -> FetchQuery<'a> {
    FetchQuery {
        session_id: session,
        stream_id: stream,
        event_type: None,
        limit: 100,
        now,
    }
}

fn ids(events: &[StoredEvent]) -> Vec<String> {
    events.iter().map(|e| e.event_id.to_string()).collect()
}

#[test]
fn test_insert_ordered_from_tail() {
    let mut events = Vec::new();
    insert_ordered(&mut events, event("s", 1000, 1, None));
    insert_ordered(&mut events, event("s", 1002, 3, None));
    insert_ordered(&mut events, event("s", 1001, 2, None));
    insert_ordered(&mut events, event("s", 999, 9, None));

    assert_eq!(
        ids(&events),
        vec![
            "s:999:000009",
            "s:1000:000001",
            "s:1001:000002",
            "s:1002:000003"
        ]
    );
}

#[test]
fn test_insert_same_id_replaces() {
    let mut events = vec![event("s", 1000, 1, None)];
    let mut replacement = event("s", 1000, 1, None);
    replacement.payload = json!("new");
    insert_ordered(&mut events, replacement);

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload, json!("new"));
}

#[test]
fn test_trim_oldest() {
    let mut events: Vec<_> = (1..=5).map(|i| event("s", 1000 + i, i, None)).collect();
    assert_eq!(trim_oldest(&mut events, 3), 2);
    assert_eq!(
        ids(&events),
        vec!["s:1003:000003", "s:1004:000004", "s:1005:000005"]
    );
    assert_eq!(trim_oldest(&mut events, 3), 0);
}

#[tokio::test]
async fn test_store_trims_to_retention_bound() {
    let backend = InMemoryEventBackend::new(RetentionSettings {
        max_events_per_session: 3,
    });

    for i in 1..=7 {
        backend.store(&event("s", 1000 + i, i, None)).await.unwrap();
    }

    let events = backend.fetch(&query("s", "s", 0.0)).await.unwrap();
    assert_eq!(
        ids(&events),
        vec!["s:1005:000005", "s:1006:000006", "s:1007:000007"]
    );
}

#[tokio::test]
async fn test_fetch_honours_limit_oldest_first() {
    let backend = InMemoryEventBackend::default();
    for i in 1..=5 {
        backend.store(&event("s", 1000 + i, i, None)).await.unwrap();
    }

    let mut q = query("s", "s", 0.0);
    q.limit = 2;
    let events = backend.fetch(&q).await.unwrap();
    assert_eq!(ids(&events), vec!["s:1001:000001", "s:1002:000002"]);
}

#[tokio::test]
async fn test_fetch_skips_expired() {
    let backend = InMemoryEventBackend::default();
    // created_at = 1.0 with ttl 10 expires after 11.0
    backend.store(&event("s", 1000, 1, Some(10))).await.unwrap();
    backend.store(&event("s", 2000, 2, None)).await.unwrap();

    let live = backend.fetch(&query("s", "s", 10.9)).await.unwrap();
    assert_eq!(live.len(), 2);

    let later = backend.fetch(&query("s", "s", 11.1)).await.unwrap();
    assert_eq!(ids(&later), vec!["s:2000:000002"]);
}

#[tokio::test]
async fn test_delete_session_removes_all_streams() {
    let backend = InMemoryEventBackend::default();
    backend.store(&event("a", 1000, 1, None)).await.unwrap();
    backend.store(&event("a:tools", 1000, 2, None)).await.unwrap();
    backend.store(&event("b", 1000, 3, None)).await.unwrap();

    assert_eq!(backend.delete_session("a").await.unwrap(), 2);
    assert_eq!(backend.session_count().await.unwrap(), 1);
    assert_eq!(backend.delete_session("a").await.unwrap(), 0);
}

#[tokio::test]
async fn test_cleanup_prunes_partial_and_drops_empty_keys() {
    let backend = InMemoryEventBackend::default();
    backend.store(&event("a", 1000, 1, Some(5))).await.unwrap();
    backend.store(&event("a", 2000, 2, None)).await.unwrap();
    backend.store(&event("b", 1000, 3, Some(5))).await.unwrap();

    let removed = backend.cleanup_expired(100.0).await.unwrap();

    assert_eq!(removed, 1);
    assert!(backend.has_key("a", "a").await);
    assert!(!backend.has_key("b", "b").await);
    assert_eq!(backend.event_count().await, 1);
}

#[tokio::test]
async fn test_session_count_counts_sessions_not_streams() {
    let backend = InMemoryEventBackend::default();
    backend.store(&event("a", 1000, 1, None)).await.unwrap();
    backend.store(&event("a:x", 1000, 2, None)).await.unwrap();
    backend.store(&event("b", 1000, 3, None)).await.unwrap();

    assert_eq!(backend.session_count().await.unwrap(), 2);
    assert_eq!(backend.key_count().await, 3);
}
