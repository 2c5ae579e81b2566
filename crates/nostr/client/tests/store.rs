//! Projection stores over the mock relay network.

mod common;

use common::{MockTransport, event, manager};
use hub_client::projections::{LiveEvent, Studio};
use hub_client::{
    Filter, LiveEvents, Prefetch, Projection, ProjectionStore, StoreOptions, StoreSnapshot, StoreStatus, Studios,
    TrustRelays,
};
use hub_nostr::{Event, KIND_LIVE_EVENT, KIND_STUDIO, unix_now};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const RELAY: &str = "wss://relay.example";

fn transport() -> Arc<MockTransport> {
    MockTransport::new().reachable(RELAY, Duration::from_millis(20))
}

fn trusting() -> StoreOptions {
    StoreOptions {
        verifier: Arc::new(TrustRelays),
        prefetch: None,
    }
}

fn live(seed: &str, d: &str, participants: u64) -> Event {
    let participants = participants.to_string();
    event(
        seed,
        KIND_LIVE_EVENT,
        unix_now(),
        &[
            &["d", d],
            &["status", "live"],
            &["current_participants", participants.as_str()],
            &["service", "https://zap.stream"],
        ],
        "",
    )
}

fn studio(seed: &str, d: &str, content: &str) -> Event {
    event(seed, KIND_STUDIO, unix_now(), &[&["d", d]], content)
}

/// Let spawned tasks run until they block.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

async fn streaming<P: hub_client::Projection>(store: &ProjectionStore<P>) {
    store
        .watch()
        .wait_for(|s: &StoreSnapshot<P::Record>| s.status == StoreStatus::Streaming)
        .await
        .unwrap();
}

fn ids(records: &[LiveEvent]) -> Vec<&str> {
    records.iter().map(|r| &r.event_id[60..]).collect()
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_start_opens_one_subscription() {
    let transport = transport();
    let store = ProjectionStore::with_options(
        LiveEvents::new(),
        manager(&[RELAY], transport.clone()),
        trusting(),
    );

    tokio::join!(store.start(), store.start(), store.start());
    streaming(&store).await;
    store.start().await;
    settle().await;

    assert_eq!(transport.subscribe_count(), 1);
    assert_eq!(store.status(), StoreStatus::Streaming);
}

#[tokio::test(start_paused = true)]
async fn test_records_replaced_sorted_and_capped() {
    let transport = transport();
    let store = ProjectionStore::with_options(
        LiveEvents::new().limit(2),
        manager(&[RELAY], transport.clone()),
        trusting(),
    );
    store.start().await;
    streaming(&store).await;

    transport.push(&live("a001", "x", 100));
    transport.push(&live("b002", "x", 200));
    transport.push(&live("c003", "y", 50));
    settle().await;
    assert_eq!(ids(&store.records()), ["b002", "c003"]);

    // A third address pushes the least watched one out
    transport.push(&live("d004", "z", 300));
    settle().await;
    assert_eq!(ids(&store.records()), ["d004", "b002"]);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_content_ignored() {
    let transport = transport();
    let store = ProjectionStore::with_options(Studios, manager(&[RELAY], transport.clone()), trusting());
    store.start().await;
    streaming(&store).await;

    transport.push(&studio("1", "broken", "{not json"));
    transport.push(&studio("2", "nameless", r#"{"items":[]}"#));
    transport.push(&studio(
        "3",
        "loft",
        r#"{"name":"Loft","items":[{"type":"image","url":"https://img.example/1.png"},{"type":"hologram"}]}"#,
    ));
    settle().await;

    let records: Vec<Studio> = store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].d, "loft");
    assert_eq!(records[0].content.items.len(), 1);
    assert!(store.snapshot().error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_unverified_events_dropped_by_default() {
    let transport = transport();
    let store = ProjectionStore::new(LiveEvents::new(), manager(&[RELAY], transport.clone()));
    store.start().await;
    streaming(&store).await;

    transport.push(&live("1", "x", 10));
    settle().await;

    assert!(store.records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_relay_close_keeps_records_and_reports_error() {
    let transport = transport();
    let store = ProjectionStore::with_options(
        LiveEvents::new(),
        manager(&[RELAY], transport.clone()),
        trusting(),
    );
    store.start().await;
    streaming(&store).await;

    transport.push(&live("1", "x", 10));
    settle().await;
    transport.close_all("error: shutting down");
    settle().await;

    let snapshot = store.snapshot();
    assert_eq!(snapshot.status, StoreStatus::Stopped);
    assert_eq!(snapshot.error.as_deref(), Some("error: shutting down"));
    assert_eq!(snapshot.records.len(), 1);
    assert!(!snapshot.loading);

    // A restart clears the error and subscribes again
    store.start().await;
    streaming(&store).await;
    assert!(store.snapshot().error.is_none());
    assert_eq!(transport.subscribe_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_loading_cleared_on_eose() {
    let transport = transport().auto_eose(true);
    transport.with_stored(vec![live("1", "x", 10)]);
    let store = ProjectionStore::with_options(
        LiveEvents::new(),
        manager(&[RELAY], transport.clone()),
        trusting(),
    );
    store.start().await;
    assert!(store.snapshot().loading);

    store.watch().wait_for(|s| !s.loading).await.unwrap();
    assert_eq!(store.records().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_loading_cleared_without_eose_after_fallback() {
    let transport = transport();
    let store = ProjectionStore::with_options(
        LiveEvents::new(),
        manager(&[RELAY], transport.clone()),
        trusting(),
    );
    store.start().await;
    streaming(&store).await;

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert!(store.snapshot().loading);

    tokio::time::sleep(Duration::from_millis(600)).await;
    let snapshot = store.snapshot();
    assert!(!snapshot.loading);
    assert_eq!(snapshot.status, StoreStatus::Streaming);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() {
    let transport = transport();
    let store = ProjectionStore::with_options(
        LiveEvents::new(),
        manager(&[RELAY], transport.clone()),
        trusting(),
    );
    store.stop().await;

    store.start().await;
    streaming(&store).await;
    store.stop().await;
    store.stop().await;
    settle().await;

    assert_eq!(store.status(), StoreStatus::Stopped);
    assert_eq!(transport.cancel_count(), 1);

    // Events arriving after stop are not applied
    transport.push(&live("1", "x", 10));
    settle().await;
    assert!(store.records().is_empty());
}

#[derive(Default)]
struct Recorder {
    keys: Mutex<Vec<String>>,
}

impl Prefetch for Recorder {
    fn prefetch(&self, key: String) {
        self.keys.lock().unwrap().push(key);
    }
}

#[tokio::test(start_paused = true)]
async fn test_authors_prefetched_once() {
    let transport = transport();
    let recorder = Arc::new(Recorder::default());
    let store = ProjectionStore::with_options(
        LiveEvents::new(),
        manager(&[RELAY], transport.clone()),
        StoreOptions {
            verifier: Arc::new(TrustRelays),
            prefetch: Some(recorder.clone() as Arc<dyn Prefetch>),
        },
    );
    store.start().await;
    streaming(&store).await;

    transport.push(&live("1", "x", 10));
    transport.push(&live("2", "y", 20));
    settle().await;

    assert_eq!(*recorder.keys.lock().unwrap(), vec!["a".repeat(64)]);
}

#[tokio::test(start_paused = true)]
async fn test_restart_prefetches_authors_again() {
    let transport = transport();
    let recorder = Arc::new(Recorder::default());
    let store = ProjectionStore::with_options(
        LiveEvents::new(),
        manager(&[RELAY], transport.clone()),
        StoreOptions {
            verifier: Arc::new(TrustRelays),
            prefetch: Some(recorder.clone() as Arc<dyn Prefetch>),
        },
    );
    store.start().await;
    streaming(&store).await;
    transport.push(&live("1", "x", 10));
    settle().await;

    store.stop().await;
    store.start().await;
    streaming(&store).await;
    transport.push(&live("2", "y", 20));
    settle().await;

    assert_eq!(
        *recorder.keys.lock().unwrap(),
        vec!["a".repeat(64), "a".repeat(64)]
    );
}

/// Notes how many subscriptions were open each time an event was projected.
struct Backfilled {
    transport: Arc<MockTransport>,
    seen_at: Mutex<Vec<usize>>,
}

impl Projection for Backfilled {
    type Record = String;

    fn name(&self) -> &str {
        "backfilled"
    }

    fn filters(&self) -> Vec<Filter> {
        vec![Filter::new().kind(1)]
    }

    fn project(&self, event: &Event) -> Option<String> {
        self.seen_at
            .lock()
            .unwrap()
            .push(self.transport.subscribe_count());
        Some(event.id.clone())
    }

    fn key(&self, record: &String) -> String {
        record.clone()
    }

    fn compare(&self, a: &String, b: &String) -> std::cmp::Ordering {
        a.cmp(b)
    }

    fn cap(&self) -> usize {
        10
    }

    fn backfill(&self) -> bool {
        true
    }

    fn eose_fallback(&self) -> Duration {
        Duration::from_secs(60)
    }
}

#[tokio::test(start_paused = true)]
async fn test_backfill_collects_before_live_subscription() {
    let stored = event("1", 1, unix_now(), &[], "hello");
    let transport = transport().with_stored(vec![stored.clone()]);
    let store = ProjectionStore::with_options(
        Backfilled {
            transport: transport.clone(),
            seen_at: Mutex::new(Vec::new()),
        },
        manager(&[RELAY], transport.clone()),
        trusting(),
    );
    store.start().await;

    // The one-shot query has no EOSE and runs to its 10s deadline
    tokio::time::sleep(Duration::from_secs(5)).await;
    let snapshot = store.snapshot();
    assert!(snapshot.loading);
    assert_eq!(snapshot.status, StoreStatus::Starting);
    assert_eq!(transport.subscribe_count(), 1);

    streaming(&store).await;
    settle().await;
    let snapshot = store.snapshot();
    assert!(!snapshot.loading);
    assert_eq!(snapshot.status, StoreStatus::Streaming);
    assert_eq!(snapshot.records, vec![stored.id.clone()]);
    assert_eq!(store.projection().seen_at.lock().unwrap()[0], 1);
    assert_eq!(transport.subscribe_count(), 2);
    assert_eq!(transport.cancel_count(), 1);
}
