//! Streaming projection stores.
//!
//! A [`ProjectionStore`] keeps one live subscription open and folds every
//! incoming event through a [`Projection`] into a keyed, sorted, capped list.
//! Readers observe complete snapshots through a `watch` channel.

use crate::collect::{CollectOptions, collect};
use crate::fetch_queue::Prefetch;
use crate::manager::ConnectionManager;
use crate::message::Filter;
use crate::stream::StreamItem;
use futures::StreamExt;
use hub_nostr::{Event, verify_event};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A typed view over raw events.
pub trait Projection: Send + Sync + 'static {
    type Record: Clone + Send + Sync + 'static;

    /// Human-readable name used in logs
    fn name(&self) -> &str;

    fn filters(&self) -> Vec<Filter>;

    /// `None` for malformed or uninteresting events.
    fn project(&self, event: &Event) -> Option<Self::Record>;

    /// Identity of a record: event id or address.
    fn key(&self, record: &Self::Record) -> String;

    fn compare(&self, a: &Self::Record, b: &Self::Record) -> Ordering;

    fn cap(&self) -> usize;

    /// Pubkeys worth looking up for this record.
    fn authors(&self, _record: &Self::Record) -> Vec<String> {
        Vec::new()
    }

    /// Combine a new record with the one already stored under its key.
    /// `None` keeps the existing record.
    fn merge(&self, _existing: &Self::Record, incoming: Self::Record) -> Option<Self::Record> {
        Some(incoming)
    }

    /// Collect the stored backlog before opening the live subscription.
    fn backfill(&self) -> bool {
        false
    }

    /// How long to wait for end-of-stored-events before clearing `loading`.
    fn eose_fallback(&self) -> Duration {
        Duration::from_secs(4)
    }
}

/// Insert `record`, replacing any record with the same key, then re-sort and
/// truncate. Returns `false` when the merge kept the existing record.
pub fn upsert<P: Projection>(projection: &P, records: &mut Vec<P::Record>, record: P::Record) -> bool {
    let key = projection.key(&record);
    let record = match records.iter().position(|r| projection.key(r) == key) {
        Some(index) => match projection.merge(&records[index], record) {
            Some(merged) => {
                records.remove(index);
                merged
            }
            None => return false,
        },
        None => record,
    };
    records.insert(0, record);
    records.sort_by(|a, b| projection.compare(a, b));
    records.truncate(projection.cap());
    true
}

/// Checks events before they reach a projection.
pub trait EventVerifier: Send + Sync {
    fn verify(&self, event: &Event) -> bool;
}

/// Recomputes the id and checks the Schnorr signature.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchnorrVerifier;

impl EventVerifier for SchnorrVerifier {
    fn verify(&self, event: &Event) -> bool {
        matches!(verify_event(event), Ok(true))
    }
}

/// Accepts whatever relays send.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustRelays;

impl EventVerifier for TrustRelays {
    fn verify(&self, _event: &Event) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreStatus {
    #[default]
    Stopped,
    Starting,
    Streaming,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSnapshot<R> {
    pub records: Vec<R>,
    /// Still waiting for the stored backlog
    pub loading: bool,
    pub error: Option<String>,
    pub status: StoreStatus,
}

impl<R> Default for StoreSnapshot<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            loading: false,
            error: None,
            status: StoreStatus::Stopped,
        }
    }
}

pub struct StoreOptions {
    pub verifier: Arc<dyn EventVerifier>,
    /// Lookup queue for record authors
    pub prefetch: Option<Arc<dyn Prefetch>>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            verifier: Arc::new(SchnorrVerifier),
            prefetch: None,
        }
    }
}

struct StoreInner<P: Projection> {
    projection: P,
    manager: Arc<ConnectionManager>,
    options: StoreOptions,
    state: watch::Sender<StoreSnapshot<P::Record>>,
    /// Bumped by start and stop; a superseded run stops writing
    generation: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Authors already handed to the prefetcher this run
    seen_authors: std::sync::Mutex<HashSet<String>>,
}

pub struct ProjectionStore<P: Projection> {
    inner: Arc<StoreInner<P>>,
}

impl<P: Projection> ProjectionStore<P> {
    pub fn new(projection: P, manager: Arc<ConnectionManager>) -> Self {
        Self::with_options(projection, manager, StoreOptions::default())
    }

    pub fn with_options(projection: P, manager: Arc<ConnectionManager>, options: StoreOptions) -> Self {
        let (state, _) = watch::channel(StoreSnapshot::default());
        Self {
            inner: Arc::new(StoreInner {
                projection,
                manager,
                options,
                state,
                generation: AtomicU64::new(0),
                task: Mutex::new(None),
                seen_authors: std::sync::Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn projection(&self) -> &P {
        &self.inner.projection
    }

    /// Open the subscription. A no-op while already starting or streaming.
    pub async fn start(&self) {
        let mut task = self.inner.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let generation = self.inner.generation.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        self.inner.state.send_modify(|snapshot| {
            snapshot.status = StoreStatus::Starting;
            snapshot.loading = true;
            snapshot.error = None;
        });
        info!("Starting {} store", self.inner.projection.name());

        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(inner.run(generation)));
    }

    /// Cancel the subscription. Safe to call when already stopped.
    pub async fn stop(&self) {
        let task = self.inner.task.lock().await.take();
        let Some(task) = task else {
            return;
        };
        self.inner.generation.fetch_add(1, AtomicOrdering::SeqCst);
        task.abort();
        self.inner
            .seen_authors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        self.inner.state.send_modify(|snapshot| {
            snapshot.status = StoreStatus::Stopped;
            snapshot.loading = false;
        });
        info!("Stopped {} store", self.inner.projection.name());
    }

    pub fn snapshot(&self) -> StoreSnapshot<P::Record> {
        self.inner.state.borrow().clone()
    }

    pub fn records(&self) -> Vec<P::Record> {
        self.inner.state.borrow().records.clone()
    }

    pub fn status(&self) -> StoreStatus {
        self.inner.state.borrow().status
    }

    pub fn watch(&self) -> watch::Receiver<StoreSnapshot<P::Record>> {
        self.inner.state.subscribe()
    }
}

impl<P: Projection> Drop for ProjectionStore<P> {
    fn drop(&mut self) {
        if let Ok(mut task) = self.inner.task.try_lock()
            && let Some(task) = task.take()
        {
            task.abort();
        }
    }
}

impl<P: Projection> StoreInner<P> {
    async fn run(self: Arc<Self>, generation: u64) {
        let name = self.projection.name().to_string();
        let handle = match self.manager.ensure_connection().await {
            Ok(handle) => handle,
            Err(e) => {
                self.fail(generation, e.to_string());
                return;
            }
        };
        let transport = handle.transport();

        if self.projection.backfill() {
            for filter in self.projection.filters() {
                let result = collect(
                    transport.as_ref(),
                    handle.relays(),
                    filter,
                    CollectOptions::default(),
                )
                .await;
                debug!("{} backfill collected {} events", name, result.events.len());
                for event in &result.events {
                    self.ingest(generation, event);
                }
            }
            self.settle_loading(generation);
        }

        let mut stream = match transport
            .subscribe(handle.relays(), self.projection.filters())
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                self.fail(generation, e.to_string());
                return;
            }
        };
        self.update(generation, |snapshot| snapshot.status = StoreStatus::Streaming);
        info!("{} store streaming as {}", name, stream.subscription_id());

        let fallback = tokio::time::sleep(self.projection.eose_fallback());
        tokio::pin!(fallback);
        let mut fallback_armed = true;

        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(StreamItem::Event(event)) => self.ingest(generation, &event),
                    Some(StreamItem::EndOfStoredEvents) => {
                        fallback_armed = false;
                        self.settle_loading(generation);
                    }
                    Some(StreamItem::Closed(reason)) => {
                        self.fail(generation, reason);
                        break;
                    }
                    None => {
                        self.fail(generation, "subscription ended".to_string());
                        break;
                    }
                },
                _ = &mut fallback, if fallback_armed => {
                    fallback_armed = false;
                    if self.state.borrow().loading {
                        debug!("{} store: no end of stored events, clearing loading", name);
                        self.settle_loading(generation);
                    }
                }
            }
        }
        stream.cancel();
    }

    fn ingest(&self, generation: u64, event: &Event) {
        if !self.options.verifier.verify(event) {
            debug!("Dropping unverified event {}", event.id);
            return;
        }
        let Some(record) = self.projection.project(event) else {
            return;
        };
        let authors = self.projection.authors(&record);

        if self.generation.load(AtomicOrdering::SeqCst) != generation {
            return;
        }
        self.state
            .send_if_modified(|snapshot| upsert(&self.projection, &mut snapshot.records, record));

        self.prefetch_authors(authors);
    }

    fn prefetch_authors(&self, authors: Vec<String>) {
        let Some(prefetch) = &self.options.prefetch else {
            return;
        };
        let fresh: Vec<String> = {
            let mut seen = self
                .seen_authors
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            authors
                .into_iter()
                .filter(|author| !author.is_empty() && seen.insert(author.clone()))
                .collect()
        };
        for author in fresh {
            prefetch.prefetch(author);
        }
    }

    fn settle_loading(&self, generation: u64) {
        self.update(generation, |snapshot| snapshot.loading = false);
    }

    fn fail(&self, generation: u64, reason: String) {
        warn!("{} store subscription ended: {}", self.projection.name(), reason);
        self.update(generation, |snapshot| {
            snapshot.status = StoreStatus::Stopped;
            snapshot.loading = false;
            snapshot.error = Some(reason);
        });
    }

    fn update(&self, generation: u64, modify: impl FnOnce(&mut StoreSnapshot<P::Record>)) {
        if self.generation.load(AtomicOrdering::SeqCst) == generation {
            self.state.send_modify(modify);
        }
    }
}
