//! Shared fixtures: an in-memory relay transport and event builders.

#![allow(dead_code)]

use async_trait::async_trait;
use hub_client::{
    ClientError, ConnectionManager, EventStream, Filter, ManagerConfig, ProbeFailure,
    RelayPublishOutcome, RelayTransport, Result, StreamItem, StreamSender,
};
use hub_nostr::Event;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

struct OpenSubscription {
    filters: Vec<Filter>,
    sender: StreamSender,
}

/// Relay network double.
///
/// Relays not marked reachable time out on probe. Stored events matching a
/// subscription's filters are replayed on subscribe, followed by EOSE when
/// `auto_eose` is on.
#[derive(Default)]
pub struct MockTransport {
    latencies: Mutex<HashMap<String, Duration>>,
    rejections: Mutex<HashMap<String, String>>,
    stored: Mutex<Vec<Event>>,
    open: Mutex<Vec<OpenSubscription>>,
    auto_eose: AtomicBool,
    probes: AtomicUsize,
    subscribes: AtomicUsize,
    cancels: Arc<AtomicUsize>,
    publishes: AtomicUsize,
    closes: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        init_tracing();
        Arc::new(Self::default())
    }

    pub fn reachable(self: &Arc<Self>, url: &str, latency: Duration) -> Arc<Self> {
        self.latencies
            .lock()
            .unwrap()
            .insert(url.to_string(), latency);
        Arc::clone(self)
    }

    pub fn rejecting(self: &Arc<Self>, url: &str, message: &str) -> Arc<Self> {
        self.rejections
            .lock()
            .unwrap()
            .insert(url.to_string(), message.to_string());
        Arc::clone(self)
    }

    pub fn with_stored(self: &Arc<Self>, events: Vec<Event>) -> Arc<Self> {
        self.stored.lock().unwrap().extend(events);
        Arc::clone(self)
    }

    pub fn auto_eose(self: &Arc<Self>, enabled: bool) -> Arc<Self> {
        self.auto_eose.store(enabled, Ordering::SeqCst);
        Arc::clone(self)
    }

    /// Deliver `event` to every open subscription it matches.
    pub fn push(&self, event: &Event) {
        for sub in self.open.lock().unwrap().iter() {
            if sub.filters.iter().any(|f| f.matches(event)) {
                let _ = sub.sender.send(StreamItem::Event(event.clone()));
            }
        }
    }

    pub fn send_eose(&self) {
        for sub in self.open.lock().unwrap().iter() {
            let _ = sub.sender.send(StreamItem::EndOfStoredEvents);
        }
    }

    /// Close every open subscription from the relay side.
    pub fn close_all(&self, reason: &str) {
        for sub in self.open.lock().unwrap().drain(..) {
            let _ = sub.sender.send(StreamItem::Closed(reason.to_string()));
        }
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn publish_count(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayTransport for MockTransport {
    async fn probe(&self, url: &str, timeout: Duration) -> std::result::Result<Duration, ProbeFailure> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let latency = self.latencies.lock().unwrap().get(url).copied();
        match latency {
            Some(latency) if latency <= timeout => {
                tokio::time::sleep(latency).await;
                Ok(latency)
            }
            _ => {
                tokio::time::sleep(timeout).await;
                Err(ProbeFailure::Timeout)
            }
        }
    }

    async fn subscribe(&self, relays: &[String], filters: Vec<Filter>) -> Result<EventStream> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        if relays.is_empty() {
            return Err(ClientError::Subscription("no relays".to_string()));
        }

        let cancels = Arc::clone(&self.cancels);
        let id = format!("mock-{}", self.subscribe_count());
        let (sender, stream) = EventStream::channel(id, move || {
            cancels.fetch_add(1, Ordering::SeqCst);
        });

        for event in self.stored.lock().unwrap().iter() {
            if filters.iter().any(|f| f.matches(event)) {
                let _ = sender.send(StreamItem::Event(event.clone()));
            }
        }
        if self.auto_eose.load(Ordering::SeqCst) {
            let _ = sender.send(StreamItem::EndOfStoredEvents);
        }

        self.open
            .lock()
            .unwrap()
            .push(OpenSubscription { filters, sender });
        Ok(stream)
    }

    async fn publish(&self, relays: &[String], event: &Event, _timeout: Duration) -> Vec<RelayPublishOutcome> {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        let rejections = self.rejections.lock().unwrap().clone();
        relays
            .iter()
            .map(|url| match rejections.get(url) {
                Some(message) => RelayPublishOutcome {
                    url: url.clone(),
                    accepted: false,
                    message: message.clone(),
                },
                None => RelayPublishOutcome {
                    url: url.clone(),
                    accepted: true,
                    message: format!("stored {}", &event.id[..8.min(event.id.len())]),
                },
            })
            .collect()
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.open.lock().unwrap().clear();
    }
}

pub fn manager(relays: &[&str], transport: Arc<MockTransport>) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(
        relays.iter().map(|r| r.to_string()).collect(),
        transport,
        ManagerConfig::default(),
    ))
}

/// Unsigned event with a deterministic 64-char id.
pub fn event(seed: &str, kind: u16, created_at: u64, tags: &[&[&str]], content: &str) -> Event {
    Event {
        id: format!("{:0>64}", seed),
        pubkey: "a".repeat(64),
        created_at,
        kind,
        tags: tags
            .iter()
            .map(|t| t.iter().map(|s| s.to_string()).collect())
            .collect(),
        content: content.to_string(),
        sig: "0".repeat(128),
    }
}
