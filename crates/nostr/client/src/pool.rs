//! Relay pool for managing connections to multiple Nostr relays.
//!
//! The pool connects lazily, fans subscriptions out over every requested
//! relay and merges the replies into a single [`EventStream`]. A relay that is
//! slow to connect joins the stream late instead of holding it back.

use crate::error::{ClientError, Result};
use crate::message::{Filter, RelayMessage};
use crate::relay::{RelayConfig, RelayConnection, RoutedMessage, Router, probe_relay};
use crate::stream::{EventStream, StreamItem, StreamSender};
use crate::subscription::{SubscriptionTracker, generate_subscription_id};
use crate::transport::{ProbeFailure, RelayPublishOutcome, RelayTransport};
use async_trait::async_trait;
use futures::future::join_all;
use hub_nostr::Event;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use url::Url;

/// A pool of Nostr relay connections.
pub struct RelayPool {
    config: RelayConfig,
    /// Connections indexed by URL
    connections: Arc<RwLock<HashMap<String, Arc<RelayConnection>>>>,
}

impl RelayPool {
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    pub fn with_config(config: RelayConfig) -> Self {
        Self {
            config,
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get all relay URLs in the pool.
    pub async fn relay_urls(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    /// Connected relay for `url`, creating and connecting it on first use.
    async fn connection(&self, url: &str) -> Result<Arc<RelayConnection>> {
        connect_relay(&self.connections, &self.config, url).await
    }

    pub async fn disconnect_all(&self) {
        let conns: Vec<Arc<RelayConnection>> =
            self.connections.write().await.drain().map(|(_, c)| c).collect();
        join_all(conns.iter().map(|conn| conn.disconnect())).await;
    }
}

impl Default for RelayPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayTransport for RelayPool {
    async fn probe(&self, url: &str, timeout: Duration) -> std::result::Result<Duration, ProbeFailure> {
        probe_relay(url, timeout).await
    }

    /// Opens the subscription on every relay in the background and returns as
    /// soon as the first one accepts it. Relays still connecting join the
    /// stream when they succeed; EOSE waits until each of them settles.
    async fn subscribe(&self, relays: &[String], filters: Vec<Filter>) -> Result<EventStream> {
        let subscription_id = generate_subscription_id();
        let (route_tx, route_rx) = mpsc::unbounded_channel();
        let (join_tx, mut join_rx) = mpsc::unbounded_channel();
        let mut tracker = SubscriptionTracker::new(subscription_id.clone());

        for url in relays {
            let key = relay_key(url);
            tracker.add_pending(key.clone());
            tokio::spawn(open_on_relay(
                Arc::clone(&self.connections),
                self.config.clone(),
                url.clone(),
                key,
                subscription_id.clone(),
                filters.clone(),
                route_tx.clone(),
                join_tx.clone(),
            ));
        }
        drop(route_tx);
        drop(join_tx);

        let opened = Arc::new(OpenedRelays::default());
        loop {
            match join_rx.recv().await {
                Some((key, Ok(conn))) => {
                    tracker.join_pending(&key);
                    opened.adopt(conn, &subscription_id);
                    break;
                }
                Some((key, Err(_))) => {
                    tracker.fail_pending(&key);
                }
                None => {
                    return Err(ClientError::Subscription(format!(
                        "no relay accepted subscription {}",
                        subscription_id
                    )));
                }
            }
        }
        debug!(
            "Opened subscription {} ({} relays still connecting)",
            subscription_id,
            tracker.pending_count()
        );

        let teardown = Arc::clone(&opened);
        let teardown_id = subscription_id.clone();
        let (stream_tx, stream) = EventStream::channel(subscription_id, move || {
            let conns = teardown.cancel();
            // Nothing to close once the runtime is gone
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                return;
            };
            runtime.spawn(close_on_relays(conns, teardown_id));
        });

        tokio::spawn(forward_subscription(tracker, route_rx, join_rx, opened, stream_tx));
        Ok(stream)
    }

    async fn publish(
        &self,
        relays: &[String],
        event: &Event,
        timeout: Duration,
    ) -> Vec<RelayPublishOutcome> {
        let sends = relays.iter().map(|url| async move {
            let result = match self.connection(url).await {
                Ok(conn) => conn.publish_event(event, timeout).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(confirmation) => RelayPublishOutcome {
                    url: url.clone(),
                    accepted: confirmation.accepted,
                    message: confirmation.message,
                },
                Err(e) => {
                    warn!("Publish of {} to {} failed: {}", event.id, url, e);
                    RelayPublishOutcome {
                        url: url.clone(),
                        accepted: false,
                        message: e.to_string(),
                    }
                }
            }
        });
        join_all(sends).await
    }

    async fn close(&self) {
        self.disconnect_all().await;
    }
}

/// Connect a relay, creating its pool entry on first use.
async fn connect_relay(
    connections: &RwLock<HashMap<String, Arc<RelayConnection>>>,
    config: &RelayConfig,
    url: &str,
) -> Result<Arc<RelayConnection>> {
    let existing = connections.read().await.get(url).cloned();
    let conn = match existing {
        Some(conn) => conn,
        None => {
            let mut conns = connections.write().await;
            match conns.get(url) {
                Some(conn) => Arc::clone(conn),
                None => {
                    let conn = Arc::new(RelayConnection::with_config(url, config.clone())?);
                    conns.insert(url.to_string(), Arc::clone(&conn));
                    conn
                }
            }
        }
    };
    conn.connect().await?;
    Ok(conn)
}

/// The URL a connection reports its traffic under.
fn relay_key(url: &str) -> String {
    Url::parse(url)
        .map(|parsed| parsed.to_string())
        .unwrap_or_else(|_| url.to_string())
}

/// Outcome of connecting one relay and sending it the REQ.
type Joined = (String, Result<Arc<RelayConnection>>);

#[allow(clippy::too_many_arguments)]
async fn open_on_relay(
    connections: Arc<RwLock<HashMap<String, Arc<RelayConnection>>>>,
    config: RelayConfig,
    url: String,
    key: String,
    subscription_id: String,
    filters: Vec<Filter>,
    routes: Router,
    joined: mpsc::UnboundedSender<Joined>,
) {
    let result = async {
        let conn = connect_relay(&connections, &config, &url).await?;
        conn.subscribe(&subscription_id, filters, routes).await?;
        Ok::<_, ClientError>(conn)
    }
    .await;

    if let Err(e) = &result {
        warn!("Failed to subscribe {} on {}: {}", subscription_id, url, e);
    }
    // Nobody is listening any more: the REQ we just sent must not linger
    if let Err(mpsc::error::SendError((_, Ok(conn)))) = joined.send((key, result)) {
        close_on_relays(vec![conn], subscription_id).await;
    }
}

async fn close_on_relays(conns: Vec<Arc<RelayConnection>>, subscription_id: String) {
    for conn in conns {
        if let Err(e) = conn.close_subscription(&subscription_id).await {
            debug!("Failed to close {} on {}: {}", subscription_id, conn.url(), e);
        }
    }
}

/// Relays carrying a subscription, closed together when its stream is cancelled.
#[derive(Default)]
struct OpenedRelays {
    state: std::sync::Mutex<OpenedState>,
}

#[derive(Default)]
struct OpenedState {
    cancelled: bool,
    conns: Vec<Arc<RelayConnection>>,
}

impl OpenedRelays {
    fn lock(&self) -> std::sync::MutexGuard<'_, OpenedState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Keep `conn` for teardown. A relay joining after cancellation is closed right away.
    fn adopt(&self, conn: Arc<RelayConnection>, subscription_id: &str) {
        let mut state = self.lock();
        if !state.cancelled {
            state.conns.push(conn);
            return;
        }
        drop(state);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(close_on_relays(vec![conn], subscription_id.to_string()));
        }
    }

    fn cancel(&self) -> Vec<Arc<RelayConnection>> {
        let mut state = self.lock();
        state.cancelled = true;
        std::mem::take(&mut state.conns)
    }
}

/// Merge per-relay traffic for one subscription into its stream.
async fn forward_subscription(
    mut tracker: SubscriptionTracker,
    mut routes: mpsc::UnboundedReceiver<RoutedMessage>,
    mut joins: mpsc::UnboundedReceiver<Joined>,
    opened: Arc<OpenedRelays>,
    out: StreamSender,
) {
    let mut seen = HashSet::new();
    let mut joins_open = true;

    loop {
        let item = tokio::select! {
            routed = routes.recv() => {
                let Some((relay_url, message)) = routed else {
                    break;
                };
                match message {
                    RelayMessage::Event { event, .. } => {
                        if !seen.insert(event.id.clone()) {
                            continue;
                        }
                        Some(StreamItem::Event(event))
                    }
                    RelayMessage::Eose { .. } => tracker
                        .mark_eose(&relay_url)
                        .then_some(StreamItem::EndOfStoredEvents),
                    RelayMessage::Closed { message, .. } => {
                        debug!(
                            "Relay {} closed subscription {}: {}",
                            relay_url, tracker.id, message
                        );
                        let eose = tracker.remove_relay(&relay_url);
                        if tracker.is_empty() {
                            let _ = out.send(StreamItem::Closed(message));
                            return;
                        }
                        eose.then_some(StreamItem::EndOfStoredEvents)
                    }
                    _ => None,
                }
            }
            joined = joins.recv(), if joins_open => match joined {
                Some((key, Ok(conn))) => {
                    opened.adopt(conn, &tracker.id);
                    tracker
                        .join_pending(&key)
                        .then_some(StreamItem::EndOfStoredEvents)
                }
                Some((key, Err(_))) => {
                    let eose = tracker.fail_pending(&key);
                    if tracker.is_empty() {
                        let _ = out.send(StreamItem::Closed("all relays disconnected".to_string()));
                        return;
                    }
                    eose.then_some(StreamItem::EndOfStoredEvents)
                }
                None => {
                    joins_open = false;
                    None
                }
            },
        };

        if let Some(item) = item
            && out.send(item).is_err()
        {
            return;
        }
    }

    let _ = out.send(StreamItem::Closed("all relays disconnected".to_string()));
}
