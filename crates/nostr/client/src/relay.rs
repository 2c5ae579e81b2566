//! Single relay connection management
//!
//! One WebSocket per relay. A background receive loop routes `OK` replies to
//! pending publishes and `EVENT`/`EOSE`/`CLOSED` to the subscription that
//! asked for them.

use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, Filter, RelayMessage};
use crate::transport::ProbeFailure;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use hub_nostr::Event;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Relay answer to a published event
#[derive(Debug, Clone)]
pub struct PublishConfirmation {
    pub event_id: String,
    pub accepted: bool,
    /// Empty if accepted, reason if rejected
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub connect_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Subscription traffic tagged with the relay URL it came from.
pub type RoutedMessage = (String, RelayMessage);
pub type Router = mpsc::UnboundedSender<RoutedMessage>;

type Confirmations = Mutex<HashMap<String, oneshot::Sender<PublishConfirmation>>>;
type Routes = Mutex<HashMap<String, Router>>;

pub struct RelayConnection {
    url: Url,
    config: RelayConfig,
    state: Arc<RwLock<ConnectionState>>,
    /// Serializes connection attempts
    connect_lock: Mutex<()>,
    sink: Arc<Mutex<Option<WsSink>>>,
    pending_confirmations: Arc<Confirmations>,
    subscriptions: Arc<Routes>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl RelayConnection {
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, RelayConfig::default())
    }

    pub fn with_config(url: &str, config: RelayConfig) -> Result<Self> {
        let url = Url::parse(url)?;

        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ClientError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                url.scheme()
            )));
        }

        Ok(Self {
            url,
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connect_lock: Mutex::new(()),
            sink: Arc::new(Mutex::new(None)),
            pending_confirmations: Arc::new(Mutex::new(HashMap::new())),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            recv_task: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    /// Connect if not already connected. Concurrent callers share one attempt.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected().await {
            return Ok(());
        }
        *self.state.write().await = ConnectionState::Connecting;

        info!("Connecting to relay: {}", self.url);
        let started = Instant::now();

        let ws = match timeout(self.config.connect_timeout, connect_async(self.url.as_str())).await
        {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ClientError::WebSocket(e.to_string()));
            }
            Err(_) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ClientError::Timeout(format!(
                    "Connection timeout after {:?}",
                    self.config.connect_timeout
                )));
            }
        };

        let (sink, stream) = ws.split();
        *self.sink.lock().await = Some(sink);
        *self.state.write().await = ConnectionState::Connected;

        info!("Connected to relay: {} (took {:?})", self.url, started.elapsed());

        self.start_recv_loop(stream).await;
        Ok(())
    }

    async fn start_recv_loop(&self, mut stream: SplitStream<WsStream>) {
        let url = self.url.to_string();
        let state = Arc::clone(&self.state);
        let sink = Arc::clone(&self.sink);
        let pending = Arc::clone(&self.pending_confirmations);
        let subscriptions = Arc::clone(&self.subscriptions);

        let handle = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => {
                        info!("Relay {} closed connection", url);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("WebSocket error from {}: {}", url, e);
                        break;
                    }
                };

                debug!("Received from {}: {}", url, text.as_str());
                match RelayMessage::from_json(text.as_str()) {
                    Ok(message) => route_message(&url, message, &pending, &subscriptions).await,
                    Err(e) => debug!("Ignoring unparseable message from {}: {}", url, e),
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            sink.lock().await.take();
            // Dropping the senders fails every waiting publish
            pending.lock().await.clear();
            let routes: Vec<(String, Router)> = subscriptions.lock().await.drain().collect();
            for (subscription_id, router) in routes {
                let _ = router.send((
                    url.clone(),
                    RelayMessage::Closed {
                        subscription_id,
                        message: "connection closed".to_string(),
                    },
                ));
            }
            info!("Disconnected from relay: {}", url);
        });

        *self.recv_task.lock().await = Some(handle);
    }

    pub async fn disconnect(&self) {
        if let Some(handle) = self.recv_task.lock().await.take() {
            handle.abort();
        }
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        self.pending_confirmations.lock().await.clear();
        self.subscriptions.lock().await.clear();
        *self.state.write().await = ConnectionState::Disconnected;
        info!("Disconnected from relay: {}", self.url);
    }

    pub async fn send(&self, message: &ClientMessage) -> Result<()> {
        let text = message.to_json()?;
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        debug!("Sending to {}: {}", self.url, text);
        sink.send(Message::text(text))
            .await
            .map_err(|e| ClientError::WebSocket(e.to_string()))
    }

    /// Open `subscription_id` on this relay; traffic for it goes to `router`.
    pub async fn subscribe(
        &self,
        subscription_id: &str,
        filters: Vec<Filter>,
        router: Router,
    ) -> Result<()> {
        self.subscriptions
            .lock()
            .await
            .insert(subscription_id.to_string(), router);

        let req = ClientMessage::Req {
            subscription_id: subscription_id.to_string(),
            filters,
        };
        if let Err(e) = self.send(&req).await {
            self.subscriptions.lock().await.remove(subscription_id);
            return Err(e);
        }
        Ok(())
    }

    /// Stop routing and send CLOSE. A dead connection is not an error here.
    pub async fn close_subscription(&self, subscription_id: &str) -> Result<()> {
        let known = self
            .subscriptions
            .lock()
            .await
            .remove(subscription_id)
            .is_some();
        if !known || !self.is_connected().await {
            return Ok(());
        }
        self.send(&ClientMessage::Close {
            subscription_id: subscription_id.to_string(),
        })
        .await
    }

    /// Publish an event and wait for the relay's `OK`.
    pub async fn publish_event(
        &self,
        event: &Event,
        confirmation_timeout: Duration,
    ) -> Result<PublishConfirmation> {
        let (tx, rx) = oneshot::channel();
        let event_id = event.id.clone();

        self.pending_confirmations
            .lock()
            .await
            .insert(event_id.clone(), tx);

        if let Err(e) = self.send(&ClientMessage::Event(event.clone())).await {
            self.pending_confirmations.lock().await.remove(&event_id);
            return Err(e);
        }

        match timeout(confirmation_timeout, rx).await {
            Ok(Ok(confirmation)) => Ok(confirmation),
            Ok(Err(_)) => Err(ClientError::Connection(format!(
                "{} closed before confirming {}",
                self.url, event_id
            ))),
            Err(_) => {
                self.pending_confirmations.lock().await.remove(&event_id);
                Err(ClientError::Timeout(format!(
                    "Event confirmation timeout after {:?}",
                    confirmation_timeout
                )))
            }
        }
    }
}

async fn route_message(url: &str, message: RelayMessage, pending: &Confirmations, routes: &Routes) {
    match message {
        RelayMessage::Ok {
            event_id,
            accepted,
            message,
        } => {
            if let Some(tx) = pending.lock().await.remove(&event_id) {
                let _ = tx.send(PublishConfirmation {
                    event_id,
                    accepted,
                    message,
                });
            }
        }
        RelayMessage::Notice { message } => info!("Notice from {}: {}", url, message),
        RelayMessage::Auth { .. } => debug!("Ignoring AUTH challenge from {}", url),
        other => {
            let Some(subscription_id) = other.subscription_id().map(str::to_string) else {
                return;
            };
            let closing = matches!(other, RelayMessage::Closed { .. });
            let mut routes = routes.lock().await;
            let delivered = routes
                .get(&subscription_id)
                .is_some_and(|router| router.send((url.to_string(), other)).is_ok());
            if closing || !delivered {
                routes.remove(&subscription_id);
            }
        }
    }
}

/// One-shot reachability probe: open a WebSocket, then close it.
pub async fn probe_relay(url: &str, limit: Duration) -> std::result::Result<Duration, ProbeFailure> {
    let started = Instant::now();
    match timeout(limit, connect_async(url)).await {
        Ok(Ok((mut ws, _response))) => {
            let elapsed = started.elapsed();
            let _ = ws.close(None).await;
            Ok(elapsed)
        }
        Ok(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed)) => {
            Err(ProbeFailure::Closed)
        }
        Ok(Err(e)) => Err(ProbeFailure::Error(e.to_string())),
        Err(_) => Err(ProbeFailure::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_websocket_scheme() {
        assert!(matches!(
            RelayConnection::new("https://relay.example.com"),
            Err(ClientError::InvalidUrl(_))
        ));
        assert!(matches!(
            RelayConnection::new("not a url"),
            Err(ClientError::UrlParse(_))
        ));
        assert!(RelayConnection::new("wss://relay.example.com").is_ok());
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let relay = RelayConnection::new("wss://relay.example.com").unwrap();
        assert_eq!(relay.state().await, ConnectionState::Disconnected);

        let close = ClientMessage::Close {
            subscription_id: "sub".to_string(),
        };
        assert!(matches!(relay.send(&close).await, Err(ClientError::NotConnected)));
        // Closing an unknown subscription on a dead connection is a no-op
        assert!(relay.close_subscription("sub").await.is_ok());
    }

    #[tokio::test]
    async fn test_route_message_delivers_and_drops_closed() {
        let pending: Confirmations = Mutex::new(HashMap::new());
        let routes: Routes = Mutex::new(HashMap::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        routes.lock().await.insert("sub".to_string(), tx);

        route_message(
            "wss://a/",
            RelayMessage::Eose {
                subscription_id: "sub".to_string(),
            },
            &pending,
            &routes,
        )
        .await;
        route_message(
            "wss://a/",
            RelayMessage::Closed {
                subscription_id: "sub".to_string(),
                message: "bye".to_string(),
            },
            &pending,
            &routes,
        )
        .await;

        assert!(matches!(rx.recv().await, Some((_, RelayMessage::Eose { .. }))));
        assert!(matches!(rx.recv().await, Some((_, RelayMessage::Closed { .. }))));
        assert!(routes.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_route_message_resolves_confirmation() {
        let pending: Confirmations = Mutex::new(HashMap::new());
        let routes: Routes = Mutex::new(HashMap::new());
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert("evt".to_string(), tx);

        route_message(
            "wss://a/",
            RelayMessage::Ok {
                event_id: "evt".to_string(),
                accepted: false,
                message: "blocked".to_string(),
            },
            &pending,
            &routes,
        )
        .await;

        let confirmation = rx.await.unwrap();
        assert!(!confirmation.accepted);
        assert_eq!(confirmation.message, "blocked");
    }
}
