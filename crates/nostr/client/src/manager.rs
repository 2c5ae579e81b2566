//! Connection manager: picks the relay set everything else talks to.
//!
//! Relays are probed a few at a time, ranked by handshake latency and the
//! fastest ones kept. One reachable relay is enough. Concurrent callers of
//! [`ConnectionManager::ensure_connection`] share a single attempt.

use crate::error::{ClientError, Result};
use crate::transport::{ProbeFailure, RelayTransport};
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Candidates probed per attempt
    pub max_probe_relays: usize,
    /// Probes running at once
    pub probe_concurrency: usize,
    pub probe_timeout: Duration,
    /// Timeout for the single retry after every probe failed
    pub retry_probe_timeout: Duration,
    /// Relays kept after ranking
    pub max_connected_relays: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_probe_relays: 18,
            probe_concurrency: 4,
            probe_timeout: Duration::from_millis(4500),
            retry_probe_timeout: Duration::from_millis(9000),
            max_connected_relays: 8,
        }
    }
}

/// Configured relay URLs after validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedRelays {
    /// Valid, deduplicated, in configured order
    pub urls: Vec<String>,
    pub rejected_urls: Vec<String>,
}

/// Trim, validate the `ws`/`wss` scheme and deduplicate.
///
/// Malformed entries are dropped with a warning, never an error.
pub fn normalize_relay_urls<I, S>(urls: I) -> NormalizedRelays
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized = NormalizedRelays::default();
    let mut seen = HashSet::new();

    for raw in urls {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            continue;
        }
        let parsed = match Url::parse(trimmed) {
            Ok(url) if matches!(url.scheme(), "ws" | "wss") && url.host_str().is_some() => url,
            Ok(url) => {
                warn!("Ignoring relay {} (unsupported scheme {})", trimmed, url.scheme());
                normalized.rejected_urls.push(trimmed.to_string());
                continue;
            }
            Err(e) => {
                warn!("Ignoring relay {} ({})", trimmed, e);
                normalized.rejected_urls.push(trimmed.to_string());
                continue;
            }
        };

        let mut url = parsed.to_string();
        if parsed.path() == "/" && parsed.query().is_none() && parsed.fragment().is_none() {
            url.truncate(url.len() - 1);
        }
        if seen.insert(url.clone()) {
            normalized.urls.push(url);
        }
    }

    normalized
}

/// One relay's probe outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub url: String,
    pub elapsed_ms: u64,
    pub failure: Option<ProbeFailure>,
}

impl ProbeResult {
    pub fn is_reachable(&self) -> bool {
        self.failure.is_none()
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failure {
            Some(failure) => write!(f, "FAIL {} ({}ms {})", self.url, self.elapsed_ms, failure),
            None => write!(f, "OK {} ({}ms)", self.url, self.elapsed_ms),
        }
    }
}

/// Per-relay diagnostics from one connection attempt, in configured order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport(pub Vec<ProbeResult>);

impl ProbeReport {
    pub fn results(&self) -> &[ProbeResult] {
        &self.0
    }

    pub fn any_reachable(&self) -> bool {
        self.0.iter().any(ProbeResult::is_reachable)
    }

    /// Reachable relays, fastest first, at most `n`.
    pub fn fastest(&self, n: usize) -> Vec<String> {
        let mut reachable: Vec<&ProbeResult> =
            self.0.iter().filter(|r| r.is_reachable()).collect();
        reachable.sort_by_key(|r| r.elapsed_ms);
        reachable.into_iter().take(n).map(|r| r.url.clone()).collect()
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, result) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{}", result)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayHealth {
    #[default]
    Unknown,
    Reachable,
    Unreachable,
}

/// Observable connection state. Only the manager writes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    pub connected_relays: Vec<String>,
    pub relay_health: BTreeMap<String, RelayHealth>,
}

struct HandleInner {
    relays: Vec<String>,
    transport: Arc<dyn RelayTransport>,
    report: ProbeReport,
}

/// The relay set chosen by a successful connection attempt.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl ConnectionHandle {
    pub fn relays(&self) -> &[String] {
        &self.inner.relays
    }

    pub fn transport(&self) -> Arc<dyn RelayTransport> {
        Arc::clone(&self.inner.transport)
    }

    pub fn report(&self) -> &ProbeReport {
        &self.inner.report
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("relays", &self.inner.relays)
            .finish()
    }
}

/// Cloneable failure so a shared attempt can hand it to every waiter.
#[derive(Debug, Clone)]
enum ConnectFailure {
    Config(String),
    NoRelaysReachable(ProbeReport),
    Superseded,
}

impl From<ConnectFailure> for ClientError {
    fn from(failure: ConnectFailure) -> Self {
        match failure {
            ConnectFailure::Config(message) => ClientError::Config(message),
            ConnectFailure::NoRelaysReachable(report) => ClientError::NoRelaysReachable(report),
            ConnectFailure::Superseded => {
                ClientError::Connection("connection attempt superseded".to_string())
            }
        }
    }
}

type Attempt = Shared<BoxFuture<'static, std::result::Result<ConnectionHandle, ConnectFailure>>>;

struct ManagerInner {
    relays: Vec<String>,
    transport: Arc<dyn RelayTransport>,
    config: ManagerConfig,
    snapshot: watch::Sender<ConnectionSnapshot>,
    in_flight: Mutex<Option<Attempt>>,
    handle: Mutex<Option<ConnectionHandle>>,
    /// Bumped by reconnect and dispose; stale attempts leave state alone
    epoch: AtomicU64,
}

pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(
        relays: Vec<String>,
        transport: Arc<dyn RelayTransport>,
        config: ManagerConfig,
    ) -> Self {
        let (snapshot, _) = watch::channel(ConnectionSnapshot::default());
        Self {
            inner: Arc::new(ManagerInner {
                relays,
                transport,
                config,
                snapshot,
                in_flight: Mutex::new(None),
                handle: Mutex::new(None),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Current handle, connecting first if there is none.
    pub async fn ensure_connection(&self) -> Result<ConnectionHandle> {
        let attempt = {
            let mut in_flight = self.inner.in_flight.lock().await;
            if let Some(handle) = self.inner.handle.lock().await.clone() {
                return Ok(handle);
            }
            match in_flight.as_ref() {
                Some(attempt) => attempt.clone(),
                None => {
                    let inner = Arc::clone(&self.inner);
                    let epoch = inner.epoch.load(Ordering::SeqCst);
                    let attempt = async move { inner.connect(epoch).await }.boxed().shared();
                    *in_flight = Some(attempt.clone());
                    attempt
                }
            }
        };

        attempt.await.map_err(ClientError::from)
    }

    /// Drop the current relay set and connect again.
    pub async fn reconnect(&self) -> Result<ConnectionHandle> {
        info!("Reconnecting relay set");
        self.teardown().await;
        self.ensure_connection().await
    }

    /// Close every connection and return to `Idle`.
    pub async fn dispose(&self) {
        self.teardown().await;
        self.inner.snapshot.send_replace(ConnectionSnapshot::default());
        info!("Connection manager disposed");
    }

    async fn teardown(&self) {
        {
            let mut in_flight = self.inner.in_flight.lock().await;
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            in_flight.take();
            self.inner.handle.lock().await.take();
        }
        self.inner.transport.close().await;
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.snapshot.borrow().status
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Handle from the last successful attempt, without connecting.
    pub async fn current(&self) -> Option<ConnectionHandle> {
        self.inner.handle.lock().await.clone()
    }

    pub fn transport(&self) -> Arc<dyn RelayTransport> {
        Arc::clone(&self.inner.transport)
    }

    /// Every configured relay after normalization, whether or not it was selected.
    pub fn configured_relays(&self) -> NormalizedRelays {
        normalize_relay_urls(&self.inner.relays)
    }
}

impl ManagerInner {
    async fn connect(
        self: Arc<Self>,
        epoch: u64,
    ) -> std::result::Result<ConnectionHandle, ConnectFailure> {
        let normalized = normalize_relay_urls(&self.relays);
        if normalized.urls.is_empty() {
            let failure = ConnectFailure::Config("No valid relay URLs configured.".to_string());
            self.finish(epoch, Err(failure)).await
        } else {
            self.modify_if_current(epoch, |snapshot| {
                snapshot.status = ConnectionStatus::Connecting;
                snapshot.last_error = None;
            });

            let candidates: Vec<String> = normalized
                .urls
                .into_iter()
                .take(self.config.max_probe_relays)
                .collect();
            info!("Probing {} relays", candidates.len());

            let mut report = self.probe_all(&candidates, self.config.probe_timeout).await;
            if !report.any_reachable() {
                warn!(
                    "No relays reachable, retrying with {:?} timeout: {}",
                    self.config.retry_probe_timeout, report
                );
                report = self
                    .probe_all(&candidates, self.config.retry_probe_timeout)
                    .await;
            }

            let selected = report.fastest(self.config.max_connected_relays);
            let result = if selected.is_empty() {
                Err(ConnectFailure::NoRelaysReachable(report))
            } else {
                info!("Connected to {} relays: {}", selected.len(), selected.join(", "));
                Ok(ConnectionHandle {
                    inner: Arc::new(HandleInner {
                        relays: selected,
                        transport: Arc::clone(&self.transport),
                        report,
                    }),
                })
            };
            self.finish(epoch, result).await
        }
    }

    async fn probe_all(&self, urls: &[String], timeout: Duration) -> ProbeReport {
        let mut results: Vec<(usize, ProbeResult)> =
            stream::iter(urls.iter().cloned().enumerate())
                .map(|(index, url)| {
                    let transport = Arc::clone(&self.transport);
                    async move {
                        let started = Instant::now();
                        let outcome = transport.probe(&url, timeout).await;
                        let elapsed = match &outcome {
                            Ok(latency) => *latency,
                            Err(_) => started.elapsed(),
                        };
                        debug!("Probe {} finished in {:?}: {:?}", url, elapsed, outcome);
                        let result = ProbeResult {
                            url,
                            elapsed_ms: elapsed.as_millis() as u64,
                            failure: outcome.err(),
                        };
                        (index, result)
                    }
                })
                .buffer_unordered(self.config.probe_concurrency.max(1))
                .collect()
                .await;

        results.sort_by_key(|(index, _)| *index);
        ProbeReport(results.into_iter().map(|(_, result)| result).collect())
    }

    /// Record the attempt's outcome unless reconnect or dispose superseded it.
    async fn finish(
        &self,
        epoch: u64,
        result: std::result::Result<ConnectionHandle, ConnectFailure>,
    ) -> std::result::Result<ConnectionHandle, ConnectFailure> {
        let mut in_flight = self.in_flight.lock().await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return match result {
                Ok(_) => Err(ConnectFailure::Superseded),
                Err(failure) => Err(failure),
            };
        }
        in_flight.take();

        match &result {
            Ok(handle) => {
                *self.handle.lock().await = Some(handle.clone());
                let health = relay_health(handle.report());
                self.snapshot.send_modify(|snapshot| {
                    snapshot.status = ConnectionStatus::Connected;
                    snapshot.last_error = None;
                    snapshot.connected_relays = handle.relays().to_vec();
                    snapshot.relay_health = health;
                });
            }
            Err(failure) => {
                let message = ClientError::from(failure.clone()).to_string();
                warn!("Relay connection failed: {}", message);
                let health = match failure {
                    ConnectFailure::NoRelaysReachable(report) => relay_health(report),
                    _ => BTreeMap::new(),
                };
                self.snapshot.send_modify(|snapshot| {
                    snapshot.status = ConnectionStatus::Error;
                    snapshot.last_error = Some(message);
                    snapshot.connected_relays.clear();
                    snapshot.relay_health = health;
                });
            }
        }
        result
    }

    fn modify_if_current(&self, epoch: u64, modify: impl FnOnce(&mut ConnectionSnapshot)) {
        if self.epoch.load(Ordering::SeqCst) == epoch {
            self.snapshot.send_modify(modify);
        }
    }
}

fn relay_health(report: &ProbeReport) -> BTreeMap<String, RelayHealth> {
    report
        .results()
        .iter()
        .map(|result| {
            let health = if result.is_reachable() {
                RelayHealth::Reachable
            } else {
                RelayHealth::Unreachable
            };
            (result.url.clone(), health)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_filters_and_dedups() {
        let normalized = normalize_relay_urls([
            " wss://relay.damus.io ",
            "wss://relay.damus.io/",
            "https://example.com",
            "not a url",
            "",
            "ws://localhost:7777",
            "wss://Nos.LOL",
        ]);

        assert_eq!(
            normalized.urls,
            vec![
                "wss://relay.damus.io".to_string(),
                "ws://localhost:7777".to_string(),
                "wss://nos.lol".to_string(),
            ]
        );
        assert_eq!(
            normalized.rejected_urls,
            vec!["https://example.com".to_string(), "not a url".to_string()]
        );
    }

    #[test]
    fn test_normalize_keeps_paths() {
        let normalized = normalize_relay_urls(["wss://relay.example.com/inbox"]);
        assert_eq!(normalized.urls, vec!["wss://relay.example.com/inbox".to_string()]);
    }

    #[test]
    fn test_report_display_and_ranking() {
        let report = ProbeReport(vec![
            ProbeResult {
                url: "wss://a".to_string(),
                elapsed_ms: 4500,
                failure: Some(ProbeFailure::Timeout),
            },
            ProbeResult {
                url: "wss://b".to_string(),
                elapsed_ms: 300,
                failure: None,
            },
            ProbeResult {
                url: "wss://c".to_string(),
                elapsed_ms: 120,
                failure: None,
            },
        ]);

        assert_eq!(
            report.to_string(),
            "FAIL wss://a (4500ms timeout) | OK wss://b (300ms) | OK wss://c (120ms)"
        );
        assert_eq!(report.fastest(1), vec!["wss://c".to_string()]);
        assert_eq!(report.fastest(8).len(), 2);
    }

    #[test]
    fn test_relay_health_from_report() {
        let report = ProbeReport(vec![
            ProbeResult {
                url: "wss://a".to_string(),
                elapsed_ms: 10,
                failure: Some(ProbeFailure::Closed),
            },
            ProbeResult {
                url: "wss://b".to_string(),
                elapsed_ms: 10,
                failure: None,
            },
        ]);
        let health = relay_health(&report);
        assert_eq!(health["wss://a"], RelayHealth::Unreachable);
        assert_eq!(health["wss://b"], RelayHealth::Reachable);
    }
}
