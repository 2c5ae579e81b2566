//! One-shot queries that always return by a deadline.

use crate::message::Filter;
use crate::stream::StreamItem;
use crate::transport::RelayTransport;
use futures::StreamExt;
use hub_nostr::Event;
use std::time::Duration;
use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::debug;

pub const MIN_COLLECT_TIMEOUT: Duration = Duration::from_millis(1200);
pub const MAX_COLLECT_TIMEOUT: Duration = Duration::from_millis(20_000);
pub const DEFAULT_COLLECT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const MIN_COLLECT_EVENTS: usize = 50;
pub const MAX_COLLECT_EVENTS: usize = 2000;
pub const DEFAULT_COLLECT_EVENTS: usize = 500;

#[derive(Debug, Clone, Default)]
pub struct CollectOptions {
    /// Clamped to 1.2s..=20s, default 10s
    pub timeout: Option<Duration>,
    /// Clamped to 50..=2000, default the filter limit or 500
    pub max_events: Option<usize>,
}

impl CollectOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_events(mut self, max_events: usize) -> Self {
        self.max_events = Some(max_events);
        self
    }

    pub fn effective_timeout(&self) -> Duration {
        self.timeout
            .unwrap_or(DEFAULT_COLLECT_TIMEOUT)
            .clamp(MIN_COLLECT_TIMEOUT, MAX_COLLECT_TIMEOUT)
    }

    pub fn effective_max_events(&self, filter: &Filter) -> usize {
        self.max_events
            .or(filter.limit.map(|limit| limit as usize))
            .unwrap_or(DEFAULT_COLLECT_EVENTS)
            .clamp(MIN_COLLECT_EVENTS, MAX_COLLECT_EVENTS)
    }
}

/// Whatever arrived before the collection stopped.
///
/// At most one of `timed_out`, `reached_eos` and `error` is set; none is set
/// when the event cap was reached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectResult {
    pub events: Vec<Event>,
    pub timed_out: bool,
    pub reached_eos: bool,
    pub error: Option<String>,
}

/// Run `filter` once against `relays` and gather the results.
///
/// Stops on the first of: the event cap, end of stored events, the
/// subscription closing, the deadline. The subscription is cancelled once on
/// every path.
pub async fn collect(
    transport: &dyn RelayTransport,
    relays: &[String],
    filter: Filter,
    options: CollectOptions,
) -> CollectResult {
    let max_events = options.effective_max_events(&filter);
    let deadline = Instant::now() + options.effective_timeout();
    let mut result = CollectResult::default();

    let mut stream = match timeout_at(deadline, transport.subscribe(relays, vec![filter])).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            result.error = Some(e.to_string());
            return result;
        }
        Err(_) => {
            result.timed_out = true;
            return result;
        }
    };

    let expiry = sleep_until(deadline);
    tokio::pin!(expiry);

    loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(StreamItem::Event(event)) => {
                    result.events.push(event);
                    if result.events.len() >= max_events {
                        break;
                    }
                }
                Some(StreamItem::EndOfStoredEvents) => {
                    result.reached_eos = true;
                    break;
                }
                Some(StreamItem::Closed(reason)) => {
                    result.error = Some(reason);
                    break;
                }
                None => {
                    result.error = Some("subscription ended".to_string());
                    break;
                }
            },
            _ = &mut expiry => {
                result.timed_out = true;
                break;
            }
        }
    }

    stream.cancel();
    debug!(
        "Collected {} events from {} (eos: {}, timed out: {})",
        result.events.len(),
        stream.subscription_id(),
        result.reached_eos,
        result.timed_out
    );
    result
}
