//! Messages (kind 42) of one NIP-28 channel.

use crate::message::Filter;
use crate::store::Projection;
use hub_nostr::{Event, KIND_CHANNEL_MESSAGE};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Window for "recently active" participants, in seconds.
const RECENT_WINDOW_SECS: u64 = 10 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelMessage {
    pub id: String,
    pub channel_id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub content: String,
    /// First `e` tag that is not the channel itself
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Participants {
    pub count: usize,
    pub last_10m: usize,
}

impl Participants {
    /// Unique authors overall and within the last ten minutes before `now`.
    pub fn tally(messages: &[ChannelMessage], now: u64) -> Self {
        let all: HashSet<&str> = messages.iter().map(|m| m.pubkey.as_str()).collect();
        let recent: HashSet<&str> = messages
            .iter()
            .filter(|m| now.saturating_sub(m.created_at) < RECENT_WINDOW_SECS)
            .map(|m| m.pubkey.as_str())
            .collect();
        Self {
            count: all.len(),
            last_10m: recent.len(),
        }
    }
}

/// Live view of one channel. Records are kept newest first so the cap drops
/// the oldest messages; use [`ChannelMessages::chronological`] for display.
#[derive(Debug, Clone)]
pub struct ChannelMessages {
    channel_id: String,
}

impl ChannelMessages {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Oldest first.
    pub fn chronological(records: &[ChannelMessage]) -> Vec<ChannelMessage> {
        let mut messages = records.to_vec();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        messages
    }
}

impl Projection for ChannelMessages {
    type Record = ChannelMessage;

    fn name(&self) -> &str {
        "channel-messages"
    }

    fn filters(&self) -> Vec<Filter> {
        vec![
            Filter::new()
                .kind(KIND_CHANNEL_MESSAGE)
                .event_refs(vec![self.channel_id.clone()])
                .limit(200),
        ]
    }

    fn project(&self, event: &Event) -> Option<ChannelMessage> {
        if event.kind != KIND_CHANNEL_MESSAGE || event.id.is_empty() || event.pubkey.is_empty() {
            return None;
        }
        let reply_to = event
            .tags
            .iter()
            .filter(|t| t.first().map(String::as_str) == Some("e"))
            .filter_map(|t| t.get(1))
            .find(|id| **id != self.channel_id)
            .cloned();

        Some(ChannelMessage {
            id: event.id.clone(),
            channel_id: self.channel_id.clone(),
            pubkey: event.pubkey.clone(),
            created_at: event.created_at,
            content: event.content.clone(),
            reply_to,
        })
    }

    fn key(&self, record: &ChannelMessage) -> String {
        record.id.clone()
    }

    fn compare(&self, a: &ChannelMessage, b: &ChannelMessage) -> Ordering {
        b.created_at.cmp(&a.created_at)
    }

    fn cap(&self) -> usize {
        400
    }

    fn authors(&self, record: &ChannelMessage) -> Vec<String> {
        vec![record.pubkey.clone()]
    }

    fn merge(&self, _existing: &ChannelMessage, _incoming: ChannelMessage) -> Option<ChannelMessage> {
        None
    }
}
