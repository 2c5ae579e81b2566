//! NIP-53 live activities (kind 30311).

use super::{number_tag, owned, trimmed_tag};
use crate::message::Filter;
use crate::store::Projection;
use hub_nostr::nip19::naddr_encode;
use hub_nostr::{Address, Event, KIND_LIVE_EVENT, all_tag_values, first_tag_value, unix_now};
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveEvent {
    pub event_id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub address: Address,
    /// `p` tag with the `host` role, else the author
    pub host_pubkey: String,
    pub title: String,
    pub summary: Option<String>,
    pub image: Option<String>,
    pub thumb: Option<String>,
    /// Lowercased; `planned` when missing
    pub status: String,
    pub current_participants: u64,
    pub total_participants: Option<u64>,
    pub starts: Option<u64>,
    pub ends: Option<u64>,
    pub streaming_urls: Vec<String>,
    pub service: Option<String>,
    pub watch_url: String,
}

impl LiveEvent {
    pub fn is_live(&self) -> bool {
        self.status == "live"
    }
}

pub fn parse_live_event(event: &Event) -> Option<LiveEvent> {
    if event.kind != KIND_LIVE_EVENT || event.id.is_empty() || event.pubkey.is_empty() {
        return None;
    }
    let tags = &event.tags;
    let address = Address::for_event(event)?;

    let status = trimmed_tag(tags, "status")
        .map(|s| s.to_lowercase())
        .unwrap_or_else(|| "planned".to_string());

    Some(LiveEvent {
        event_id: event.id.clone(),
        pubkey: event.pubkey.clone(),
        created_at: event.created_at,
        host_pubkey: host_pubkey(tags).unwrap_or_else(|| event.pubkey.clone()),
        title: trimmed_tag(tags, "title").unwrap_or_else(|| "Live event".to_string()),
        summary: trimmed_tag(tags, "summary"),
        image: trimmed_tag(tags, "image"),
        thumb: trimmed_tag(tags, "thumb"),
        status,
        current_participants: number_tag(tags, "current_participants").unwrap_or(0),
        total_participants: number_tag(tags, "total_participants"),
        starts: number_tag(tags, "starts"),
        ends: number_tag(tags, "ends"),
        streaming_urls: owned(all_tag_values(tags, "streaming")),
        service: trimmed_tag(tags, "service"),
        watch_url: watch_url(&address, tags),
        address,
    })
}

fn host_pubkey(tags: &[Vec<String>]) -> Option<String> {
    tags.iter()
        .find(|t| {
            t.first().map(String::as_str) == Some("p")
                && t.get(3).is_some_and(|role| role.eq_ignore_ascii_case("host"))
        })
        .and_then(|t| t.get(1))
        .filter(|pk| !pk.is_empty())
        .cloned()
}

/// Whether the activity is served by zap.stream.
pub fn is_zap_stream(tags: &[Vec<String>]) -> bool {
    let mentions = |value: &str| value.to_lowercase().contains("zap.stream");
    ["alt", "service", "url"]
        .iter()
        .any(|name| first_tag_value(tags, name).is_some_and(mentions))
        || all_tag_values(tags, "streaming").into_iter().any(mentions)
}

/// Best link for watching the activity.
fn watch_url(address: &Address, tags: &[Vec<String>]) -> String {
    let alt = first_tag_value(tags, "alt").unwrap_or_default();

    if let Some(start) = alt.to_ascii_lowercase().find("https://zap.stream/") {
        let slug_start = start + "https://zap.stream/".len();
        let slug: String = alt[slug_start..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();
        if !slug.is_empty() {
            return format!("https://zap.stream/{}", slug);
        }
    }

    if let Some(start) = alt.find("https://").or_else(|| alt.find("http://")) {
        let link: String = alt[start..].chars().take_while(|c| !c.is_whitespace()).collect();
        return link;
    }

    let url = first_tag_value(tags, "url").unwrap_or_default().trim();
    if url.starts_with("https://") || url.starts_with("http://") {
        return url.to_string();
    }

    if let Some(streaming) = all_tag_values(tags, "streaming")
        .into_iter()
        .find(|u| u.starts_with("https://") || u.starts_with("http://"))
    {
        return streaming.to_string();
    }

    match naddr_encode(address, &[]) {
        Ok(naddr) => format!("https://zap.stream/{}", naddr),
        Err(_) => "https://zap.stream".to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LiveSource {
    /// Only activities hosted on zap.stream
    #[default]
    ZapStream,
    All,
}

/// Activities currently live, most watched first.
#[derive(Debug, Clone)]
pub struct LiveEvents {
    source: LiveSource,
    limit: usize,
}

impl LiveEvents {
    pub fn new() -> Self {
        Self {
            source: LiveSource::ZapStream,
            limit: 40,
        }
    }

    pub fn source(mut self, source: LiveSource) -> Self {
        self.source = source;
        self
    }

    /// Clamped to 1..=120.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit.clamp(1, 120);
        self
    }
}

impl Default for LiveEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl Projection for LiveEvents {
    type Record = LiveEvent;

    fn name(&self) -> &str {
        "live-events"
    }

    fn filters(&self) -> Vec<Filter> {
        vec![
            Filter::new()
                .kind(KIND_LIVE_EVENT)
                .since(unix_now().saturating_sub(24 * 60 * 60))
                .limit(600),
        ]
    }

    fn project(&self, event: &Event) -> Option<LiveEvent> {
        if self.source == LiveSource::ZapStream && !is_zap_stream(&event.tags) {
            return None;
        }
        parse_live_event(event).filter(LiveEvent::is_live)
    }

    fn key(&self, record: &LiveEvent) -> String {
        record.address.to_string()
    }

    fn compare(&self, a: &LiveEvent, b: &LiveEvent) -> Ordering {
        b.current_participants
            .cmp(&a.current_participants)
            .then(b.created_at.cmp(&a.created_at))
    }

    fn cap(&self) -> usize {
        self.limit
    }

    fn authors(&self, record: &LiveEvent) -> Vec<String> {
        vec![record.host_pubkey.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projections::fixtures::event;

    #[test]
    fn test_parse_defaults() {
        let ev = event("1", KIND_LIVE_EVENT, 100, &[&["d", " show "]], "");
        let live = parse_live_event(&ev).unwrap();

        assert_eq!(live.status, "planned");
        assert_eq!(live.title, "Live event");
        assert_eq!(live.address.identifier, "show");
        assert_eq!(live.host_pubkey, ev.pubkey);
        assert_eq!(live.current_participants, 0);
        assert!(live.watch_url.starts_with("https://zap.stream/naddr1"));
    }

    #[test]
    fn test_parse_full() {
        let host = "b".repeat(64);
        let ev = event(
            "1",
            KIND_LIVE_EVENT,
            100,
            &[
                &["d", "show"],
                &["status", "LIVE"],
                &["title", "Studio session"],
                &["current_participants", "12"],
                &["total_participants", "-3"],
                &["p", host.as_str(), "", "Host"],
                &["streaming", "https://cdn.example/live.m3u8"],
                &["alt", "Watch at https://zap.stream/abc123 now"],
            ],
            "",
        );
        let live = parse_live_event(&ev).unwrap();

        assert!(live.is_live());
        assert_eq!(live.current_participants, 12);
        assert_eq!(live.total_participants, None);
        assert_eq!(live.host_pubkey, host);
        assert_eq!(live.watch_url, "https://zap.stream/abc123");
        assert!(is_zap_stream(&ev.tags));
    }

    #[test]
    fn test_missing_d_or_wrong_kind() {
        assert!(parse_live_event(&event("1", KIND_LIVE_EVENT, 1, &[&["d", "  "]], "")).is_none());
        assert!(parse_live_event(&event("1", 1, 1, &[&["d", "x"]], "")).is_none());
    }

    #[test]
    fn test_projection_keeps_only_live_and_source() {
        let planned = event("1", KIND_LIVE_EVENT, 1, &[&["d", "x"], &["service", "https://zap.stream"]], "");
        let hosted = event(
            "2",
            KIND_LIVE_EVENT,
            1,
            &[&["d", "y"], &["status", "live"], &["service", "https://zap.stream"]],
            "",
        );
        let elsewhere = event("3", KIND_LIVE_EVENT, 1, &[&["d", "z"], &["status", "live"]], "");

        assert!(LiveEvents::new().project(&planned).is_none());
        assert!(LiveEvents::new().project(&hosted).is_some());
        assert!(LiveEvents::new().project(&elsewhere).is_none());
        assert!(
            LiveEvents::new()
                .source(LiveSource::All)
                .project(&elsewhere)
                .is_some()
        );
    }

    #[test]
    fn test_limit_clamped() {
        assert_eq!(LiveEvents::new().limit(0).cap(), 1);
        assert_eq!(LiveEvents::new().limit(500).cap(), 120);
        assert_eq!(LiveEvents::new().cap(), 40);
    }
}
