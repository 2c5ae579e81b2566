//! Community events announced as NIP-99 classifieds.

use super::{number_tag, owned, trimmed_tag};
use crate::message::Filter;
use crate::store::Projection;
use hub_nostr::{Address, Event, KIND_CLASSIFIED, all_tag_values};
use serde::Serialize;
use std::cmp::Ordering;

/// `t` values that mark a classified as an event.
pub const HUB_EVENT_TAGS: [&str; 5] = ["event", "workshop", "meetup", "exhibition", "residency"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubEvent {
    pub event_id: String,
    pub address: Option<Address>,
    pub pubkey: String,
    pub created_at: u64,
    pub title: String,
    pub summary: Option<String>,
    pub markdown: String,
    pub images: Vec<String>,
    pub tags: Vec<String>,
    pub start: Option<u64>,
    pub end: Option<u64>,
    /// `location` tag, else the geohash
    pub location: Option<String>,
    pub url: Option<String>,
}

impl HubEvent {
    /// Sort time: the start if known, else publication time.
    pub fn sort_time(&self) -> u64 {
        self.start.unwrap_or(self.created_at)
    }
}

pub fn parse_hub_event(event: &Event) -> Option<HubEvent> {
    if event.kind != KIND_CLASSIFIED || event.id.is_empty() || event.pubkey.is_empty() {
        return None;
    }
    let tags = &event.tags;

    Some(HubEvent {
        event_id: event.id.clone(),
        address: Address::for_event(event),
        pubkey: event.pubkey.clone(),
        created_at: event.created_at,
        title: trimmed_tag(tags, "title").unwrap_or_else(|| "Untitled event".to_string()),
        summary: trimmed_tag(tags, "summary"),
        markdown: event.content.clone(),
        images: owned(all_tag_values(tags, "image")),
        tags: owned(all_tag_values(tags, "t")),
        start: number_tag(tags, "start"),
        end: number_tag(tags, "end"),
        location: trimmed_tag(tags, "location").or_else(|| trimmed_tag(tags, "g")),
        url: trimmed_tag(tags, "url"),
    })
}

#[derive(Debug, Clone, Default)]
pub struct HubEvents;

impl Projection for HubEvents {
    type Record = HubEvent;

    fn name(&self) -> &str {
        "hub-events"
    }

    fn filters(&self) -> Vec<Filter> {
        vec![
            Filter::new()
                .kind(KIND_CLASSIFIED)
                .tag("t", HUB_EVENT_TAGS.iter().map(|t| t.to_string()).collect())
                .limit(200),
        ]
    }

    fn project(&self, event: &Event) -> Option<HubEvent> {
        parse_hub_event(event)
    }

    /// Address when the event has one, so edits replace the old revision.
    fn key(&self, record: &HubEvent) -> String {
        match &record.address {
            Some(address) => address.to_string(),
            None => record.event_id.clone(),
        }
    }

    fn compare(&self, a: &HubEvent, b: &HubEvent) -> Ordering {
        b.sort_time().cmp(&a.sort_time())
    }

    fn cap(&self) -> usize {
        300
    }

    fn authors(&self, record: &HubEvent) -> Vec<String> {
        vec![record.pubkey.clone()]
    }
}
