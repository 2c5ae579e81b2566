//! The admin's curated set of featured artists (NIP-51 kind 30004).

use crate::message::Filter;
use crate::store::Projection;
use hub_nostr::{Address, Event, FEATURED_SET_D, KIND_CURATED_SET, all_tag_values};
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeaturedSet {
    pub address: Address,
    pub event_id: String,
    pub created_at: u64,
    /// Featured artists, first occurrence order
    pub pubkeys: Vec<String>,
    /// Featured addressable events
    pub addresses: Vec<String>,
}

fn dedup(values: Vec<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        if !value.is_empty() && !out.iter().any(|v| v == value) {
            out.push(value.to_string());
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct Featured {
    admin: String,
}

impl Featured {
    /// `admin` is the curator's hex pubkey.
    pub fn new(admin: impl Into<String>) -> Self {
        Self { admin: admin.into() }
    }

    pub fn admin(&self) -> &str {
        &self.admin
    }
}

impl Projection for Featured {
    type Record = FeaturedSet;

    fn name(&self) -> &str {
        "featured"
    }

    fn filters(&self) -> Vec<Filter> {
        vec![
            Filter::new()
                .kind(KIND_CURATED_SET)
                .authors(vec![self.admin.clone()])
                .tag("d", vec![FEATURED_SET_D.to_string()])
                .limit(5),
        ]
    }

    fn project(&self, event: &Event) -> Option<FeaturedSet> {
        if event.kind != KIND_CURATED_SET || event.pubkey != self.admin {
            return None;
        }
        let address = Address::for_event(event)?;
        if address.identifier != FEATURED_SET_D {
            return None;
        }

        Some(FeaturedSet {
            address,
            event_id: event.id.clone(),
            created_at: event.created_at,
            pubkeys: dedup(all_tag_values(&event.tags, "p")),
            addresses: dedup(all_tag_values(&event.tags, "a")),
        })
    }

    fn key(&self, record: &FeaturedSet) -> String {
        record.address.to_string()
    }

    fn compare(&self, a: &FeaturedSet, b: &FeaturedSet) -> Ordering {
        b.created_at.cmp(&a.created_at)
    }

    fn cap(&self) -> usize {
        5
    }

    fn authors(&self, record: &FeaturedSet) -> Vec<String> {
        record.pubkeys.clone()
    }

    // Relays may still hand out superseded revisions
    fn merge(&self, existing: &FeaturedSet, incoming: FeaturedSet) -> Option<FeaturedSet> {
        (incoming.created_at >= existing.created_at).then_some(incoming)
    }
}
