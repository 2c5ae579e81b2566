//! Marketplace listings: NIP-15 products and NIP-99 classifieds.

use super::{owned, trimmed_tag};
use crate::message::Filter;
use crate::store::Projection;
use hub_nostr::{
    Address, Event, KIND_CLASSIFIED, KIND_NIP15_PRODUCT, all_tag_values, first_tag_value,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingKind {
    Nip15Product,
    Nip99Classified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Active,
    Sold,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing {
    pub kind: ListingKind,
    pub event_id: String,
    pub address: Option<Address>,
    pub pubkey: String,
    pub created_at: u64,
    pub title: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub images: Vec<String>,
    pub tags: Vec<String>,
    pub category: Option<String>,
    /// Only set when priced in sats
    pub price_sats: Option<f64>,
    pub currency: String,
    pub status: ListingStatus,
}

/// JSON body of a NIP-15 product.
#[derive(Debug, Deserialize)]
struct ProductContent {
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    images: Vec<serde_json::Value>,
    #[serde(default)]
    tags: Vec<serde_json::Value>,
    price: Option<f64>,
    currency: Option<String>,
    category: Option<String>,
    availability: Option<String>,
}

pub fn parse_listing(event: &Event) -> Option<Listing> {
    match event.kind {
        KIND_NIP15_PRODUCT => parse_product(event),
        KIND_CLASSIFIED => Some(parse_classified(event)),
        _ => None,
    }
}

fn parse_product(event: &Event) -> Option<Listing> {
    let content: ProductContent = serde_json::from_str(&event.content).ok()?;
    let title = content.name.filter(|name| !name.is_empty())?;
    let currency = content
        .currency
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| "sat".to_string());
    let price_sats = if currency.to_lowercase().starts_with("sat") {
        content.price
    } else {
        None
    };
    let strings = |values: Vec<serde_json::Value>| -> Vec<String> {
        values
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    };
    let status = if content.availability.as_deref() == Some("unavailable") {
        ListingStatus::Sold
    } else {
        ListingStatus::Active
    };

    Some(Listing {
        kind: ListingKind::Nip15Product,
        event_id: event.id.clone(),
        address: Address::for_event(event),
        pubkey: event.pubkey.clone(),
        created_at: event.created_at,
        title,
        summary: content.description.clone(),
        description: content.description,
        images: strings(content.images),
        tags: strings(content.tags),
        category: content.category,
        price_sats,
        currency,
        status,
    })
}

fn parse_classified(event: &Event) -> Listing {
    let tags = &event.tags;
    let price = tags
        .iter()
        .find(|t| t.first().map(String::as_str) == Some("price"));
    let currency = price.and_then(|t| t.get(2)).cloned();
    let price_sats = match (&currency, price.and_then(|t| t.get(1))) {
        (Some(currency), Some(amount)) if currency.to_lowercase().starts_with("sat") => {
            amount.trim().parse().ok()
        }
        _ => None,
    };
    let status = match first_tag_value(tags, "status") {
        Some("sold") => ListingStatus::Sold,
        _ => ListingStatus::Active,
    };

    Listing {
        kind: ListingKind::Nip99Classified,
        event_id: event.id.clone(),
        address: None,
        pubkey: event.pubkey.clone(),
        created_at: event.created_at,
        title: trimmed_tag(tags, "title").unwrap_or_else(|| "Untitled".to_string()),
        summary: first_tag_value(tags, "summary").map(str::to_string),
        description: Some(event.content.clone()),
        images: owned(all_tag_values(tags, "image")),
        tags: owned(all_tag_values(tags, "t")),
        category: first_tag_value(tags, "category").map(str::to_string),
        price_sats,
        currency: currency.unwrap_or_else(|| "sat".to_string()),
        status,
    }
}

/// Discovery feed of products and classifieds, newest first.
#[derive(Debug, Clone, Default)]
pub struct Listings;

impl Projection for Listings {
    type Record = Listing;

    fn name(&self) -> &str {
        "listings"
    }

    fn filters(&self) -> Vec<Filter> {
        vec![
            Filter::new()
                .kinds(vec![KIND_NIP15_PRODUCT, KIND_CLASSIFIED])
                .limit(200),
        ]
    }

    fn project(&self, event: &Event) -> Option<Listing> {
        parse_listing(event)
    }

    fn key(&self, record: &Listing) -> String {
        record.event_id.clone()
    }

    fn compare(&self, a: &Listing, b: &Listing) -> Ordering {
        b.created_at.cmp(&a.created_at)
    }

    fn cap(&self) -> usize {
        400
    }

    fn authors(&self, record: &Listing) -> Vec<String> {
        vec![record.pubkey.clone()]
    }

    // Same event id means same content
    fn merge(&self, _existing: &Listing, _incoming: Listing) -> Option<Listing> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projections::fixtures::event;

    #[test]
    fn test_product_listing() {
        let ev = event(
            "1",
            KIND_NIP15_PRODUCT,
            10,
            &[&["d", "print-1"]],
            r#"{"name":"Print","price":2100,"images":["https://img/1.png",3],"availability":"unavailable"}"#,
        );
        let listing = parse_listing(&ev).unwrap();

        assert_eq!(listing.kind, ListingKind::Nip15Product);
        assert_eq!(listing.title, "Print");
        assert_eq!(listing.price_sats, Some(2100.0));
        assert_eq!(listing.currency, "sat");
        assert_eq!(listing.images, vec!["https://img/1.png".to_string()]);
        assert_eq!(listing.status, ListingStatus::Sold);
        assert_eq!(listing.address.unwrap().identifier, "print-1");
    }

    #[test]
    fn test_product_with_bad_content_is_dropped() {
        assert!(parse_listing(&event("1", KIND_NIP15_PRODUCT, 1, &[], "{not json")).is_none());
        assert!(parse_listing(&event("1", KIND_NIP15_PRODUCT, 1, &[], r#"{"price":1}"#)).is_none());
    }

    #[test]
    fn test_classified_listing() {
        let ev = event(
            "2",
            KIND_CLASSIFIED,
            10,
            &[
                &["title", "Canvas"],
                &["t", "painting"],
                &["price", "50000", "SATS"],
                &["status", "sold"],
            ],
            "big canvas",
        );
        let listing = parse_listing(&ev).unwrap();

        assert_eq!(listing.title, "Canvas");
        assert_eq!(listing.tags, vec!["painting".to_string()]);
        assert_eq!(listing.price_sats, Some(50000.0));
        assert_eq!(listing.currency, "SATS");
        assert_eq!(listing.status, ListingStatus::Sold);
        assert_eq!(listing.description.as_deref(), Some("big canvas"));
    }

    #[test]
    fn test_classified_defaults() {
        let listing = parse_listing(&event("3", KIND_CLASSIFIED, 1, &[], "")).unwrap();
        assert_eq!(listing.title, "Untitled");
        assert_eq!(listing.currency, "sat");
        assert_eq!(listing.price_sats, None);
        assert_eq!(listing.status, ListingStatus::Active);
    }
}
