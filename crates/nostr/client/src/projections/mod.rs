//! Typed collections built on [`crate::store::ProjectionStore`].
//!
//! Each projection is a pure event-to-record function plus the key, ordering
//! and cap of its collection.

mod challenges;
mod channel_messages;
mod channels;
mod featured;
mod hub_events;
mod listings;
mod live_events;
mod notifications;
mod studios;

pub use challenges::{Challenges, ZapChallenge, ZapChallengeContent, parse_zap_challenge};
pub use channel_messages::{ChannelMessage, ChannelMessages, Participants};
pub use channels::{Channel, Channels};
pub use featured::{Featured, FeaturedSet};
pub use hub_events::{HUB_EVENT_TAGS, HubEvent, HubEvents, parse_hub_event};
pub use listings::{Listing, ListingKind, ListingStatus, Listings, parse_listing};
pub use live_events::{LiveEvent, LiveEvents, LiveSource, is_zap_stream, parse_live_event};
pub use notifications::{
    Notification, NotificationKind, Notifications, ZapReceipt, load_last_seen, parse_zap_receipt,
    save_last_seen,
};
pub use studios::{Studio, StudioContent, StudioItem, Studios, parse_studio};

use hub_nostr::first_tag_value;

/// Trimmed tag value, `None` when absent or blank.
fn trimmed_tag(tags: &[Vec<String>], name: &str) -> Option<String> {
    first_tag_value(tags, name)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Non-negative integer tag value.
fn number_tag(tags: &[Vec<String>], name: &str) -> Option<u64> {
    first_tag_value(tags, name).and_then(|value| value.trim().parse().ok())
}

fn owned(values: Vec<&str>) -> Vec<String> {
    values.into_iter().map(str::to_string).collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use hub_nostr::Event;

    /// Unsigned event with a deterministic id derived from `seed`.
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
}
