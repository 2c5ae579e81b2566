//! NIP-28 public channels: kind 40 creates a channel, kind 41 updates it.

use crate::message::Filter;
use crate::store::Projection;
use hub_nostr::{Event, KIND_CHANNEL_CREATE, KIND_CHANNEL_METADATA, first_tag_value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Channel {
    /// Id of the kind 40 creation event
    pub id: String,
    pub name: String,
    pub about: Option<String>,
    pub picture: Option<String>,
    pub relays: Vec<String>,
    /// Time of the newest metadata applied
    pub updated_at: u64,
    pub created_at: u64,
    pub creator: String,
    /// Kind of the event the metadata came from
    pub source_kind: u16,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelMeta {
    #[serde(default)]
    name: Option<serde_json::Value>,
    #[serde(default)]
    about: Option<serde_json::Value>,
    #[serde(default)]
    picture: Option<serde_json::Value>,
    #[serde(default)]
    relays: Option<Vec<serde_json::Value>>,
}

impl ChannelMeta {
    fn parse(content: &str) -> Self {
        let content = if content.trim().is_empty() { "{}" } else { content };
        serde_json::from_str(content).unwrap_or_default()
    }

    fn name(&self) -> String {
        match &self.name {
            Some(serde_json::Value::String(s)) => s.trim().to_string(),
            _ => String::new(),
        }
    }

    fn text(value: &Option<serde_json::Value>) -> Option<String> {
        value.as_ref().and_then(|v| v.as_str()).map(str::to_string)
    }

    fn relays(&self) -> Vec<String> {
        self.relays
            .iter()
            .flatten()
            .filter_map(|r| r.as_str().map(str::to_string))
            .collect()
    }
}

fn parse_channel(event: &Event) -> Option<Channel> {
    if event.id.is_empty() || event.pubkey.is_empty() {
        return None;
    }
    let meta = ChannelMeta::parse(&event.content);

    let (id, name) = match event.kind {
        KIND_CHANNEL_CREATE => {
            let name = meta.name();
            let name = if name.is_empty() {
                format!("Channel {}", &event.id[..event.id.len().min(8)])
            } else {
                name
            };
            (event.id.clone(), name)
        }
        KIND_CHANNEL_METADATA => {
            let id = first_tag_value(&event.tags, "e").filter(|id| !id.is_empty())?;
            let name = meta.name();
            if name.is_empty() {
                return None;
            }
            (id.to_string(), name)
        }
        _ => return None,
    };

    Some(Channel {
        id,
        name,
        about: ChannelMeta::text(&meta.about),
        picture: ChannelMeta::text(&meta.picture),
        relays: meta.relays(),
        updated_at: event.created_at,
        created_at: event.created_at,
        creator: event.pubkey.clone(),
        source_kind: event.kind,
    })
}

#[derive(Debug, Clone, Default)]
pub struct Channels;

impl Projection for Channels {
    type Record = Channel;

    fn name(&self) -> &str {
        "channels"
    }

    fn filters(&self) -> Vec<Filter> {
        vec![
            Filter::new().kind(KIND_CHANNEL_CREATE).limit(100),
            Filter::new().kind(KIND_CHANNEL_METADATA).limit(200),
        ]
    }

    fn project(&self, event: &Event) -> Option<Channel> {
        parse_channel(event)
    }

    fn key(&self, record: &Channel) -> String {
        record.id.clone()
    }

    fn compare(&self, a: &Channel, b: &Channel) -> Ordering {
        b.updated_at.cmp(&a.updated_at)
    }

    fn cap(&self) -> usize {
        200
    }

    fn authors(&self, record: &Channel) -> Vec<String> {
        vec![record.creator.clone()]
    }

    fn merge(&self, existing: &Channel, incoming: Channel) -> Option<Channel> {
        if incoming.source_kind == KIND_CHANNEL_CREATE {
            // The creation event fixes origin; newer metadata stays in place
            if existing.source_kind == KIND_CHANNEL_METADATA && existing.updated_at > incoming.created_at {
                return Some(Channel {
                    created_at: incoming.created_at,
                    creator: incoming.creator,
                    ..existing.clone()
                });
            }
            return Some(Channel {
                updated_at: existing.updated_at.max(incoming.updated_at),
                ..incoming
            });
        }

        if existing.updated_at > incoming.updated_at {
            return None;
        }
        Some(Channel {
            created_at: existing.created_at,
            creator: existing.creator.clone(),
            ..incoming
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projections::fixtures::event;
    use crate::store::upsert;

    const CHANNEL: &str = "0000000000000000000000000000000000000000000000000000000000000001";

    fn create(at: u64, content: &str) -> Event {
        event("1", KIND_CHANNEL_CREATE, at, &[], content)
    }

    fn metadata(seed: &str, at: u64, name: &str) -> Event {
        let mut ev = event(
            seed,
            KIND_CHANNEL_METADATA,
            at,
            &[&["e", CHANNEL]],
            &format!(r#"{{"name":"{}"}}"#, name),
        );
        ev.pubkey = "c".repeat(64);
        ev
    }

    fn apply(records: &mut Vec<Channel>, ev: &Event) -> bool {
        let channel = Channels.project(ev).unwrap();
        upsert(&Channels, records, channel)
    }

    #[test]
    fn test_creation_defaults() {
        let channel = Channels.project(&create(10, "not json")).unwrap();
        assert_eq!(channel.name, "Channel 00000000");
        assert_eq!(channel.id, CHANNEL);

        let channel = Channels
            .project(&create(10, r#"{"name":" Ink ","relays":["wss://r",1]}"#))
            .unwrap();
        assert_eq!(channel.name, "Ink");
        assert_eq!(channel.relays, vec!["wss://r".to_string()]);
    }

    #[test]
    fn test_metadata_requires_channel_and_name() {
        assert!(Channels.project(&event("2", KIND_CHANNEL_METADATA, 1, &[], r#"{"name":"x"}"#)).is_none());
        assert!(Channels.project(&metadata("2", 1, "")).is_none());
    }

    #[test]
    fn test_older_metadata_ignored() {
        let mut records = Vec::new();
        apply(&mut records, &create(10, r#"{"name":"first"}"#));
        assert!(apply(&mut records, &metadata("3", 30, "newest")));
        assert!(!apply(&mut records, &metadata("2", 20, "stale")));

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "newest");
        assert_eq!(records[0].updated_at, 30);
        assert_eq!(records[0].created_at, 10);
        assert_eq!(records[0].creator, "a".repeat(64));
    }

    #[test]
    fn test_late_creation_keeps_newer_metadata() {
        let mut records = Vec::new();
        apply(&mut records, &metadata("3", 30, "renamed"));
        apply(&mut records, &create(10, r#"{"name":"original"}"#));

        assert_eq!(records[0].name, "renamed");
        assert_eq!(records[0].updated_at, 30);
        assert_eq!(records[0].created_at, 10);
        assert_eq!(records[0].creator, "a".repeat(64));
    }
}
