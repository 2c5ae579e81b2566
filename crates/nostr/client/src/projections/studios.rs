//! Artist studios (kind 30050): a JSON portfolio per `d` identifier.

use crate::message::Filter;
use crate::store::Projection;
use hub_nostr::nip19::naddr_encode;
use hub_nostr::{Address, Event, KIND_STUDIO, d_tag};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StudioItem {
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    Video {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    Link {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
}

impl StudioItem {
    pub fn url(&self) -> &str {
        match self {
            StudioItem::Image { url, .. } | StudioItem::Video { url, .. } | StudioItem::Link { url, .. } => url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudioContent {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub items: Vec<StudioItem>,
    /// Kind 40 channel used for studio chat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
}

/// Wire shape before item validation; unknown item types are skipped.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStudio {
    #[serde(default)]
    id: String,
    name: Option<String>,
    about: Option<String>,
    picture: Option<String>,
    #[serde(default)]
    tags: Vec<serde_json::Value>,
    items: Option<Vec<serde_json::Value>>,
    channel_id: Option<String>,
    stream_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Studio {
    pub event_id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub d: String,
    pub address: Address,
    pub naddr: String,
    pub content: StudioContent,
}

pub fn parse_studio(event: &Event) -> Option<Studio> {
    if event.kind != KIND_STUDIO || event.id.is_empty() || event.pubkey.is_empty() || event.created_at == 0
    {
        return None;
    }
    let d = d_tag(&event.tags)?.to_string();

    let raw: RawStudio = serde_json::from_str(&event.content).ok()?;
    let name = raw.name.filter(|n| !n.is_empty())?;
    let items = raw
        .items?
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();

    let address = Address::new(KIND_STUDIO, event.pubkey.clone(), d.clone());
    let naddr = naddr_encode(&address, &[]).ok()?;

    Some(Studio {
        event_id: event.id.clone(),
        pubkey: event.pubkey.clone(),
        created_at: event.created_at,
        d,
        address,
        naddr,
        content: StudioContent {
            id: raw.id,
            name,
            about: raw.about,
            picture: raw.picture,
            tags: raw
                .tags
                .into_iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect(),
            items,
            channel_id: raw.channel_id,
            stream_url: raw.stream_url,
        },
    })
}

#[derive(Debug, Clone, Default)]
pub struct Studios;

impl Projection for Studios {
    type Record = Studio;

    fn name(&self) -> &str {
        "studios"
    }

    fn filters(&self) -> Vec<Filter> {
        vec![Filter::new().kind(KIND_STUDIO).limit(200)]
    }

    fn project(&self, event: &Event) -> Option<Studio> {
        parse_studio(event)
    }

    fn key(&self, record: &Studio) -> String {
        record.address.to_string()
    }

    fn compare(&self, a: &Studio, b: &Studio) -> Ordering {
        b.created_at.cmp(&a.created_at)
    }

    fn cap(&self) -> usize {
        300
    }

    fn authors(&self, record: &Studio) -> Vec<String> {
        vec![record.pubkey.clone()]
    }
}
