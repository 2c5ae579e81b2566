//! Profile (kind 0) lookups through the fetch queue.

use crate::collect::{CollectOptions, collect};
use crate::fetch_queue::{FetchQueue, Fetcher, QueueConfig};
use crate::manager::ConnectionManager;
use crate::message::Filter;
use crate::storage::{KeyValueStore, PROFILES_KEY};
use async_trait::async_trait;
use hub_nostr::{Event, KIND_METADATA};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lud16: Option<String>,
}

impl Profile {
    /// Parse the newest metadata event's content. Non-object JSON is rejected.
    pub fn from_event(event: &Event) -> Option<Self> {
        if event.kind != KIND_METADATA {
            return None;
        }
        let value: serde_json::Value = serde_json::from_str(&event.content).ok()?;
        if !value.is_object() {
            return None;
        }
        serde_json::from_value(value).ok()
    }

    /// Best name to show: display name, then name.
    pub fn label(&self) -> Option<&str> {
        [&self.display_name, &self.name]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
    }
}

/// Fetches profiles from the connected relays.
pub struct ProfileFetcher {
    manager: Arc<ConnectionManager>,
    timeout: Duration,
}

impl ProfileFetcher {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            timeout: Duration::from_millis(4500),
        }
    }
}

#[async_trait]
impl Fetcher<String, Profile> for ProfileFetcher {
    async fn fetch(&self, pubkey: &String) -> Option<Profile> {
        if pubkey.is_empty() {
            return None;
        }
        let handle = match self.manager.ensure_connection().await {
            Ok(handle) => handle,
            Err(e) => {
                debug!("Skipping profile {}: {}", pubkey, e);
                return None;
            }
        };

        let filter = Filter::new()
            .kind(KIND_METADATA)
            .authors(vec![pubkey.clone()])
            .limit(1);
        let options = CollectOptions::default().timeout(self.timeout).max_events(50);
        let result = collect(handle.transport().as_ref(), handle.relays(), filter, options).await;

        result
            .events
            .iter()
            .filter(|event| event.pubkey == *pubkey)
            .max_by_key(|event| event.created_at)
            .and_then(Profile::from_event)
    }
}

/// Profile queue persisted under the profile cache key.
pub fn profile_queue(
    manager: Arc<ConnectionManager>,
    store: Arc<dyn KeyValueStore>,
) -> FetchQueue<String, Profile> {
    FetchQueue::persistent(
        Arc::new(ProfileFetcher::new(manager)),
        QueueConfig::default(),
        store,
        PROFILES_KEY,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(content: &str) -> Event {
        Event {
            id: "1".repeat(64),
            pubkey: "a".repeat(64),
            created_at: 10,
            kind: KIND_METADATA,
            tags: vec![],
            content: content.to_string(),
            sig: "2".repeat(128),
        }
    }

    #[test]
    fn test_profile_from_event() {
        let profile =
            Profile::from_event(&metadata(r#"{"name":"ada","display_name":" ","lud16":"ada@x.io","extra":1}"#))
                .unwrap();
        assert_eq!(profile.name.as_deref(), Some("ada"));
        assert_eq!(profile.lud16.as_deref(), Some("ada@x.io"));
        assert_eq!(profile.label(), Some("ada"));
    }

    #[test]
    fn test_malformed_profile_is_none() {
        assert_eq!(Profile::from_event(&metadata("not json")), None);
        assert_eq!(Profile::from_event(&metadata("[1,2]")), None);
        assert_eq!(Profile::from_event(&metadata(r#"{"name": 5}"#)), None);
    }
}
