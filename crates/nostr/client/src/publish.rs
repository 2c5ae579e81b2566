//! Signing and best-effort publishing to every configured relay.

use crate::error::{ClientError, Result};
use crate::follows::{
    FollowUpdate, add_contacts_tags, fetch_contacts, following_from_contacts_tags,
    update_contacts_tags,
};
use crate::manager::ConnectionManager;
use crate::signer::SignerSelector;
use crate::transport::RelayPublishOutcome;
use hub_nostr::{
    Event, EventTemplate, KIND_CHANNEL_MESSAGE, KIND_CONTACTS, KIND_CURATED_SET, KIND_NOTE,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-relay outcomes of one publish. Rejections are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub event_id: String,
    pub outcomes: Vec<RelayPublishOutcome>,
}

impl PublishReport {
    pub fn accepted(&self) -> Vec<&RelayPublishOutcome> {
        self.outcomes.iter().filter(|o| o.accepted).collect()
    }

    pub fn rejected(&self) -> Vec<&RelayPublishOutcome> {
        self.outcomes.iter().filter(|o| !o.accepted).collect()
    }

    pub fn any_accepted(&self) -> bool {
        self.outcomes.iter().any(|o| o.accepted)
    }
}

pub struct Publisher {
    manager: Arc<ConnectionManager>,
    signer: SignerSelector,
    confirmation_timeout: Duration,
}

impl Publisher {
    pub fn new(manager: Arc<ConnectionManager>, signer: SignerSelector) -> Self {
        Self {
            manager,
            signer,
            confirmation_timeout: Duration::from_secs(10),
        }
    }

    /// How long each relay gets to answer with `OK`.
    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn signer(&self) -> &SignerSelector {
        &self.signer
    }

    /// Send a signed event to every configured relay and wait for all of them.
    ///
    /// Writes are not limited to the fastest relays picked for reading.
    /// Succeeds once dispatch completes, whatever the relays answered.
    pub async fn publish(&self, event: &Event) -> Result<PublishReport> {
        let relays = self.manager.configured_relays().urls;
        if relays.is_empty() {
            return Err(ClientError::Config("No relays configured.".to_string()));
        }

        info!("Publishing {} to {} relays", event.id, relays.len());
        let outcomes = self
            .manager
            .transport()
            .publish(&relays, event, self.confirmation_timeout)
            .await;
        let report = PublishReport {
            event_id: event.id.clone(),
            outcomes,
        };

        if report.any_accepted() {
            info!(
                "Event {} accepted by {}/{} relays",
                event.id,
                report.accepted().len(),
                report.outcomes.len()
            );
        } else {
            warn!("Event {} was not accepted by any relay", event.id);
        }
        Ok(report)
    }

    pub async fn sign_and_publish(&self, template: EventTemplate) -> Result<(Event, PublishReport)> {
        let event = self.signer.sign(template).await?;
        let report = self.publish(&event).await?;
        Ok((event, report))
    }

    /// Post to a public chat channel, optionally replying to a message.
    pub async fn publish_channel_message(
        &self,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<(Event, PublishReport)> {
        let template = channel_message_template(channel_id, content, reply_to)?;
        self.sign_and_publish(template).await
    }

    /// Comment on an event, and on its address when it is replaceable.
    pub async fn publish_comment(
        &self,
        root_event_id: &str,
        root_address: Option<&str>,
        content: &str,
        hashtags: &[String],
    ) -> Result<(Event, PublishReport)> {
        let template = comment_template(root_event_id, root_address, content, hashtags)?;
        self.sign_and_publish(template).await
    }

    /// Publish a NIP-51 curated set of people and addressable events.
    pub async fn publish_curated_set(&self, set: &CuratedSet) -> Result<(Event, PublishReport)> {
        let template = curated_set_template(set)?;
        self.sign_and_publish(template).await
    }

    /// Follow or unfollow `target` by republishing the signer's contact list.
    pub async fn follow(&self, target: &str, follow: bool) -> Result<FollowUpdate> {
        let target = target.trim();
        if target.is_empty() {
            return Err(ClientError::InvalidRequest("Missing target pubkey".to_string()));
        }
        let me = self.signer.get_public_key().await?;
        if me == target {
            return Err(ClientError::InvalidRequest("Cannot follow yourself".to_string()));
        }

        let previous = fetch_contacts(&self.manager, &me).await?;
        let (tags, content) = split_contacts(previous);
        let was_following = following_from_contacts_tags(&tags).contains(target);
        let next = update_contacts_tags(&tags, target, follow);
        info!(
            "{} {}",
            if follow { "Following" } else { "Unfollowing" },
            target
        );

        let added = usize::from(follow && !was_following);
        self.publish_contacts(next, content, added).await
    }

    /// Follow every pubkey in `pubkeys` in one contact list update.
    ///
    /// `None` when all of them were already followed; nothing is published then.
    pub async fn follow_many(&self, pubkeys: &[String]) -> Result<Option<FollowUpdate>> {
        let me = self.signer.get_public_key().await?;
        let add: Vec<String> = pubkeys
            .iter()
            .map(|pubkey| pubkey.trim().to_string())
            .filter(|pubkey| !pubkey.is_empty() && *pubkey != me)
            .collect();
        if add.is_empty() {
            return Ok(None);
        }

        let previous = fetch_contacts(&self.manager, &me).await?;
        let (tags, content) = split_contacts(previous);
        let (next, added) = add_contacts_tags(&tags, &add);
        if added == 0 {
            debug!("Already following all {} pubkeys", add.len());
            return Ok(None);
        }
        info!("Following {} more pubkeys", added);
        self.publish_contacts(next, content, added).await.map(Some)
    }

    async fn publish_contacts(
        &self,
        tags: Vec<Vec<String>>,
        content: String,
        added: usize,
    ) -> Result<FollowUpdate> {
        let mut template = EventTemplate::new(KIND_CONTACTS, content);
        template.tags = tags;
        let (event, report) = self.sign_and_publish(template).await?;
        let following = following_from_contacts_tags(&event.tags);
        Ok(FollowUpdate {
            event,
            report,
            following,
            added,
        })
    }
}

/// A NIP-51 curated set (kind 30004).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CuratedSet {
    /// The `d` identifier; republishing with the same one replaces the set
    pub d: String,
    pub title: String,
    pub description: Option<String>,
    pub pubkeys: Vec<String>,
    /// `kind:pubkey:d` coordinates
    pub addresses: Vec<String>,
}

/// Tags and content of the previous contact list, or an empty one.
fn split_contacts(previous: Option<Event>) -> (Vec<Vec<String>>, String) {
    previous
        .map(|event| (event.tags, event.content))
        .unwrap_or_default()
}

fn comment_template(
    root_event_id: &str,
    root_address: Option<&str>,
    content: &str,
    hashtags: &[String],
) -> Result<EventTemplate> {
    let root_event_id = root_event_id.trim();
    if root_event_id.is_empty() {
        return Err(ClientError::InvalidRequest("Missing root event id".to_string()));
    }
    if content.trim().is_empty() {
        return Err(ClientError::InvalidRequest("Comment is empty".to_string()));
    }

    let mut template = EventTemplate::new(KIND_NOTE, content).tag(["e", root_event_id, "", "root"]);
    if let Some(address) = root_address.map(str::trim).filter(|a| !a.is_empty()) {
        template = template.tag(["a", address, "", "root"]);
    }
    for hashtag in hashtags {
        template = template.tag(["t", hashtag.strip_prefix('#').unwrap_or(hashtag)]);
    }
    Ok(template)
}

fn curated_set_template(set: &CuratedSet) -> Result<EventTemplate> {
    let d = set.d.trim();
    if d.is_empty() {
        return Err(ClientError::InvalidRequest("Missing set identifier".to_string()));
    }

    let mut template = EventTemplate::new(KIND_CURATED_SET, "")
        .tag(["d", d])
        .tag(["title", set.title.as_str()]);
    if let Some(description) = set.description.as_deref().filter(|text| !text.is_empty()) {
        template = template.tag(["description", description]);
    }
    for pubkey in &set.pubkeys {
        template = template.tag(["p", pubkey.as_str()]);
    }
    for address in &set.addresses {
        template = template.tag(["a", address.as_str()]);
    }
    Ok(template)
}

fn channel_message_template(
    channel_id: &str,
    content: &str,
    reply_to: Option<&str>,
) -> Result<EventTemplate> {
    let channel_id = channel_id.trim();
    if channel_id.is_empty() {
        return Err(ClientError::InvalidRequest("Missing channel id".to_string()));
    }
    let content = content.trim();
    if content.is_empty() {
        return Err(ClientError::InvalidRequest("Message is empty".to_string()));
    }

    let mut template =
        EventTemplate::new(KIND_CHANNEL_MESSAGE, content).tag(["e", channel_id, "", "root"]);
    if let Some(reply_to) = reply_to.map(str::trim).filter(|id| !id.is_empty()) {
        template = template.tag(["e", reply_to, "", "reply"]);
    }
    Ok(template)
}
