//! Contact list (kind 3) reads and follow edits.
//!
//! A contact list is replaceable: every follow or unfollow republishes the
//! whole list, so edits start from the newest list the relays return and keep
//! its content and non-`p` tags untouched.

use crate::collect::{CollectOptions, collect};
use crate::error::{ClientError, Result};
use crate::manager::ConnectionManager;
use crate::message::Filter;
use crate::publish::PublishReport;
use hub_nostr::{Event, KIND_CONTACTS};
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;
use tracing::debug;

const CONTACTS_TIMEOUT: Duration = Duration::from_millis(4500);

/// Outcome of publishing an edited contact list.
#[derive(Debug, Clone)]
pub struct FollowUpdate {
    pub event: Event,
    pub report: PublishReport,
    /// Everyone followed after the edit
    pub following: BTreeSet<String>,
    /// Pubkeys newly followed by this edit
    pub added: usize,
}

/// Pubkeys named by `p` tags.
pub fn following_from_contacts_tags(tags: &[Vec<String>]) -> BTreeSet<String> {
    tags.iter()
        .filter(|tag| tag.first().is_some_and(|name| name == "p"))
        .filter_map(|tag| tag.get(1))
        .filter(|pubkey| !pubkey.is_empty())
        .cloned()
        .collect()
}

/// Keep every non-`p` tag and the first `p` tag per pubkey.
fn dedup_keep_first_p(tags: Vec<Vec<String>>) -> Vec<Vec<String>> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .filter(|tag| match tag.first().map(String::as_str) {
            None => false,
            Some("p") => tag
                .get(1)
                .is_some_and(|pubkey| !pubkey.is_empty() && seen.insert(pubkey.clone())),
            Some(_) => true,
        })
        .collect()
}

/// Follow or unfollow `target`. Unfollowing removes every `p` tag for it.
pub fn update_contacts_tags(tags: &[Vec<String>], target: &str, follow: bool) -> Vec<Vec<String>> {
    let mut next: Vec<Vec<String>> = tags
        .iter()
        .filter(|tag| follow || !is_p_tag_for(tag, target))
        .cloned()
        .collect();
    if follow {
        next.push(vec!["p".to_string(), target.to_string()]);
    }
    dedup_keep_first_p(next)
}

/// Follow every pubkey in `add` not already followed.
///
/// Returns the new tags and how many pubkeys were added.
pub fn add_contacts_tags(tags: &[Vec<String>], add: &[String]) -> (Vec<Vec<String>>, usize) {
    let before = following_from_contacts_tags(tags);
    let mut next = tags.to_vec();
    next.extend(
        add.iter()
            .filter(|pubkey| !pubkey.is_empty())
            .map(|pubkey| vec!["p".to_string(), pubkey.clone()]),
    );
    let next = dedup_keep_first_p(next);
    let added = following_from_contacts_tags(&next).len() - before.len();
    (next, added)
}

fn is_p_tag_for(tag: &[String], pubkey: &str) -> bool {
    tag.first().is_some_and(|name| name == "p") && tag.get(1).is_some_and(|value| value == pubkey)
}

/// Newest contact list `pubkey` published on the connected relays.
///
/// `None` when no relay answered with one before the deadline; an error when
/// the query itself failed.
pub async fn fetch_contacts(manager: &ConnectionManager, pubkey: &str) -> Result<Option<Event>> {
    let handle = manager.ensure_connection().await?;
    let filter = Filter::new()
        .kind(KIND_CONTACTS)
        .authors(vec![pubkey.to_string()])
        .limit(1);
    let options = CollectOptions::default().timeout(CONTACTS_TIMEOUT);
    let result = collect(handle.transport().as_ref(), handle.relays(), filter, options).await;
    debug!(
        "Contact lists for {}: {} events (timed out: {})",
        pubkey,
        result.events.len(),
        result.timed_out
    );

    // An edit built on an unread list would drop every follow
    if result.events.is_empty()
        && let Some(error) = result.error
    {
        return Err(ClientError::Subscription(error));
    }

    Ok(result
        .events
        .into_iter()
        .filter(|event| event.kind == KIND_CONTACTS && event.pubkey == pubkey)
        .max_by_key(|event| event.created_at))
}
