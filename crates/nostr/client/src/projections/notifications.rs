//! Activity addressed to the signed-in user: likes, zaps, reposts, mentions,
//! replies, follows, direct messages and follow-pack invites.
//!
//! Everything is found through `#p` filters on the user's pubkey. The read
//! marker lives in the [`KeyValueStore`] under [`last_seen_key`].

use crate::message::Filter;
use crate::storage::{KeyValueStore, StorageError, last_seen_key, load_json, save_json};
use crate::store::Projection;
use hub_nostr::{
    Event, KIND_CONTACTS, KIND_DM, KIND_NOTE, KIND_REACTION, KIND_REPOST, KIND_ZAP_RECEIPT,
    all_tag_values, first_tag_value,
};
use serde::Serialize;
use std::cmp::Ordering;

/// Zap comments up to this many characters are shown inline.
const INLINE_COMMENT_CHARS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Like,
    Zap,
    Repost,
    Mention,
    Reply,
    Follow,
    Dm,
    Invite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub created_at: u64,
    /// Zap sender for zaps, the event author otherwise
    pub author_pubkey: String,
    pub summary: String,
}

/// NIP-57 receipt with the embedded zap request unpacked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZapReceipt {
    pub receipt_id: String,
    pub created_at: u64,
    pub recipient_pubkey: Option<String>,
    pub sender_pubkey: Option<String>,
    pub amount_msats: Option<u64>,
    pub amount_sats: Option<u64>,
    pub comment: Option<String>,
    /// Zapped events from the receipt and the request
    pub e_tags: Vec<String>,
    pub a_tags: Vec<String>,
}

pub fn parse_zap_receipt(event: &Event) -> Option<ZapReceipt> {
    if event.id.is_empty() || event.created_at == 0 {
        return None;
    }
    let tags = &event.tags;

    // The zap request travels as JSON in the `description` tag
    let request: Option<serde_json::Value> =
        first_tag_value(tags, "description").and_then(|d| serde_json::from_str(d).ok());
    let request_tags: Vec<Vec<String>> = request
        .as_ref()
        .and_then(|r| r.get("tags"))
        .and_then(|t| serde_json::from_value(t.clone()).ok())
        .unwrap_or_default();

    let sender_pubkey = request
        .as_ref()
        .and_then(|r| r.get("pubkey"))
        .and_then(|p| p.as_str())
        .map(str::to_string);
    let amount_msats = first_tag_value(&request_tags, "amount").and_then(|a| a.trim().parse::<u64>().ok());
    let comment = request
        .as_ref()
        .and_then(|r| r.get("content"))
        .and_then(|c| c.as_str())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    let mut e_tags = Vec::new();
    let mut a_tags = Vec::new();
    for source in [tags.as_slice(), request_tags.as_slice()] {
        for value in all_tag_values(source, "e") {
            if !e_tags.iter().any(|v| v == value) {
                e_tags.push(value.to_string());
            }
        }
        for value in all_tag_values(source, "a") {
            if !a_tags.iter().any(|v| v == value) {
                a_tags.push(value.to_string());
            }
        }
    }

    Some(ZapReceipt {
        receipt_id: event.id.clone(),
        created_at: event.created_at,
        recipient_pubkey: first_tag_value(tags, "p").map(str::to_string),
        sender_pubkey,
        amount_msats,
        amount_sats: amount_msats.map(|msats| msats / 1000),
        comment,
        e_tags,
        a_tags,
    })
}

/// `1234567` as `1,234,567`.
fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Notifications for one user, newest first.
#[derive(Debug, Clone)]
pub struct Notifications {
    me: String,
}

impl Notifications {
    pub fn new(me: impl AsRef<str>) -> Self {
        Self {
            me: me.as_ref().trim().to_lowercase(),
        }
    }

    pub fn me(&self) -> &str {
        &self.me
    }

    /// Records newer than the read marker.
    pub fn unread_count(records: &[Notification], last_seen: u64) -> usize {
        records.iter().filter(|n| n.created_at > last_seen).count()
    }

    fn notification(&self, event: &Event, kind: NotificationKind, author: &str, summary: String) -> Notification {
        Notification {
            id: event.id.clone(),
            kind,
            created_at: event.created_at,
            author_pubkey: author.to_string(),
            summary,
        }
    }
}

impl Projection for Notifications {
    type Record = Notification;

    fn name(&self) -> &str {
        "notifications"
    }

    fn filters(&self) -> Vec<Filter> {
        [
            (KIND_REACTION, 200),
            (KIND_ZAP_RECEIPT, 400),
            (KIND_REPOST, 250),
            (KIND_NOTE, 400),
            (KIND_DM, 200),
            (KIND_CONTACTS, 250),
        ]
        .into_iter()
        .map(|(kind, limit)| {
            Filter::new()
                .kind(kind)
                .pubkey_refs(vec![self.me.clone()])
                .limit(limit)
        })
        .collect()
    }

    fn project(&self, event: &Event) -> Option<Notification> {
        if event.id.is_empty() || event.pubkey.is_empty() || event.created_at == 0 {
            return None;
        }
        if event.pubkey == self.me {
            return None;
        }
        let author = event.pubkey.as_str();
        let tags = &event.tags;

        let notification = match event.kind {
            KIND_REACTION => {
                let content = event.content.trim();
                if content.is_empty() || content == "-" {
                    return None;
                }
                self.notification(event, NotificationKind::Like, author, "liked your post".into())
            }
            KIND_ZAP_RECEIPT => {
                let receipt = parse_zap_receipt(event)?;
                if receipt.recipient_pubkey.as_deref() != Some(self.me.as_str()) {
                    return None;
                }
                let mut summary =
                    format!("zapped you {} sats", group_thousands(receipt.amount_sats.unwrap_or(0)));
                if let Some(comment) = &receipt.comment
                    && comment.chars().count() <= INLINE_COMMENT_CHARS
                {
                    summary.push(' ');
                    summary.push_str(comment);
                }
                let sender = receipt.sender_pubkey.as_deref().unwrap_or(author);
                self.notification(event, NotificationKind::Zap, sender, summary)
            }
            KIND_REPOST => {
                self.notification(event, NotificationKind::Repost, author, "reposted your note".into())
            }
            KIND_NOTE => {
                if all_tag_values(tags, "t").contains(&"follow-pack-invite") {
                    self.notification(
                        event,
                        NotificationKind::Invite,
                        author,
                        "invited you to a follow pack".into(),
                    )
                } else if first_tag_value(tags, "e").is_some() {
                    self.notification(event, NotificationKind::Reply, author, "replied to you".into())
                } else {
                    self.notification(event, NotificationKind::Mention, author, "mentioned you".into())
                }
            }
            KIND_DM => self.notification(event, NotificationKind::Dm, author, "sent you a message".into()),
            KIND_CONTACTS => {
                self.notification(event, NotificationKind::Follow, author, "followed you".into())
            }
            _ => return None,
        };
        Some(notification)
    }

    fn key(&self, record: &Notification) -> String {
        record.id.clone()
    }

    fn compare(&self, a: &Notification, b: &Notification) -> Ordering {
        b.created_at.cmp(&a.created_at)
    }

    fn cap(&self) -> usize {
        500
    }

    fn authors(&self, record: &Notification) -> Vec<String> {
        vec![record.author_pubkey.clone()]
    }
}

/// Read marker for `me`; 0 when never set or unreadable.
pub fn load_last_seen(store: &dyn KeyValueStore, me: &str) -> u64 {
    load_json(store, &last_seen_key(&me.to_lowercase())).unwrap_or(0)
}

pub fn save_last_seen(store: &dyn KeyValueStore, me: &str, timestamp: u64) -> Result<(), StorageError> {
    save_json(store, &last_seen_key(&me.to_lowercase()), &timestamp)
}
