//! Zap challenges (kind 30051): time-boxed zap goals aimed at one pubkey.

use crate::message::Filter;
use crate::store::Projection;
use hub_nostr::nip19::naddr_encode;
use hub_nostr::{Address, Event, KIND_ZAP_CHALLENGE, d_tag};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZapChallengeContent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Unix seconds
    #[serde(default)]
    pub starts_at: u64,
    #[serde(default)]
    pub ends_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_sats: Option<u64>,
    /// Recipient of the zaps
    #[serde(default)]
    pub target_pubkey: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZapChallenge {
    pub event_id: String,
    /// Creator of the challenge
    pub pubkey: String,
    pub created_at: u64,
    pub d: String,
    pub address: Address,
    pub naddr: String,
    pub content: ZapChallengeContent,
}

impl ZapChallenge {
    pub fn is_running(&self, now: u64) -> bool {
        self.content.starts_at <= now && now < self.content.ends_at
    }
}

pub fn parse_zap_challenge(event: &Event) -> Option<ZapChallenge> {
    if event.kind != KIND_ZAP_CHALLENGE
        || event.id.is_empty()
        || event.pubkey.is_empty()
        || event.created_at == 0
    {
        return None;
    }
    let d = d_tag(&event.tags)?.to_string();

    let content: ZapChallengeContent = serde_json::from_str(&event.content).ok()?;
    if content.title.is_empty() || content.target_pubkey.is_empty() {
        return None;
    }
    if content.starts_at == 0 || content.ends_at == 0 {
        return None;
    }

    let address = Address::new(KIND_ZAP_CHALLENGE, event.pubkey.clone(), d.clone());
    let naddr = naddr_encode(&address, &[]).ok()?;

    Some(ZapChallenge {
        event_id: event.id.clone(),
        pubkey: event.pubkey.clone(),
        created_at: event.created_at,
        d,
        address,
        naddr,
        content,
    })
}

#[derive(Debug, Clone, Default)]
pub struct Challenges;

impl Projection for Challenges {
    type Record = ZapChallenge;

    fn name(&self) -> &str {
        "challenges"
    }

    fn filters(&self) -> Vec<Filter> {
        vec![Filter::new().kind(KIND_ZAP_CHALLENGE).limit(200)]
    }

    fn project(&self, event: &Event) -> Option<ZapChallenge> {
        parse_zap_challenge(event)
    }

    fn key(&self, record: &ZapChallenge) -> String {
        record.address.to_string()
    }

    fn compare(&self, a: &ZapChallenge, b: &ZapChallenge) -> Ordering {
        b.content.starts_at.cmp(&a.content.starts_at)
    }

    fn cap(&self) -> usize {
        300
    }

    fn authors(&self, record: &ZapChallenge) -> Vec<String> {
        vec![record.pubkey.clone(), record.content.target_pubkey.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projections::fixtures::event;

    fn body(starts: u64, ends: u64) -> String {
        format!(
            r#"{{"id":"c1","title":"Paint-off","startsAt":{},"endsAt":{},"goalSats":21000,"targetPubkey":"{}"}}"#,
            starts,
            ends,
            "b".repeat(64)
        )
    }

    #[test]
    fn test_parse_challenge() {
        let ev = event("1", KIND_ZAP_CHALLENGE, 10, &[&["d", "c1"]], &body(100, 200));
        let challenge = parse_zap_challenge(&ev).unwrap();

        assert_eq!(challenge.content.title, "Paint-off");
        assert_eq!(challenge.content.goal_sats, Some(21000));
        assert!(challenge.is_running(150));
        assert!(!challenge.is_running(200));
        assert_eq!(Challenges.authors(&challenge), vec!["a".repeat(64), "b".repeat(64)]);
    }

    #[test]
    fn test_challenge_requires_window_and_target() {
        let tags: &[&[&str]] = &[&["d", "c1"]];
        assert!(parse_zap_challenge(&event("1", KIND_ZAP_CHALLENGE, 10, tags, &body(0, 200))).is_none());
        assert!(parse_zap_challenge(&event("1", KIND_ZAP_CHALLENGE, 10, tags, r#"{"title":"x","startsAt":1,"endsAt":2}"#)).is_none());
        assert!(parse_zap_challenge(&event("1", KIND_ZAP_CHALLENGE, 10, tags, "[]")).is_none());
    }

    #[test]
    fn test_sorted_by_start() {
        let tags: &[&[&str]] = &[&["d", "c1"]];
        let early = parse_zap_challenge(&event("1", KIND_ZAP_CHALLENGE, 10, tags, &body(100, 200))).unwrap();
        let late = parse_zap_challenge(&event("2", KIND_ZAP_CHALLENGE, 5, tags, &body(300, 400))).unwrap();
        assert_eq!(Challenges.compare(&late, &early), Ordering::Less);
    }
}
