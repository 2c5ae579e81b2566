//! Tag lookups and replaceable-event addresses.

use crate::event::{Event, is_addressable_kind, is_replaceable_kind};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Value of the first tag whose name is `name`.
pub fn first_tag_value<'a>(tags: &'a [Vec<String>], name: &str) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.first().map(String::as_str) == Some(name))
        .and_then(|t| t.get(1))
        .map(String::as_str)
}

/// Values of every tag named `name` that carries a value.
pub fn all_tag_values<'a>(tags: &'a [Vec<String>], name: &str) -> Vec<&'a str> {
    tags.iter()
        .filter(|t| t.first().map(String::as_str) == Some(name))
        .filter_map(|t| t.get(1))
        .map(String::as_str)
        .collect()
}

/// Trimmed `d` tag, or `None` when absent or blank.
pub fn d_tag(tags: &[Vec<String>]) -> Option<&str> {
    first_tag_value(tags, "d")
        .map(str::trim)
        .filter(|d| !d.is_empty())
}

/// Stable identity of a replaceable event: `kind:pubkey:d`.
///
/// Unlike the event id, the address survives edits, so collections keyed by
/// address keep exactly one revision per logical item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub kind: u16,
    pub pubkey: String,
    pub identifier: String,
}

impl Address {
    pub fn new(kind: u16, pubkey: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            pubkey: pubkey.into(),
            identifier: identifier.into(),
        }
    }

    /// Address of a replaceable or addressable event.
    ///
    /// Addressable kinds need a non-blank `d` tag. Plain replaceable kinds use
    /// an empty identifier. Regular kinds have no address.
    pub fn for_event(event: &Event) -> Option<Self> {
        if is_addressable_kind(event.kind) {
            let d = d_tag(&event.tags)?;
            return Some(Self::new(event.kind, event.pubkey.clone(), d));
        }
        if is_replaceable_kind(event.kind) {
            return Some(Self::new(event.kind, event.pubkey.clone(), ""));
        }
        None
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.pubkey, self.identifier)
    }
}

impl FromStr for Address {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The identifier may itself contain ':'
        let mut parts = s.splitn(3, ':');
        let (Some(kind), Some(pubkey), Some(identifier)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(TagError::InvalidAddress(s.to_string()));
        };
        let kind = kind
            .parse::<u16>()
            .map_err(|_| TagError::InvalidAddress(s.to_string()))?;
        if pubkey.len() != 64 || !pubkey.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TagError::InvalidAddress(s.to_string()));
        }
        Ok(Self::new(kind, pubkey, identifier))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tags(raw: &[&[&str]]) -> Vec<Vec<String>> {
        raw.iter()
            .map(|t| t.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    fn event(kind: u16, tags: Vec<Vec<String>>) -> Event {
        Event {
            id: "1".repeat(64),
            pubkey: "f".repeat(64),
            created_at: 1,
            kind,
            tags,
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn test_first_and_all_tag_values() {
        let t = tags(&[&["t", "art"], &["p"], &["t", "music"], &["title", "Show"]]);
        assert_eq!(first_tag_value(&t, "t"), Some("art"));
        assert_eq!(first_tag_value(&t, "p"), None);
        assert_eq!(all_tag_values(&t, "t"), vec!["art", "music"]);
        assert!(all_tag_values(&t, "e").is_empty());
    }

    #[test]
    fn test_d_tag_blank_is_none() {
        assert_eq!(d_tag(&tags(&[&["d", "  "]])), None);
        assert_eq!(d_tag(&tags(&[&["d", " stream-1 "]])), Some("stream-1"));
    }

    #[test]
    fn test_address_for_event() {
        let live = event(30311, tags(&[&["d", "abc"]]));
        let addr = Address::for_event(&live).unwrap();
        assert_eq!(addr.to_string(), format!("30311:{}:abc", "f".repeat(64)));

        assert!(Address::for_event(&event(30311, vec![])).is_none());
        assert_eq!(Address::for_event(&event(0, vec![])).unwrap().identifier, "");
        assert!(Address::for_event(&event(1, vec![])).is_none());
    }

    #[test]
    fn test_address_parse_keeps_colons_in_identifier() {
        let raw = format!("30023:{}:a:b", "e".repeat(64));
        let addr: Address = raw.parse().unwrap();
        assert_eq!(addr.kind, 30023);
        assert_eq!(addr.identifier, "a:b");
        assert_eq!(addr.to_string(), raw);
    }

    #[test]
    fn test_address_parse_rejects_garbage() {
        assert!("nope".parse::<Address>().is_err());
        assert!("x:abc:d".parse::<Address>().is_err());
        assert!("1:short:d".parse::<Address>().is_err());
    }
}
