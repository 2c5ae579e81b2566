//! NIP-01 event model.
//!
//! - Event structure (id, pubkey, created_at, kind, tags, content, sig)
//! - Canonical serialization for hashing
//! - Schnorr signing and verification (requires `full` feature)
//! - Kind classification (regular, replaceable, ephemeral, addressable)

#[cfg(feature = "full")]
use rand::RngCore;
#[cfg(feature = "full")]
use secp256k1::{Keypair, Message, SECP256K1, SecretKey, XOnlyPublicKey, schnorr};
use serde::{Deserialize, Serialize};
#[cfg(feature = "full")]
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors that can occur while building, signing or checking events.
#[derive(Debug, Error)]
pub enum Nip01Error {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("verification error: {0}")]
    Verification(String),

    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),
}

/// A signed event as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-bytes lowercase hex-encoded sha256 of the serialized event data
    pub id: String,
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Ordered list of ordered string lists
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content, often JSON
    pub content: String,
    /// 64-bytes lowercase hex signature
    pub sig: String,
}

impl Event {
    /// Value of the first tag named `name`.
    pub fn first_tag(&self, name: &str) -> Option<&str> {
        crate::tags::first_tag_value(&self.tags, name)
    }

    /// Values of every tag named `name`, in order.
    pub fn tag_values(&self, name: &str) -> Vec<&str> {
        crate::tags::all_tag_values(&self.tags, name)
    }

    /// The event with id and signature stripped.
    pub fn to_unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: self.pubkey.clone(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }
}

/// An event that carries its author but has not been signed yet.
///
/// This is the shape handed to signer capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl UnsignedEvent {
    /// Attach a pubkey to a template.
    pub fn from_template(template: EventTemplate, pubkey: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            created_at: template.created_at,
            kind: template.kind,
            tags: template.tags,
            content: template.content,
        }
    }
}

/// A draft without pubkey. The pubkey comes from the signing key.
///
/// ```
/// use hub_nostr::{EventTemplate, KIND_NOTE};
///
/// let template = EventTemplate::new(KIND_NOTE, "gm")
///     .tag(["t", "art"])
///     .created_at(1_700_000_000);
/// assert_eq!(template.tags, vec![vec!["t".to_string(), "art".to_string()]]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl EventTemplate {
    /// A template stamped with the current time and no tags.
    pub fn new(kind: u16, content: impl Into<String>) -> Self {
        Self {
            created_at: unix_now(),
            kind,
            tags: Vec::new(),
            content: content.into(),
        }
    }

    pub fn tag<I, S>(mut self, tag: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.push(tag.into_iter().map(Into::into).collect());
        self
    }

    pub fn created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Event kind classification according to NIP-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindClassification {
    /// Events expected to be stored by relays
    Regular,
    /// Only latest event per pubkey+kind is current
    Replaceable,
    /// Not expected to be stored by relays
    Ephemeral,
    /// Only latest event per pubkey+kind+d-tag is current
    Addressable,
    Unknown,
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Generate a random 32-byte secret key.
#[cfg(feature = "full")]
pub fn generate_secret_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::rng().fill_bytes(&mut key);
    key
}

/// Get the x-only public key from a secret key.
#[cfg(feature = "full")]
pub fn get_public_key(secret_key: &[u8; 32]) -> Result<[u8; 32], Nip01Error> {
    let sk = SecretKey::from_slice(secret_key)
        .map_err(|e| Nip01Error::InvalidSecretKey(e.to_string()))?;
    let (xonly, _parity) = sk.x_only_public_key(SECP256K1);
    Ok(xonly.serialize())
}

#[cfg(feature = "full")]
pub fn get_public_key_hex(secret_key: &[u8; 32]) -> Result<String, Nip01Error> {
    Ok(hex::encode(get_public_key(secret_key)?))
}

/// Serialize an unsigned event for hashing.
///
/// Format: `[0, pubkey, created_at, kind, tags, content]`
pub fn serialize_event(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    if !is_lower_hex(&event.pubkey, 64) {
        return Err(Nip01Error::InvalidEvent(
            "pubkey must be 64 lowercase hex characters".to_string(),
        ));
    }

    serde_json::to_string(&(
        0,
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    ))
    .map_err(|e| Nip01Error::Serialization(e.to_string()))
}

/// Compute the event id (sha256 of the canonical serialization).
#[cfg(feature = "full")]
pub fn get_event_hash(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    let serialized = serialize_event(event)?;
    let hash: [u8; 32] = Sha256::digest(serialized.as_bytes()).into();
    Ok(hex::encode(hash))
}

/// Shape check of a signed event. Does not verify the signature.
pub fn validate_event(event: &Event) -> bool {
    is_lower_hex(&event.id, 64) && is_lower_hex(&event.pubkey, 64) && is_lower_hex(&event.sig, 128)
}

fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Sign a template with a secret key, producing a complete signed event.
#[cfg(feature = "full")]
pub fn finalize_event(template: &EventTemplate, secret_key: &[u8; 32]) -> Result<Event, Nip01Error> {
    let sk = SecretKey::from_slice(secret_key).map_err(|e| Nip01Error::Signing(e.to_string()))?;
    let keypair = Keypair::from_secret_key(SECP256K1, &sk);
    let (xonly, _parity) = keypair.x_only_public_key();

    let unsigned = UnsignedEvent::from_template(template.clone(), hex::encode(xonly.serialize()));
    sign_unsigned(unsigned, &keypair)
}

/// Sign an event whose pubkey must match the secret key.
#[cfg(feature = "full")]
pub fn sign_event(unsigned: UnsignedEvent, secret_key: &[u8; 32]) -> Result<Event, Nip01Error> {
    let sk = SecretKey::from_slice(secret_key).map_err(|e| Nip01Error::Signing(e.to_string()))?;
    let keypair = Keypair::from_secret_key(SECP256K1, &sk);
    let (xonly, _parity) = keypair.x_only_public_key();
    if hex::encode(xonly.serialize()) != unsigned.pubkey {
        return Err(Nip01Error::Signing(
            "event pubkey does not match signing key".to_string(),
        ));
    }
    sign_unsigned(unsigned, &keypair)
}

#[cfg(feature = "full")]
fn sign_unsigned(unsigned: UnsignedEvent, keypair: &Keypair) -> Result<Event, Nip01Error> {
    let id = get_event_hash(&unsigned)?;
    let digest = decode_32(&id).map_err(Nip01Error::Signing)?;
    let message = Message::from_digest(digest);
    let sig = SECP256K1.sign_schnorr_no_aux_rand(&message, keypair);

    Ok(Event {
        id,
        pubkey: unsigned.pubkey,
        created_at: unsigned.created_at,
        kind: unsigned.kind,
        tags: unsigned.tags,
        content: unsigned.content,
        sig: hex::encode(sig.serialize()),
    })
}

/// Verify an event's id and signature.
///
/// Returns `Ok(false)` for events that are well-formed hex but do not verify.
#[cfg(feature = "full")]
pub fn verify_event(event: &Event) -> Result<bool, Nip01Error> {
    if !validate_event(event) {
        return Ok(false);
    }

    if get_event_hash(&event.to_unsigned())? != event.id {
        return Ok(false);
    }

    let digest = decode_32(&event.id).map_err(Nip01Error::Verification)?;
    let message = Message::from_digest(digest);

    let sig_bytes = hex::decode(&event.sig)
        .map_err(|e| Nip01Error::Verification(format!("invalid sig hex: {}", e)))?;
    let sig = schnorr::Signature::from_slice(&sig_bytes)
        .map_err(|e| Nip01Error::Verification(format!("invalid signature: {}", e)))?;

    let pubkey_bytes = hex::decode(&event.pubkey)
        .map_err(|e| Nip01Error::Verification(format!("invalid pubkey hex: {}", e)))?;
    let pubkey = XOnlyPublicKey::from_slice(&pubkey_bytes)
        .map_err(|e| Nip01Error::Verification(format!("invalid pubkey: {}", e)))?;

    Ok(SECP256K1.verify_schnorr(&sig, &message, &pubkey).is_ok())
}

#[cfg(feature = "full")]
fn decode_32(hex_str: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {}", e))?;
    bytes
        .try_into()
        .map_err(|_| "expected 32 bytes".to_string())
}

/// Classify an event kind according to NIP-01 rules.
pub fn classify_kind(kind: u16) -> KindClassification {
    let k = kind as u32;

    if (1000..10000).contains(&k) || (4..45).contains(&k) || k == 1 || k == 2 {
        return KindClassification::Regular;
    }

    if (10000..20000).contains(&k) || k == 0 || k == 3 {
        return KindClassification::Replaceable;
    }

    if (20000..30000).contains(&k) {
        return KindClassification::Ephemeral;
    }

    if (30000..40000).contains(&k) {
        return KindClassification::Addressable;
    }

    KindClassification::Unknown
}

pub fn is_replaceable_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Replaceable)
}

pub fn is_addressable_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Addressable)
}

pub fn is_ephemeral_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Ephemeral)
}

/// Sort events newest first, then by id in case of ties.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}
