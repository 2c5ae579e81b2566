//! Nostr protocol data model for the artist hub client.
//!
//! This crate provides:
//! - NIP-01: Events, canonical serialization, signing and verification
//! - NIP-19: bech32 `npub`/`nsec` keys
//! - Replaceable-event addresses (`kind:pubkey:d`) and tag lookups
//! - The catalogue of event kinds the hub reads and writes
//!
//! # Features
//!
//! - `full` (default): key derivation, signing and verification

mod event;
pub mod kinds;
pub mod nip19;
pub mod tags;

pub use event::{
    Event, EventTemplate, KindClassification, Nip01Error, UnsignedEvent, classify_kind,
    is_addressable_kind, is_ephemeral_kind, is_replaceable_kind, serialize_event, sort_events,
    unix_now, validate_event,
};

#[cfg(feature = "full")]
pub use event::{
    finalize_event, generate_secret_key, get_event_hash, get_public_key, get_public_key_hex,
    sign_event, verify_event,
};

pub use kinds::*;
pub use nip19::Nip19Error;
pub use tags::{Address, TagError, all_tag_values, d_tag, first_tag_value};
