//! NIP-19: bech32-encoded keys (`npub`, `nsec`) and addresses (`naddr`).

use crate::tags::Address;
use bech32::{Bech32, Hrp};
use thiserror::Error;

const NSEC_HRP: &str = "nsec";
const NPUB_HRP: &str = "npub";
const NADDR_HRP: &str = "naddr";

const TLV_SPECIAL: u8 = 0;
const TLV_RELAY: u8 = 1;
const TLV_AUTHOR: u8 = 2;
const TLV_KIND: u8 = 3;

#[derive(Debug, Error)]
pub enum Nip19Error {
    #[error("bech32 encoding error: {0}")]
    Bech32Encode(String),

    #[error("bech32 decoding error: {0}")]
    Bech32Decode(String),

    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("invalid hrp: expected {expected}, got {got}")]
    InvalidHrp { expected: String, got: String },

    #[error("invalid TLV: {0}")]
    InvalidTlv(String),
}

pub fn public_key_to_npub(public_key: &[u8; 32]) -> Result<String, Nip19Error> {
    encode_bech32(NPUB_HRP, public_key)
}

pub fn private_key_to_nsec(private_key: &[u8; 32]) -> Result<String, Nip19Error> {
    encode_bech32(NSEC_HRP, private_key)
}

pub fn npub_to_public_key(npub: &str) -> Result<[u8; 32], Nip19Error> {
    decode_bech32(NPUB_HRP, npub)
}

pub fn nsec_to_private_key(nsec: &str) -> Result<[u8; 32], Nip19Error> {
    decode_bech32(NSEC_HRP, nsec)
}

/// Encode an address as `naddr1…` with optional relay hints.
pub fn naddr_encode(address: &Address, relays: &[String]) -> Result<String, Nip19Error> {
    let mut data = Vec::new();
    push_tlv(&mut data, TLV_SPECIAL, address.identifier.as_bytes())?;
    for relay in relays {
        push_tlv(&mut data, TLV_RELAY, relay.as_bytes())?;
    }
    push_tlv(&mut data, TLV_AUTHOR, &parse_hex_32(&address.pubkey)?)?;
    push_tlv(&mut data, TLV_KIND, &u32::from(address.kind).to_be_bytes())?;

    let hrp = Hrp::parse(NADDR_HRP).map_err(|e| Nip19Error::Bech32Encode(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, &data).map_err(|e| Nip19Error::Bech32Encode(e.to_string()))
}

/// Decode `naddr1…` into the address and its relay hints.
pub fn naddr_decode(naddr: &str) -> Result<(Address, Vec<String>), Nip19Error> {
    let (hrp, data) = bech32::decode(naddr).map_err(|e| Nip19Error::Bech32Decode(e.to_string()))?;
    if hrp.as_str() != NADDR_HRP {
        return Err(Nip19Error::InvalidHrp {
            expected: NADDR_HRP.to_string(),
            got: hrp.to_string(),
        });
    }

    let mut identifier = None;
    let mut pubkey = None;
    let mut kind = None;
    let mut relays = Vec::new();
    let mut rest = data.as_slice();
    while let [tag, len, tail @ ..] = rest {
        let len = usize::from(*len);
        if tail.len() < len {
            return Err(Nip19Error::InvalidTlv(format!("entry {} truncated", tag)));
        }
        let (value, next) = tail.split_at(len);
        match *tag {
            TLV_SPECIAL => identifier = Some(utf8(value)?),
            TLV_RELAY => relays.push(utf8(value)?),
            TLV_AUTHOR => pubkey = Some(hex::encode(to_array(value.to_vec())?)),
            TLV_KIND => {
                let bytes: [u8; 4] = value
                    .try_into()
                    .map_err(|_| Nip19Error::InvalidTlv("kind must be 4 bytes".to_string()))?;
                let kind_value = u16::try_from(u32::from_be_bytes(bytes))
                    .map_err(|e| Nip19Error::InvalidTlv(e.to_string()))?;
                kind = Some(kind_value);
            }
            _ => {}
        }
        rest = next;
    }

    match (kind, pubkey, identifier) {
        (Some(kind), Some(pubkey), Some(identifier)) => {
            Ok((Address::new(kind, pubkey, identifier), relays))
        }
        _ => Err(Nip19Error::InvalidTlv(
            "naddr needs identifier, author and kind".to_string(),
        )),
    }
}

fn push_tlv(data: &mut Vec<u8>, tag: u8, value: &[u8]) -> Result<(), Nip19Error> {
    let len = u8::try_from(value.len())
        .map_err(|_| Nip19Error::InvalidTlv(format!("entry {} longer than 255 bytes", tag)))?;
    data.push(tag);
    data.push(len);
    data.extend_from_slice(value);
    Ok(())
}

fn utf8(value: &[u8]) -> Result<String, Nip19Error> {
    String::from_utf8(value.to_vec()).map_err(|e| Nip19Error::InvalidTlv(e.to_string()))
}

/// Accept either an `npub1…` string or 64 hex characters; returns lowercase hex.
pub fn parse_public_key(input: &str) -> Result<String, Nip19Error> {
    let input = input.trim();
    if input.starts_with("npub1") {
        return Ok(hex::encode(npub_to_public_key(input)?));
    }
    parse_hex_32(input).map(hex::encode)
}

/// Accept either an `nsec1…` string or 64 hex characters.
pub fn parse_secret_key(input: &str) -> Result<[u8; 32], Nip19Error> {
    let input = input.trim();
    if input.starts_with("nsec1") {
        return nsec_to_private_key(input);
    }
    parse_hex_32(input)
}

fn parse_hex_32(input: &str) -> Result<[u8; 32], Nip19Error> {
    let bytes = hex::decode(input).map_err(|e| Nip19Error::InvalidKeyFormat(e.to_string()))?;
    to_array(bytes)
}

fn to_array(bytes: Vec<u8>) -> Result<[u8; 32], Nip19Error> {
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| Nip19Error::InvalidKeyFormat(format!("expected 32 bytes, got {}", len)))
}

fn encode_bech32(hrp: &str, data: &[u8; 32]) -> Result<String, Nip19Error> {
    let hrp = Hrp::parse(hrp).map_err(|e| Nip19Error::Bech32Encode(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, data).map_err(|e| Nip19Error::Bech32Encode(e.to_string()))
}

fn decode_bech32(expected_hrp: &str, encoded: &str) -> Result<[u8; 32], Nip19Error> {
    let expected =
        Hrp::parse(expected_hrp).map_err(|e| Nip19Error::Bech32Decode(e.to_string()))?;

    let (hrp, data) =
        bech32::decode(encoded).map_err(|e| Nip19Error::Bech32Decode(e.to_string()))?;

    if hrp != expected {
        return Err(Nip19Error::InvalidHrp {
            expected: expected_hrp.to_string(),
            got: hrp.to_string(),
        });
    }

    to_array(data)
}
