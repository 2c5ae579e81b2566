//! Event kinds used by the hub.

pub const KIND_METADATA: u16 = 0;
pub const KIND_NOTE: u16 = 1;
pub const KIND_CONTACTS: u16 = 3;
pub const KIND_DM: u16 = 4;
pub const KIND_REPOST: u16 = 6;
pub const KIND_REACTION: u16 = 7;

// NIP-28 public chat
pub const KIND_CHANNEL_CREATE: u16 = 40;
pub const KIND_CHANNEL_METADATA: u16 = 41;
pub const KIND_CHANNEL_MESSAGE: u16 = 42;

// NIP-57 zaps
pub const KIND_ZAP_REQUEST: u16 = 9734;
pub const KIND_ZAP_RECEIPT: u16 = 9735;

pub const KIND_CURATED_SET: u16 = 30004;
pub const KIND_NIP15_STALL: u16 = 30017;
pub const KIND_NIP15_PRODUCT: u16 = 30018;
pub const KIND_LONG_FORM: u16 = 30023;
pub const KIND_LIVE_EVENT: u16 = 30311;
pub const KIND_CLASSIFIED: u16 = 30402;
pub const KIND_DRAFT: u16 = 30403;

// Hub-specific addressable kinds
pub const KIND_STUDIO: u16 = 30050;
pub const KIND_ZAP_CHALLENGE: u16 = 30051;

/// `d` tag of the admin-curated featured artists set.
pub const FEATURED_SET_D: &str = "bfta-featured-artists";
