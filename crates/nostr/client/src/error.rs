//! Client error types

use crate::manager::ProbeReport;
use crate::message::MessageError;
use crate::signer::SignerError;
use crate::storage::StorageError;
use thiserror::Error;

/// Client error type
///
/// Per-relay publish failures and malformed events never surface here; they
/// are absorbed into `PublishReport` and dropped projections respectively.
#[derive(Error, Debug)]
pub enum ClientError {
    /// No relays configured, or none of them valid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Every probed relay failed, with one diagnostic per relay
    #[error("No relays reachable: {0}")]
    NoRelaysReachable(ProbeReport),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Message(#[from] MessageError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Not connected to relay")]
    NotConnected,

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;
