//! Event signing with an injected signer or a locally held key.

use crate::error::ClientError;
use crate::storage::{KeyValueStore, LOCAL_NSEC_KEY, SIGNER_PUBKEY_KEY, load_json, save_json};
use async_trait::async_trait;
use hub_nostr::nip19::{parse_secret_key, private_key_to_nsec};
use hub_nostr::{Event, EventTemplate, UnsignedEvent, generate_secret_key, get_public_key_hex};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignerError {
    #[error("No signer available")]
    NoSigner,

    #[error("Signer rejected the request: {0}")]
    Rejected(String),

    #[error("Signer returned a malformed event: {0}")]
    MalformedSignedEvent(String),
}

/// Something that can sign events on the user's behalf.
#[async_trait]
pub trait SignerCapability: Send + Sync {
    async fn get_public_key(&self) -> Result<String, SignerError>;
    async fn sign_event(&self, unsigned: UnsignedEvent) -> Result<Event, SignerError>;
}

/// Signs with a secret key held in process memory.
#[derive(Clone)]
pub struct LocalKeySigner {
    secret_key: [u8; 32],
    public_key: String,
}

impl LocalKeySigner {
    /// Accepts `nsec1…` or 64-char hex.
    pub fn from_secret(input: &str) -> Result<Self, SignerError> {
        let secret_key = parse_secret_key(input)
            .map_err(|e| SignerError::Rejected(format!("invalid secret key: {}", e)))?;
        Self::from_bytes(secret_key)
    }

    pub fn from_bytes(secret_key: [u8; 32]) -> Result<Self, SignerError> {
        let public_key = get_public_key_hex(&secret_key)
            .map_err(|e| SignerError::Rejected(e.to_string()))?;
        Ok(Self {
            secret_key,
            public_key,
        })
    }

    pub fn generate() -> Result<Self, SignerError> {
        Self::from_bytes(generate_secret_key())
    }

    /// Key saved under the local-key slot, if any and valid.
    pub fn from_store(store: &dyn KeyValueStore) -> Option<Self> {
        let secret: String = load_json(store, LOCAL_NSEC_KEY)?;
        match Self::from_secret(&secret) {
            Ok(signer) => Some(signer),
            Err(e) => {
                warn!("Ignoring stored local key: {}", e);
                None
            }
        }
    }

    /// Persist the key as `nsec` under the local-key slot.
    pub fn save(&self, store: &dyn KeyValueStore) -> crate::error::Result<()> {
        let nsec = private_key_to_nsec(&self.secret_key)
            .map_err(|e| ClientError::Internal(e.to_string()))?;
        save_json(store, LOCAL_NSEC_KEY, &nsec)?;
        Ok(())
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }
}

impl fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKeySigner")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SignerCapability for LocalKeySigner {
    async fn get_public_key(&self) -> Result<String, SignerError> {
        Ok(self.public_key.clone())
    }

    async fn sign_event(&self, mut unsigned: UnsignedEvent) -> Result<Event, SignerError> {
        if unsigned.pubkey.is_empty() {
            unsigned.pubkey = self.public_key.clone();
        } else if unsigned.pubkey != self.public_key {
            return Err(SignerError::Rejected(
                "event pubkey does not match the local key".to_string(),
            ));
        }
        hub_nostr::sign_event(unsigned, &self.secret_key)
            .map_err(|e| SignerError::Rejected(e.to_string()))
    }
}

/// The backend chosen for a signing request.
#[derive(Clone)]
pub enum SignerBackend {
    Injected(Arc<dyn SignerCapability>),
    LocalKey(Arc<LocalKeySigner>),
}

impl SignerBackend {
    pub fn name(&self) -> &'static str {
        match self {
            SignerBackend::Injected(_) => "injected",
            SignerBackend::LocalKey(_) => "local-key",
        }
    }

    fn capability(&self) -> &dyn SignerCapability {
        match self {
            SignerBackend::Injected(signer) => signer.as_ref(),
            SignerBackend::LocalKey(signer) => signer.as_ref(),
        }
    }
}

impl fmt::Debug for SignerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignerBackend({})", self.name())
    }
}

/// Picks the injected signer when present, the local key otherwise.
///
/// A failing backend is reported as-is; the other one is never tried.
#[derive(Default, Clone)]
pub struct SignerSelector {
    injected: Option<Arc<dyn SignerCapability>>,
    local: Option<Arc<LocalKeySigner>>,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl SignerSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_injected(mut self, signer: Arc<dyn SignerCapability>) -> Self {
        self.injected = Some(signer);
        self
    }

    pub fn with_local_key(mut self, signer: LocalKeySigner) -> Self {
        self.local = Some(Arc::new(signer));
        self
    }

    /// Remember the signer identity in `store`.
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn backend(&self) -> Option<SignerBackend> {
        if let Some(injected) = &self.injected {
            return Some(SignerBackend::Injected(Arc::clone(injected)));
        }
        self.local
            .as_ref()
            .map(|local| SignerBackend::LocalKey(Arc::clone(local)))
    }

    pub fn is_available(&self) -> bool {
        self.injected.is_some() || self.local.is_some()
    }

    /// Last public key any signer reported, from persisted state.
    pub fn remembered_public_key(&self) -> Option<String> {
        let store = self.store.as_ref()?;
        load_json(store.as_ref(), SIGNER_PUBKEY_KEY)
    }

    pub async fn get_public_key(&self) -> Result<String, SignerError> {
        let backend = self.backend().ok_or(SignerError::NoSigner)?;
        let public_key = backend.capability().get_public_key().await?;
        self.remember(&public_key);
        Ok(public_key)
    }

    /// Sign a template as the current signer.
    pub async fn sign(&self, template: EventTemplate) -> Result<Event, SignerError> {
        let public_key = self.get_public_key().await?;
        self.sign_event(UnsignedEvent::from_template(template, public_key))
            .await
    }

    pub async fn sign_event(&self, unsigned: UnsignedEvent) -> Result<Event, SignerError> {
        let backend = self.backend().ok_or(SignerError::NoSigner)?;
        debug!("Signing kind {} with {} signer", unsigned.kind, backend.name());
        let event = backend.capability().sign_event(unsigned).await?;
        check_signed(&event)?;
        Ok(event)
    }

    fn remember(&self, public_key: &str) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = save_json(store.as_ref(), SIGNER_PUBKEY_KEY, public_key) {
            warn!("Failed to remember signer pubkey: {}", e);
        }
    }
}

#[async_trait]
impl SignerCapability for SignerSelector {
    async fn get_public_key(&self) -> Result<String, SignerError> {
        SignerSelector::get_public_key(self).await
    }

    async fn sign_event(&self, unsigned: UnsignedEvent) -> Result<Event, SignerError> {
        SignerSelector::sign_event(self, unsigned).await
    }
}

fn check_signed(event: &Event) -> Result<(), SignerError> {
    if event.id.is_empty() {
        return Err(SignerError::MalformedSignedEvent("missing id".to_string()));
    }
    if event.sig.is_empty() {
        return Err(SignerError::MalformedSignedEvent("missing sig".to_string()));
    }
    if !is_hex(&event.id, 64) {
        return Err(SignerError::MalformedSignedEvent(format!(
            "id is not 32-byte hex: {}",
            event.id
        )));
    }
    if !is_hex(&event.sig, 128) {
        return Err(SignerError::MalformedSignedEvent(
            "sig is not 64-byte hex".to_string(),
        ));
    }
    Ok(())
}

fn is_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| b.is_ascii_hexdigit())
}
