//! Client configuration from the environment and remembered state.

use crate::error::{ClientError, Result};
use crate::manager::ManagerConfig;
use crate::storage::{KeyValueStore, RELAYS_KEY, StorageError, load_json, save_json};
use hub_nostr::nip19::parse_public_key;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Relays used when neither the environment nor the store names any.
pub const DEFAULT_RELAYS: [&str; 6] = [
    "wss://nostr.wine",
    "wss://purplepag.es",
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.snort.social",
    "wss://offchain.pub",
];

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Candidate relays, unvalidated
    pub relays: Vec<String>,
    /// Hex pubkey curating the featured set
    pub admin_pubkey: Option<String>,
    pub probe_timeout: Duration,
    pub max_relays: usize,
    /// `FileStore` location; in-memory when unset
    pub cache_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let manager = ManagerConfig::default();
        Self {
            relays: DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect(),
            admin_pubkey: None,
            probe_timeout: manager.probe_timeout,
            max_relays: manager.max_connected_relays,
            cache_path: None,
        }
    }
}

impl ClientConfig {
    /// Load from the process environment, reading `.env` first when present.
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env loaded: {}", e);
        }
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let var = |name: &str| get(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(relays) = var("HUB_RELAYS") {
            let relays = parse_csv(&relays);
            if !relays.is_empty() {
                config.relays = relays;
            }
        }

        if let Some(admin) = var("HUB_ADMIN_PUBKEY") {
            let hex = parse_public_key(&admin)
                .map_err(|e| ClientError::Config(format!("Invalid HUB_ADMIN_PUBKEY: {}", e)))?;
            config.admin_pubkey = Some(hex);
        }

        if let Some(ms) = var("HUB_PROBE_TIMEOUT_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|_| ClientError::Config(format!("Invalid HUB_PROBE_TIMEOUT_MS: {}", ms)))?;
            config.probe_timeout = Duration::from_millis(ms);
        }

        if let Some(max) = var("HUB_MAX_RELAYS") {
            let max: usize = max
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ClientError::Config(format!("Invalid HUB_MAX_RELAYS: {}", max)))?;
            config.max_relays = max;
        }

        config.cache_path = var("HUB_CACHE_PATH").map(PathBuf::from);
        Ok(config)
    }

    /// Manager tunables; the retry timeout stays at twice the probe timeout.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            probe_timeout: self.probe_timeout,
            retry_probe_timeout: self.probe_timeout * 2,
            max_connected_relays: self.max_relays,
            ..ManagerConfig::default()
        }
    }

    /// Remembered relay list, falling back to the configured one.
    pub fn persisted_relays(&self, store: &dyn KeyValueStore) -> Vec<String> {
        match load_json::<Vec<String>>(store, RELAYS_KEY) {
            Some(relays) if !relays.is_empty() => relays,
            _ => self.relays.clone(),
        }
    }
}

pub fn remember_relays(store: &dyn KeyValueStore, relays: &[String]) -> std::result::Result<(), StorageError> {
    save_json(store, RELAYS_KEY, relays)
}

fn parse_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
