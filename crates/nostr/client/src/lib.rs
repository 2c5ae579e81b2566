//! Relay connection and event-stream core for the artist hub.
//!
//! This crate provides:
//! - A connection manager that probes relays and keeps the fastest ones
//! - WebSocket relay connections and a pool implementing [`RelayTransport`]
//! - Deadline-bound one-shot queries ([`collect`])
//! - Streaming projection stores that turn events into sorted, capped collections
//! - A bounded, deduplicating fetch queue for profile lookups
//! - Signing with an injected or local signer, and fan-out publishing
//! - Contact list reads and follow edits
//!
//! # Example
//!
//! ```rust,no_run
//! use hub_client::{ClientConfig, HubClient, LiveEvents};
//!
//! #[tokio::main]
//! async fn main() -> hub_client::Result<()> {
//!     let client = HubClient::builder(ClientConfig::from_env()?).build()?;
//!     client.init().await?;
//!
//!     let live = client.live_events(LiveEvents::new());
//!     live.start().await;
//!
//!     let mut updates = live.watch();
//!     while updates.changed().await.is_ok() {
//!         for event in &updates.borrow().records {
//!             println!("{} ({} watching)", event.title, event.current_participants);
//!         }
//!     }
//!
//!     client.dispose().await;
//!     Ok(())
//! }
//! ```

mod cache;
mod client;
mod collect;
mod config;
mod error;
mod fetch_queue;
mod follows;
mod manager;
mod message;
mod pool;
mod profiles;
pub mod projections;
mod publish;
mod relay;
mod signer;
mod storage;
mod store;
mod stream;
mod subscription;
mod transport;

pub use cache::{CacheConfig, TtlCache};
pub use client::{HubClient, HubClientBuilder};
pub use collect::{
    CollectOptions, CollectResult, DEFAULT_COLLECT_EVENTS, DEFAULT_COLLECT_TIMEOUT,
    MAX_COLLECT_EVENTS, MAX_COLLECT_TIMEOUT, MIN_COLLECT_EVENTS, MIN_COLLECT_TIMEOUT, collect,
};
pub use config::{ClientConfig, DEFAULT_RELAYS, remember_relays};
pub use error::{ClientError, Result};
pub use fetch_queue::{FetchQueue, Fetcher, Prefetch, QueueConfig};
pub use follows::{
    FollowUpdate, add_contacts_tags, fetch_contacts, following_from_contacts_tags,
    update_contacts_tags,
};
pub use manager::{
    ConnectionHandle, ConnectionManager, ConnectionSnapshot, ConnectionStatus, ManagerConfig,
    NormalizedRelays, ProbeReport, ProbeResult, RelayHealth, normalize_relay_urls,
};
pub use message::{ClientMessage, Filter, MessageError, RelayMessage};
pub use pool::RelayPool;
pub use profiles::{Profile, ProfileFetcher, profile_queue};
pub use projections::{
    Challenges, ChannelMessages, Channels, Featured, HubEvents, Listings, LiveEvents, LiveSource,
    Notifications, Studios,
};
pub use publish::{CuratedSet, PublishReport, Publisher};
pub use relay::{ConnectionState, PublishConfirmation, RelayConfig, RelayConnection, probe_relay};
pub use signer::{LocalKeySigner, SignerBackend, SignerCapability, SignerError, SignerSelector};
pub use storage::{
    FileStore, KeyValueStore, LOCAL_NSEC_KEY, MemoryStore, PROFILES_KEY, RELAYS_KEY,
    SIGNER_PUBKEY_KEY, StorageError, last_seen_key, load_json, save_json,
};
pub use store::{
    EventVerifier, Projection, ProjectionStore, SchnorrVerifier, StoreOptions, StoreSnapshot,
    StoreStatus, TrustRelays, upsert,
};
pub use stream::{CancelHandle, EventStream, StreamItem, StreamSender};
pub use subscription::{SubscriptionTracker, generate_subscription_id};
pub use transport::{ProbeFailure, RelayPublishOutcome, RelayTransport};
