//! The client context: one connection manager, signer, store and profile
//! queue, constructed explicitly and torn down with [`HubClient::dispose`].

use crate::collect::{CollectOptions, CollectResult, collect};
use crate::config::{ClientConfig, remember_relays};
use crate::error::{ClientError, Result};
use crate::fetch_queue::FetchQueue;
use crate::follows::{fetch_contacts, following_from_contacts_tags};
use crate::manager::{ConnectionHandle, ConnectionManager, ConnectionSnapshot};
use crate::message::Filter;
use crate::pool::RelayPool;
use crate::profiles::{Profile, profile_queue};
use crate::projections::{
    Challenges, ChannelMessages, Channels, Featured, HubEvents, Listings, LiveEvents,
    Notifications, Studios,
};
use crate::publish::Publisher;
use crate::signer::{LocalKeySigner, SignerCapability, SignerSelector};
use crate::storage::{FileStore, KeyValueStore, MemoryStore};
use crate::store::{EventVerifier, Projection, ProjectionStore, SchnorrVerifier, StoreOptions};
use crate::transport::RelayTransport;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

pub struct HubClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn RelayTransport>>,
    store: Option<Arc<dyn KeyValueStore>>,
    injected_signer: Option<Arc<dyn SignerCapability>>,
    local_key: Option<LocalKeySigner>,
    verifier: Arc<dyn EventVerifier>,
}

impl HubClientBuilder {
    /// Defaults to a WebSocket [`RelayPool`].
    pub fn transport(mut self, transport: Arc<dyn RelayTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Defaults to a `FileStore` at `cache_path`, or memory.
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn signer(mut self, signer: Arc<dyn SignerCapability>) -> Self {
        self.injected_signer = Some(signer);
        self
    }

    /// Overrides the key remembered in the store.
    pub fn local_key(mut self, signer: LocalKeySigner) -> Self {
        self.local_key = Some(signer);
        self
    }

    pub fn verifier(mut self, verifier: Arc<dyn EventVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn build(self) -> Result<HubClient> {
        let store: Arc<dyn KeyValueStore> = match (self.store, &self.config.cache_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(FileStore::open(path)?),
            (None, None) => Arc::new(MemoryStore::new()),
        };
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(RelayPool::new()) as Arc<dyn RelayTransport>);

        let relays = self.config.persisted_relays(store.as_ref());
        let manager = Arc::new(ConnectionManager::new(
            relays,
            transport,
            self.config.manager_config(),
        ));

        let mut signer = SignerSelector::new().with_store(Arc::clone(&store));
        if let Some(injected) = self.injected_signer {
            signer = signer.with_injected(injected);
        }
        if let Some(local) = self
            .local_key
            .or_else(|| LocalKeySigner::from_store(store.as_ref()))
        {
            signer = signer.with_local_key(local);
        }

        let profiles = profile_queue(Arc::clone(&manager), Arc::clone(&store));
        let publisher = Publisher::new(Arc::clone(&manager), signer);

        Ok(HubClient {
            config: self.config,
            store,
            manager,
            publisher,
            profiles,
            verifier: self.verifier,
        })
    }
}

pub struct HubClient {
    config: ClientConfig,
    store: Arc<dyn KeyValueStore>,
    manager: Arc<ConnectionManager>,
    publisher: Publisher,
    profiles: FetchQueue<String, Profile>,
    verifier: Arc<dyn EventVerifier>,
}

impl HubClient {
    pub fn builder(config: ClientConfig) -> HubClientBuilder {
        HubClientBuilder {
            config,
            transport: None,
            store: None,
            injected_signer: None,
            local_key: None,
            verifier: Arc::new(SchnorrVerifier),
        }
    }

    /// Connect to the configured relays.
    pub async fn init(&self) -> Result<ConnectionHandle> {
        let handle = self.manager.ensure_connection().await?;
        info!("Hub client ready with {} relays", handle.relays().len());
        Ok(handle)
    }

    pub async fn reconnect(&self) -> Result<ConnectionHandle> {
        self.manager.reconnect().await
    }

    /// Close every relay connection. Stores built from this client stop
    /// receiving events.
    pub async fn dispose(&self) {
        self.manager.dispose().await;
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn profiles(&self) -> &FetchQueue<String, Profile> {
        &self.profiles
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn connection_status(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.manager.subscribe_status()
    }

    /// Save `relays` as the list used on the next start.
    pub fn remember_relays(&self, relays: &[String]) -> Result<()> {
        remember_relays(self.store.as_ref(), relays)?;
        debug!("Remembered {} relays", relays.len());
        Ok(())
    }

    /// One-shot query against the connected relays.
    pub async fn collect(&self, filter: Filter, options: CollectOptions) -> Result<CollectResult> {
        let handle = self.manager.ensure_connection().await?;
        Ok(collect(handle.transport().as_ref(), handle.relays(), filter, options).await)
    }

    /// Pubkeys `pubkey` follows, from its newest contact list.
    pub async fn following(&self, pubkey: &str) -> Result<BTreeSet<String>> {
        let contacts = fetch_contacts(&self.manager, pubkey).await?;
        Ok(contacts
            .map(|event| following_from_contacts_tags(&event.tags))
            .unwrap_or_default())
    }

    /// Store for `projection` sharing this client's verifier and profile queue.
    pub fn projection_store<P: Projection>(&self, projection: P) -> ProjectionStore<P> {
        let options = StoreOptions {
            verifier: Arc::clone(&self.verifier),
            prefetch: Some(Arc::new(self.profiles.clone())),
        };
        ProjectionStore::with_options(projection, Arc::clone(&self.manager), options)
    }

    pub fn live_events(&self, projection: LiveEvents) -> ProjectionStore<LiveEvents> {
        self.projection_store(projection)
    }

    pub fn listings(&self) -> ProjectionStore<Listings> {
        self.projection_store(Listings)
    }

    pub fn hub_events(&self) -> ProjectionStore<HubEvents> {
        self.projection_store(HubEvents)
    }

    pub fn studios(&self) -> ProjectionStore<Studios> {
        self.projection_store(Studios)
    }

    pub fn challenges(&self) -> ProjectionStore<Challenges> {
        self.projection_store(Challenges)
    }

    pub fn channels(&self) -> ProjectionStore<Channels> {
        self.projection_store(Channels)
    }

    pub fn channel_messages(&self, channel_id: &str) -> ProjectionStore<ChannelMessages> {
        self.projection_store(ChannelMessages::new(channel_id))
    }

    pub fn notifications(&self, me: &str) -> ProjectionStore<Notifications> {
        self.projection_store(Notifications::new(me))
    }

    /// Requires `admin_pubkey` in the config.
    pub fn featured(&self) -> Result<ProjectionStore<Featured>> {
        let admin = self.config.admin_pubkey.clone().ok_or_else(|| {
            ClientError::Config("Admin pubkey is not configured for featured curation.".to_string())
        })?;
        Ok(self.projection_store(Featured::new(admin)))
    }
}
