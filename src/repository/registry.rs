//! Repository registry — lazily opens and caches one store per address.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::error::StoreError;

use super::{
    FileStoreProtocol, MailStore, MemoryStoreProtocol, RepositoryAddress, StoreConfig,
    StoreProtocol,
};

/// Maps repository addresses to live store instances.
///
/// `select` is idempotent and concurrency-safe: construction happens under
/// the write lock, so concurrent first accesses to the same address open
/// exactly one instance. Stores live for the process lifetime.
pub struct RepositoryRegistry {
    protocols: HashMap<String, Arc<dyn StoreProtocol>>,
    defaults: HashMap<String, StoreConfig>,
    overrides: HashMap<RepositoryAddress, StoreConfig>,
    stores: RwLock<HashMap<RepositoryAddress, Arc<dyn MailStore>>>,
    /// Addresses ever opened, enumerable before any message is stored.
    known: RwLock<BTreeSet<RepositoryAddress>>,
}

impl RepositoryRegistry {
    pub fn builder() -> RepositoryRegistryBuilder {
        RepositoryRegistryBuilder::default()
    }

    /// A registry with the stock `memory://` and `file://` bindings.
    pub fn with_default_protocols() -> Self {
        Self::builder()
            .protocol(Arc::new(MemoryStoreProtocol))
            .protocol(Arc::new(FileStoreProtocol))
            .build()
    }

    /// Get the store for an address, opening it on first access.
    pub async fn select(
        &self,
        address: &RepositoryAddress,
    ) -> Result<Arc<dyn MailStore>, StoreError> {
        if let Some(store) = self.stores.read().await.get(address) {
            return Ok(store.clone());
        }

        let mut stores = self.stores.write().await;
        if let Some(store) = stores.get(address) {
            return Ok(store.clone());
        }

        let protocol = self.protocols.get(address.protocol()).ok_or_else(|| {
            StoreError::UnknownProtocol {
                protocol: address.protocol().to_string(),
            }
        })?;

        let mut config = self
            .defaults
            .get(address.protocol())
            .cloned()
            .unwrap_or_default();
        if let Some(overrides) = self.overrides.get(address) {
            config.merge(overrides);
        }
        config.insert(StoreConfig::ADDRESS_KEY, address.to_string());

        let store = protocol.open(config).await?;
        stores.insert(address.clone(), store.clone());
        self.known.write().await.insert(address.clone());
        info!(address = %address, "Opened mail store");
        Ok(store)
    }

    /// Every address a store was ever opened for, sorted.
    pub async fn known_addresses(&self) -> Vec<RepositoryAddress> {
        self.known.read().await.iter().cloned().collect()
    }

    /// The registered protocol names, for configuration diagnostics.
    pub fn protocol_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.protocols.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Startup-time assembly of protocol bindings and their configuration.
#[derive(Default)]
pub struct RepositoryRegistryBuilder {
    protocols: HashMap<String, Arc<dyn StoreProtocol>>,
    defaults: HashMap<String, StoreConfig>,
    overrides: HashMap<RepositoryAddress, StoreConfig>,
}

impl RepositoryRegistryBuilder {
    /// Bind a protocol implementation under its own name.
    pub fn protocol(mut self, protocol: Arc<dyn StoreProtocol>) -> Self {
        self.protocols.insert(protocol.name().to_string(), protocol);
        self
    }

    /// Default configuration for every address of a protocol.
    pub fn protocol_defaults(mut self, protocol: &str, config: StoreConfig) -> Self {
        self.defaults.insert(protocol.to_string(), config);
        self
    }

    /// Address-specific configuration, overriding the protocol defaults.
    pub fn address_config(mut self, address: RepositoryAddress, config: StoreConfig) -> Self {
        self.overrides.insert(address, config);
        self
    }

    pub fn build(self) -> RepositoryRegistry {
        RepositoryRegistry {
            protocols: self.protocols,
            defaults: self.defaults,
            overrides: self.overrides,
            stores: RwLock::new(HashMap::new()),
            known: RwLock::new(BTreeSet::new()),
        }
    }
}
