//! Store contracts — backend-agnostic CRUD over parked messages.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;
use crate::model::Message;

use super::MailKey;

/// Merged configuration handed to a protocol when opening an address:
/// protocol-level defaults overlaid with the address-specific overrides,
/// plus the resolved address itself under [`StoreConfig::ADDRESS_KEY`].
#[derive(Debug, Clone, Default)]
pub struct StoreConfig(BTreeMap<String, Value>);

impl StoreConfig {
    /// The resolved repository address, always injected by the registry.
    pub const ADDRESS_KEY: &'static str = "address";

    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style entry.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Overlay `other` on top of this config; its entries win.
    pub fn merge(&mut self, other: &StoreConfig) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }
}

/// Per-address CRUD over stored messages.
///
/// Implementations deep-copy messages both directions: mutating a message
/// after storing it, or mutating a retrieved copy, never changes the stored
/// state. Listing under concurrent mutation must not fail, but need not be
/// a snapshot.
#[async_trait]
pub trait MailStore: Send + Sync {
    /// Store a message under the key derived from its id. Re-storing the
    /// same id overwrites.
    async fn store(&self, message: &Message) -> Result<MailKey, StoreError>;

    async fn retrieve(&self, key: &MailKey) -> Result<Option<Message>, StoreError>;

    /// Remove a key; returns whether it was present.
    async fn remove(&self, key: &MailKey) -> Result<bool, StoreError>;

    async fn list(&self) -> Result<Vec<MailKey>, StoreError>;

    async fn size(&self) -> Result<u64, StoreError>;

    async fn remove_all(&self) -> Result<(), StoreError>;
}

/// Protocol → implementation binding, configured at startup.
///
/// `open` runs the whole initialization lifecycle; the registry publishes
/// the instance only after it returns.
#[async_trait]
pub trait StoreProtocol: Send + Sync {
    /// The protocol part of the addresses this binding serves.
    fn name(&self) -> &str;

    async fn open(&self, config: StoreConfig) -> Result<Arc<dyn MailStore>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overlays_entries() {
        let mut base = StoreConfig::new().with("a", 1).with("b", "base");
        let overrides = StoreConfig::new().with("b", "override").with("c", true);
        base.merge(&overrides);

        assert_eq!(base.get("a").unwrap(), 1);
        assert_eq!(base.get_str("b"), Some("override"));
        assert_eq!(base.get("c").unwrap(), true);
    }
}
