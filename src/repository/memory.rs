//! In-memory store backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::model::Message;

use super::{MailKey, MailStore, StoreConfig, StoreProtocol};

/// Map-backed store; cloning on both sides gives the deep-copy guarantee.
#[derive(Default)]
pub struct MemoryMailStore {
    mails: RwLock<HashMap<MailKey, Message>>,
}

impl MemoryMailStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MailStore for MemoryMailStore {
    async fn store(&self, message: &Message) -> Result<MailKey, StoreError> {
        let key = MailKey::of(message);
        self.mails
            .write()
            .await
            .insert(key.clone(), message.clone());
        Ok(key)
    }

    async fn retrieve(&self, key: &MailKey) -> Result<Option<Message>, StoreError> {
        Ok(self.mails.read().await.get(key).cloned())
    }

    async fn remove(&self, key: &MailKey) -> Result<bool, StoreError> {
        Ok(self.mails.write().await.remove(key).is_some())
    }

    async fn list(&self) -> Result<Vec<MailKey>, StoreError> {
        Ok(self.mails.read().await.keys().cloned().collect())
    }

    async fn size(&self) -> Result<u64, StoreError> {
        Ok(self.mails.read().await.len() as u64)
    }

    async fn remove_all(&self) -> Result<(), StoreError> {
        self.mails.write().await.clear();
        Ok(())
    }
}

/// Binding for `memory://` addresses.
pub struct MemoryStoreProtocol;

#[async_trait]
impl StoreProtocol for MemoryStoreProtocol {
    fn name(&self) -> &str {
        "memory"
    }

    async fn open(&self, _config: StoreConfig) -> Result<Arc<dyn MailStore>, StoreError> {
        Ok(Arc::new(MemoryMailStore::new()))
    }
}
