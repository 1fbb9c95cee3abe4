//! File-backed store backend.
//!
//! One JSON document per key under the store's directory. Keys are
//! hex-encoded into file names, so any key round-trips regardless of what
//! characters the id contains.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::model::Message;

use super::{MailKey, MailStore, StoreConfig, StoreProtocol};

const FILE_SUFFIX: &str = ".json";

pub struct FileMailStore {
    dir: PathBuf,
    /// Guards against a reader observing a half-written document.
    guard: RwLock<()>,
}

impl FileMailStore {
    /// Open a store rooted at `dir`, creating it if needed.
    pub async fn open(dir: PathBuf) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            guard: RwLock::new(()),
        })
    }

    fn path_for(&self, key: &MailKey) -> PathBuf {
        self.dir.join(format!("{}{FILE_SUFFIX}", encode_key(key)))
    }
}

fn encode_key(key: &MailKey) -> String {
    let mut encoded = String::with_capacity(key.as_str().len() * 2);
    for byte in key.as_str().bytes() {
        let _ = write!(encoded, "{byte:02x}");
    }
    encoded
}

fn decode_key(stem: &str) -> Option<MailKey> {
    if stem.len() % 2 != 0 {
        return None;
    }
    let mut bytes = Vec::with_capacity(stem.len() / 2);
    for chunk in stem.as_bytes().chunks(2) {
        let pair = std::str::from_utf8(chunk).ok()?;
        bytes.push(u8::from_str_radix(pair, 16).ok()?);
    }
    String::from_utf8(bytes).ok().map(MailKey::new)
}

#[async_trait]
impl MailStore for FileMailStore {
    async fn store(&self, message: &Message) -> Result<MailKey, StoreError> {
        let key = MailKey::of(message);
        let bytes = serde_json::to_vec(message)?;
        let _write = self.guard.write().await;
        tokio::fs::write(self.path_for(&key), bytes).await?;
        Ok(key)
    }

    async fn retrieve(&self, key: &MailKey) -> Result<Option<Message>, StoreError> {
        let _read = self.guard.read().await;
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn remove(&self, key: &MailKey) -> Result<bool, StoreError> {
        let _write = self.guard.write().await;
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self) -> Result<Vec<MailKey>, StoreError> {
        let _read = self.guard.read().await;
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(FILE_SUFFIX) else {
                continue;
            };
            if let Some(key) = decode_key(stem) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn size(&self) -> Result<u64, StoreError> {
        Ok(self.list().await?.len() as u64)
    }

    async fn remove_all(&self) -> Result<(), StoreError> {
        let keys = self.list().await?;
        for key in keys {
            self.remove(&key).await?;
        }
        Ok(())
    }
}

/// Binding for `file://` addresses. The store directory is the configured
/// `directory` base joined with the address path.
pub struct FileStoreProtocol;

impl FileStoreProtocol {
    /// Default base when no `directory` is configured.
    pub const DEFAULT_DIRECTORY: &'static str = "var/store";
}

#[async_trait]
impl StoreProtocol for FileStoreProtocol {
    fn name(&self) -> &str {
        "file"
    }

    async fn open(&self, config: StoreConfig) -> Result<Arc<dyn MailStore>, StoreError> {
        let base = config
            .get_str("directory")
            .unwrap_or(Self::DEFAULT_DIRECTORY);
        let address_path = config
            .get_str(StoreConfig::ADDRESS_KEY)
            .and_then(|address| address.split_once("://").map(|(_, path)| path))
            .unwrap_or_default();
        if address_path.split('/').any(|part| part == "..") {
            return Err(StoreError::Backend(format!(
                "repository path {address_path:?} escapes the store directory"
            )));
        }
        let dir = Path::new(base).join(address_path);
        Ok(Arc::new(FileMailStore::open(dir).await?))
    }
}
