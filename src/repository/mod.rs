//! Keyed mail storage — repository addresses, store backends, registry.

pub mod address;
pub mod file;
pub mod memory;
pub mod registry;
pub mod store;

pub use address::{MailKey, RepositoryAddress};
pub use file::FileStoreProtocol;
pub use memory::MemoryStoreProtocol;
pub use registry::{RepositoryRegistry, RepositoryRegistryBuilder};
pub use store::{MailStore, StoreConfig, StoreProtocol};
