//! State storage for cloudup
//!
//! Provides the blob store abstraction used for managed files, plus the
//! secret store and keystore that live under a cluster's config base.

pub mod error;
pub mod keystore;
pub mod local;
pub mod secrets;
pub mod store;

pub use error::StoreError;
pub use keystore::{Keyset, KeysetItem, Keystore};
pub use local::LocalStore;
pub use secrets::{Secret, SecretStore};
pub use store::{BlobStore, MemoryStore, VfsContext, VfsPath};
