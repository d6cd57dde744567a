//! Named cache namespaces mapping request identity to response snapshots.
//!
//! [`CacheStorage`] owns the namespaces; [`CacheStore`] is a handle to one of
//! them.  Three backends implement the pair: [`memory`] (process-local),
//! [`disk`] (one directory per namespace) and [`keydb`] (one hash per
//! namespace).  Only `GET` requests are ever stored or matched.

pub mod disk;
pub mod entry;
pub mod keydb;
pub mod memory;

use std::sync::Arc;

use anyhow::Result;

use crate::config::{StorageBackend, StorageConfig};
use crate::network::{Request, Response};

pub use memory::MemoryStorage;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// The set of cache namespaces for one origin.
#[async_trait::async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open the namespace `name`, creating it if absent.
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>>;

    async fn has(&self, name: &str) -> Result<bool>;

    /// Delete the namespace and every entry in it.  Returns `false` when it
    /// did not exist.
    async fn delete(&self, name: &str) -> Result<bool>;

    async fn names(&self) -> Result<Vec<String>>;
}

/// One namespace.  Writes to a single key are atomic; concurrent writes to
/// the same key are last-write-wins.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    async fn match_request(&self, request: &Request) -> Result<Option<Response>>;

    async fn put(&self, request: &Request, response: &Response) -> Result<()>;

    /// Store every pair or none of them.
    async fn put_all(&self, entries: Vec<(Request, Response)>) -> Result<()>;

    /// Keys of all stored entries, sorted.
    async fn keys(&self) -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build the configured [`CacheStorage`] backend.
pub async fn build_storage(config: &StorageConfig) -> Result<Arc<dyn CacheStorage>> {
    let storage: Arc<dyn CacheStorage> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        StorageBackend::Disk => {
            let disk = config
                .disk
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("storage.disk is not configured"))?;
            Arc::new(disk::DiskStorage::create(&disk.path).await?)
        }
        StorageBackend::Keydb => {
            let keydb = config
                .keydb
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("storage.keydb is not configured"))?;
            let pool = keydb::create_keydb_pool(keydb).await?;
            Arc::new(keydb::KeyDbStorage::new(pool))
        }
    };
    tracing::info!(backend = ?config.backend, "cache storage initialised");
    Ok(storage)
}

/// Build the entries for a bulk insert, failing on the first one that cannot
/// be stored.
pub(crate) fn entries_for(pairs: &[(Request, Response)]) -> Result<Vec<entry::CacheEntry>> {
    pairs
        .iter()
        .map(|(request, response)| entry::CacheEntry::new(request, response))
        .collect()
}
