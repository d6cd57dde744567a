//! Process-local cache storage.  Contents do not survive a restart.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;

use super::entry::{cache_key, CacheEntry};
use super::{entries_for, CacheStorage, CacheStore};
use crate::network::{Request, Response};

/// In-memory [`CacheStorage`].  Cloning shares the same namespaces.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    caches: Arc<RwLock<BTreeMap<String, Arc<MemoryStore>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>> {
        let mut caches = self.caches.write().await;
        let store = caches.entry(name.to_string()).or_default();
        Ok(Arc::clone(store) as Arc<dyn CacheStore>)
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn names(&self) -> Result<Vec<String>> {
        Ok(self.caches.read().await.keys().cloned().collect())
    }
}

/// One in-memory namespace.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, CacheEntry>>,
}

#[async_trait::async_trait]
impl CacheStore for MemoryStore {
    async fn match_request(&self, request: &Request) -> Result<Option<Response>> {
        let Some(key) = cache_key(request) else {
            return Ok(None);
        };
        let entries = self.entries.read().await;
        match entries.get(&key) {
            Some(entry) if entry.matches(request) => entry.to_response().map(Some),
            _ => Ok(None),
        }
    }

    async fn put(&self, request: &Request, response: &Response) -> Result<()> {
        let entry = CacheEntry::new(request, response)?;
        self.entries.write().await.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn put_all(&self, pairs: Vec<(Request, Response)>) -> Result<()> {
        let new_entries = entries_for(&pairs)?;
        let mut entries = self.entries.write().await;
        for entry in new_entries {
            entries.insert(entry.key.clone(), entry);
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}
