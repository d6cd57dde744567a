//! Filesystem-backed cache storage.
//!
//! Layout: `{root}/{hex(namespace)}/{sha256(key)}.json`, one JSON-encoded
//! [`CacheEntry`] per file.  Single writes go through a temporary file and a
//! rename so readers never observe a torn entry.  Bulk writes stage every
//! file under `{root}/.staging-*` first and only move them into the
//! namespace once all of them were written.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::entry::{self, cache_key, CacheEntry};
use super::{entries_for, CacheStorage, CacheStore};
use crate::network::{Request, Response};

const STAGING_PREFIX: &str = ".staging-";

/// Distinguishes temporary paths created by concurrent writers.
static NEXT_TEMP_ID: AtomicU64 = AtomicU64::new(1);

fn temp_suffix() -> String {
    format!(
        "{}-{}",
        std::process::id(),
        NEXT_TEMP_ID.fetch_add(1, Ordering::Relaxed)
    )
}

// ---------------------------------------------------------------------------
// DiskStorage
// ---------------------------------------------------------------------------

/// [`CacheStorage`] rooted at a local directory.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    /// Create the root directory if needed and return the storage.
    pub async fn create(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("failed to create cache root: {}", root.display()))?;
        Ok(Self { root })
    }

    fn namespace_dir(&self, name: &str) -> PathBuf {
        self.root.join(hex::encode(name.as_bytes()))
    }
}

#[async_trait::async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>> {
        let dir = self.namespace_dir(name);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create cache directory: {}", dir.display()))?;
        Ok(Arc::new(DiskStore {
            root: self.root.clone(),
            dir,
        }))
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.namespace_dir(name)).await?)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let dir = self.namespace_dir(name);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e)
                .with_context(|| format!("failed to remove cache directory: {}", dir.display())),
        }
    }

    async fn names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .with_context(|| format!("failed to read cache root: {}", self.root.display()))?;
        while let Some(child) = dir.next_entry().await? {
            if !child.file_type().await?.is_dir() {
                continue;
            }
            let file_name = child.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(STAGING_PREFIX) {
                continue;
            }
            match hex::decode(file_name.as_bytes()).map(String::from_utf8) {
                Ok(Ok(name)) => names.push(name),
                _ => debug!(dir = %file_name, "ignoring foreign directory in cache root"),
            }
        }
        names.sort();
        Ok(names)
    }
}

// ---------------------------------------------------------------------------
// DiskStore
// ---------------------------------------------------------------------------

/// One namespace directory.
#[derive(Debug)]
pub struct DiskStore {
    root: PathBuf,
    dir: PathBuf,
}

impl DiskStore {
    fn file_name(key: &str) -> String {
        format!("{}.json", hex::encode(Sha256::digest(key.as_bytes())))
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(Self::file_name(key))
    }

    async fn read_entry(&self, path: &Path) -> Result<Option<CacheEntry>> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => entry::decode(&raw)
                .with_context(|| format!("corrupt cache entry: {}", path.display()))
                .map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }
}

#[async_trait::async_trait]
impl CacheStore for DiskStore {
    async fn match_request(&self, request: &Request) -> Result<Option<Response>> {
        let Some(key) = cache_key(request) else {
            return Ok(None);
        };
        match self.read_entry(&self.entry_path(&key)).await? {
            Some(entry) if entry.key == key && entry.matches(request) => {
                entry.to_response().map(Some)
            }
            _ => Ok(None),
        }
    }

    async fn put(&self, request: &Request, response: &Response) -> Result<()> {
        let entry = CacheEntry::new(request, response)?;
        let raw = entry::encode(&entry)?;
        let path = self.entry_path(&entry.key);
        let tmp = self
            .dir
            .join(format!(".{}.tmp-{}", Self::file_name(&entry.key), temp_suffix()));

        tokio::fs::write(&tmp, raw)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("failed to move entry to {}", path.display()));
        }
        Ok(())
    }

    async fn put_all(&self, pairs: Vec<(Request, Response)>) -> Result<()> {
        let entries = entries_for(&pairs)?;
        let staging = self.root.join(format!("{STAGING_PREFIX}{}", temp_suffix()));
        tokio::fs::create_dir_all(&staging)
            .await
            .with_context(|| format!("failed to create staging dir: {}", staging.display()))?;

        let result = self.commit_staged(&staging, &entries).await;
        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            warn!(error = %e, dir = %staging.display(), "failed to remove staging dir");
        }
        result
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("failed to read {}", self.dir.display()))?;
        while let Some(child) = dir.next_entry().await? {
            let path = child.path();
            let is_entry = path.extension().is_some_and(|ext| ext == "json")
                && !child.file_name().to_string_lossy().starts_with('.');
            if !is_entry {
                continue;
            }
            if let Some(entry) = self.read_entry(&path).await? {
                keys.push(entry.key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

impl DiskStore {
    /// Write every entry into `staging`, then move them into the namespace.
    ///
    /// Before a file is replaced, the entry it overwrites is hard-linked into
    /// `staging`.  A failed move restores those entries and removes the new
    /// ones, so the namespace ends up exactly as it was.
    async fn commit_staged(&self, staging: &Path, entries: &[CacheEntry]) -> Result<()> {
        let mut staged = Vec::with_capacity(entries.len());
        for entry in entries {
            let file_name = Self::file_name(&entry.key);
            let path = staging.join(&file_name);
            tokio::fs::write(&path, entry::encode(entry)?)
                .await
                .with_context(|| format!("failed to stage {}", path.display()))?;
            staged.push((path, self.dir.join(&file_name), staging.join(format!("{file_name}.prev"))));
        }

        let mut committed: Vec<(&Path, Option<&Path>)> = Vec::with_capacity(staged.len());
        for (from, to, backup) in &staged {
            let previous = match tokio::fs::hard_link(to, backup).await {
                Ok(()) => Some(backup.as_path()),
                Err(e) if e.kind() == ErrorKind::NotFound => None,
                Err(e) => {
                    rollback(&committed).await;
                    return Err(e).with_context(|| format!("failed to back up {}", to.display()));
                }
            };
            committed.push((to.as_path(), previous));
            if let Err(e) = tokio::fs::rename(from, to).await {
                rollback(&committed).await;
                return Err(e).with_context(|| format!("failed to commit {}", to.display()));
            }
        }
        Ok(())
    }
}

/// Undo committed moves, newest first: restore the previous entry where
/// there was one, otherwise remove the new file.
async fn rollback(committed: &[(&Path, Option<&Path>)]) {
    for (path, previous) in committed.iter().rev() {
        let restored = match previous {
            Some(backup) => tokio::fs::rename(backup, path).await,
            None => match tokio::fs::remove_file(path).await {
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        if let Err(e) = restored {
            warn!(error = %e, path = %path.display(), "failed to roll back cache entry");
        }
    }
}
