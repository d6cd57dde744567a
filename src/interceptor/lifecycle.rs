//! Interceptor lifecycle: install (pre-cache) and activate (stale cleanup).

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use super::OfflineCacheInterceptor;
use crate::metrics::InstallResult;
use crate::network::{Request, Response};

/// Lifecycle states, in order.  `Redundant` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkerState {
    #[default]
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

pub(crate) fn is_valid_transition(from: WorkerState, to: WorkerState) -> bool {
    use WorkerState::*;

    matches!(
        (from, to),
        (Parsed, Installing)
            | (Installing, Installed)
            | (Installing, Redundant)
            | (Installed, Activating)
            | (Activating, Activated)
            | (Activating, Redundant)
            | (Activated, Redundant)
    )
}

/// What a successful install stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub cache_name: String,
    pub cached: Vec<String>,
}

impl OfflineCacheInterceptor {
    /// Open the cache namespace and store every pre-cache URL.
    ///
    /// All URLs are fetched concurrently.  Any fetch failure or non-2xx
    /// response fails the install and nothing is stored.
    #[instrument(skip(self), fields(cache = %self.settings.cache_name))]
    pub async fn install(&self) -> Result<InstallReport> {
        self.transition(WorkerState::Installing)?;

        match self.precache().await {
            Ok(report) => {
                self.transition(WorkerState::Installed)?;
                self.metrics.metrics.record_install(InstallResult::Succeeded);
                self.metrics
                    .metrics
                    .precached_entries
                    .set(report.cached.len() as i64);
                info!(entries = report.cached.len(), "install complete");
                Ok(report)
            }
            Err(e) => {
                self.transition(WorkerState::Redundant)?;
                self.metrics.metrics.record_install(InstallResult::Failed);
                warn!(error = %format!("{e:#}"), "install failed");
                Err(e)
            }
        }
    }

    async fn precache(&self) -> Result<InstallReport> {
        let store = self.store().await.context("failed to open cache")?;

        let mut fetches = JoinSet::new();
        for (index, url) in self.settings.precache.iter().enumerate() {
            let network = self.network.clone();
            let request = Request::get(url.clone());
            fetches.spawn(async move {
                let response = network.fetch(&request).await;
                (index, request, response)
            });
        }

        let mut fetched: Vec<(usize, Request, Response)> =
            Vec::with_capacity(self.settings.precache.len());
        while let Some(joined) = fetches.join_next().await {
            let (index, request, response) = joined.context("pre-cache fetch task failed")?;
            let response = response
                .with_context(|| format!("failed to fetch pre-cache URL {}", request.url))?;
            anyhow::ensure!(
                response.ok(),
                "pre-cache URL {} answered {}",
                request.url,
                response.status
            );
            fetched.push((index, request, response));
        }
        fetched.sort_by_key(|(index, _, _)| *index);

        let cached = fetched.iter().map(|(_, req, _)| req.url.clone()).collect();
        let pairs = fetched
            .into_iter()
            .map(|(_, request, response)| (request, response))
            .collect();
        store
            .put_all(pairs)
            .await
            .context("failed to store pre-cache entries")?;

        Ok(InstallReport {
            cache_name: self.settings.cache_name.clone(),
            cached,
        })
    }

    /// Delete stale namespaces and start intercepting.
    ///
    /// A namespace is stale when it starts with the configured prefix and is
    /// not the current cache.  Returns the deleted names.
    #[instrument(skip(self), fields(cache = %self.settings.cache_name))]
    pub async fn activate(&self) -> Result<Vec<String>> {
        self.transition(WorkerState::Activating)?;

        match self.delete_stale_caches().await {
            Ok(deleted) => {
                self.transition(WorkerState::Activated)?;
                info!(deleted = deleted.len(), "activated");
                Ok(deleted)
            }
            Err(e) => {
                self.transition(WorkerState::Redundant)?;
                Err(e)
            }
        }
    }

    async fn delete_stale_caches(&self) -> Result<Vec<String>> {
        let prefix = &self.settings.namespace_prefix;
        if prefix.is_empty() {
            return Ok(Vec::new());
        }

        let mut deleted = Vec::new();
        for name in self.storage.names().await.context("failed to list caches")? {
            if name == self.settings.cache_name || !name.starts_with(prefix.as_str()) {
                continue;
            }
            if self
                .storage
                .delete(&name)
                .await
                .with_context(|| format!("failed to delete stale cache {name}"))?
            {
                info!(stale = %name, "deleted stale cache");
                self.metrics.metrics.stale_caches_deleted_total.inc();
                deleted.push(name);
            }
        }
        Ok(deleted)
    }
}
