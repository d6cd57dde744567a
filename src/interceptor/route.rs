//! Network-only versus cache-first routing.

use anyhow::{Context, Result};
use axum::http::Method;

use crate::config::RoutingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Bypass the cache entirely.
    NetworkOnly,
    /// Cache lookup first, network on miss.
    CacheFirst,
}

/// Decides which requests must never be answered from the cache.
#[derive(Debug, Clone, Default)]
pub struct RoutePolicy {
    network_only_methods: Vec<Method>,
    network_only_prefixes: Vec<String>,
}

impl RoutePolicy {
    pub fn new(network_only_methods: Vec<Method>, network_only_prefixes: Vec<String>) -> Self {
        Self {
            network_only_methods,
            network_only_prefixes,
        }
    }

    pub fn from_config(config: &RoutingConfig) -> Result<Self> {
        let methods = config
            .network_only_methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                    .with_context(|| format!("invalid HTTP method: {m}"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(methods, config.network_only_prefixes.clone()))
    }

    /// Route a request by method and URL path.  Prefixes match with a plain
    /// `starts_with`, so `/translate` also covers `/translate-batch`.
    pub fn route(&self, method: &Method, path: &str) -> Route {
        let dynamic = self
            .network_only_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()));
        if dynamic || self.network_only_methods.contains(method) {
            Route::NetworkOnly
        } else {
            Route::CacheFirst
        }
    }
}
