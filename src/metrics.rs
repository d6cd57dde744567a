use std::sync::Arc;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

/// How an intercepted request was answered.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    /// Served from the cache store.
    Hit,
    /// Cache-first route, fetched from the network.
    Miss,
    /// Network-only route.
    Bypass,
    /// Not intercepted because the interceptor is not active yet.
    Passthrough,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Bypass => "bypass",
            Self::Passthrough => "passthrough",
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: Outcome,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum WriteBackResult {
    Stored,
    Skipped,
    Failed,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct WriteBackLabels {
    pub result: WriteBackResult,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum InstallResult {
    Succeeded,
    Failed,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct InstallLabels {
    pub result: InstallResult,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Every Prometheus metric exposed by shellcache.
pub struct Metrics {
    pub intercepted_total: Family<OutcomeLabels, Counter>,
    pub write_back_total: Family<WriteBackLabels, Counter>,
    pub install_total: Family<InstallLabels, Counter>,
    pub stale_caches_deleted_total: Counter,
    pub precached_entries: Gauge,
    pub upstream_fetch_duration_seconds: Histogram,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let intercepted_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "shellcache_intercepted",
            "Intercepted requests by outcome",
            intercepted_total.clone(),
        );

        let write_back_total = Family::<WriteBackLabels, Counter>::default();
        registry.register(
            "shellcache_write_back",
            "Cache write-back attempts by result",
            write_back_total.clone(),
        );

        let install_total = Family::<InstallLabels, Counter>::default();
        registry.register(
            "shellcache_install",
            "Install (pre-cache) runs by result",
            install_total.clone(),
        );

        let stale_caches_deleted_total = Counter::default();
        registry.register(
            "shellcache_stale_caches_deleted",
            "Stale cache namespaces deleted on activation",
            stale_caches_deleted_total.clone(),
        );

        let precached_entries: Gauge = Gauge::default();
        registry.register(
            "shellcache_precached_entries",
            "Entries stored by the last successful install",
            precached_entries.clone(),
        );

        let upstream_fetch_duration_seconds = Histogram::new(exponential_buckets(0.005, 2.0, 14));
        registry.register(
            "shellcache_upstream_fetch_duration_seconds",
            "Latency of network fetches made by the interceptor",
            upstream_fetch_duration_seconds.clone(),
        );

        Self {
            intercepted_total,
            write_back_total,
            install_total,
            stale_caches_deleted_total,
            precached_entries,
            upstream_fetch_duration_seconds,
        }
    }

    pub fn record_outcome(&self, outcome: Outcome) {
        self.intercepted_total
            .get_or_create(&OutcomeLabels { outcome })
            .inc();
    }

    pub fn record_write_back(&self, result: WriteBackResult) {
        self.write_back_total
            .get_or_create(&WriteBackLabels { result })
            .inc();
    }

    pub fn record_install(&self, result: InstallResult) {
        self.install_total
            .get_or_create(&InstallLabels { result })
            .inc();
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper for the metrics registry, shared by the interceptor
/// and the HTTP layer.
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// Render the registry in the OpenMetrics text format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)
            .map_err(|e| anyhow::anyhow!("metrics encoding failed: {e}"))?;
        Ok(buf)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
