use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use axum::http::Method;
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub origin: OriginConfig,
    pub proxy: ProxyConfig,
    pub cache: CacheConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct OriginConfig {
    /// Base URL of the web application behind the interceptor
    /// (e.g. `http://127.0.0.1:5000`).  Responses whose final URL shares this
    /// origin are treated as `basic`.
    pub url: String,
    /// Per-request timeout (seconds) for calls to the origin.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

fn default_request_timeout() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Proxy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Socket address for the HTTP listener (e.g. `0.0.0.0:8080`).
    pub http_listen: String,
    /// Upper bound on buffered request bodies forwarded to the origin.
    #[serde(default = "default_max_request_body_bytes")]
    pub max_request_body_bytes: usize,
}

fn default_max_request_body_bytes() -> usize {
    16 * 1024 * 1024
}

// ---------------------------------------------------------------------------
// Cache namespace + pre-cache list
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Name of the cache namespace owned by this deployment.
    #[serde(default = "default_cache_name")]
    pub name: String,
    /// Namespaces starting with this prefix (other than `name`) are deleted
    /// on activation.  An empty prefix disables the cleanup.
    #[serde(default = "default_namespace_prefix")]
    pub namespace_prefix: String,
    /// Static asset URLs fetched and stored at install time.
    #[serde(default = "default_precache")]
    pub precache: Vec<String>,
    /// Store successful same-origin responses seen on the cache-miss path.
    #[serde(default = "bool_true")]
    pub write_back: bool,
}

fn default_cache_name() -> String {
    "translator-v1".to_string()
}

fn default_namespace_prefix() -> String {
    "translator-".to_string()
}

fn default_precache() -> Vec<String> {
    [
        "/static/manifest.json",
        "/static/images/icon-192x192.png",
        "/static/images/icon-512x512.png",
        "/static/css/styles.css",
        "/static/js/main.js",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn bool_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    /// Methods that always go to the network.
    #[serde(default = "default_network_only_methods")]
    pub network_only_methods: Vec<String>,
    /// Path prefixes that always go to the network.
    #[serde(default = "default_network_only_prefixes")]
    pub network_only_prefixes: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            network_only_methods: default_network_only_methods(),
            network_only_prefixes: default_network_only_prefixes(),
        }
    }
}

fn default_network_only_methods() -> Vec<String> {
    ["POST", "PUT", "PATCH", "DELETE"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_network_only_prefixes() -> Vec<String> {
    ["/translate", "/login", "/logout"]
        .into_iter()
        .map(String::from)
        .collect()
}

// ---------------------------------------------------------------------------
// Storage backends
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    pub disk: Option<DiskStorageConfig>,
    pub keydb: Option<KeyDbConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local map; contents are lost on restart.
    #[default]
    Memory,
    /// One directory per namespace on the local filesystem.
    Disk,
    /// One hash per namespace in KeyDB / Redis.
    Keydb,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiskStorageConfig {
    /// Root directory holding one sub-directory per cache namespace.
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyDbConfig {
    /// Connection string (e.g. `rediss://keydb.local:6380`).
    pub endpoint: String,
    /// Enable TLS for the KeyDB connection.
    #[serde(default)]
    pub tls: bool,
    /// Name of the environment variable that holds the KeyDB auth token.
    #[serde(default = "default_keydb_auth_env")]
    pub auth_token_env: String,
}

fn default_keydb_auth_env() -> String {
    "KEYDB_AUTH_TOKEN".to_string()
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("invalid config file: {}", path.display()))
}

/// Parse and validate a [`Config`] from YAML text.
pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(contents).context("failed to parse YAML")?;
    validate_config(&config)?;
    Ok(config)
}

/// Sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    let origin = url::Url::parse(&config.origin.url)
        .with_context(|| format!("origin.url is not a valid URL: {}", config.origin.url))?;
    anyhow::ensure!(
        matches!(origin.scheme(), "http" | "https"),
        "origin.url must use http or https"
    );
    anyhow::ensure!(
        config.origin.request_timeout > 0,
        "origin.request_timeout must be positive"
    );

    anyhow::ensure!(!config.cache.name.is_empty(), "cache.name must not be empty");
    anyhow::ensure!(
        config.cache.namespace_prefix.is_empty()
            || config.cache.name.starts_with(&config.cache.namespace_prefix),
        "cache.name must start with cache.namespace_prefix"
    );

    let mut seen = HashSet::new();
    for url in &config.cache.precache {
        anyhow::ensure!(
            url.starts_with('/'),
            "pre-cache URL must be origin-relative: {url}"
        );
        anyhow::ensure!(seen.insert(url.as_str()), "duplicate pre-cache URL: {url}");
    }

    for method in &config.routing.network_only_methods {
        Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .with_context(|| format!("invalid HTTP method in routing: {method}"))?;
    }
    for prefix in &config.routing.network_only_prefixes {
        anyhow::ensure!(
            prefix.starts_with('/'),
            "network-only prefix must start with '/': {prefix}"
        );
    }

    match config.storage.backend {
        StorageBackend::Memory => {}
        StorageBackend::Disk => anyhow::ensure!(
            config.storage.disk.is_some(),
            "storage.disk is required when storage.backend is disk"
        ),
        StorageBackend::Keydb => anyhow::ensure!(
            config.storage.keydb.is_some(),
            "storage.keydb is required when storage.backend is keydb"
        ),
    }
    Ok(())
}
