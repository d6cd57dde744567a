//! KeyDB / Redis backed cache storage.
//!
//! Each namespace is the hash `shellcache:cache:{name}` with one field per
//! request key holding a JSON-encoded [`CacheEntry`].  Namespace names are
//! tracked in the set `shellcache:caches`.  A bulk insert is a single
//! multi-field `HSET`, which the server applies atomically.

use std::sync::Arc;

use anyhow::{Context, Result};
use fred::clients::Pool;
use fred::interfaces::{ClientLike, HashesInterface, KeysInterface, SetsInterface};
use fred::types::config::{ReconnectPolicy, ServerConfig, TlsConnector};
use fred::types::Builder;

use super::entry::{self, cache_key, CacheEntry};
use super::{entries_for, CacheStorage, CacheStore};
use crate::config::KeyDbConfig;
use crate::network::{Request, Response};

const NAMESPACES_KEY: &str = "shellcache:caches";
const POOL_SIZE: usize = 4;

fn namespace_key(name: &str) -> String {
    format!("shellcache:cache:{name}")
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Create a KeyDB connection pool from the storage configuration.
///
/// The pool is connected and PING-verified before being returned.  The auth
/// token is read from the environment variable named by
/// `config.auth_token_env`.
pub async fn create_keydb_pool(config: &KeyDbConfig) -> Result<Pool> {
    let auth_token = std::env::var(&config.auth_token_env).ok();

    let endpoint = config
        .endpoint
        .trim_start_matches("rediss://")
        .trim_start_matches("redis://");
    let (host, port) = parse_host_port(endpoint)?;

    let mut fred_config = fred::types::config::Config {
        server: ServerConfig::new_centralized(host, port),
        ..fred::types::config::Config::default()
    };
    if config.tls {
        fred_config.tls = Some(TlsConnector::default_rustls()?.into());
    }
    if let Some(token) = auth_token {
        fred_config.password = Some(token);
    }

    let mut builder = Builder::from_config(fred_config);
    builder.set_policy(ReconnectPolicy::new_exponential(0, 100, 30_000, 2));

    let pool = builder
        .build_pool(POOL_SIZE)
        .context("failed to build KeyDB connection pool")?;
    pool.init().await.context("failed to connect to KeyDB")?;

    let _: String = pool
        .ping(None)
        .await
        .context("KeyDB PING failed after connect")?;

    tracing::info!(host, port, tls = config.tls, pool_size = POOL_SIZE, "KeyDB pool ready");
    Ok(pool)
}

/// Parse a `host:port` string.  If the port is omitted, defaults to `6379`.
pub fn parse_host_port(endpoint: &str) -> Result<(&str, u16)> {
    let endpoint = endpoint.split('/').next().unwrap_or(endpoint);

    if let Some((host, port_str)) = endpoint.rsplit_once(':') {
        let port: u16 = port_str
            .parse()
            .with_context(|| format!("invalid port in endpoint: {endpoint}"))?;
        Ok((host, port))
    } else {
        Ok((endpoint, 6379))
    }
}

// ---------------------------------------------------------------------------
// KeyDbStorage
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct KeyDbStorage {
    pool: Pool,
}

impl KeyDbStorage {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CacheStorage for KeyDbStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>> {
        let _: i64 = self
            .pool
            .sadd(NAMESPACES_KEY, name)
            .await
            .context("KeyDB SADD failed")?;
        Ok(Arc::new(KeyDbStore {
            pool: self.pool.clone(),
            hash_key: namespace_key(name),
        }))
    }

    async fn has(&self, name: &str) -> Result<bool> {
        self.pool
            .sismember(NAMESPACES_KEY, name)
            .await
            .context("KeyDB SISMEMBER failed")
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let removed: i64 = self
            .pool
            .srem(NAMESPACES_KEY, name)
            .await
            .context("KeyDB SREM failed")?;
        let _: i64 = self
            .pool
            .del(namespace_key(name))
            .await
            .context("KeyDB DEL failed")?;
        Ok(removed > 0)
    }

    async fn names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .pool
            .smembers(NAMESPACES_KEY)
            .await
            .context("KeyDB SMEMBERS failed")?;
        names.sort();
        Ok(names)
    }
}

// ---------------------------------------------------------------------------
// KeyDbStore
// ---------------------------------------------------------------------------

pub struct KeyDbStore {
    pool: Pool,
    hash_key: String,
}

#[async_trait::async_trait]
impl CacheStore for KeyDbStore {
    async fn match_request(&self, request: &Request) -> Result<Option<Response>> {
        let Some(key) = cache_key(request) else {
            return Ok(None);
        };
        let raw: Option<String> = self
            .pool
            .hget(&self.hash_key, key.as_str())
            .await
            .context("KeyDB HGET failed")?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let entry = entry::decode(&raw)?;
        if entry.matches(request) {
            entry.to_response().map(Some)
        } else {
            Ok(None)
        }
    }

    async fn put(&self, request: &Request, response: &Response) -> Result<()> {
        let entry = CacheEntry::new(request, response)?;
        let raw = entry::encode(&entry)?;
        let _: i64 = self
            .pool
            .hset(&self.hash_key, vec![(entry.key, raw)])
            .await
            .context("KeyDB HSET failed")?;
        Ok(())
    }

    async fn put_all(&self, pairs: Vec<(Request, Response)>) -> Result<()> {
        let entries = entries_for(&pairs)?;
        if entries.is_empty() {
            return Ok(());
        }
        let fields = entries
            .iter()
            .map(|entry| Ok((entry.key.clone(), entry::encode(entry)?)))
            .collect::<Result<Vec<(String, String)>>>()?;
        let _: i64 = self
            .pool
            .hset(&self.hash_key, fields)
            .await
            .context("KeyDB HSET failed")?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .pool
            .hkeys(&self.hash_key)
            .await
            .context("KeyDB HKEYS failed")?;
        keys.sort();
        Ok(keys)
    }
}
