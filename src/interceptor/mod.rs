//! The offline cache interceptor.
//!
//! [`OfflineCacheInterceptor`] owns the lifecycle (see [`lifecycle`]) and the
//! per-request routing:
//!
//! - network-only routes (mutating methods, dynamic path prefixes) go straight
//!   to the network and never touch the cache store;
//! - everything else is cache-first: a stored response is returned verbatim,
//!   otherwise the network answers and a 200 same-origin response is written
//!   back by a detached task that the response path never waits on.

pub mod lifecycle;
pub mod route;

use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use axum::http::Method;
use tokio::sync::OnceCell;
use tokio_util::task::TaskTracker;
use tracing::{debug, instrument, warn};

use crate::cache::{CacheStorage, CacheStore};
use crate::config::Config;
use crate::metrics::{MetricsRegistry, Outcome, WriteBackResult};
use crate::network::{Network, Request, Response};

pub use lifecycle::WorkerState;
pub use route::{Route, RoutePolicy};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// The compiled-in constants of the interceptor, lifted into configuration.
#[derive(Debug, Clone)]
pub struct InterceptorSettings {
    pub cache_name: String,
    pub namespace_prefix: String,
    pub precache: Vec<String>,
    pub policy: RoutePolicy,
    pub write_back: bool,
}

impl InterceptorSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            cache_name: config.cache.name.clone(),
            namespace_prefix: config.cache.namespace_prefix.clone(),
            precache: config.cache.precache.clone(),
            policy: RoutePolicy::from_config(&config.routing)?,
            write_back: config.cache.write_back,
        })
    }
}

/// A response together with how it was obtained.
#[derive(Debug, Clone)]
pub struct Intercepted {
    pub response: Response,
    pub outcome: Outcome,
}

// ---------------------------------------------------------------------------
// Interceptor
// ---------------------------------------------------------------------------

pub struct OfflineCacheInterceptor {
    settings: InterceptorSettings,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    metrics: MetricsRegistry,
    state: Mutex<WorkerState>,
    /// Handle to the current namespace, opened on first use.
    store: Arc<OnceCell<Arc<dyn CacheStore>>>,
    write_backs: TaskTracker,
}

impl OfflineCacheInterceptor {
    pub fn new(
        settings: InterceptorSettings,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            settings,
            storage,
            network,
            metrics,
            state: Mutex::new(WorkerState::default()),
            store: Arc::new(OnceCell::new()),
            write_backs: TaskTracker::new(),
        }
    }

    pub fn settings(&self) -> &InterceptorSettings {
        &self.settings
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_active(&self) -> bool {
        self.state() == WorkerState::Activated
    }

    fn transition(&self, to: WorkerState) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        anyhow::ensure!(
            lifecycle::is_valid_transition(*state, to),
            "invalid lifecycle transition {:?} -> {:?}",
            *state,
            to
        );
        debug!(from = ?*state, ?to, "lifecycle transition");
        *state = to;
        Ok(())
    }

    async fn store(&self) -> Result<Arc<dyn CacheStore>> {
        open_store(&self.store, self.storage.as_ref(), &self.settings.cache_name).await
    }

    /// Answer one intercepted request.
    ///
    /// Network failures propagate unchanged.  A cache lookup failure is
    /// logged and treated as a miss.
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn intercept(&self, request: Request) -> Result<Intercepted> {
        if !self.is_active() {
            let response = self.fetch_upstream(&request).await?;
            return Ok(self.finish(response, Outcome::Passthrough));
        }

        if self.settings.policy.route(&request.method, request.path()) == Route::NetworkOnly {
            debug!("network-only route");
            let response = self.fetch_upstream(&request).await?;
            return Ok(self.finish(response, Outcome::Bypass));
        }

        if let Some(cached) = self.lookup(&request).await {
            debug!("cache hit");
            return Ok(self.finish(cached, Outcome::Hit));
        }

        let response = self.fetch_upstream(&request).await?;
        if self.settings.write_back {
            self.spawn_write_back(&request, &response);
        }
        Ok(self.finish(response, Outcome::Miss))
    }

    fn finish(&self, response: Response, outcome: Outcome) -> Intercepted {
        self.metrics.metrics.record_outcome(outcome);
        Intercepted { response, outcome }
    }

    async fn lookup(&self, request: &Request) -> Option<Response> {
        match self.try_lookup(request).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "cache lookup failed, treating as miss");
                None
            }
        }
    }

    async fn try_lookup(&self, request: &Request) -> Result<Option<Response>> {
        let store = self.store().await?;
        store.match_request(request).await
    }

    async fn fetch_upstream(&self, request: &Request) -> Result<Response> {
        let started = Instant::now();
        let result = self.network.fetch(request).await;
        self.metrics
            .metrics
            .upstream_fetch_duration_seconds
            .observe(started.elapsed().as_secs_f64());
        result
    }

    /// Store a duplicate of `response` in the background when it is a 200
    /// same-origin answer to a `GET`.
    fn spawn_write_back(&self, request: &Request, response: &Response) {
        if request.method != Method::GET || !response.is_cacheable() {
            debug!(status = %response.status, response_type = ?response.response_type, "response not cacheable");
            self.metrics
                .metrics
                .record_write_back(WriteBackResult::Skipped);
            return;
        }

        let request = request.clone();
        let response = response.clone();
        let cell = Arc::clone(&self.store);
        let storage = Arc::clone(&self.storage);
        let cache_name = self.settings.cache_name.clone();
        let metrics = self.metrics.clone();

        self.write_backs.spawn(async move {
            let stored = write_back(&cell, storage.as_ref(), &cache_name, &request, &response).await;
            match stored {
                Ok(()) => {
                    debug!(url = %request.url, "write-back stored");
                    metrics.metrics.record_write_back(WriteBackResult::Stored);
                }
                Err(e) => {
                    warn!(url = %request.url, error = %format!("{e:#}"), "write-back failed");
                    metrics.metrics.record_write_back(WriteBackResult::Failed);
                }
            }
        });
    }

    /// Wait until every write-back spawned so far has finished.
    pub async fn wait_for_write_backs(&self) {
        self.write_backs.close();
        self.write_backs.wait().await;
        self.write_backs.reopen();
    }
}

async fn open_store(
    cell: &OnceCell<Arc<dyn CacheStore>>,
    storage: &dyn CacheStorage,
    name: &str,
) -> Result<Arc<dyn CacheStore>> {
    cell.get_or_try_init(|| async {
        storage
            .open(name)
            .await
            .with_context(|| format!("failed to open cache {name}"))
    })
    .await
    .cloned()
}

async fn write_back(
    cell: &OnceCell<Arc<dyn CacheStore>>,
    storage: &dyn CacheStorage,
    name: &str,
    request: &Request,
    response: &Response,
) -> Result<()> {
    let store = open_store(cell, storage, name).await?;
    store.put(request, response).await
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::http::StatusCode;

    use super::*;
    use crate::cache::MemoryStorage;
    use crate::config::RoutingConfig;
    use crate::network::ResponseType;

    /// Scripted network: answers from a URL table and records every call.
    #[derive(Default)]
    struct FakeNetwork {
        routes: Mutex<HashMap<String, Response>>,
        calls: Mutex<Vec<(Method, String)>>,
    }

    impl FakeNetwork {
        fn with(routes: &[(&str, Response)]) -> Arc<Self> {
            let network = Self::default();
            {
                let mut table = network.routes.lock().unwrap();
                for (url, response) in routes {
                    table.insert(url.to_string(), response.clone());
                }
            }
            Arc::new(network)
        }

        fn calls(&self) -> Vec<(Method, String)> {
            self.calls.lock().unwrap().clone()
        }

        fn clear_calls(&self) {
            self.calls.lock().unwrap().clear();
        }
    }

    #[async_trait::async_trait]
    impl Network for FakeNetwork {
        async fn fetch(&self, request: &Request) -> Result<Response> {
            self.calls
                .lock()
                .unwrap()
                .push((request.method.clone(), request.url.clone()));
            self.routes
                .lock()
                .unwrap()
                .get(&request.url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("connection refused: {}", request.url))
        }
    }

    fn ok(body: &'static str) -> Response {
        Response::new(StatusCode::OK).with_body(body)
    }

    fn settings(precache: &[&str]) -> InterceptorSettings {
        InterceptorSettings {
            cache_name: "translator-v1".into(),
            namespace_prefix: "translator-".into(),
            precache: precache.iter().map(|s| s.to_string()).collect(),
            policy: RoutePolicy::from_config(&RoutingConfig::default()).unwrap(),
            write_back: true,
        }
    }

    fn interceptor(
        settings: InterceptorSettings,
        storage: &MemoryStorage,
        network: &Arc<FakeNetwork>,
    ) -> OfflineCacheInterceptor {
        OfflineCacheInterceptor::new(
            settings,
            Arc::new(storage.clone()),
            network.clone(),
            MetricsRegistry::new(),
        )
    }

    async fn activated(
        settings: InterceptorSettings,
        storage: &MemoryStorage,
        network: &Arc<FakeNetwork>,
    ) -> OfflineCacheInterceptor {
        let sw = interceptor(settings, storage, network);
        sw.install().await.unwrap();
        sw.activate().await.unwrap();
        network.clear_calls();
        sw
    }

    async fn stored_keys(storage: &MemoryStorage) -> Vec<String> {
        storage.open("translator-v1").await.unwrap().keys().await.unwrap()
    }

    // -- install ------------------------------------------------------------

    #[tokio::test]
    async fn install_stores_exactly_the_precache_list() {
        let network = FakeNetwork::with(&[("/", ok("shell")), ("/static/manifest.json", ok("{}"))]);
        let storage = MemoryStorage::new();
        let sw = interceptor(settings(&["/", "/static/manifest.json"]), &storage, &network);

        let report = sw.install().await.unwrap();
        assert_eq!(report.cache_name, "translator-v1");
        assert_eq!(report.cached, vec!["/", "/static/manifest.json"]);
        assert_eq!(stored_keys(&storage).await, vec!["/", "/static/manifest.json"]);
        assert_eq!(sw.state(), WorkerState::Installed);
    }

    #[tokio::test]
    async fn install_with_unreachable_url_stores_nothing() {
        let network = FakeNetwork::with(&[("/", ok("shell"))]);
        let storage = MemoryStorage::new();
        let sw = interceptor(settings(&["/", "/static/missing.css"]), &storage, &network);

        let err = sw.install().await.unwrap_err();
        assert!(format!("{err:#}").contains("/static/missing.css"));
        assert!(stored_keys(&storage).await.is_empty());
        assert_eq!(sw.state(), WorkerState::Redundant);
        assert!(sw.activate().await.is_err());
    }

    #[tokio::test]
    async fn install_with_error_status_stores_nothing() {
        let network = FakeNetwork::with(&[
            ("/", ok("shell")),
            ("/static/js/main.js", Response::new(StatusCode::NOT_FOUND)),
        ]);
        let storage = MemoryStorage::new();
        let sw = interceptor(settings(&["/", "/static/js/main.js"]), &storage, &network);

        assert!(sw.install().await.is_err());
        assert!(stored_keys(&storage).await.is_empty());
    }

    // -- activate -----------------------------------------------------------

    #[tokio::test]
    async fn activate_deletes_only_stale_namespaces_under_prefix() {
        let network = FakeNetwork::with(&[("/", ok("shell"))]);
        let storage = MemoryStorage::new();
        storage.open("translator-v0").await.unwrap();
        storage.open("other-app-v3").await.unwrap();
        let sw = interceptor(settings(&["/"]), &storage, &network);

        sw.install().await.unwrap();
        let deleted = sw.activate().await.unwrap();

        assert_eq!(deleted, vec!["translator-v0"]);
        assert_eq!(storage.names().await.unwrap(), vec!["other-app-v3", "translator-v1"]);
        assert!(sw.is_active());
    }

    #[tokio::test]
    async fn activate_requires_install() {
        let network = FakeNetwork::with(&[]);
        let sw = interceptor(settings(&[]), &MemoryStorage::new(), &network);
        assert!(sw.activate().await.is_err());
    }

    #[tokio::test]
    async fn requests_before_activation_are_not_intercepted() {
        let network = FakeNetwork::with(&[("/", ok("shell"))]);
        let storage = MemoryStorage::new();
        let sw = interceptor(settings(&["/"]), &storage, &network);
        sw.install().await.unwrap();
        network.clear_calls();

        let out = sw.intercept(Request::get("/")).await.unwrap();
        assert_eq!(out.outcome, Outcome::Passthrough);
        assert_eq!(network.calls(), vec![(Method::GET, "/".to_string())]);
    }

    // -- network-only -------------------------------------------------------

    #[tokio::test]
    async fn post_translate_ignores_stale_entry() {
        let fresh = Response::new(StatusCode::OK).with_body("{\"translation\":\"hola\"}");
        let network = FakeNetwork::with(&[("/", ok("shell")), ("/translate", fresh.clone())]);
        let storage = MemoryStorage::new();
        storage
            .open("translator-v1")
            .await
            .unwrap()
            .put(&Request::get("/translate"), &ok("stale"))
            .await
            .unwrap();
        let sw = activated(settings(&["/"]), &storage, &network).await;

        let out = sw
            .intercept(Request::new(Method::POST, "/translate"))
            .await
            .unwrap();
        assert_eq!(out.outcome, Outcome::Bypass);
        assert_eq!(out.response, fresh);

        // A GET on a dynamic route also skips the stale entry.
        let out = sw.intercept(Request::get("/translate")).await.unwrap();
        assert_eq!(out.outcome, Outcome::Bypass);
        assert_eq!(out.response, fresh);

        sw.wait_for_write_backs().await;
        let stale = storage
            .open("translator-v1")
            .await
            .unwrap()
            .match_request(&Request::get("/translate"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stale.body, "stale");
    }

    #[tokio::test]
    async fn network_only_failure_propagates() {
        let network = FakeNetwork::with(&[("/", ok("shell"))]);
        let storage = MemoryStorage::new();
        let sw = activated(settings(&["/"]), &storage, &network).await;

        let err = sw
            .intercept(Request::new(Method::POST, "/login"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    // -- cache-first --------------------------------------------------------

    #[tokio::test]
    async fn hit_is_served_without_network() {
        let network = FakeNetwork::with(&[("/static/js/main.js", ok("console.log(1)"))]);
        let storage = MemoryStorage::new();
        let sw = activated(settings(&["/static/js/main.js"]), &storage, &network).await;

        let out = sw.intercept(Request::get("/static/js/main.js")).await.unwrap();
        assert_eq!(out.outcome, Outcome::Hit);
        assert_eq!(out.response, ok("console.log(1)"));
        assert!(network.calls().is_empty());
    }

    #[tokio::test]
    async fn miss_is_written_back_and_then_hit() {
        let network = FakeNetwork::with(&[("/", ok("shell")), ("/static/css/extra.css", ok("a{}"))]);
        let storage = MemoryStorage::new();
        let sw = activated(settings(&["/"]), &storage, &network).await;

        let out = sw.intercept(Request::get("/static/css/extra.css")).await.unwrap();
        assert_eq!(out.outcome, Outcome::Miss);
        assert_eq!(out.response, ok("a{}"));

        sw.wait_for_write_backs().await;
        assert_eq!(stored_keys(&storage).await, vec!["/", "/static/css/extra.css"]);

        network.clear_calls();
        let out = sw.intercept(Request::get("/static/css/extra.css")).await.unwrap();
        assert_eq!(out.outcome, Outcome::Hit);
        assert!(network.calls().is_empty());
    }

    #[tokio::test]
    async fn non_200_and_cross_origin_are_not_written_back() {
        let mut cross = ok("cdn");
        cross.response_type = ResponseType::Cors;
        let network = FakeNetwork::with(&[
            ("/", ok("shell")),
            ("/missing.png", Response::new(StatusCode::NOT_FOUND)),
            ("/cdn.js", cross.clone()),
            ("/created", Response::new(StatusCode::CREATED)),
        ]);
        let storage = MemoryStorage::new();
        let sw = activated(settings(&["/"]), &storage, &network).await;

        let out = sw.intercept(Request::get("/missing.png")).await.unwrap();
        assert_eq!(out.response.status, StatusCode::NOT_FOUND);
        let out = sw.intercept(Request::get("/cdn.js")).await.unwrap();
        assert_eq!(out.response, cross);
        let out = sw.intercept(Request::get("/created")).await.unwrap();
        assert_eq!(out.response.status, StatusCode::CREATED);

        sw.wait_for_write_backs().await;
        assert_eq!(stored_keys(&storage).await, vec!["/"]);
    }

    #[tokio::test]
    async fn head_requests_are_never_stored() {
        let network = FakeNetwork::with(&[("/", ok("shell")), ("/static/a.css", ok(""))]);
        let storage = MemoryStorage::new();
        let sw = activated(settings(&["/"]), &storage, &network).await;

        let out = sw
            .intercept(Request::new(Method::HEAD, "/static/a.css"))
            .await
            .unwrap();
        assert_eq!(out.outcome, Outcome::Miss);
        sw.wait_for_write_backs().await;
        assert_eq!(stored_keys(&storage).await, vec!["/"]);
    }

    #[tokio::test]
    async fn miss_network_failure_propagates() {
        let network = FakeNetwork::with(&[("/", ok("shell"))]);
        let storage = MemoryStorage::new();
        let sw = activated(settings(&["/"]), &storage, &network).await;

        assert!(sw.intercept(Request::get("/offline.css")).await.is_err());
    }

    #[tokio::test]
    async fn simple_variant_has_no_exclusions_and_no_write_back() {
        let network = FakeNetwork::with(&[("/", ok("shell")), ("/translate", ok("network"))]);
        let storage = MemoryStorage::new();
        let simple = InterceptorSettings {
            policy: RoutePolicy::default(),
            write_back: false,
            ..settings(&["/"])
        };
        let sw = activated(simple, &storage, &network).await;

        let out = sw.intercept(Request::get("/translate")).await.unwrap();
        assert_eq!(out.outcome, Outcome::Miss);
        sw.wait_for_write_backs().await;
        assert_eq!(stored_keys(&storage).await, vec!["/"]);

        let out = sw.intercept(Request::get("/")).await.unwrap();
        assert_eq!(out.outcome, Outcome::Hit);
    }

    #[tokio::test]
    async fn cookies_set_for_one_client_are_not_replayed_to_the_next() {
        let mut with_cookie = ok("console.log(1)");
        with_cookie.headers.insert(
            axum::http::header::SET_COOKIE,
            axum::http::HeaderValue::from_static("session=alice-secret"),
        );
        let network = FakeNetwork::with(&[("/", ok("shell")), ("/static/app.js", with_cookie.clone())]);
        let storage = MemoryStorage::new();
        let sw = activated(settings(&["/"]), &storage, &network).await;

        let first = sw.intercept(Request::get("/static/app.js")).await.unwrap();
        assert_eq!(first.outcome, Outcome::Miss);
        assert_eq!(first.response, with_cookie);
        sw.wait_for_write_backs().await;

        let second = sw.intercept(Request::get("/static/app.js")).await.unwrap();
        assert_eq!(second.outcome, Outcome::Hit);
        assert_eq!(second.response.body, "console.log(1)");
        assert!(second
            .response
            .headers
            .get(axum::http::header::SET_COOKIE)
            .is_none());
    }

    // -- lookup accounting --------------------------------------------------

    /// Memory storage whose stores count `match_request` calls.
    #[derive(Default)]
    struct CountingStorage {
        inner: MemoryStorage,
        lookups: Arc<AtomicUsize>,
    }

    struct CountingStore {
        inner: Arc<dyn CacheStore>,
        lookups: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl CacheStore for CountingStore {
        async fn match_request(&self, request: &Request) -> Result<Option<Response>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.match_request(request).await
        }
        async fn put(&self, request: &Request, response: &Response) -> Result<()> {
            self.inner.put(request, response).await
        }
        async fn put_all(&self, entries: Vec<(Request, Response)>) -> Result<()> {
            self.inner.put_all(entries).await
        }
        async fn keys(&self) -> Result<Vec<String>> {
            self.inner.keys().await
        }
    }

    #[async_trait::async_trait]
    impl CacheStorage for CountingStorage {
        async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>> {
            Ok(Arc::new(CountingStore {
                inner: self.inner.open(name).await?,
                lookups: Arc::clone(&self.lookups),
            }))
        }
        async fn has(&self, name: &str) -> Result<bool> {
            self.inner.has(name).await
        }
        async fn delete(&self, name: &str) -> Result<bool> {
            self.inner.delete(name).await
        }
        async fn names(&self) -> Result<Vec<String>> {
            self.inner.names().await
        }
    }

    #[tokio::test]
    async fn network_only_routes_never_consult_the_store() {
        let network = FakeNetwork::with(&[
            ("/", ok("shell")),
            ("/static/x", ok("x")),
            ("/translate", ok("hola")),
        ]);
        let storage = CountingStorage::default();
        let lookups = Arc::clone(&storage.lookups);
        let sw = OfflineCacheInterceptor::new(
            settings(&["/", "/static/x", "/translate"]),
            Arc::new(storage),
            network.clone(),
            MetricsRegistry::new(),
        );
        sw.install().await.unwrap();
        sw.activate().await.unwrap();

        let out = sw
            .intercept(Request::new(Method::POST, "/static/x"))
            .await
            .unwrap();
        assert_eq!(out.outcome, Outcome::Bypass);
        let out = sw.intercept(Request::get("/translate")).await.unwrap();
        assert_eq!(out.outcome, Outcome::Bypass);
        assert_eq!(lookups.load(Ordering::SeqCst), 0);

        let out = sw.intercept(Request::get("/static/x")).await.unwrap();
        assert_eq!(out.outcome, Outcome::Hit);
        assert_eq!(lookups.load(Ordering::SeqCst), 1);
    }

    // -- store failures -----------------------------------------------------

    /// Storage whose lookups always fail.
    struct BrokenLookups;

    #[async_trait::async_trait]
    impl CacheStore for BrokenLookups {
        async fn match_request(&self, _request: &Request) -> Result<Option<Response>> {
            anyhow::bail!("disk I/O error")
        }
        async fn put(&self, _request: &Request, _response: &Response) -> Result<()> {
            anyhow::bail!("disk I/O error")
        }
        async fn put_all(&self, _entries: Vec<(Request, Response)>) -> Result<()> {
            Ok(())
        }
        async fn keys(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[async_trait::async_trait]
    impl CacheStorage for BrokenLookups {
        async fn open(&self, _name: &str) -> Result<Arc<dyn CacheStore>> {
            Ok(Arc::new(BrokenLookups))
        }
        async fn has(&self, _name: &str) -> Result<bool> {
            Ok(true)
        }
        async fn delete(&self, _name: &str) -> Result<bool> {
            Ok(false)
        }
        async fn names(&self) -> Result<Vec<String>> {
            Ok(vec!["translator-v1".into()])
        }
    }

    #[tokio::test]
    async fn lookup_and_write_back_failures_do_not_fail_the_request() {
        let network = FakeNetwork::with(&[("/static/js/main.js", ok("js"))]);
        let metrics = MetricsRegistry::new();
        let sw = OfflineCacheInterceptor::new(
            settings(&[]),
            Arc::new(BrokenLookups),
            network.clone(),
            metrics.clone(),
        );
        sw.install().await.unwrap();
        sw.activate().await.unwrap();

        let out = sw.intercept(Request::get("/static/js/main.js")).await.unwrap();
        assert_eq!(out.outcome, Outcome::Miss);
        assert_eq!(out.response, ok("js"));

        sw.wait_for_write_backs().await;
        let text = metrics.encode().unwrap();
        assert!(text.contains("shellcache_write_back_total{result=\"Failed\"} 1"));
    }
}
