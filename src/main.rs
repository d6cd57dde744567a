mod cache;
mod config;
mod health;
mod http;
mod interceptor;
mod metrics;
mod network;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::cache::CacheStorage;
use crate::config::Config;
use crate::interceptor::{InterceptorSettings, OfflineCacheInterceptor};
use crate::metrics::MetricsRegistry;
use crate::network::{Network, OriginClient};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "shellcache", about = "Offline cache interceptor for a web app shell")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/shellcache/config.yaml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Global state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub interceptor: Arc<OfflineCacheInterceptor>,
    pub storage: Arc<dyn CacheStorage>,
    pub network: Arc<dyn Network>,
    pub metrics: MetricsRegistry,
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(state: Arc<AppState>) -> Result<()> {
    let app = http::handler::create_router(Arc::clone(&state));

    let listen_addr: std::net::SocketAddr = state
        .config
        .proxy
        .http_listen
        .parse()
        .context("invalid http_listen address")?;

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Config ----
    let config = config::load_config(&cli.config)?;
    let config = Arc::new(config);

    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(config_path = %cli.config, "starting shellcache");

    // ---- Infrastructure clients ----
    let storage = cache::build_storage(&config.storage).await?;

    let http_client = reqwest::Client::builder()
        .user_agent("shellcache/0.1")
        .timeout(Duration::from_secs(config.origin.request_timeout))
        .build()
        .context("failed to build reqwest client")?;
    let origin = url::Url::parse(&config.origin.url)
        .with_context(|| format!("invalid origin url: {}", config.origin.url))?;
    let network: Arc<dyn Network> = Arc::new(OriginClient::new(http_client, origin));
    tracing::info!(origin = %config.origin.url, "origin client initialised");

    // ---- Metrics ----
    let metrics = MetricsRegistry::new();

    // ---- Interceptor ----
    let settings = InterceptorSettings::from_config(&config)?;
    let interceptor = Arc::new(OfflineCacheInterceptor::new(
        settings,
        Arc::clone(&storage),
        Arc::clone(&network),
        metrics.clone(),
    ));

    // Install and activate before the listener accepts traffic.  A failed
    // install exits non-zero and leaves recovery to the supervisor.
    let report = interceptor.install().await.context("install failed")?;
    tracing::info!(cache = %report.cache_name, entries = report.cached.len(), "app shell pre-cached");
    let deleted = interceptor.activate().await.context("activation failed")?;
    tracing::info!(stale_caches = ?deleted, "interceptor active");

    // ---- App state ----
    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        interceptor: Arc::clone(&interceptor),
        storage,
        network,
        metrics,
    });

    // ---- Serve until shutdown ----
    run_http_server(state).await?;

    interceptor.wait_for_write_backs().await;
    tracing::info!("shellcache shut down cleanly");
    Ok(())
}
