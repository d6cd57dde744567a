use std::sync::Arc;

use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::cache::CacheStorage;
use crate::network::{Network, Request};

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub cache: CheckResult,
    pub origin: CheckResult,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    fn healthy(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: Some(detail.into()),
        }
    }

    fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state expected by the handler
// ---------------------------------------------------------------------------

/// The parts of `AppState` the health check needs.
#[derive(Clone)]
pub struct HealthState {
    pub cache_name: String,
    pub storage: Arc<dyn CacheStorage>,
    pub network: Arc<dyn Network>,
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

async fn check_cache(storage: &dyn CacheStorage, name: &str) -> CheckResult {
    match storage.has(name).await {
        Ok(true) => {}
        Ok(false) => return CheckResult::unhealthy(format!("cache {name} does not exist")),
        Err(e) => return CheckResult::unhealthy(format!("cache storage unavailable: {e:#}")),
    }

    let keys = match storage.open(name).await {
        Ok(store) => store.keys().await,
        Err(e) => Err(e),
    };
    match keys {
        Ok(keys) => CheckResult::healthy(format!("{} entries in {name}", keys.len())),
        Err(e) => CheckResult::unhealthy(format!("failed to list {name}: {e:#}")),
    }
}

async fn check_origin(network: &dyn Network) -> CheckResult {
    match network.fetch(&Request::new(Method::HEAD, "/")).await {
        Ok(resp) if resp.status.is_success() || resp.status.is_redirection() => {
            CheckResult::healthy(format!("HEAD / returned {}", resp.status))
        }
        Ok(resp) => CheckResult::unhealthy(format!("HEAD / returned {}", resp.status)),
        Err(e) => CheckResult::unhealthy(format!("HEAD / failed: {e:#}")),
    }
}

// ---------------------------------------------------------------------------
// Aggregate status
// ---------------------------------------------------------------------------

fn aggregate_status(checks: &HealthChecks) -> HealthStatus {
    if !checks.cache.ok {
        // Without the store nothing can be served offline.
        HealthStatus::Unhealthy
    } else if !checks.origin.ok {
        HealthStatus::Degraded
    } else {
        HealthStatus::Ok
    }
}

pub async fn run_checks(state: &HealthState) -> HealthResponse {
    let (cache, origin) = tokio::join!(
        check_cache(state.storage.as_ref(), &state.cache_name),
        check_origin(state.network.as_ref()),
    );

    let checks = HealthChecks { cache, origin };
    let status = aggregate_status(&checks);
    HealthResponse { status, checks }
}

// ---------------------------------------------------------------------------
// Axum handler
// ---------------------------------------------------------------------------

/// `GET /healthz` handler.  Returns 200 on Ok/Degraded, 503 on Unhealthy.
pub async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let body = run_checks(&state).await;

    let http_status = match body.status {
        HealthStatus::Ok | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(body))
}
