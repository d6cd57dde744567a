//! Main axum router and HTTP request handlers.
//!
//! Routes:
//! - `GET /healthz` - Health check
//! - `GET /metrics` - Prometheus metrics
//! - anything else  - Intercepted (cache-first or network-only)

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request as HttpRequest, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::{error, instrument, warn};

use crate::interceptor::Intercepted;
use crate::network::Request;
use crate::AppState;

/// Response header naming how the interceptor answered.
pub static X_SHELLCACHE: HeaderName = HeaderName::from_static("x-shellcache");

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all HTTP routes and shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .fallback(handle_intercept)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Any method, any path: run the request through the interceptor.
#[instrument(skip_all, fields(method = %request.method(), uri = %request.uri()))]
async fn handle_intercept(
    State(state): State<Arc<AppState>>,
    request: HttpRequest,
) -> Result<Response, AppError> {
    let request = to_interceptor_request(request, state.config.proxy.max_request_body_bytes).await?;
    let intercepted = state
        .interceptor
        .intercept(request)
        .await
        .map_err(AppError::Upstream)?;
    Ok(into_http_response(intercepted))
}

/// `GET /healthz`
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health_state = crate::health::HealthState {
        cache_name: state.interceptor.settings().cache_name.clone(),
        storage: Arc::clone(&state.storage),
        network: Arc::clone(&state.network),
    };
    crate::health::health_handler(State(health_state)).await
}

/// `GET /metrics`
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let buf = state.metrics.encode().map_err(AppError::Internal)?;

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buf,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Buffer an incoming request into the interceptor's request model.  The URL
/// is kept origin-relative (path and query).
async fn to_interceptor_request(request: HttpRequest, max_body: usize) -> Result<Request, AppError> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, max_body).await.map_err(|e| {
        let inner = e.into_inner();
        if inner.is::<http_body_util::LengthLimitError>() {
            AppError::PayloadTooLarge(max_body)
        } else {
            AppError::BadRequest(format!("failed to read request body: {inner}"))
        }
    })?;

    let url = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| "/".to_owned());

    Ok(Request {
        method: parts.method,
        url,
        headers: parts.headers,
        body,
    })
}

fn into_http_response(intercepted: Intercepted) -> Response {
    let Intercepted { response, outcome } = intercepted;

    let mut http = Response::new(Body::from(response.body));
    *http.status_mut() = response.status;
    *http.headers_mut() = response.headers;
    http.headers_mut().insert(
        X_SHELLCACHE.clone(),
        HeaderValue::from_static(outcome.as_str()),
    );
    http
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Application-level error type that maps cleanly to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// The incoming request could not be read.
    BadRequest(String),
    /// The request body exceeds the configured limit (in bytes).
    PayloadTooLarge(usize),
    /// The network failed to produce a response.
    Upstream(anyhow::Error),
    /// An unexpected internal error.
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::PayloadTooLarge(limit) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("Request body exceeds {limit} bytes"),
            )
                .into_response(),
            AppError::Upstream(err) => {
                warn!(error = %format!("{err:#}"), "network fetch failed");
                (
                    StatusCode::BAD_GATEWAY,
                    format!("Upstream request failed: {err:#}"),
                )
                    .into_response()
            }
            AppError::Internal(err) => {
                error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal server error: {err:#}"),
                )
                    .into_response()
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}
