//! Request/response model shared by the interceptor, the cache backends and
//! the origin client.
//!
//! Bodies are fully buffered as [`Bytes`], so duplicating a response for
//! write-back is a reference-count bump rather than a copy.

pub mod origin;

use anyhow::Result;
use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use origin::OriginClient;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// An intercepted outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Origin-relative URL (path plus optional query), e.g. `/static/js/main.js?v=3`.
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Shorthand for a bodiless `GET`.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// The URL path without query string or fragment.
    pub fn path(&self) -> &str {
        let end = self.url.find(['?', '#']).unwrap_or(self.url.len());
        &self.url[..end]
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// How a response relates to the origin it was requested from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Served by the configured origin.
    #[default]
    Basic,
    /// Served by another origin (e.g. after a cross-origin redirect).
    Cors,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub response_type: ResponseType,
    /// Final URL after redirects.
    pub url: String,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            response_type: ResponseType::Basic,
            url: String::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Status in `200..=299`.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Eligible for write-back: exactly 200 and same-origin.
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK && self.response_type == ResponseType::Basic
    }
}

// ---------------------------------------------------------------------------
// Network trait
// ---------------------------------------------------------------------------

/// The network side of the interceptor.
#[async_trait::async_trait]
pub trait Network: Send + Sync {
    /// Perform `request` and return the response, or the failure that
    /// prevented one from arriving.  Non-2xx statuses are responses, not
    /// failures.
    async fn fetch(&self, request: &Request) -> Result<Response>;
}
