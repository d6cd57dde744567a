//! [`Network`] implementation that forwards requests to the configured origin.

use anyhow::{Context, Result};
use axum::http::{header, HeaderMap, HeaderName};
use tracing::{debug, instrument};
use url::Url;

use super::{Network, Request, Response, ResponseType};

/// Sends intercepted requests to the web application origin via `reqwest`.
#[derive(Debug, Clone)]
pub struct OriginClient {
    client: reqwest::Client,
    origin: Url,
}

impl OriginClient {
    pub fn new(client: reqwest::Client, origin: Url) -> Self {
        Self { client, origin }
    }

    /// Resolve an origin-relative request URL (`/path?query`).
    ///
    /// Only the path and query are taken from `url`; scheme, host and port
    /// always come from the configured origin.
    pub fn resolve(&self, url: &str) -> Result<Url> {
        anyhow::ensure!(
            url.starts_with('/') && !url.starts_with("//") && !url.starts_with("/\\"),
            "refusing to forward {url:?}: not an origin-relative path"
        );
        let url = url.split('#').next().unwrap_or_default();
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (url, None),
        };

        let mut target = self.origin.clone();
        target.set_path(path);
        target.set_query(query);
        anyhow::ensure!(
            target.origin() == self.origin.origin(),
            "refusing to forward {url:?}: resolves outside {}",
            self.origin
        );
        Ok(target)
    }
}

#[async_trait::async_trait]
impl Network for OriginClient {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let target = self.resolve(&request.url)?;

        let mut builder = self
            .client
            .request(request.method.clone(), target.clone())
            .headers(forwardable(&request.headers, &[header::HOST]));
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let upstream = builder
            .send()
            .await
            .with_context(|| format!("failed to reach origin for {target}"))?;

        let status = upstream.status();
        let final_url = upstream.url().clone();
        // The body is buffered, so the framing headers are recomputed downstream.
        let headers = forwardable(upstream.headers(), &[header::CONTENT_LENGTH]);
        let body = upstream
            .bytes()
            .await
            .with_context(|| format!("failed to read origin response body for {target}"))?;

        let response_type = classify(&self.origin, &final_url);
        debug!(%status, %final_url, ?response_type, bytes = body.len(), "origin responded");

        let mut response = Response::new(status).with_body(body);
        response.headers = headers;
        response.response_type = response_type;
        response.url = final_url.to_string();
        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Same-origin responses are `basic`; anything a redirect moved elsewhere is `cors`.
fn classify(origin: &Url, final_url: &Url) -> ResponseType {
    if origin.origin() == final_url.origin() {
        ResponseType::Basic
    } else {
        ResponseType::Cors
    }
}

/// Headers that describe a single connection and must not be forwarded.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Copy `headers` minus hop-by-hop headers and the `extra` names.
fn forwardable(headers: &HeaderMap, extra: &[HeaderName]) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) || extra.contains(name) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}
