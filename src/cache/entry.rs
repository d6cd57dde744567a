//! Cache entries: request identity plus a serialisable response snapshot.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::network::{Request, Response, ResponseType};

/// Cache key for `request`, or `None` when the request can never be stored
/// or matched (anything other than `GET`).
///
/// The key is the URL with any fragment removed.
pub fn cache_key(request: &Request) -> Option<String> {
    if request.method != Method::GET {
        return None;
    }
    let url = request.url.split('#').next().unwrap_or_default();
    Some(url.to_string())
}

/// A stored request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// Request values of the headers named by the response's `Vary` header.
    #[serde(default)]
    pub vary: BTreeMap<String, Option<String>>,
    pub response: StoredResponse,
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Snapshot `response` as the entry for `request`.
    ///
    /// Fails for non-`GET` requests, `206 Partial Content` responses and
    /// responses carrying `Vary: *`.
    pub fn new(request: &Request, response: &Response) -> Result<Self> {
        let key = cache_key(request)
            .with_context(|| format!("cannot cache a {} request", request.method))?;
        anyhow::ensure!(
            response.status != StatusCode::PARTIAL_CONTENT,
            "cannot cache a partial response for {key}"
        );

        let mut vary = BTreeMap::new();
        for name in vary_header_names(&response.headers) {
            anyhow::ensure!(name != "*", "cannot cache {key}: response varies on *");
            let value = request
                .headers
                .get(name.as_str())
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
            vary.insert(name, value);
        }

        Ok(Self {
            key,
            vary,
            response: StoredResponse::from_response(response),
            stored_at: Utc::now(),
        })
    }

    /// Whether this entry answers `request`.
    pub fn matches(&self, request: &Request) -> bool {
        if cache_key(request).as_deref() != Some(self.key.as_str()) {
            return false;
        }
        self.vary.iter().all(|(name, stored)| {
            let current = request
                .headers
                .get(name.as_str())
                .map(|v| String::from_utf8_lossy(v.as_bytes()));
            current.as_deref() == stored.as_deref()
        })
    }

    pub fn to_response(&self) -> Result<Response> {
        self.response.to_response()
    }
}

/// Lower-cased header names listed in the `Vary` header(s).
fn vary_header_names(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Stored response
// ---------------------------------------------------------------------------

/// Headers that belong to one client and are never replayed from the cache.
fn is_private_header(name: &HeaderName) -> bool {
    matches!(name.as_str(), "set-cookie" | "set-cookie2")
}

/// Serialisable snapshot of a [`Response`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status: u16,
    pub headers: Vec<StoredHeader>,
    #[serde(with = "base64_bytes")]
    pub body: Bytes,
    pub response_type: ResponseType,
    pub url: String,
}

impl StoredResponse {
    pub fn from_response(response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter(|(name, _)| !is_private_header(name))
            .map(|(name, value)| StoredHeader {
                name: name.as_str().to_string(),
                value: Bytes::copy_from_slice(value.as_bytes()),
            })
            .collect();
        Self {
            status: response.status.as_u16(),
            headers,
            body: response.body.clone(),
            response_type: response.response_type,
            url: response.url.clone(),
        }
    }

    pub fn to_response(&self) -> Result<Response> {
        let status = StatusCode::from_u16(self.status)
            .with_context(|| format!("invalid stored status {}", self.status))?;
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for header in &self.headers {
            let name = HeaderName::from_bytes(header.name.as_bytes())
                .with_context(|| format!("invalid stored header name {:?}", header.name))?;
            let value = HeaderValue::from_bytes(&header.value)
                .with_context(|| format!("invalid stored header value for {name}"))?;
            headers.append(name, value);
        }
        Ok(Response {
            status,
            headers,
            body: self.body.clone(),
            response_type: self.response_type,
            url: self.url.clone(),
        })
    }
}

/// One header line.  Values are raw bytes, since `obs-text` is not UTF-8.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredHeader {
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub value: Bytes,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// Encode an entry for the string-valued backends.
pub fn encode(entry: &CacheEntry) -> Result<String> {
    serde_json::to_string(entry).context("failed to serialise cache entry")
}

/// Decode an entry written by [`encode`].
pub fn decode(raw: &str) -> Result<CacheEntry> {
    serde_json::from_str(raw).context("failed to deserialise cache entry")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_response(body: &'static str) -> Response {
        Response::new(StatusCode::OK).with_body(body)
    }

    #[test]
    fn key_ignores_fragment_and_rejects_non_get() {
        assert_eq!(cache_key(&Request::get("/a.css?v=1#x")).as_deref(), Some("/a.css?v=1"));
        assert_eq!(cache_key(&Request::new(Method::POST, "/a.css")), None);
        assert_eq!(cache_key(&Request::new(Method::HEAD, "/a.css")), None);
    }

    #[test]
    fn new_rejects_post_partial_and_vary_star() {
        let post = Request::new(Method::POST, "/translate");
        assert!(CacheEntry::new(&post, &ok_response("x")).is_err());

        let partial = Response::new(StatusCode::PARTIAL_CONTENT);
        assert!(CacheEntry::new(&Request::get("/v.mp4"), &partial).is_err());

        let mut star = ok_response("x");
        star.headers.insert(header::VARY, HeaderValue::from_static("*"));
        assert!(CacheEntry::new(&Request::get("/a"), &star).is_err());
    }

    #[test]
    fn vary_restricts_matches() {
        let mut request = Request::get("/static/css/styles.css");
        request
            .headers
            .insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        let mut response = ok_response("body");
        response
            .headers
            .insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));

        let entry = CacheEntry::new(&request, &response).unwrap();
        assert!(entry.matches(&request));

        let mut other = Request::get("/static/css/styles.css");
        other
            .headers
            .insert(header::ACCEPT_ENCODING, HeaderValue::from_static("br"));
        assert!(!entry.matches(&other));
        assert!(!entry.matches(&Request::get("/static/css/styles.css")));
    }

    #[test]
    fn encoded_entry_restores_response() {
        let mut response = ok_response("\u{0}binary\u{ff}");
        response
            .headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
        response.url = "http://127.0.0.1:5000/static/images/icon-192x192.png".into();
        let request = Request::get("/static/images/icon-192x192.png");

        let entry = CacheEntry::new(&request, &response).unwrap();
        let restored = decode(&encode(&entry).unwrap()).unwrap();
        assert_eq!(restored.key, "/static/images/icon-192x192.png");
        assert_eq!(restored.to_response().unwrap(), response);
    }

    #[test]
    fn snapshot_drops_cookies() {
        let mut response = ok_response("js");
        response
            .headers
            .insert(header::SET_COOKIE, HeaderValue::from_static("session=abc"));
        response
            .headers
            .insert("set-cookie2", HeaderValue::from_static("legacy=1"));
        response
            .headers
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=60"));

        let entry = CacheEntry::new(&Request::get("/static/js/main.js"), &response).unwrap();
        let restored = decode(&encode(&entry).unwrap()).unwrap().to_response().unwrap();
        assert!(restored.headers.get(header::SET_COOKIE).is_none());
        assert!(restored.headers.get("set-cookie2").is_none());
        assert_eq!(restored.headers[header::CACHE_CONTROL], "max-age=60");
    }

    #[test]
    fn non_utf8_header_values_are_kept_byte_for_byte() {
        let raw: &[u8] = b"attachment; filename=caf\xe9.txt";
        let mut response = ok_response("x");
        response.headers.insert(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_bytes(raw).unwrap(),
        );

        let entry = CacheEntry::new(&Request::get("/download"), &response).unwrap();
        let restored = decode(&encode(&entry).unwrap()).unwrap().to_response().unwrap();
        assert_eq!(restored.headers[header::CONTENT_DISPOSITION].as_bytes(), raw);
    }
}
