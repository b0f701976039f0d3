//! Intercepted requests and the responses the worker hands back.

use bytes::Bytes;
use hashbrown::HashMap;
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use zewed_cache::{CacheKey, StoredResponse, CACHE_FLAG_HEADER};

use crate::error::FailureReason;

/// A request as the host hands it over, before any parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub accept: Option<String>,
}

impl IncomingRequest {
    /// A GET with no Accept header.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            accept: None,
        }
    }

    /// Set the Accept header.
    pub fn accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    /// Override the method.
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }
}

/// Why a request could not be turned into a descriptor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestParseError {
    #[error("invalid method {0:?}")]
    Method(String),

    #[error("invalid URL: {0}")]
    Url(String),
}

/// Parsed view of an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: Url,
    pub accept: Option<String>,
}

impl RequestDescriptor {
    /// Create a descriptor.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            accept: None,
        }
    }

    /// Create a GET descriptor.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Set the Accept header.
    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    /// Parse an incoming request.
    pub fn parse(incoming: &IncomingRequest) -> Result<Self, RequestParseError> {
        let method = Method::from_bytes(incoming.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| RequestParseError::Method(incoming.method.clone()))?;
        let url =
            Url::parse(&incoming.url).map_err(|e| RequestParseError::Url(e.to_string()))?;
        Ok(Self {
            method,
            url,
            accept: incoming.accept.clone(),
        })
    }

    /// Cache key for this request.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.method.as_str(), &self.url)
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Network,
    Cache,
    Fallback,
    Synthetic,
}

/// A response returned to the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    /// Lowercased header names.
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub source: ResponseSource,
    /// The body came from a redirect target rather than the requested URL.
    pub redirected: bool,
}

impl Response {
    /// A network response with the canonical status text.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            status_text: canonical_reason(status),
            headers: HashMap::new(),
            body: body.into(),
            source: ResponseSource::Network,
            redirected: false,
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Change the source.
    pub fn with_source(mut self, source: ResponseSource) -> Self {
        self.source = source;
        self
    }

    /// Header lookup, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Only exact 200 responses for the requested URL are persisted.
    pub fn is_cacheable(&self) -> bool {
        self.status == 200 && !self.redirected
    }

    /// Body as UTF-8 text, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Rebuild a response from a stored record.
    pub fn from_stored(record: StoredResponse, source: ResponseSource) -> Self {
        let cached = record.served_from_cache;
        let mut response = Self {
            status: record.status,
            status_text: record.status_text,
            headers: record.headers,
            body: Bytes::from(record.body),
            source,
            redirected: false,
        };
        if cached {
            response = response.with_header(CACHE_FLAG_HEADER, "true");
        }
        response
    }

    /// Convert into a record for storage. The cache flag header is not stored.
    pub fn to_stored(&self) -> StoredResponse {
        let mut record = StoredResponse::new(self.status, &self.status_text, self.body.to_vec());
        for (name, value) in &self.headers {
            if name != CACHE_FLAG_HEADER {
                record = record.with_header(name, value);
            }
        }
        record
    }

    /// Synthetic JSON `503` for requests that found neither network nor cache.
    pub fn offline_json(url: &Url, reason: FailureReason) -> Self {
        let body = serde_json::json!({
            "error": "offline",
            "reason": reason.as_str(),
            "cached": false,
            "url": url.as_str(),
        });
        Self::new(503, body.to_string())
            .with_header("content-type", "application/json")
            .with_source(ResponseSource::Synthetic)
    }

    /// Synthetic `503` document for navigations with no offline page stored.
    pub fn offline_page() -> Self {
        Self::new(503, OFFLINE_PAGE)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_source(ResponseSource::Synthetic)
    }
}

const OFFLINE_PAGE: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
<title>Offline - ZewedJobs</title></head><body><h1>You are offline</h1>\
<p>Check your connection and try again.</p></body></html>";

fn canonical_reason(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
        .to_string()
}
