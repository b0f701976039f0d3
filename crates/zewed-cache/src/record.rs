//! Cache keys and stored response records.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Header carrying the cache-write time (epoch millis).
pub const CACHED_AT_HEADER: &str = "sw-cached-at";

/// Header carrying the lazy expiry deadline (epoch millis).
pub const EXPIRES_HEADER: &str = "sw-cache-expires";

/// Header set on responses to say whether they came from a partition.
pub const CACHE_FLAG_HEADER: &str = "sw-cached";

// ==================== Cache Key ====================

/// Normalized request identity: `"<METHOD> <absolute URL>"`, fragment removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key from a method and URL.
    pub fn new(method: &str, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self(format!("{} {}", method.to_ascii_uppercase(), url))
    }

    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new("GET", url)
    }

    /// The method part of the key.
    pub fn method(&self) -> &str {
        self.0.split_once(' ').map(|(m, _)| m).unwrap_or("")
    }

    /// The URL part of the key.
    pub fn url(&self) -> &str {
        self.0.split_once(' ').map(|(_, u)| u).unwrap_or(&self.0)
    }

    /// The full key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ==================== Stored Response ====================

/// A response held in a partition.
///
/// Records are replaced wholesale; there is no partial update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
    /// Response status.
    pub status: u16,

    /// Status text.
    pub status_text: String,

    /// Response headers (lowercase names).
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Lazy expiry deadline (epoch millis), mirrored in [`EXPIRES_HEADER`].
    pub expires_at: Option<i64>,

    /// Set on records handed back by a store read.
    #[serde(default)]
    pub served_from_cache: bool,
}

impl StoredResponse {
    /// Create a record from parts.
    pub fn new(status: u16, status_text: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            headers: HashMap::new(),
            body: body.into(),
            expires_at: None,
            served_from_cache: false,
        }
    }

    /// Builder-style header insertion.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Look up a header case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    /// Stamp the cache-write time and, if `max_age_millis` is set, the expiry.
    pub fn stamp(mut self, now_millis: i64, max_age_millis: Option<i64>) -> Self {
        self.headers
            .insert(CACHED_AT_HEADER.to_string(), now_millis.to_string());
        match max_age_millis {
            Some(max_age) => {
                let deadline = now_millis.saturating_add(max_age);
                self.headers
                    .insert(EXPIRES_HEADER.to_string(), deadline.to_string());
                self.expires_at = Some(deadline);
            }
            None => {
                self.headers.remove(EXPIRES_HEADER);
                self.expires_at = None;
            }
        }
        self
    }

    /// Cache-write time, if stamped.
    pub fn cached_at(&self) -> Option<i64> {
        self.header(CACHED_AT_HEADER).and_then(|v| v.parse().ok())
    }

    /// Expiry deadline from the field, falling back to the header.
    pub fn expiry(&self) -> Option<i64> {
        self.expires_at
            .or_else(|| self.header(EXPIRES_HEADER).and_then(|v| v.parse().ok()))
    }

    /// Whether the expiry deadline has passed. Unstamped records never expire.
    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.expiry().map(|deadline| deadline < now_millis).unwrap_or(false)
    }

    /// Approximate storage footprint in bytes.
    pub fn size_bytes(&self) -> usize {
        let headers: usize = self.headers.iter().map(|(k, v)| k.len() + v.len()).sum();
        self.body.len() + self.status_text.len() + headers
    }
}
