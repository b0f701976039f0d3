//! Request classification.
//!
//! Maps every intercepted request onto a caching strategy and the partition
//! it reads and writes. Rules are evaluated in order and the first match wins:
//!
//! 1. non-GET or non-network scheme: bypass
//! 2. same-origin API prefix: network first, cache fallback (api partition)
//! 3. same-origin script/style/font: cache first, background refresh
//! 4. same-origin image: cache first, placeholder fallback
//! 5. any other same-origin request: network first, offline document
//! 6. allow-listed CDN host: cache first, background refresh
//! 7. anything else: network only

use http::Method;
use serde::Serialize;
use tracing::trace;
use url::{Origin, Url};

use crate::config::{CacheConfig, ConfigError, PartitionRole};
use crate::request::RequestDescriptor;

/// Caching policy for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    NetworkFirstWithCacheFallback,
    CacheFirstBackgroundRefresh,
    CacheFirstWithPlaceholderFallback,
    NetworkFirstWithOfflineFallback,
    NetworkOnly,
}

impl Strategy {
    /// Whether the strategy touches a partition.
    pub fn uses_cache(&self) -> bool {
        !matches!(self, Strategy::NetworkOnly)
    }
}

/// Why a request is not intercepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    /// Only GET requests are intercepted.
    Method,
    /// Extension, devtools, data and other non-network schemes.
    Scheme,
    /// The request could not be parsed.
    Malformed,
    /// No version of the worker is active.
    NotActive,
}

/// Strategy and partition for an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub strategy: Strategy,
    /// `None` for [`Strategy::NetworkOnly`].
    pub partition: Option<String>,
}

impl Route {
    fn cached(strategy: Strategy, partition: &str) -> Self {
        Self {
            strategy,
            partition: Some(partition.to_string()),
        }
    }

    fn network_only() -> Self {
        Self {
            strategy: Strategy::NetworkOnly,
            partition: None,
        }
    }
}

/// Result of classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Bypass(BypassReason),
    Intercept(Route),
}

/// Rule tables derived from a [`CacheConfig`].
#[derive(Debug, Clone)]
pub struct Classifier {
    origin: Origin,
    api_prefixes: Vec<String>,
    static_extensions: Vec<String>,
    image_extensions: Vec<String>,
    cdn_hosts: Vec<String>,
    bypass_schemes: Vec<String>,
    static_partition: String,
    api_partition: String,
}

impl Classifier {
    /// Build from configuration. Fails if a role has no partition.
    pub fn new(config: &CacheConfig) -> Result<Self, ConfigError> {
        let partition = |role| {
            config
                .partition(role)
                .map(|p| p.name.clone())
                .ok_or_else(|| ConfigError::Invalid(format!("no {role:?} partition configured")))
        };
        let lower = |list: &[String]| list.iter().map(|s| s.to_ascii_lowercase()).collect();

        Ok(Self {
            origin: config.app_origin.origin(),
            api_prefixes: config.routes.api_prefixes.clone(),
            static_extensions: lower(&config.routes.static_extensions),
            image_extensions: lower(&config.routes.image_extensions),
            cdn_hosts: lower(&config.routes.cdn_hosts),
            bypass_schemes: lower(&config.routes.bypass_schemes),
            static_partition: partition(PartitionRole::Static)?,
            api_partition: partition(PartitionRole::Api)?,
        })
    }

    /// Classify a request.
    pub fn classify(&self, request: &RequestDescriptor) -> Classification {
        let classification = self.evaluate(request);
        trace!(url = %request.url, classification = ?classification, "Classified request");
        classification
    }

    fn evaluate(&self, request: &RequestDescriptor) -> Classification {
        let url = &request.url;

        if request.method != Method::GET {
            return Classification::Bypass(BypassReason::Method);
        }
        let scheme = url.scheme();
        if self.bypass_schemes.iter().any(|s| s == scheme) || !matches!(scheme, "http" | "https")
        {
            return Classification::Bypass(BypassReason::Scheme);
        }

        if url.origin() == self.origin {
            let path = url.path();
            if self.api_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
                return self.route(Strategy::NetworkFirstWithCacheFallback, &self.api_partition);
            }
            return match extension(url) {
                Some(ext) if self.static_extensions.contains(&ext) => {
                    self.route(Strategy::CacheFirstBackgroundRefresh, &self.static_partition)
                }
                Some(ext) if self.image_extensions.contains(&ext) => {
                    self.route(Strategy::CacheFirstWithPlaceholderFallback, &self.static_partition)
                }
                _ => self.route(Strategy::NetworkFirstWithOfflineFallback, &self.static_partition),
            };
        }

        match url.host_str() {
            Some(host) if self.is_cdn_host(host) => {
                self.route(Strategy::CacheFirstBackgroundRefresh, &self.static_partition)
            }
            _ => Classification::Intercept(Route::network_only()),
        }
    }

    fn route(&self, strategy: Strategy, partition: &str) -> Classification {
        Classification::Intercept(Route::cached(strategy, partition))
    }

    fn is_cdn_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.cdn_hosts.iter().any(|cdn| {
            host == *cdn
                || host
                    .strip_suffix(cdn.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

/// Lowercased extension of the last path segment.
fn extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
