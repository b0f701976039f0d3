//! Worker configuration
//!
//! A [`CacheConfig`] is built once at process start and shared as
//! `Arc<CacheConfig>`. Nothing mutates it afterwards.

use std::path::Path;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use zewed_sync::SyncIntent;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Role a partition plays for the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionRole {
    /// Shell assets, fonts, images and documents.
    Static,
    /// API responses.
    Api,
}

/// One named cache partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Partition name, usually suffixed with the version.
    pub name: String,

    /// Classifier role.
    pub role: PartitionRole,

    /// URLs fetched and stored at install time.
    #[serde(default)]
    pub precache: Vec<String>,

    /// A precache failure here fails the whole install.
    #[serde(default)]
    pub critical: bool,

    /// Entries older than this are eligible for the expiry pass.
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

impl PartitionConfig {
    /// Max age in milliseconds, if the partition has one.
    pub fn max_age_millis(&self) -> Option<i64> {
        self.max_age_secs
            .map(|secs| i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX))
    }
}

/// Request classification tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Same-origin path prefixes served by the API strategy.
    pub api_prefixes: Vec<String>,

    /// Extensions of static shell assets (stylesheets, scripts, fonts).
    pub static_extensions: Vec<String>,

    /// Extensions of images.
    pub image_extensions: Vec<String>,

    /// Hosts serving fonts and stylesheets. Subdomains match too.
    pub cdn_hosts: Vec<String>,

    /// URL schemes that are never intercepted.
    pub bypass_schemes: Vec<String>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            api_prefixes: vec!["/api/".to_string()],
            static_extensions: ["css", "js", "mjs", "woff", "woff2", "ttf", "otf", "eot"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            image_extensions: ["png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "avif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            cdn_hosts: vec![
                "fonts.googleapis.com".to_string(),
                "fonts.gstatic.com".to_string(),
                "cdnjs.cloudflare.com".to_string(),
            ],
            bypass_schemes: [
                "chrome-extension",
                "moz-extension",
                "devtools",
                "data",
                "blob",
                "ws",
                "wss",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Fallback documents, relative to the app origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Served for failed document navigations.
    pub offline_document: String,

    /// Served for failed image loads.
    pub placeholder_image: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            offline_document: "/offline.html".to_string(),
            placeholder_image: "/assets/images/placeholder.png".to_string(),
        }
    }
}

/// Replay endpoints per intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncEndpoints {
    pub application_submit: String,
    pub favorite_toggle: String,
}

impl Default for SyncEndpoints {
    fn default() -> Self {
        Self {
            application_submit: "/api/applications".to_string(),
            favorite_toggle: "/api/favorites".to_string(),
        }
    }
}

/// Background sync settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub endpoints: SyncEndpoints,

    /// Job listing feed refreshed by the periodic trigger.
    pub jobs_feed: String,

    /// Submitted records older than this are purged.
    pub retention_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoints: SyncEndpoints::default(),
            jobs_feed: "/api/jobs".to_string(),
            retention_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// Notification defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub default_title: String,
    pub default_body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_title: "ZewedJobs".to_string(),
            default_body: "New job alert!".to_string(),
            icon: "/assets/images/logo-192.png".to_string(),
            badge: "/assets/images/badge.png".to_string(),
            vibrate: vec![200, 100, 200],
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Version identifier, broadcast on activation.
    pub version: String,

    /// Origin the application is served from.
    pub app_origin: Url,

    /// Path prefix of application pages.
    #[serde(default = "default_app_root")]
    pub app_root: String,

    /// Cache partitions owned by this version.
    pub partitions: Vec<PartitionConfig>,

    #[serde(default)]
    pub routes: RouteConfig,

    #[serde(default)]
    pub fallbacks: FallbackConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,
}

fn default_app_root() -> String {
    "/".to_string()
}

const DEFAULT_VERSION: &str = "v2.0.0";
const DEFAULT_ORIGIN: &str = "https://zewedjobs.com/";

const DEFAULT_PRECACHE: &[&str] = &[
    "/",
    "/index.html",
    "/manifest.json",
    "/offline.html",
    "/assets/css/style.min.css",
    "/assets/js/main.min.js",
    "/assets/images/logo-192.png",
    "/assets/images/logo-512.png",
    "/assets/images/favicon.ico",
    "/assets/images/placeholder.png",
    "https://fonts.googleapis.com/css2?family=Inter:wght@300;400;500;600;700;800&family=Montserrat:wght@700;800;900&display=swap",
    "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/css/all.min.css",
];

impl Default for CacheConfig {
    fn default() -> Self {
        let app_origin = match Url::parse(DEFAULT_ORIGIN) {
            Ok(url) => url,
            Err(_) => unreachable!("default origin is a valid URL"),
        };
        Self {
            version: DEFAULT_VERSION.to_string(),
            app_origin,
            app_root: default_app_root(),
            partitions: vec![
                PartitionConfig {
                    name: format!("static-{DEFAULT_VERSION}"),
                    role: PartitionRole::Static,
                    precache: DEFAULT_PRECACHE.iter().map(|s| s.to_string()).collect(),
                    critical: true,
                    max_age_secs: None,
                },
                PartitionConfig {
                    name: format!("api-{DEFAULT_VERSION}"),
                    role: PartitionRole::Api,
                    precache: Vec::new(),
                    critical: false,
                    max_age_secs: Some(5 * 60),
                },
            ],
            routes: RouteConfig::default(),
            fallbacks: FallbackConfig::default(),
            sync: SyncConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: CacheConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version.trim().is_empty() {
            return Err(ConfigError::Invalid("version must not be empty".into()));
        }
        if !matches!(self.app_origin.scheme(), "http" | "https")
            || self.app_origin.host_str().is_none()
        {
            return Err(ConfigError::Invalid(format!(
                "app_origin must be an absolute http(s) URL, got {}",
                self.app_origin
            )));
        }
        if !self.app_root.starts_with('/') {
            return Err(ConfigError::Invalid("app_root must start with '/'".into()));
        }

        let mut seen = HashSet::new();
        for partition in &self.partitions {
            if partition.name.trim().is_empty() {
                return Err(ConfigError::Invalid("partition name must not be empty".into()));
            }
            if !seen.insert(partition.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate partition name {}",
                    partition.name
                )));
            }
            for entry in &partition.precache {
                self.resolve(entry)?;
            }
        }

        for role in [PartitionRole::Static, PartitionRole::Api] {
            let count = self.partitions.iter().filter(|p| p.role == role).count();
            if count != 1 {
                return Err(ConfigError::Invalid(format!(
                    "expected exactly one {role:?} partition, found {count}"
                )));
            }
        }

        if let Some(prefix) = self.routes.api_prefixes.iter().find(|p| !p.starts_with('/')) {
            return Err(ConfigError::Invalid(format!(
                "api prefix {prefix} must start with '/'"
            )));
        }

        for path in [
            &self.fallbacks.offline_document,
            &self.fallbacks.placeholder_image,
            &self.sync.jobs_feed,
            &self.sync.endpoints.application_submit,
            &self.sync.endpoints.favorite_toggle,
        ] {
            self.resolve(path)?;
        }

        Ok(())
    }

    /// Resolve a possibly relative URL against the app origin.
    pub fn resolve(&self, url: &str) -> Result<Url, ConfigError> {
        self.app_origin
            .join(url)
            .map_err(|e| ConfigError::Invalid(format!("bad URL {url}: {e}")))
    }

    /// Partition playing `role`.
    pub fn partition(&self, role: PartitionRole) -> Option<&PartitionConfig> {
        self.partitions.iter().find(|p| p.role == role)
    }

    /// Partition by name.
    pub fn partition_named(&self, name: &str) -> Option<&PartitionConfig> {
        self.partitions.iter().find(|p| p.name == name)
    }

    /// Whether `name` belongs to this version.
    pub fn owns_partition(&self, name: &str) -> bool {
        self.partition_named(name).is_some()
    }

    /// Replay endpoint for an intent.
    pub fn endpoint_for(&self, intent: SyncIntent) -> Result<Url, ConfigError> {
        match intent {
            SyncIntent::ApplicationSubmit => self.resolve(&self.sync.endpoints.application_submit),
            SyncIntent::FavoriteToggle => self.resolve(&self.sync.endpoints.favorite_toggle),
        }
    }

    /// Application root URL.
    pub fn app_root_url(&self) -> Result<Url, ConfigError> {
        self.resolve(&self.app_root)
    }
}
