//! # Zewed Cache
//!
//! Cache partition storage for the ZewedJobs offline worker.
//!
//! ## Features
//!
//! - **Partitions**: named, independent request/response stores created lazily
//! - **Records**: immutable stored responses with cache-write and expiry stamps
//! - **Capability trait**: [`PartitionStore`], so the engine can run against fakes
//! - **In-memory backend**: [`MemoryPartitionStore`] with an optional byte quota
//!
//! ## Architecture
//!
//! ```text
//! PartitionStore (caches)
//!     └── partition name ("static-v2.0.0", "api-v2.0.0", ...)
//!             └── CacheKey ("GET https://host/path?q") → StoredResponse
//! ```

use thiserror::Error;

pub mod memory;
pub mod record;
pub mod store;

pub use memory::MemoryPartitionStore;
pub use record::{CacheKey, StoredResponse, CACHED_AT_HEADER, CACHE_FLAG_HEADER, EXPIRES_HEADER};
pub use store::PartitionStore;

/// Errors raised by partition storage.
///
/// Callers on the request path treat every variant as a miss.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Quota exceeded in partition {partition}: need {needed} bytes, {available} available")]
    QuotaExceeded {
        partition: String,
        needed: usize,
        available: usize,
    },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Machine-readable category.
    pub fn category(&self) -> &'static str {
        match self {
            StorageError::QuotaExceeded { .. } => "quota_exceeded",
            StorageError::Unavailable(_) => "unavailable",
        }
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
