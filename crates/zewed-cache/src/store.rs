//! The partition storage capability.

use async_trait::async_trait;

use crate::{CacheKey, StorageResult, StoredResponse};

/// Named cache partitions (the worker's `caches` global).
///
/// Every operation is asynchronous and fallible. Reads against a partition
/// that does not exist yield `Ok(None)` / empty results; writes create the
/// partition on demand.
#[async_trait]
pub trait PartitionStore: Send + Sync {
    /// Open a partition, creating it if absent. Idempotent.
    async fn open(&self, name: &str) -> StorageResult<()>;

    /// Whether a partition exists.
    async fn has(&self, name: &str) -> StorageResult<bool>;

    /// Names of every existing partition.
    async fn partition_names(&self) -> StorageResult<Vec<String>>;

    /// Read a record.
    async fn get(&self, partition: &str, key: &CacheKey) -> StorageResult<Option<StoredResponse>>;

    /// Write a record, silently replacing any previous one for `key`.
    async fn put(
        &self,
        partition: &str,
        key: &CacheKey,
        record: StoredResponse,
    ) -> StorageResult<()>;

    /// Remove a record. Returns whether one was present.
    async fn delete(&self, partition: &str, key: &CacheKey) -> StorageResult<bool>;

    /// Keys held by a partition, in no particular order.
    async fn list_keys(&self, partition: &str) -> StorageResult<Vec<CacheKey>>;

    /// Destroy a partition and everything in it. Returns whether it existed.
    async fn delete_partition(&self, name: &str) -> StorageResult<bool>;
}
