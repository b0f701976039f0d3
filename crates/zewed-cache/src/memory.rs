//! In-memory partition store.

use async_trait::async_trait;
use hashbrown::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::{CacheKey, PartitionStore, StorageError, StorageResult, StoredResponse};

/// One named partition.
#[derive(Debug, Default)]
struct Partition {
    entries: HashMap<CacheKey, StoredResponse>,
    bytes: usize,
}

impl Partition {
    fn insert(&mut self, key: CacheKey, record: StoredResponse) {
        let size = record.size_bytes();
        if let Some(old) = self.entries.insert(key, record) {
            self.bytes -= old.size_bytes();
        }
        self.bytes += size;
    }

    fn remove(&mut self, key: &CacheKey) -> bool {
        match self.entries.remove(key) {
            Some(old) => {
                self.bytes -= old.size_bytes();
                true
            }
            None => false,
        }
    }
}

/// Partition store held in process memory.
///
/// An optional quota caps the total bytes across all partitions; a write
/// that would exceed it fails with [`StorageError::QuotaExceeded`].
#[derive(Debug, Clone, Default)]
pub struct MemoryPartitionStore {
    partitions: Arc<RwLock<HashMap<String, Partition>>>,
    quota_bytes: Option<usize>,
}

impl MemoryPartitionStore {
    /// Create an unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store capped at `quota_bytes` in total.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            partitions: Arc::new(RwLock::new(HashMap::new())),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Total bytes held across partitions.
    pub async fn usage_bytes(&self) -> usize {
        self.partitions.read().await.values().map(|p| p.bytes).sum()
    }
}

#[async_trait]
impl PartitionStore for MemoryPartitionStore {
    async fn open(&self, name: &str) -> StorageResult<()> {
        let mut partitions = self.partitions.write().await;
        if !partitions.contains_key(name) {
            debug!(partition = %name, "Creating partition");
            partitions.insert(name.to_string(), Partition::default());
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> StorageResult<bool> {
        Ok(self.partitions.read().await.contains_key(name))
    }

    async fn partition_names(&self) -> StorageResult<Vec<String>> {
        Ok(self.partitions.read().await.keys().cloned().collect())
    }

    async fn get(&self, partition: &str, key: &CacheKey) -> StorageResult<Option<StoredResponse>> {
        let partitions = self.partitions.read().await;
        let hit = partitions
            .get(partition)
            .and_then(|p| p.entries.get(key))
            .map(|record| {
                let mut record = record.clone();
                record.served_from_cache = true;
                record
            });
        trace!(partition = %partition, key = %key, hit = hit.is_some(), "Partition read");
        Ok(hit)
    }

    async fn put(
        &self,
        partition: &str,
        key: &CacheKey,
        record: StoredResponse,
    ) -> StorageResult<()> {
        let mut partitions = self.partitions.write().await;

        if let Some(quota) = self.quota_bytes {
            let used: usize = partitions.values().map(|p| p.bytes).sum();
            let replaced = partitions
                .get(partition)
                .and_then(|p| p.entries.get(key))
                .map(|r| r.size_bytes())
                .unwrap_or(0);
            let available = quota.saturating_sub(used - replaced);
            let needed = record.size_bytes();
            if needed > available {
                warn!(
                    partition = %partition,
                    key = %key,
                    needed,
                    available,
                    "Partition write over quota"
                );
                return Err(StorageError::QuotaExceeded {
                    partition: partition.to_string(),
                    needed,
                    available,
                });
            }
        }

        let mut record = record;
        record.served_from_cache = false;
        partitions
            .entry(partition.to_string())
            .or_default()
            .insert(key.clone(), record);
        trace!(partition = %partition, key = %key, "Partition write");
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &CacheKey) -> StorageResult<bool> {
        let mut partitions = self.partitions.write().await;
        Ok(partitions
            .get_mut(partition)
            .map(|p| p.remove(key))
            .unwrap_or(false))
    }

    async fn list_keys(&self, partition: &str) -> StorageResult<Vec<CacheKey>> {
        let partitions = self.partitions.read().await;
        Ok(partitions
            .get(partition)
            .map(|p| p.entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_partition(&self, name: &str) -> StorageResult<bool> {
        let removed = self.partitions.write().await.remove(name).is_some();
        if removed {
            debug!(partition = %name, "Deleted partition");
        }
        Ok(removed)
    }
}
