//! The five caching strategies.
//!
//! Every path through [`StrategyEngine::execute`] ends in a [`Response`].
//! Storage failures are logged and treated as misses; transport failures fall
//! through to cached copies, fallbacks, or a synthetic `503`.

use std::sync::Arc;

use hashbrown::HashMap;
use tracing::{debug, trace, warn};
use zewed_cache::{CacheKey, PartitionStore, StoredResponse, CACHE_FLAG_HEADER};
use zewed_common::Clock;

use crate::classify::{Route, Strategy};
use crate::config::{CacheConfig, ConfigError};
use crate::error::FailureReason;
use crate::network::{Network, NetworkRequest};
use crate::request::{RequestDescriptor, Response, ResponseSource};
use crate::tasks::BackgroundTasks;

/// Executes strategies against the injected store and network.
#[derive(Clone)]
pub struct StrategyEngine {
    store: Arc<dyn PartitionStore>,
    network: Arc<dyn Network>,
    clock: Arc<dyn Clock>,
    tasks: BackgroundTasks,
    offline_key: CacheKey,
    placeholder_key: CacheKey,
    max_ages: HashMap<String, i64>,
}

impl StrategyEngine {
    /// Create an engine for `config`.
    pub fn new(
        config: &CacheConfig,
        store: Arc<dyn PartitionStore>,
        network: Arc<dyn Network>,
        clock: Arc<dyn Clock>,
        tasks: BackgroundTasks,
    ) -> Result<Self, ConfigError> {
        let offline_key = CacheKey::get(&config.resolve(&config.fallbacks.offline_document)?);
        let placeholder_key = CacheKey::get(&config.resolve(&config.fallbacks.placeholder_image)?);
        let max_ages = config
            .partitions
            .iter()
            .filter_map(|p| p.max_age_millis().map(|age| (p.name.clone(), age)))
            .collect();

        Ok(Self {
            store,
            network,
            clock,
            tasks,
            offline_key,
            placeholder_key,
            max_ages,
        })
    }

    /// Run the strategy named by `route`.
    pub async fn execute(&self, request: &RequestDescriptor, route: &Route) -> Response {
        debug!(url = %request.url, strategy = ?route.strategy, "Executing strategy");

        let Some(partition) = route.partition.as_deref() else {
            return self.network_only(request).await;
        };
        match route.strategy {
            Strategy::NetworkFirstWithCacheFallback => {
                self.network_first_with_cache_fallback(request, partition).await
            }
            Strategy::CacheFirstBackgroundRefresh => {
                self.cache_first_background_refresh(request, partition).await
            }
            Strategy::CacheFirstWithPlaceholderFallback => {
                self.cache_first_with_placeholder_fallback(request, partition)
                    .await
            }
            Strategy::NetworkFirstWithOfflineFallback => {
                self.network_first_with_offline_fallback(request, partition)
                    .await
            }
            Strategy::NetworkOnly => self.network_only(request).await,
        }
    }

    /// Live response first; the cached copy only when the network is down.
    pub async fn network_first_with_cache_fallback(
        &self,
        request: &RequestDescriptor,
        partition: &str,
    ) -> Response {
        let key = request.cache_key();
        match self.network.fetch(NetworkRequest::from_descriptor(request)).await {
            Ok(response) => {
                self.store_in_background(partition, &key, &response);
                response.with_header(CACHE_FLAG_HEADER, "false")
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, trying cache");
                match self.read(partition, &key).await {
                    Some(record) => Response::from_stored(record, ResponseSource::Cache),
                    None => Response::offline_json(&request.url, FailureReason::NetworkUnavailable),
                }
            }
        }
    }

    /// Cached copy immediately, refreshed behind the response.
    pub async fn cache_first_background_refresh(
        &self,
        request: &RequestDescriptor,
        partition: &str,
    ) -> Response {
        let key = request.cache_key();
        if let Some(record) = self.read(partition, &key).await {
            self.refresh_in_background(request, partition, key);
            return Response::from_stored(record, ResponseSource::Cache);
        }

        match self.network.fetch(NetworkRequest::from_descriptor(request)).await {
            Ok(response) => {
                self.store_in_background(partition, &key, &response);
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed on cache miss");
                Response::offline_json(&request.url, FailureReason::NetworkUnavailable)
            }
        }
    }

    /// Cached copy, else network, else the placeholder record.
    pub async fn cache_first_with_placeholder_fallback(
        &self,
        request: &RequestDescriptor,
        partition: &str,
    ) -> Response {
        let key = request.cache_key();
        if let Some(record) = self.read(partition, &key).await {
            return Response::from_stored(record, ResponseSource::Cache);
        }

        match self.network.fetch(NetworkRequest::from_descriptor(request)).await {
            Ok(response) => {
                if response.is_cacheable() {
                    self.write(partition, &key, self.stamped(partition, &response))
                        .await;
                } else {
                    trace!(url = %request.url, status = response.status, "Not caching");
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, serving placeholder");
                match self.read(partition, &self.placeholder_key).await {
                    Some(record) => Response::from_stored(record, ResponseSource::Fallback),
                    None => Response::offline_json(&request.url, FailureReason::NetworkUnavailable),
                }
            }
        }
    }

    /// Live document, else cached copy, else the offline document.
    pub async fn network_first_with_offline_fallback(
        &self,
        request: &RequestDescriptor,
        partition: &str,
    ) -> Response {
        let key = request.cache_key();
        match self.network.fetch(NetworkRequest::from_descriptor(request)).await {
            Ok(response) => {
                self.store_in_background(partition, &key, &response);
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, trying cached document");
                if let Some(record) = self.read(partition, &key).await {
                    return Response::from_stored(record, ResponseSource::Cache);
                }
                match self.read(partition, &self.offline_key).await {
                    Some(record) => Response::from_stored(record, ResponseSource::Fallback),
                    None => Response::offline_page(),
                }
            }
        }
    }

    /// Straight to the network. Never touches a partition.
    pub async fn network_only(&self, request: &RequestDescriptor) -> Response {
        match self.network.fetch(NetworkRequest::from_descriptor(request)).await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network-only request failed");
                Response::offline_json(&request.url, FailureReason::NetworkUnavailable)
            }
        }
    }

    fn stamped(&self, partition: &str, response: &Response) -> StoredResponse {
        response
            .to_stored()
            .stamp(self.clock.now_millis(), self.max_ages.get(partition).copied())
    }

    async fn read(&self, partition: &str, key: &CacheKey) -> Option<StoredResponse> {
        match self.store.get(partition, key).await {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    partition,
                    key = %key,
                    category = e.category(),
                    error = %e,
                    "Cache read failed, treating as miss"
                );
                None
            }
        }
    }

    async fn write(&self, partition: &str, key: &CacheKey, record: StoredResponse) {
        if let Err(e) = self.store.put(partition, key, record).await {
            warn!(
                partition,
                key = %key,
                category = e.category(),
                error = %e,
                "Cache write failed"
            );
        }
    }

    fn store_in_background(&self, partition: &str, key: &CacheKey, response: &Response) {
        if !response.is_cacheable() {
            trace!(key = %key, status = response.status, "Not caching");
            return;
        }
        let record = self.stamped(partition, response);
        let engine = self.clone();
        let partition = partition.to_string();
        let key = key.clone();
        self.tasks.extend("cache-write", async move {
            engine.write(&partition, &key, record).await;
        });
    }

    fn refresh_in_background(&self, request: &RequestDescriptor, partition: &str, key: CacheKey) {
        let engine = self.clone();
        let outgoing = NetworkRequest::from_descriptor(request);
        let partition = partition.to_string();
        self.tasks.extend("background-refresh", async move {
            match engine.network.fetch(outgoing).await {
                Ok(response) if response.is_cacheable() => {
                    let record = engine.stamped(&partition, &response);
                    engine.write(&partition, &key, record).await;
                    trace!(key = %key, "Background refresh stored");
                }
                Ok(response) => {
                    trace!(key = %key, status = response.status, "Background refresh not cached");
                }
                Err(e) => {
                    debug!(key = %key, error = %e, "Background refresh failed");
                }
            }
        });
    }
}
