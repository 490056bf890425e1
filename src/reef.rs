//! Public typed API for the reef cache
//!
//! This is the surface collaborators program against: a typed facade over
//! the coordinator (values serialize at the boundary and travel as JSON
//! documents internally) plus a fluent builder wiring tiers, strategies and
//! the warming fetcher together. A process-default instance is available
//! through an explicit initialization function — construction always happens
//! in application code, never behind an implicit global.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use once_cell::sync::OnceCell;
use serde::{de::DeserializeOwned, Serialize};

use crate::cache::coherence::engine::InvalidationStrategy;
use crate::cache::coherence::warming::{CacheWarmer, WarmingFetcher, WarmingStrategy};
use crate::cache::coherence::{CoherenceEngine, MutationEvent};
use crate::cache::config::{CacheConfig, WriteOptions};
use crate::cache::coordinator::CacheCoordinator;
use crate::cache::error::CacheError;
use crate::cache::keys::{CacheKey, CacheKeyBuilder, Tag};
use crate::cache::tier::remote::backend::RemoteStore;
use crate::telemetry::MetricsSnapshot;

/// Process-default instance; populated only by [`ReefCache::init_default`]
static DEFAULT_INSTANCE: OnceCell<ReefCache> = OnceCell::new();

/// Typed multi-layer cache handle
///
/// Cloning is cheap — clones share the same coordinator and coherence engine.
#[derive(Clone)]
pub struct ReefCache {
    coordinator: Arc<CacheCoordinator>,
    engine: Arc<CoherenceEngine>,
}

impl std::fmt::Debug for ReefCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReefCache")
            .field("namespace", &self.coordinator.config().namespace)
            .field("strategy", self.engine.strategy())
            .finish()
    }
}

impl ReefCache {
    /// Start building a cache with fluent configuration
    pub fn builder() -> ReefCacheBuilder {
        ReefCacheBuilder::new()
    }

    /// Initialize the process-default instance exactly once
    ///
    /// Call this from application startup, before any `default_instance`
    /// lookup. A second initialization attempt is a configuration error.
    pub fn init_default(builder: ReefCacheBuilder) -> Result<&'static ReefCache, CacheError> {
        let cache = builder.build()?;
        DEFAULT_INSTANCE
            .set(cache)
            .map_err(|_| CacheError::configuration("default cache instance already initialized"))?;
        DEFAULT_INSTANCE
            .get()
            .ok_or_else(|| CacheError::configuration("default cache instance unavailable"))
    }

    /// The process-default instance, if one was initialized
    pub fn default_instance() -> Option<&'static ReefCache> {
        DEFAULT_INSTANCE.get()
    }

    /// Start building a key under this cache's namespace
    pub fn key(&self, base: impl Into<String>) -> CacheKeyBuilder {
        CacheKey::builder(self.coordinator.config().namespace.clone()).segment(base)
    }

    /// Typed lookup across both tiers
    ///
    /// An entry that no longer decodes as `T` (the shape changed between
    /// deploys) reads as a miss rather than an error.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let entry = self.coordinator.get(key).await?;
        match serde_json::from_value((*entry.data).clone()) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!("cached value under {} no longer decodes: {}", key, err);
                None
            }
        }
    }

    /// Typed write to both tiers with default options
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<(), CacheError> {
        self.set_with(key, value, &WriteOptions::default()).await
    }

    /// Typed write to both tiers
    pub async fn set_with<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        options: &WriteOptions,
    ) -> Result<(), CacheError> {
        let value = serde_json::to_value(value)
            .map_err(|e| CacheError::serialization(e.to_string()))?;
        self.coordinator.set(key, value, options).await
    }

    /// Cache-aside read: on total miss the fetch callback produces the value
    /// and both tiers are populated with it
    ///
    /// Concurrent callers missing the same key may each run their fetch; the
    /// last writer wins.
    pub async fn get_or_set<T, F, Fut, E>(
        &self,
        key: &CacheKey,
        fetch: F,
        options: &WriteOptions,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: Into<CacheError>,
    {
        let value = self
            .coordinator
            .get_or_set(
                key,
                || async move {
                    let fetched = fetch().await.map_err(Into::into)?;
                    serde_json::to_value(fetched)
                        .map_err(|e| CacheError::serialization(e.to_string()))
                },
                options,
            )
            .await?;
        serde_json::from_value((*value).clone())
            .map_err(|e| CacheError::deserialization(e.to_string()))
    }

    /// Typed batched lookup preserving input order
    pub async fn mget<T: DeserializeOwned>(&self, keys: &[CacheKey]) -> Vec<Option<T>> {
        self.coordinator
            .mget(keys)
            .await
            .into_iter()
            .map(|slot| {
                slot.and_then(|entry| serde_json::from_value((*entry.data).clone()).ok())
            })
            .collect()
    }

    /// Delete a key from both tiers
    pub async fn delete(&self, key: &CacheKey) -> bool {
        self.coordinator.delete(key).await
    }

    /// Rewrite a key's TTL so it expires `ttl` from now
    pub async fn expire(&self, key: &CacheKey, ttl: Duration) -> bool {
        self.coordinator.expire(key, ttl).await
    }

    /// Remove every entry whose tag snapshot intersects `tags`; the count
    /// reflects the in-process tier
    pub async fn invalidate_by_tags(&self, tags: &[Tag]) -> usize {
        self.coordinator.invalidate_by_tags(tags).await
    }

    /// Feed one domain mutation event through the coherence engine
    pub async fn handle_event(&self, event: MutationEvent) {
        self.engine.handle_event(event).await
    }

    /// Force-flush any events queued by the delayed strategy
    pub async fn flush_events(&self) {
        self.engine.flush().await
    }

    /// Eagerly remove expired in-process entries
    pub fn sweep_expired(&self) -> usize {
        self.coordinator.sweep_expired()
    }

    /// Point-in-time metrics view
    pub fn metrics(&self) -> MetricsSnapshot {
        self.coordinator.metrics_snapshot()
    }

    /// Operator-initiated metrics reset
    pub fn reset_metrics(&self) {
        self.coordinator.reset_metrics()
    }

    /// The coordinator backing this handle, for advanced integrations
    pub fn coordinator(&self) -> &Arc<CacheCoordinator> {
        &self.coordinator
    }
}

/// Fluent builder for [`ReefCache`]
pub struct ReefCacheBuilder {
    config: CacheConfig,
    remote: Option<Arc<dyn RemoteStore>>,
    fetcher: Option<Arc<dyn WarmingFetcher>>,
}

impl ReefCacheBuilder {
    /// Builder seeded with default configuration
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            remote: None,
            fetcher: None,
        }
    }

    /// Namespace prefixed onto every key built through this cache
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    /// In-process tier byte budget
    pub fn l1_max_bytes(mut self, max_bytes: u64) -> Self {
        self.config.l1_max_bytes = max_bytes;
        self
    }

    /// Fallback TTL for writes that resolve no category
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    /// Register or override a data-category TTL
    pub fn category_ttl(mut self, category: impl Into<String>, ttl: Duration) -> Self {
        self.config.category_ttls.insert(category.into(), ttl);
        self
    }

    /// Deadline for each distributed-tier call
    pub fn l2_timeout(mut self, timeout: Duration) -> Self {
        self.config.l2_timeout = timeout;
        self
    }

    /// Compress distributed-tier payloads above the size floor
    pub fn compression(mut self, enabled: bool) -> Self {
        self.config.compression = enabled;
        self
    }

    /// Invalidation strategy for the coherence engine
    pub fn invalidation_strategy(mut self, strategy: InvalidationStrategy) -> Self {
        self.config.invalidation = strategy;
        self
    }

    /// Post-invalidation warming strategy
    pub fn warming_strategy(mut self, strategy: WarmingStrategy) -> Self {
        self.config.warming = strategy;
        self
    }

    /// TTL applied to entries written by the warmer
    pub fn warm_ttl(mut self, ttl: Duration) -> Self {
        self.config.warm_ttl = ttl;
        self
    }

    /// Attach a distributed store backend; without one the cache runs
    /// in-process only
    pub fn remote_store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(store);
        self
    }

    /// Attach the authoritative read path used by warming strategies
    pub fn warming_fetcher(mut self, fetcher: Arc<dyn WarmingFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Validate configuration and assemble the cache
    pub fn build(self) -> Result<ReefCache, CacheError> {
        let coordinator = Arc::new(CacheCoordinator::new(self.config.clone(), self.remote)?);
        let warmer = CacheWarmer::new(self.config.warming, self.fetcher, self.config.warm_ttl);
        let engine = Arc::new(CoherenceEngine::new(
            Arc::clone(&coordinator),
            self.config.invalidation,
            warmer,
        ));
        Ok(ReefCache {
            coordinator,
            engine,
        })
    }
}

impl Default for ReefCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::CachePriority;
    use crate::cache::tier::remote::memory::MemoryRemoteStore;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct CommentView {
        id: String,
        text: String,
        likes: u32,
    }

    fn cache() -> ReefCache {
        ReefCache::builder()
            .namespace("sm")
            .remote_store(Arc::new(MemoryRemoteStore::new()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn typed_round_trip() {
        let cache = cache();
        let key = cache.key("comment").param("id", "c1").build().unwrap();
        let view = CommentView {
            id: "c1".to_string(),
            text: "nice".to_string(),
            likes: 3,
        };
        cache.set(&key, &view).await.unwrap();
        let loaded: CommentView = cache.get(&key).await.unwrap();
        assert_eq!(loaded, view);
    }

    #[tokio::test]
    async fn unserializable_values_fail_loudly() {
        let cache = cache();
        let key = cache.key("bad").build().unwrap();
        // Tuple-keyed maps cannot become JSON object keys
        let mut value: HashMap<(u32, u32), u32> = HashMap::new();
        value.insert((1, 2), 3);
        let result = cache.set(&key, &value).await;
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }

    #[tokio::test]
    async fn shape_changes_read_as_misses() {
        let cache = cache();
        let key = cache.key("comment").param("id", "c2").build().unwrap();
        cache.set(&key, &"just a string").await.unwrap();
        let loaded: Option<CommentView> = cache.get(&key).await;
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn get_or_set_returns_typed_values() {
        let cache = cache();
        let key = cache.key("profile").param("user", 42).build().unwrap();

        let options = WriteOptions::default()
            .category("profiles")
            .priority(CachePriority::High);
        let view = cache
            .get_or_set(
                &key,
                || async {
                    Ok::<_, CacheError>(CommentView {
                        id: "c9".to_string(),
                        text: "fetched".to_string(),
                        likes: 0,
                    })
                },
                &options,
            )
            .await
            .unwrap();
        assert_eq!(view.text, "fetched");

        // Cached now; a second fetch would be an error
        let cached: CommentView = cache
            .get_or_set(
                &key,
                || async { Err::<CommentView, _>(CacheError::fetch("must not run")) },
                &options,
            )
            .await
            .unwrap();
        assert_eq!(cached.text, "fetched");
    }

    #[tokio::test]
    async fn mget_is_typed_and_ordered() {
        let cache = cache();
        let k1 = cache.key("a").build().unwrap();
        let k2 = cache.key("b").build().unwrap();
        cache.set(&k1, &1u32).await.unwrap();

        let values: Vec<Option<u32>> = cache.mget(&[k1, k2]).await;
        assert_eq!(values, vec![Some(1), None]);
    }

    #[test]
    fn builder_rejects_invalid_configuration() {
        let result = ReefCache::builder().namespace("").build();
        assert!(matches!(result, Err(CacheError::Configuration(_))));
    }
}
