//! Cache coordinator orchestrating reads and writes across tiers
//!
//! The coordinator owns both tiers and the runtime metrics. Reads try the
//! in-process tier first, fall back to the distributed tier (repopulating the
//! in-process tier with the remaining TTL), and report a miss only when both
//! come up empty. Writes land in the in-process tier unconditionally and in
//! the distributed tier best-effort, so a store outage silently degrades the
//! cache to in-process-only operation.
//!
//! Lock discipline: no in-process lock is ever held across a distributed-tier
//! call. Every read path goes tier lookup → await I/O → brief tier write.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::cache::config::{CacheConfig, WriteOptions};
use crate::cache::entry::CacheEntry;
use crate::cache::error::CacheError;
use crate::cache::keys::{CacheKey, Tag};
use crate::cache::tier::local::LocalTier;
use crate::cache::tier::remote::backend::RemoteStore;
use crate::cache::tier::remote::RemoteTier;
use crate::telemetry::{CacheMetrics, MetricsSnapshot};

/// Multi-tier cache coordinator
#[derive(Debug)]
pub struct CacheCoordinator {
    local: LocalTier,
    remote: Option<RemoteTier>,
    metrics: Arc<CacheMetrics>,
    config: CacheConfig,
}

impl CacheCoordinator {
    /// Build a coordinator; `remote_backend` of `None` runs in-process only
    pub fn new(
        config: CacheConfig,
        remote_backend: Option<Arc<dyn RemoteStore>>,
    ) -> Result<Self, CacheError> {
        config.validate()?;
        let metrics = Arc::new(CacheMetrics::new());
        let remote = remote_backend.map(|backend| {
            RemoteTier::new(
                backend,
                config.l2_timeout,
                config.compression,
                config.namespace.clone(),
                Arc::clone(&metrics),
            )
        });
        Ok(Self {
            local: LocalTier::new(config.l1_max_bytes),
            remote,
            metrics,
            config,
        })
    }

    /// Configuration this coordinator was built with
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up an entry across both tiers
    ///
    /// A distributed-tier hit repopulates the in-process tier with the
    /// remaining TTL before returning.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let start = Instant::now();
        if let Some(entry) = self.local.get(key) {
            self.metrics.record_l1_hit(elapsed_ns(start));
            return Some(entry);
        }
        if let Some(remote) = &self.remote {
            if let Some(entry) = remote.get(key).await {
                self.local.set(key.clone(), entry.clone());
                self.metrics.record_l2_hit(elapsed_ns(start));
                return Some(entry);
            }
        }
        self.metrics.record_miss(elapsed_ns(start));
        None
    }

    /// Write a value to both tiers
    ///
    /// Serialization problems fail loudly; a distributed-tier failure is
    /// logged by the tier and swallowed, leaving the cache in degraded
    /// in-process-only mode.
    pub async fn set(
        &self,
        key: &CacheKey,
        value: Value,
        options: &WriteOptions,
    ) -> Result<(), CacheError> {
        let start = Instant::now();
        let ttl = self.config.resolve_ttl(options);
        let entry = CacheEntry::new(
            value,
            ttl,
            options.tags.clone(),
            options.priority,
            options.version,
        )?;
        self.local.set(key.clone(), entry.clone());
        if let Some(remote) = &self.remote {
            remote.set(key, &entry, options.compression).await;
        }
        self.metrics.record_set(elapsed_ns(start));
        Ok(())
    }

    /// Cache-aside read: on total miss, run the fetch callback and populate
    /// both tiers with the result
    ///
    /// Concurrent callers missing on the same key may each run their fetch;
    /// the last writer wins. Single-flight de-duplication is a possible
    /// enhancement, not a current guarantee.
    pub async fn get_or_set<F, Fut, E>(
        &self,
        key: &CacheKey,
        fetch: F,
        options: &WriteOptions,
    ) -> Result<Arc<Value>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Value, E>>,
        E: Into<CacheError>,
    {
        if let Some(entry) = self.get(key).await {
            return Ok(Arc::clone(&entry.data));
        }
        let value = fetch().await.map_err(Into::into)?;
        self.set(key, value.clone(), options).await?;
        Ok(Arc::new(value))
    }

    /// Batched lookup preserving input order
    ///
    /// The in-process tier is consulted synchronously; a single distributed
    /// multi-get covers the leftovers, and its hits repopulate the in-process
    /// tier with their remaining TTLs.
    pub async fn mget(&self, keys: &[CacheKey]) -> Vec<Option<CacheEntry>> {
        let start = Instant::now();
        let mut results: Vec<Option<CacheEntry>> = Vec::with_capacity(keys.len());
        let mut miss_slots = Vec::new();
        for (index, key) in keys.iter().enumerate() {
            match self.local.get(key) {
                Some(entry) => {
                    self.metrics.record_l1_hit(elapsed_ns(start));
                    results.push(Some(entry));
                }
                None => {
                    miss_slots.push(index);
                    results.push(None);
                }
            }
        }
        if miss_slots.is_empty() {
            return results;
        }

        let remote_hits = match &self.remote {
            Some(remote) => {
                let miss_keys: Vec<CacheKey> =
                    miss_slots.iter().map(|&i| keys[i].clone()).collect();
                remote.mget(&miss_keys).await
            }
            None => vec![None; miss_slots.len()],
        };
        for (&slot, fetched) in miss_slots.iter().zip(remote_hits) {
            match fetched {
                Some(entry) => {
                    self.local.set(keys[slot].clone(), entry.clone());
                    self.metrics.record_l2_hit(elapsed_ns(start));
                    results[slot] = Some(entry);
                }
                None => self.metrics.record_miss(elapsed_ns(start)),
            }
        }
        results
    }

    /// Remove every entry whose tag snapshot intersects `tags`
    ///
    /// The returned count reflects the in-process tier; the distributed tier
    /// is invalidated best-effort through its tag index and may lag behind
    /// until TTL expiry.
    pub async fn invalidate_by_tags(&self, tags: &[Tag]) -> usize {
        let removed = self.local.invalidate_by_tags(tags);
        self.metrics.record_invalidations(removed as u64);
        if let Some(remote) = &self.remote {
            remote.invalidate_tags(tags).await;
        }
        removed
    }

    /// Remove every entry under a wildcard key prefix
    ///
    /// The distributed protocol has no scan command, so prefix invalidation
    /// is in-process only; distributed copies age out at TTL.
    pub fn invalidate_matching(&self, prefix: &str) -> usize {
        let removed = self.local.invalidate_matching(prefix);
        self.metrics.record_invalidations(removed as u64);
        removed
    }

    /// Delete a key from both tiers
    pub async fn delete(&self, key: &CacheKey) -> bool {
        let local_removed = self.local.delete(key);
        if local_removed {
            self.metrics.record_invalidations(1);
        }
        let remote_removed = match &self.remote {
            Some(remote) => remote.delete(key).await,
            None => false,
        };
        local_removed || remote_removed
    }

    /// Rewrite a key's TTL in both tiers so it expires `ttl` from now
    pub async fn expire(&self, key: &CacheKey, ttl: Duration) -> bool {
        let local_ok = self.local.expire(key, ttl);
        let remote_ok = match &self.remote {
            Some(remote) => remote.expire(key, ttl).await,
            None => false,
        };
        local_ok || remote_ok
    }

    /// Eagerly remove expired in-process entries
    pub fn sweep_expired(&self) -> usize {
        self.local.sweep_expired()
    }

    /// Runtime metrics handle
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Point-in-time metrics view
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Operator-initiated metrics reset
    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Shared metrics handle for the coherence layer
    pub(crate) fn metrics_arc(&self) -> Arc<CacheMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Direct in-process tier access for the coherence layer
    pub(crate) fn local(&self) -> &LocalTier {
        &self.local
    }
}

fn elapsed_ns(start: Instant) -> u64 {
    start.elapsed().as_nanos() as u64
}
