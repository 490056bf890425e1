//! Distributed cache tier wrapper
//!
//! Sits between the coordinator and a [`RemoteStore`] backend. Responsible
//! for the wire codec (a JSON envelope carrying the payload plus lifecycle
//! metadata, optionally lz4-compressed), for bounding every backend call with
//! a deadline, and for degrading gracefully: any timeout or backend error is
//! treated as "store unavailable for this call", logged once per outage, and
//! reported upward as a plain miss or no-op. The serving path never sees a
//! distributed-tier failure.

pub mod backend;
pub mod memory;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::entry::{epoch_millis, CacheEntry, CachePriority};
use crate::cache::error::CacheError;
use crate::cache::keys::{CacheKey, Tag};
use crate::telemetry::CacheMetrics;

use backend::{RemoteResult, RemoteStore};

/// Frame marker: uncompressed JSON envelope
const FRAME_PLAIN: u8 = 0;
/// Frame marker: lz4-compressed JSON envelope (size-prepended)
const FRAME_LZ4: u8 = 1;

/// Payloads below this size are never worth compressing
const COMPRESSION_MIN_BYTES: usize = 512;

/// Lifetime of tag-index records; entries written with longer TTLs fall out
/// of tag reach, which is acceptable for a best-effort index
const TAG_INDEX_TTL_MS: u64 = 60 * 60 * 1000;

/// Wire envelope stored in the distributed tier
#[derive(Debug, Serialize, Deserialize)]
struct RemoteEnvelope {
    payload: Value,
    created_at_ms: u64,
    ttl_ms: u64,
    tags: Vec<Tag>,
    priority: CachePriority,
    version: Option<u64>,
    size_bytes: u64,
}

/// Distributed tier with timeout bounding and silent degradation
pub struct RemoteTier {
    backend: Arc<dyn RemoteStore>,
    timeout: Duration,
    compression: bool,
    namespace: String,
    metrics: Arc<CacheMetrics>,
    /// Set while the store is considered down; gates log volume
    degraded: AtomicBool,
}

impl std::fmt::Debug for RemoteTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTier")
            .field("timeout", &self.timeout)
            .field("compression", &self.compression)
            .field("degraded", &self.degraded.load(Ordering::Relaxed))
            .finish()
    }
}

impl RemoteTier {
    /// Wrap a backend with the given call deadline and codec settings
    pub fn new(
        backend: Arc<dyn RemoteStore>,
        timeout: Duration,
        compression: bool,
        namespace: impl Into<String>,
        metrics: Arc<CacheMetrics>,
    ) -> Self {
        Self {
            backend,
            timeout,
            compression,
            namespace: namespace.into(),
            metrics,
            degraded: AtomicBool::new(false),
        }
    }

    /// Whether the last backend call failed
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Fetch and decode an entry; `None` covers miss, expiry, outage and
    /// undecodable payloads alike
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let bytes = self.call("get", self.backend.get(key.as_str())).await??;
        match decode_entry(&bytes) {
            Ok(entry) => entry,
            Err(err) => {
                debug!("remote tier discarding undecodable payload for {}: {}", key, err);
                None
            }
        }
    }

    /// Write an entry, best-effort; also maintains the tag index
    pub async fn set(&self, key: &CacheKey, entry: &CacheEntry, compression: Option<bool>) {
        let compress = compression.unwrap_or(self.compression);
        let bytes = match encode_entry(entry, compress) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!("remote tier could not encode {}: {}", key, err);
                return;
            }
        };
        let ttl_ms = entry.remaining_ttl().as_millis() as u64;
        if ttl_ms == 0 {
            return;
        }
        let written = self
            .call("set", self.backend.set(key.as_str(), bytes, ttl_ms))
            .await
            .is_some();
        if written && !entry.tags.is_empty() {
            self.index_tags(key, &entry.tags).await;
        }
    }

    /// Delete a key, best-effort
    pub async fn delete(&self, key: &CacheKey) -> bool {
        self.call("del", self.backend.del(key.as_str()))
            .await
            .unwrap_or(false)
    }

    /// Batched fetch preserving input order; an outage yields all-misses
    pub async fn mget(&self, keys: &[CacheKey]) -> Vec<Option<CacheEntry>> {
        if keys.is_empty() {
            return Vec::new();
        }
        let raw_keys: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
        let payloads = match self.call("mget", self.backend.mget(&raw_keys)).await {
            Some(payloads) if payloads.len() == keys.len() => payloads,
            _ => return vec![None; keys.len()],
        };
        payloads
            .into_iter()
            .map(|bytes| {
                bytes
                    .and_then(|bytes| decode_entry(&bytes).ok())
                    .flatten()
            })
            .collect()
    }

    /// Rewrite a key's TTL, best-effort
    pub async fn expire(&self, key: &CacheKey, ttl: Duration) -> bool {
        let ttl_ms = ttl.as_millis() as u64;
        self.call("expire", self.backend.expire(key.as_str(), ttl_ms))
            .await
            .unwrap_or(false)
    }

    /// Best-effort tag invalidation through the tag index
    ///
    /// Returns the number of member keys deleted. Entries written before the
    /// index record expired, or while the store was degraded, are missed; TTL
    /// expiry bounds that staleness.
    pub async fn invalidate_tags(&self, tags: &[Tag]) -> usize {
        let mut removed = 0;
        for tag in tags {
            let index_key = self.tag_index_key(tag);
            let members = match self.call("get", self.backend.get(&index_key)).await.flatten() {
                Some(bytes) => match serde_json::from_slice::<Vec<String>>(&bytes) {
                    Ok(members) => members,
                    Err(_) => Vec::new(),
                },
                None => Vec::new(),
            };
            for member in &members {
                if self
                    .call("del", self.backend.del(member))
                    .await
                    .unwrap_or(false)
                {
                    removed += 1;
                }
            }
            self.call("del", self.backend.del(&index_key)).await;
        }
        removed
    }

    /// Record `key` under each tag's index entry (read-modify-write,
    /// last-writer-wins; the index is advisory, not authoritative)
    async fn index_tags(&self, key: &CacheKey, tags: &[Tag]) {
        for tag in tags {
            let index_key = self.tag_index_key(tag);
            let mut members = match self.call("get", self.backend.get(&index_key)).await.flatten()
            {
                Some(bytes) => serde_json::from_slice::<Vec<String>>(&bytes).unwrap_or_default(),
                None => Vec::new(),
            };
            if !members.iter().any(|m| m == key.as_str()) {
                members.push(key.as_str().to_string());
            }
            if let Ok(bytes) = serde_json::to_vec(&members) {
                self.call("set", self.backend.set(&index_key, bytes, TAG_INDEX_TTL_MS))
                    .await;
            }
        }
    }

    fn tag_index_key(&self, tag: &Tag) -> String {
        format!("{}:tagidx:{}", self.namespace, tag)
    }

    /// Run a backend call under the configured deadline, translating any
    /// failure into `None` and tracking the degraded flag
    async fn call<T, F>(&self, op: &'static str, fut: F) -> Option<T>
    where
        F: Future<Output = RemoteResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => {
                if self.degraded.swap(false, Ordering::Relaxed) {
                    info!("distributed store recovered, leaving degraded mode");
                }
                Some(value)
            }
            Ok(Err(err)) => {
                self.note_failure(op, &err.to_string());
                None
            }
            Err(_) => {
                self.note_failure(op, "deadline exceeded");
                None
            }
        }
    }

    /// First failure of an outage logs at warn, the rest at debug
    fn note_failure(&self, op: &'static str, reason: &str) {
        self.metrics.record_l2_error();
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(
                "distributed store degraded on {}: {}; continuing in-process only",
                op, reason
            );
        } else {
            debug!("distributed store still degraded on {}: {}", op, reason);
        }
    }
}

/// Encode an entry into its wire frame
fn encode_entry(entry: &CacheEntry, compress: bool) -> Result<Vec<u8>, CacheError> {
    let envelope = RemoteEnvelope {
        payload: (*entry.data).clone(),
        created_at_ms: entry.created_at_ms,
        ttl_ms: entry.ttl.as_millis() as u64,
        tags: entry.tags.clone(),
        priority: entry.priority,
        version: entry.version,
        size_bytes: entry.size_bytes,
    };
    let json = serde_json::to_vec(&envelope)?;
    if compress && json.len() >= COMPRESSION_MIN_BYTES {
        let mut framed = Vec::with_capacity(json.len() / 2 + 1);
        framed.push(FRAME_LZ4);
        framed.extend_from_slice(&compress_prepend_size(&json));
        Ok(framed)
    } else {
        let mut framed = Vec::with_capacity(json.len() + 1);
        framed.push(FRAME_PLAIN);
        framed.extend_from_slice(&json);
        Ok(framed)
    }
}

/// Decode a wire frame back into an entry carrying its remaining lifetime
///
/// Returns `Ok(None)` when the envelope has logically expired.
fn decode_entry(bytes: &[u8]) -> Result<Option<CacheEntry>, CacheError> {
    let (marker, body) = bytes
        .split_first()
        .ok_or_else(|| CacheError::deserialization("empty remote frame"))?;
    let json = match *marker {
        FRAME_PLAIN => body.to_vec(),
        FRAME_LZ4 => decompress_size_prepended(body)
            .map_err(|e| CacheError::deserialization(e.to_string()))?,
        other => {
            return Err(CacheError::deserialization(format!(
                "unknown remote frame marker {}",
                other
            )))
        }
    };
    let envelope: RemoteEnvelope = serde_json::from_slice(&json)?;

    let elapsed_ms = epoch_millis().saturating_sub(envelope.created_at_ms);
    if elapsed_ms >= envelope.ttl_ms {
        return Ok(None);
    }
    Ok(Some(CacheEntry::rehydrated(
        envelope.payload,
        Duration::from_millis(envelope.ttl_ms),
        Duration::from_millis(elapsed_ms),
        envelope.created_at_ms,
        envelope.tags,
        envelope.priority,
        envelope.version,
        envelope.size_bytes,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory::MemoryRemoteStore;
    use serde_json::json;

    fn tier_with(store: Arc<MemoryRemoteStore>, compression: bool) -> RemoteTier {
        RemoteTier::new(
            store,
            Duration::from_millis(250),
            compression,
            "sm",
            Arc::new(CacheMetrics::new()),
        )
    }

    fn entry(value: Value, ttl: Duration, tags: Vec<Tag>) -> CacheEntry {
        CacheEntry::new(value, ttl, tags, CachePriority::Medium, Some(7)).unwrap()
    }

    fn key(raw: &str) -> CacheKey {
        CacheKey::new(raw).unwrap()
    }

    #[tokio::test]
    async fn envelope_survives_the_wire_with_metadata() {
        let store = Arc::new(MemoryRemoteStore::new());
        let tier = tier_with(store, false);

        let k = key("sm:comments:platform=tiktok");
        tier.set(&k, &entry(json!({"total": 3}), Duration::from_secs(60), vec![]), None)
            .await;

        let loaded = tier.get(&k).await.unwrap();
        assert_eq!(*loaded.data, json!({"total": 3}));
        assert_eq!(loaded.version, Some(7));
        assert!(loaded.remaining_ttl() <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn large_payloads_compress_transparently() {
        let store = Arc::new(MemoryRemoteStore::new());
        let tier = tier_with(store, true);

        let blob = json!({"text": "lorem ".repeat(500)});
        let k = key("sm:big");
        tier.set(&k, &entry(blob.clone(), Duration::from_secs(60), vec![]), None)
            .await;

        let loaded = tier.get(&k).await.unwrap();
        assert_eq!(*loaded.data, blob);
    }

    #[tokio::test]
    async fn outage_degrades_to_misses_not_errors() {
        let store = Arc::new(MemoryRemoteStore::new());
        let tier = tier_with(Arc::clone(&store), false);
        let k = key("sm:k");
        tier.set(&k, &entry(json!(1), Duration::from_secs(60), vec![]), None)
            .await;

        store.set_unavailable(true);
        assert!(tier.get(&k).await.is_none());
        assert!(tier.is_degraded());

        store.set_unavailable(false);
        assert!(tier.get(&k).await.is_some());
        assert!(!tier.is_degraded());
    }

    #[tokio::test]
    async fn tag_index_reaches_members() {
        let store = Arc::new(MemoryRemoteStore::new());
        let tier = tier_with(Arc::clone(&store), false);

        let tag = Tag::new("comments");
        let k1 = key("sm:user:42:comments");
        let k2 = key("sm:posts:recent");
        tier.set(
            &k1,
            &entry(json!(1), Duration::from_secs(60), vec![tag.clone()]),
            None,
        )
        .await;
        tier.set(&k2, &entry(json!(2), Duration::from_secs(60), vec![]), None)
            .await;

        let removed = tier.invalidate_tags(&[tag]).await;
        assert_eq!(removed, 1);
        assert!(tier.get(&k1).await.is_none());
        assert!(tier.get(&k2).await.is_some());
    }

    #[tokio::test]
    async fn mget_orders_results_by_input() {
        let store = Arc::new(MemoryRemoteStore::new());
        let tier = tier_with(store, false);

        let k1 = key("sm:a");
        let k3 = key("sm:c");
        tier.set(&k1, &entry(json!("a"), Duration::from_secs(60), vec![]), None)
            .await;
        tier.set(&k3, &entry(json!("c"), Duration::from_secs(60), vec![]), None)
            .await;

        let result = tier.mget(&[k1, key("sm:b"), k3]).await;
        assert_eq!(result.len(), 3);
        assert_eq!(*result[0].as_ref().unwrap().data, json!("a"));
        assert!(result[1].is_none());
        assert_eq!(*result[2].as_ref().unwrap().data, json!("c"));
    }
}
