//! Cache entry representation with atomic access metadata
//!
//! Entries carry their full lifecycle state: creation time, TTL, write-time
//! tag snapshot, serialized size, eviction priority and an optional entity
//! version used by versioned invalidation. Access bookkeeping (hit count,
//! recency stamp) lives in padded atomics so concurrent readers never contend
//! on a lock just to record a hit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::CacheError;
use super::keys::Tag;

/// Eviction priority class for cached entries
///
/// Priority dominates recency during eviction: a `High` entry is only evicted
/// once no `Medium` or `Low` candidate remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePriority {
    Low,
    Medium,
    High,
}

impl CachePriority {
    /// Additive weight applied to the recency stamp when scoring eviction
    /// victims; the entry with the smallest combined score is evicted first.
    pub fn weight(self) -> u64 {
        match self {
            CachePriority::Low => 1,
            CachePriority::Medium => 1_000,
            CachePriority::High => 1_000_000,
        }
    }
}

impl Default for CachePriority {
    fn default() -> Self {
        CachePriority::Medium
    }
}

/// Atomic per-entry access bookkeeping
#[derive(Debug)]
pub struct EntryMetadata {
    /// Number of times the entry was returned from a lookup
    pub hit_count: CachePadded<AtomicU64>,
    /// Monotonic recency stamp assigned from the store's access counter
    pub access_order: CachePadded<AtomicU64>,
}

impl EntryMetadata {
    /// Fresh metadata stamped with the given access-order value
    pub fn new(access_order: u64) -> Self {
        Self {
            hit_count: CachePadded::new(AtomicU64::new(0)),
            access_order: CachePadded::new(AtomicU64::new(access_order)),
        }
    }

    /// Record a hit and refresh recency
    pub fn record_hit(&self, access_order: u64) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
        self.access_order.store(access_order, Ordering::Relaxed);
    }
}

impl Clone for EntryMetadata {
    fn clone(&self) -> Self {
        Self {
            hit_count: CachePadded::new(AtomicU64::new(self.hit_count.load(Ordering::Relaxed))),
            access_order: CachePadded::new(AtomicU64::new(
                self.access_order.load(Ordering::Relaxed),
            )),
        }
    }
}

/// A single cached read model with lifecycle metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Cached value; `Arc` keeps clones cheap on the read path
    pub data: Arc<Value>,
    /// Creation instant for expiry arithmetic
    pub created_at: Instant,
    /// Creation wall-clock time (epoch milliseconds) for transport and conflicts
    pub created_at_ms: u64,
    /// Time-to-live; the entry is logically expired once this has elapsed
    pub ttl: Duration,
    /// Write-time tag snapshot
    pub tags: Vec<Tag>,
    /// Serialized byte length, the unit of budget accounting
    pub size_bytes: u64,
    /// Eviction priority class
    pub priority: CachePriority,
    /// Optional monotonic entity version for conflict detection
    pub version: Option<u64>,
    /// Atomic access bookkeeping
    pub meta: EntryMetadata,
}

impl CacheEntry {
    /// Build an entry from a value, measuring its serialized size
    pub fn new(
        data: Value,
        ttl: Duration,
        tags: Vec<Tag>,
        priority: CachePriority,
        version: Option<u64>,
    ) -> Result<Self, CacheError> {
        let size_bytes = serde_json::to_vec(&data)
            .map_err(|e| CacheError::serialization(e.to_string()))?
            .len() as u64;
        Ok(Self {
            data: Arc::new(data),
            created_at: Instant::now(),
            created_at_ms: epoch_millis(),
            ttl,
            tags,
            size_bytes,
            priority,
            version,
            meta: EntryMetadata::new(0),
        })
    }

    /// Reconstruct an entry whose lifetime started `elapsed` ago, as happens
    /// when a value is rehydrated from the distributed tier
    pub fn rehydrated(
        data: Value,
        original_ttl: Duration,
        elapsed: Duration,
        created_at_ms: u64,
        tags: Vec<Tag>,
        priority: CachePriority,
        version: Option<u64>,
        size_bytes: u64,
    ) -> Self {
        let created_at = Instant::now()
            .checked_sub(elapsed)
            .unwrap_or_else(Instant::now);
        Self {
            data: Arc::new(data),
            created_at,
            created_at_ms,
            ttl: original_ttl,
            tags,
            size_bytes,
            priority,
            version,
            meta: EntryMetadata::new(0),
        }
    }

    /// Logical expiry check: `now > created_at + ttl`
    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }

    /// TTL still remaining, zero once expired
    pub fn remaining_ttl(&self) -> Duration {
        self.ttl.saturating_sub(self.created_at.elapsed())
    }

    /// Whether the write-time tag snapshot intersects the given set
    pub fn has_any_tag(&self, tags: &[Tag]) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }
}

/// Current wall-clock time in epoch milliseconds
pub fn epoch_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn size_is_serialized_byte_length() {
        let value = json!({"id": "c1", "text": "hello"});
        let expected = serde_json::to_vec(&value).unwrap().len() as u64;
        let entry = CacheEntry::new(
            value,
            Duration::from_secs(60),
            vec![],
            CachePriority::Medium,
            None,
        )
        .unwrap();
        assert_eq!(entry.size_bytes, expected);
    }

    #[test]
    fn expiry_is_ttl_relative() {
        let entry = CacheEntry::new(
            json!(1),
            Duration::from_millis(0),
            vec![],
            CachePriority::Low,
            None,
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(entry.is_expired());
        assert_eq!(entry.remaining_ttl(), Duration::ZERO);
    }

    #[test]
    fn rehydrated_entry_keeps_remaining_ttl() {
        let entry = CacheEntry::rehydrated(
            json!("x"),
            Duration::from_secs(60),
            Duration::from_secs(45),
            epoch_millis() - 45_000,
            vec![Tag::new("comments")],
            CachePriority::Medium,
            Some(3),
            3,
        );
        let remaining = entry.remaining_ttl();
        assert!(remaining <= Duration::from_secs(15));
        assert!(remaining > Duration::from_secs(10));
    }

    #[test]
    fn tag_intersection_uses_write_time_snapshot() {
        let entry = CacheEntry::new(
            json!(null),
            Duration::from_secs(10),
            vec![Tag::new("comments"), Tag::scoped("user", 42)],
            CachePriority::Medium,
            None,
        )
        .unwrap();
        assert!(entry.has_any_tag(&[Tag::new("comments")]));
        assert!(entry.has_any_tag(&[Tag::scoped("user", 42), Tag::new("posts")]));
        assert!(!entry.has_any_tag(&[Tag::new("posts")]));
    }
}
