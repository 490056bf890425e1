//! In-process cache tier with concurrent access and bounded memory
//!
//! Primary storage is a sharded concurrent map, so readers and writers for
//! unrelated keys never contend. Expiry is lazy: an expired entry is removed
//! the moment a lookup touches it, with a housekeeping sweep available for
//! eager cleanup. Memory is bounded by a byte budget enforced through the
//! priority-weighted eviction scan in [`eviction`].
//!
//! This tier is pure in-memory bookkeeping and never fails.

pub(crate) mod eviction;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use log::debug;

use crate::cache::entry::{epoch_millis, CacheEntry, EntryMetadata};
use crate::cache::keys::{CacheKey, Tag};

/// Bounded in-process entry store with priority-aware eviction
#[derive(Debug)]
pub struct LocalTier {
    /// Primary concurrent storage
    storage: DashMap<CacheKey, CacheEntry>,
    /// Monotonic access counter; every get/set stamps the touched entry
    access_counter: AtomicU64,
    /// Current serialized-byte footprint
    total_bytes: AtomicU64,
    /// Byte budget
    max_bytes: u64,
    /// Serializes eviction scans; held only while scanning, never across I/O
    eviction_lock: Mutex<()>,
}

impl LocalTier {
    /// Create a tier with the given byte budget
    pub fn new(max_bytes: u64) -> Self {
        Self {
            storage: DashMap::new(),
            access_counter: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            max_bytes,
            eviction_lock: Mutex::new(()),
        }
    }

    /// Look up an entry, removing it if expired (lazy expiry)
    ///
    /// A hit increments the entry's hit count and refreshes its recency rank.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        {
            let entry = self.storage.get(key)?;
            if !entry.is_expired() {
                entry.meta.record_hit(self.next_stamp());
                return Some(entry.clone());
            }
        }
        // Expired: remove as a side effect and report a miss
        self.remove_entry(key);
        None
    }

    /// Look up without touching hit count or recency; expiry still applies
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        {
            let entry = self.storage.get(key)?;
            if !entry.is_expired() {
                return Some(entry.clone());
            }
        }
        self.remove_entry(key);
        None
    }

    /// Insert or replace an entry, evicting victims first if the byte budget
    /// would be exceeded
    pub fn set(&self, key: CacheKey, mut entry: CacheEntry) {
        if entry.size_bytes > self.max_bytes {
            // A single entry larger than the whole budget is never admitted;
            // admitting it would leave the store permanently over budget.
            debug!(
                "local tier refusing oversized entry {} ({} bytes > {} budget)",
                key, entry.size_bytes, self.max_bytes
            );
            return;
        }

        entry.meta = EntryMetadata::new(self.next_stamp());
        let incoming = entry.size_bytes;

        // Replacement frees the old footprint before capacity is checked
        self.remove_entry(&key);
        self.ensure_capacity(incoming);

        self.total_bytes.fetch_add(incoming, Ordering::Relaxed);
        self.storage.insert(key, entry);
    }

    /// Remove an entry; returns whether a live entry existed
    pub fn delete(&self, key: &CacheKey) -> bool {
        self.remove_entry(key)
    }

    /// Rewrite an entry's TTL so it expires `ttl` from now
    ///
    /// Returns false when the key is absent or already expired.
    pub fn expire(&self, key: &CacheKey, ttl: Duration) -> bool {
        let rewritten = match self.storage.get_mut(key) {
            Some(mut entry) => {
                if entry.is_expired() {
                    false
                } else {
                    entry.created_at = std::time::Instant::now();
                    entry.created_at_ms = epoch_millis();
                    entry.ttl = ttl;
                    true
                }
            }
            None => return false,
        };
        if !rewritten {
            self.remove_entry(key);
        }
        rewritten
    }

    /// Shorten the TTL of every live entry whose tag snapshot intersects
    /// `tags`, so the next reader misses and refreshes through cache-aside
    pub fn expire_by_tags(&self, tags: &[Tag], ttl: Duration) -> usize {
        if tags.is_empty() {
            return 0;
        }
        let keys: Vec<CacheKey> = self
            .storage
            .iter()
            .filter(|item| !item.value().is_expired() && item.value().has_any_tag(tags))
            .map(|item| item.key().clone())
            .collect();
        keys.iter().filter(|key| self.expire(key, ttl)).count()
    }

    /// Shorten the TTL of every live entry under a wildcard prefix
    pub fn expire_matching(&self, prefix: &str, ttl: Duration) -> usize {
        let keys: Vec<CacheKey> = self
            .storage
            .iter()
            .filter(|item| item.key().matches_prefix(prefix) && !item.value().is_expired())
            .map(|item| item.key().clone())
            .collect();
        keys.iter().filter(|key| self.expire(key, ttl)).count()
    }

    /// Remove every live entry whose tag snapshot intersects `tags`
    ///
    /// Expired entries encountered during the scan are removed but not
    /// counted, so repeating the call with the same tags returns zero.
    pub fn invalidate_by_tags(&self, tags: &[Tag]) -> usize {
        if tags.is_empty() {
            return 0;
        }
        let mut victims = Vec::new();
        for item in self.storage.iter() {
            if item.value().is_expired() {
                victims.push((item.key().clone(), false));
            } else if item.value().has_any_tag(tags) {
                victims.push((item.key().clone(), true));
            }
        }
        let mut removed = 0;
        for (key, counted) in victims {
            if self.remove_entry(&key) && counted {
                removed += 1;
            }
        }
        removed
    }

    /// Remove every live entry whose key falls under a wildcard prefix
    pub fn invalidate_matching(&self, prefix: &str) -> usize {
        let mut victims = Vec::new();
        for item in self.storage.iter() {
            if item.key().matches_prefix(prefix) {
                victims.push((item.key().clone(), !item.value().is_expired()));
            }
        }
        let mut removed = 0;
        for (key, counted) in victims {
            if self.remove_entry(&key) && counted {
                removed += 1;
            }
        }
        removed
    }

    /// Housekeeping sweep removing every physically present expired entry
    pub fn sweep_expired(&self) -> usize {
        let mut victims = Vec::new();
        for item in self.storage.iter() {
            if item.value().is_expired() {
                victims.push(item.key().clone());
            }
        }
        let mut removed = 0;
        for key in victims {
            if self.remove_entry(&key) {
                removed += 1;
            }
        }
        removed
    }

    /// Number of physically present entries (expired entries may linger until
    /// touched or swept)
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Current serialized-byte footprint
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Configured byte budget
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.storage.clear();
        self.total_bytes.store(0, Ordering::Relaxed);
    }

    fn next_stamp(&self) -> u64 {
        self.access_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn remove_entry(&self, key: &CacheKey) -> bool {
        match self.storage.remove(key) {
            Some((_, entry)) => {
                self.total_bytes
                    .fetch_sub(entry.size_bytes, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Evict lowest-scored entries until `incoming` bytes fit in the budget
    ///
    /// The scan runs under a short-held lock so concurrent eviction attempts
    /// serialize instead of double-evicting; plain get/set on other keys
    /// proceed untouched.
    fn ensure_capacity(&self, incoming: u64) {
        if self.total_bytes.load(Ordering::Relaxed) + incoming <= self.max_bytes {
            return;
        }
        let _guard = self
            .eviction_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        while self.total_bytes.load(Ordering::Relaxed) + incoming > self.max_bytes {
            match eviction::select_victim(&self.storage) {
                Some(victim) => {
                    self.remove_entry(&victim);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::CachePriority;
    use serde_json::json;

    fn key(raw: &str) -> CacheKey {
        CacheKey::new(raw).unwrap()
    }

    fn entry_of(bytes: usize, priority: CachePriority) -> CacheEntry {
        // A JSON string of n chars serializes to n + 2 bytes
        CacheEntry::new(
            json!("x".repeat(bytes - 2)),
            Duration::from_secs(60),
            vec![],
            priority,
            None,
        )
        .unwrap()
    }

    fn tagged_entry(tags: Vec<Tag>) -> CacheEntry {
        CacheEntry::new(json!(1), Duration::from_secs(60), tags, CachePriority::Medium, None)
            .unwrap()
    }

    #[test]
    fn round_trip_and_lazy_expiry() {
        let tier = LocalTier::new(1024);
        let k = key("user:42:profile");
        let entry = CacheEntry::new(
            json!({"name": "ada"}),
            Duration::from_millis(20),
            vec![],
            CachePriority::Medium,
            None,
        )
        .unwrap();
        tier.set(k.clone(), entry);

        let hit = tier.get(&k).unwrap();
        assert_eq!(*hit.data, json!({"name": "ada"}));
        assert_eq!(hit.meta.hit_count.load(Ordering::Relaxed), 1);

        std::thread::sleep(Duration::from_millis(30));
        assert!(tier.get(&k).is_none());
        // Lazy expiry removed the entry physically too
        assert_eq!(tier.len(), 0);
        assert_eq!(tier.total_bytes(), 0);
    }

    #[test]
    fn eviction_keeps_store_under_budget() {
        let tier = LocalTier::new(350);
        for i in 0..10 {
            tier.set(key(&format!("k{}", i)), entry_of(100, CachePriority::Medium));
        }
        assert!(tier.total_bytes() <= 350);
        assert!(tier.len() <= 3);
    }

    #[test]
    fn high_priority_outlives_lower_priorities() {
        let tier = LocalTier::new(310);
        tier.set(key("vip"), entry_of(100, CachePriority::High));
        tier.set(key("a"), entry_of(100, CachePriority::Low));
        tier.set(key("b"), entry_of(100, CachePriority::Low));

        // Each insert displaces a low-priority victim, never the high one
        for i in 0..6 {
            tier.set(
                key(&format!("c{}", i)),
                entry_of(100, if i % 2 == 0 { CachePriority::Low } else { CachePriority::Medium }),
            );
            assert!(tier.peek(&key("vip")).is_some(), "high entry evicted at {}", i);
        }

        // Only highs left: now a high can be the victim
        tier.clear();
        tier.set(key("h1"), entry_of(100, CachePriority::High));
        tier.set(key("h2"), entry_of(100, CachePriority::High));
        tier.set(key("h3"), entry_of(100, CachePriority::High));
        tier.set(key("h4"), entry_of(100, CachePriority::High));
        assert!(tier.len() <= 3);
        assert!(tier.peek(&key("h1")).is_none());
    }

    #[test]
    fn recency_breaks_ties_within_a_priority_class() {
        let tier = LocalTier::new(310);
        tier.set(key("a"), entry_of(100, CachePriority::Medium));
        tier.set(key("b"), entry_of(100, CachePriority::Medium));
        tier.set(key("c"), entry_of(100, CachePriority::Medium));

        // Touching `a` refreshes its rank, making `b` the stalest
        tier.get(&key("a"));
        tier.set(key("d"), entry_of(100, CachePriority::Medium));

        assert!(tier.peek(&key("a")).is_some());
        assert!(tier.peek(&key("b")).is_none());
        assert!(tier.peek(&key("c")).is_some());
        assert!(tier.peek(&key("d")).is_some());
    }

    #[test]
    fn oversized_entries_are_refused() {
        let tier = LocalTier::new(50);
        tier.set(key("huge"), entry_of(100, CachePriority::High));
        assert!(tier.is_empty());
        assert_eq!(tier.total_bytes(), 0);
    }

    #[test]
    fn tag_invalidation_removes_exactly_the_intersection() {
        let tier = LocalTier::new(4096);
        tier.set(
            key("user:42:comments"),
            tagged_entry(vec![Tag::new("comments"), Tag::scoped("user", 42)]),
        );
        tier.set(
            key("user:43:comments"),
            tagged_entry(vec![Tag::new("comments"), Tag::scoped("user", 43)]),
        );
        tier.set(key("posts:recent"), tagged_entry(vec![Tag::new("posts")]));

        let removed = tier.invalidate_by_tags(&[Tag::scoped("user", 42)]);
        assert_eq!(removed, 1);
        assert!(tier.peek(&key("user:42:comments")).is_none());
        assert!(tier.peek(&key("user:43:comments")).is_some());
        assert!(tier.peek(&key("posts:recent")).is_some());

        // Idempotence: nothing left matching, count is zero
        assert_eq!(tier.invalidate_by_tags(&[Tag::scoped("user", 42)]), 0);

        let removed = tier.invalidate_by_tags(&[Tag::new("comments")]);
        assert_eq!(removed, 1);
    }

    #[test]
    fn prefix_invalidation_and_sweep() {
        let tier = LocalTier::new(4096);
        tier.set(key("comments:tiktok:p1"), tagged_entry(vec![]));
        tier.set(key("comments:tiktok:p2"), tagged_entry(vec![]));
        tier.set(key("comments:youtube:p1"), tagged_entry(vec![]));

        assert_eq!(tier.invalidate_matching("comments:tiktok:"), 2);
        assert_eq!(tier.len(), 1);

        let short = CacheEntry::new(
            json!(0),
            Duration::from_millis(1),
            vec![],
            CachePriority::Low,
            None,
        )
        .unwrap();
        tier.set(key("ephemeral"), short);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(tier.sweep_expired(), 1);
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn expire_rewrites_remaining_ttl() {
        let tier = LocalTier::new(1024);
        tier.set(key("k"), tagged_entry(vec![]));
        assert!(tier.expire(&key("k"), Duration::from_millis(10)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(tier.get(&key("k")).is_none());
        assert!(!tier.expire(&key("missing"), Duration::from_secs(1)));
    }
}
