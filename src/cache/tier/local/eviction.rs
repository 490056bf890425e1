//! Priority-weighted recency eviction
//!
//! Victim selection scores every candidate as `access_order + priority
//! weight` and evicts the smallest score. Because the weights are separated
//! by three orders of magnitude, priority dominates recency: a high-priority
//! entry only scores below a lower-priority one once no lower-priority
//! candidate remains, regardless of how stale the high entry is.

use std::sync::atomic::Ordering;

use dashmap::DashMap;

use crate::cache::entry::CacheEntry;
use crate::cache::keys::CacheKey;

/// Pick the entry with the smallest eviction score, if any
pub(crate) fn select_victim(storage: &DashMap<CacheKey, CacheEntry>) -> Option<CacheKey> {
    let mut victim: Option<(CacheKey, u64)> = None;
    for item in storage.iter() {
        let entry = item.value();
        let score =
            entry.meta.access_order.load(Ordering::Relaxed) + entry.priority.weight();
        match &victim {
            Some((_, best)) if *best <= score => {}
            _ => victim = Some((item.key().clone(), score)),
        }
    }
    victim.map(|(key, _)| key)
}
