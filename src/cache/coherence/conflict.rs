//! Conflict resolution for versioned invalidation
//!
//! A conflict exists when a mutation event arrives carrying a version older
//! than what the cache already holds — the event was delayed, duplicated or
//! reordered in transit. The resolver decides which side survives. Automatic
//! policies compare one canonical dimension; the manual policy persists both
//! sides under a review record and leaves the live key untouched.

use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cache::config::WriteOptions;
use crate::cache::coordinator::CacheCoordinator;
use crate::cache::entry::{CacheEntry, CachePriority};
use crate::cache::error::CacheError;
use crate::cache::keys::{CacheKey, Tag};

use super::event::MutationEvent;

/// Review records outlive normal cache churn but still age out
const CONFLICT_RECORD_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// How a detected conflict is decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Later logical time wins; ties favor the incoming event
    Timestamp,
    /// Higher explicit version wins; ties favor the incoming event
    Version,
    /// Persist both sides under `conflict:{key}` for out-of-band review
    Manual,
}

/// Resolution verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictOutcome {
    /// The cached entry stands; the event is dropped
    KeepCached,
    /// The event supersedes the cached entry
    TakeIncoming,
    /// Neither side wins automatically; a review record was persisted
    Deferred,
}

/// Policy-driven conflict resolver
#[derive(Debug, Clone, Copy)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
}

impl ConflictResolver {
    /// Create a resolver with the given policy
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    /// Configured policy
    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Decide a conflict between a cached entry and an incoming event
    pub async fn resolve(
        &self,
        coordinator: &CacheCoordinator,
        key: &CacheKey,
        cached: &CacheEntry,
        event: &MutationEvent,
    ) -> ConflictOutcome {
        match self.policy {
            ConflictPolicy::Timestamp => {
                let event_ms = event.timestamp.timestamp_millis().max(0) as u64;
                if cached.created_at_ms > event_ms {
                    ConflictOutcome::KeepCached
                } else {
                    ConflictOutcome::TakeIncoming
                }
            }
            ConflictPolicy::Version => {
                if cached.version.unwrap_or(0) > event.effective_version() {
                    ConflictOutcome::KeepCached
                } else {
                    ConflictOutcome::TakeIncoming
                }
            }
            ConflictPolicy::Manual => {
                if let Err(err) = self.persist_record(coordinator, key, cached, event).await {
                    debug!("could not persist conflict record for {}: {}", key, err);
                }
                ConflictOutcome::Deferred
            }
        }
    }

    /// Write both sides under `conflict:{key}` without touching the live key
    async fn persist_record(
        &self,
        coordinator: &CacheCoordinator,
        key: &CacheKey,
        cached: &CacheEntry,
        event: &MutationEvent,
    ) -> Result<(), CacheError> {
        let record_key = CacheKey::new(format!("conflict:{}", key))?;
        let record = json!({
            "key": key.as_str(),
            "cached": {
                "data": (*cached.data).clone(),
                "version": cached.version,
                "created_at_ms": cached.created_at_ms,
            },
            "incoming": {
                "event_id": event.id,
                "event_type": event.kind.name(),
                "snapshot": event.snapshot,
                "version": event.version,
                "timestamp": event.timestamp.to_rfc3339(),
            },
        });
        let options = WriteOptions::with_ttl(CONFLICT_RECORD_TTL)
            .tag(Tag::new("conflicts"))
            .priority(CachePriority::Low);
        coordinator.set(&record_key, record, &options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::coherence::event::EventKind;
    use serde_json::Value;

    fn coordinator() -> CacheCoordinator {
        CacheCoordinator::new(
            CacheConfig {
                namespace: "sm".to_string(),
                ..CacheConfig::default()
            },
            None,
        )
        .unwrap()
    }

    fn entry_with_version(version: u64) -> CacheEntry {
        CacheEntry::new(
            json!({"v": version}),
            Duration::from_secs(60),
            vec![],
            CachePriority::Medium,
            Some(version),
        )
        .unwrap()
    }

    fn event_with_version(version: u64) -> MutationEvent {
        MutationEvent::new(EventKind::CommentUpdated {
            comment_id: "c1".to_string(),
            platform: "tiktok".to_string(),
            post_id: None,
            author_id: "42".to_string(),
        })
        .with_version(version)
        .with_snapshot(json!({"v": version}))
    }

    #[tokio::test]
    async fn version_policy_keeps_the_higher_side() {
        let coord = coordinator();
        let resolver = ConflictResolver::new(ConflictPolicy::Version);
        let key = CacheKey::new("sm:comment:c1").unwrap();

        let outcome = resolver
            .resolve(&coord, &key, &entry_with_version(5), &event_with_version(3))
            .await;
        assert_eq!(outcome, ConflictOutcome::KeepCached);

        let outcome = resolver
            .resolve(&coord, &key, &entry_with_version(5), &event_with_version(5))
            .await;
        assert_eq!(outcome, ConflictOutcome::TakeIncoming);
    }

    #[tokio::test]
    async fn timestamp_policy_ties_favor_incoming() {
        let coord = coordinator();
        let resolver = ConflictResolver::new(ConflictPolicy::Timestamp);
        let key = CacheKey::new("sm:comment:c1").unwrap();

        // Event emitted after the entry was cached: incoming wins
        let cached = entry_with_version(5);
        let event = event_with_version(3);
        let outcome = resolver.resolve(&coord, &key, &cached, &event).await;
        assert_eq!(outcome, ConflictOutcome::TakeIncoming);
    }

    #[tokio::test]
    async fn manual_policy_persists_both_sides_and_defers() {
        let coord = coordinator();
        let resolver = ConflictResolver::new(ConflictPolicy::Manual);
        let key = CacheKey::new("sm:comment:c1").unwrap();

        let outcome = resolver
            .resolve(&coord, &key, &entry_with_version(5), &event_with_version(3))
            .await;
        assert_eq!(outcome, ConflictOutcome::Deferred);

        let record_key = CacheKey::new("conflict:sm:comment:c1").unwrap();
        let record = coord.get(&record_key).await.expect("record persisted");
        let data: &Value = &record.data;
        assert_eq!(data["cached"]["version"], json!(5));
        assert_eq!(data["incoming"]["version"], json!(3));
        assert_eq!(data["incoming"]["event_type"], json!("comment_updated"));
    }
}
