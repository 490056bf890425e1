//! Post-invalidation cache warming
//!
//! After an invalidation pass the warmer can proactively repopulate the views
//! a reader is most likely to request next, trading a little write
//! amplification for fewer cold reads. Fetching goes through a
//! collaborator-supplied [`WarmingFetcher`] — the warmer never knows how read
//! models are materialized. Warming is strictly best-effort: every failure is
//! logged and swallowed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cache::config::WriteOptions;
use crate::cache::coordinator::CacheCoordinator;
use crate::cache::entry::{epoch_millis, CachePriority};
use crate::cache::error::CacheError;
use crate::cache::keys::CacheKey;

use super::event::{EventKind, MutationEvent};

/// Candidates below this confidence are not worth a fetch
const WARM_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Lifetime of lazy warming-intent markers
const WARM_INTENT_TTL: Duration = Duration::from_secs(30);

/// Post-invalidation warming behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmingStrategy {
    /// Re-fetch the affected views synchronously after invalidation
    Eager,
    /// Record low-TTL warming-intent markers for a background sweeper
    Lazy,
    /// Score candidates and warm only the confident ones
    Predictive,
    /// No warming
    Disabled,
}

/// Authoritative read path supplied by the collaborator owning the data
#[async_trait]
pub trait WarmingFetcher: Send + Sync + 'static {
    /// Materialize the read model behind `key`; `Ok(None)` means the view no
    /// longer exists and nothing should be cached
    async fn fetch(&self, key: &CacheKey) -> Result<Option<serde_json::Value>, CacheError>;
}

/// Strategy-driven warmer
pub struct CacheWarmer {
    strategy: WarmingStrategy,
    fetcher: Option<Arc<dyn WarmingFetcher>>,
    warm_ttl: Duration,
}

impl std::fmt::Debug for CacheWarmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWarmer")
            .field("strategy", &self.strategy)
            .field("has_fetcher", &self.fetcher.is_some())
            .field("warm_ttl", &self.warm_ttl)
            .finish()
    }
}

impl CacheWarmer {
    /// Create a warmer; strategies that fetch are inert without a fetcher
    pub fn new(
        strategy: WarmingStrategy,
        fetcher: Option<Arc<dyn WarmingFetcher>>,
        warm_ttl: Duration,
    ) -> Self {
        Self {
            strategy,
            fetcher,
            warm_ttl,
        }
    }

    /// Configured strategy
    pub fn strategy(&self) -> WarmingStrategy {
        self.strategy
    }

    /// Run the configured warming pass for one event; returns the number of
    /// entries repopulated (markers count for the lazy strategy)
    pub async fn warm_after(&self, coordinator: &CacheCoordinator, event: &MutationEvent) -> usize {
        let namespace = coordinator.config().namespace.clone();
        match self.strategy {
            WarmingStrategy::Disabled => 0,
            WarmingStrategy::Eager => {
                let candidates = eager_candidates(event, &namespace);
                self.fetch_and_store(coordinator, candidates).await
            }
            WarmingStrategy::Predictive => {
                let candidates = self
                    .predict(event, &namespace)
                    .into_iter()
                    .filter(|(_, confidence)| *confidence > WARM_CONFIDENCE_THRESHOLD)
                    .map(|(key, _)| key)
                    .collect();
                self.fetch_and_store(coordinator, candidates).await
            }
            WarmingStrategy::Lazy => {
                let mut recorded = 0;
                for key in eager_candidates(event, &namespace) {
                    if self.record_intent(coordinator, &key, event).await {
                        recorded += 1;
                    }
                }
                recorded
            }
        }
    }

    /// Score candidate keys for predictive warming
    ///
    /// The confidences are a fixed per-event-type heuristic; the interface is
    /// the stable part, so a learned model can replace the table without
    /// touching callers.
    pub fn predict(&self, event: &MutationEvent, namespace: &str) -> Vec<(CacheKey, f64)> {
        let scored: Vec<(String, f64)> = match &event.kind {
            EventKind::CommentCreated {
                platform,
                post_id,
                author_id,
                ..
            } => {
                let mut scored = vec![
                    (format!("user:{}:comments", author_id), 0.85),
                    (format!("stats:comments:{}", platform), 0.6),
                ];
                if let Some(post_id) = post_id {
                    scored.push((format!("comments:{}:{}", platform, post_id), 0.9));
                }
                scored
            }
            EventKind::CommentUpdated {
                comment_id,
                platform,
                author_id,
                ..
            }
            | EventKind::CommentDeleted {
                comment_id,
                platform,
                author_id,
                ..
            } => vec![
                (format!("comment:{}", comment_id), 0.9),
                (format!("user:{}:comments", author_id), 0.75),
                (format!("stats:comments:{}", platform), 0.5),
            ],
            EventKind::CommentModerated {
                comment_id,
                platform,
                ..
            } => vec![
                (format!("comment:{}", comment_id), 0.9),
                (format!("stats:moderation:{}", platform), 0.75),
            ],
            EventKind::SentimentScored { comment_id, .. } => {
                vec![(format!("comment:{}", comment_id), 0.65)]
            }
            EventKind::PostPublished {
                post_id,
                platform,
                author_id,
            }
            | EventKind::PostUpdated {
                post_id,
                platform,
                author_id,
            } => vec![
                (format!("post:{}", post_id), 0.9),
                (format!("posts:{}", platform), 0.8),
                (format!("user:{}:posts", author_id), 0.75),
            ],
            EventKind::AccountLinked { owner_id, .. }
            | EventKind::AccountUnlinked { owner_id, .. } => {
                vec![(format!("user:{}:accounts", owner_id), 0.9)]
            }
        };
        scored
            .into_iter()
            .filter_map(|(suffix, confidence)| {
                CacheKey::new(format!("{}:{}", namespace, suffix))
                    .ok()
                    .map(|key| (key, confidence))
            })
            .collect()
    }

    async fn fetch_and_store(
        &self,
        coordinator: &CacheCoordinator,
        candidates: Vec<CacheKey>,
    ) -> usize {
        let fetcher = match &self.fetcher {
            Some(fetcher) => fetcher,
            None => {
                debug!("warming requested but no fetcher is configured");
                return 0;
            }
        };
        let mut warmed = 0;
        for key in candidates {
            match fetcher.fetch(&key).await {
                Ok(Some(value)) => {
                    let options = WriteOptions::with_ttl(self.warm_ttl);
                    if coordinator.set(&key, value, &options).await.is_ok() {
                        warmed += 1;
                    }
                }
                Ok(None) => {}
                Err(err) => debug!("warming fetch failed for {}: {}", key, err),
            }
        }
        warmed
    }

    /// Write a low-TTL marker a background sweeper can act on later
    async fn record_intent(
        &self,
        coordinator: &CacheCoordinator,
        key: &CacheKey,
        event: &MutationEvent,
    ) -> bool {
        let marker_key = match CacheKey::new(format!("warm:intent:{}", key)) {
            Ok(key) => key,
            Err(_) => return false,
        };
        let marker = json!({
            "key": key.as_str(),
            "event_id": event.id,
            "event_type": event.kind.name(),
            "requested_at_ms": epoch_millis(),
        });
        let options = WriteOptions::with_ttl(WARM_INTENT_TTL).priority(CachePriority::Low);
        coordinator.set(&marker_key, marker, &options).await.is_ok()
    }
}

/// The small per-event view set eager warming refreshes: the affected record,
/// the owning user's list view and the relevant aggregate view
fn eager_candidates(event: &MutationEvent, namespace: &str) -> Vec<CacheKey> {
    let suffixes: Vec<String> = match &event.kind {
        EventKind::CommentCreated {
            platform,
            post_id,
            author_id,
            ..
        } => {
            let mut suffixes = vec![
                format!("user:{}:comments", author_id),
                format!("stats:comments:{}", platform),
            ];
            if let Some(post_id) = post_id {
                suffixes.push(format!("comments:{}:{}", platform, post_id));
            }
            suffixes
        }
        EventKind::CommentUpdated {
            comment_id,
            platform,
            author_id,
            ..
        }
        | EventKind::CommentDeleted {
            comment_id,
            platform,
            author_id,
            ..
        } => vec![
            format!("comment:{}", comment_id),
            format!("user:{}:comments", author_id),
            format!("stats:comments:{}", platform),
        ],
        EventKind::CommentModerated {
            comment_id,
            platform,
            ..
        } => vec![
            format!("comment:{}", comment_id),
            format!("stats:moderation:{}", platform),
        ],
        EventKind::SentimentScored { comment_id, .. } => {
            vec![format!("comment:{}", comment_id)]
        }
        EventKind::PostPublished {
            post_id,
            platform,
            author_id,
        }
        | EventKind::PostUpdated {
            post_id,
            platform,
            author_id,
        } => vec![
            format!("post:{}", post_id),
            format!("posts:{}", platform),
            format!("user:{}:posts", author_id),
        ],
        EventKind::AccountLinked { owner_id, .. }
        | EventKind::AccountUnlinked { owner_id, .. } => {
            vec![format!("user:{}:accounts", owner_id)]
        }
    };
    suffixes
        .into_iter()
        .filter_map(|suffix| CacheKey::new(format!("{}:{}", namespace, suffix)).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::CacheConfig;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WarmingFetcher for CountingFetcher {
        async fn fetch(&self, key: &CacheKey) -> Result<Option<Value>, CacheError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(Some(json!({"warmed": key.as_str()})))
        }
    }

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

    fn comment_event() -> MutationEvent {
        MutationEvent::new(EventKind::CommentCreated {
            comment_id: "c1".to_string(),
            platform: "tiktok".to_string(),
            post_id: Some("p9".to_string()),
            author_id: "42".to_string(),
        })
    }

    #[tokio::test]
    async fn eager_warming_repopulates_the_view_set() {
        let coord = coordinator();
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
        });
        let warmer = CacheWarmer::new(
            WarmingStrategy::Eager,
            Some(Arc::clone(&fetcher) as Arc<dyn WarmingFetcher>),
            Duration::from_secs(60),
        );

        let warmed = warmer.warm_after(&coord, &comment_event()).await;
        assert_eq!(warmed, 3);
        assert_eq!(fetcher.calls.load(Ordering::Relaxed), 3);

        let key = CacheKey::new("sm:user:42:comments").unwrap();
        let entry = coord.get(&key).await.expect("warmed entry present");
        assert_eq!(entry.ttl, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn predictive_warming_honors_the_confidence_threshold() {
        let coord = coordinator();
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
        });
        let warmer = CacheWarmer::new(
            WarmingStrategy::Predictive,
            Some(Arc::clone(&fetcher) as Arc<dyn WarmingFetcher>),
            Duration::from_secs(60),
        );

        // comment_created scores: list 0.9, user list 0.85, stats 0.6 — the
        // stats view stays below the 0.7 bar
        let warmed = warmer.warm_after(&coord, &comment_event()).await;
        assert_eq!(warmed, 2);
        let stats_key = CacheKey::new("sm:stats:comments:tiktok").unwrap();
        assert!(coord.get(&stats_key).await.is_none());
    }

    #[tokio::test]
    async fn lazy_warming_records_intent_markers_only() {
        let coord = coordinator();
        let warmer = CacheWarmer::new(WarmingStrategy::Lazy, None, Duration::from_secs(60));

        let recorded = warmer.warm_after(&coord, &comment_event()).await;
        assert_eq!(recorded, 3);

        let marker = CacheKey::new("warm:intent:sm:user:42:comments").unwrap();
        let entry = coord.get(&marker).await.expect("intent marker present");
        assert_eq!(entry.data["event_type"], json!("comment_created"));
        // The real view was not fetched
        assert!(coord
            .get(&CacheKey::new("sm:user:42:comments").unwrap())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn disabled_and_fetcherless_warming_do_nothing() {
        let coord = coordinator();
        let disabled = CacheWarmer::new(WarmingStrategy::Disabled, None, Duration::from_secs(60));
        assert_eq!(disabled.warm_after(&coord, &comment_event()).await, 0);

        let eager_without_fetcher =
            CacheWarmer::new(WarmingStrategy::Eager, None, Duration::from_secs(60));
        assert_eq!(
            eager_without_fetcher
                .warm_after(&coord, &comment_event())
                .await,
            0
        );
    }
}
