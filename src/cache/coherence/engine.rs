//! Event-driven coherence engine
//!
//! Consumes domain mutation events and keeps both cache tiers consistent
//! with them. Each event moves through a fixed pipeline: received → keys and
//! tags derived → strategy dispatch → optional warming → metrics. Dispatch is
//! at-most-once: a failed batch is logged and the queue continues, because a
//! missed invalidation self-heals at TTL expiry, which bounds staleness.
//!
//! Events may arrive duplicated or out of order. Invalidating an absent key
//! is a no-op and warming refetches idempotently, so neither corrupts state.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::cache::config::WriteOptions;
use crate::cache::coordinator::CacheCoordinator;
use crate::cache::entry::{epoch_millis, CacheEntry, CachePriority};
use crate::cache::error::CacheError;
use crate::cache::keys::CacheKey;
use crate::telemetry::CacheMetrics;

use super::conflict::{ConflictOutcome, ConflictPolicy, ConflictResolver};
use super::event::{derive_key_set, KeySet, MutationEvent};
use super::warming::CacheWarmer;

/// TTL the lazy strategy rewrites affected keys to: long enough for in-flight
/// reads, short enough that the next reader refreshes
const LAZY_TTL: Duration = Duration::from_secs(1);

/// Lifetime of lazy-invalidation observability markers
const LAZY_MARKER_TTL: Duration = Duration::from_secs(30);

/// A delayed flush warms only this many of its most recent events
const DELAYED_WARM_LIMIT: usize = 5;

/// How mutation events translate into invalidations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationStrategy {
    /// Invalidate synchronously as each event arrives
    Immediate,
    /// Queue events and invalidate in deduplicated batches
    Delayed {
        batch_size: usize,
        batch_delay: Duration,
    },
    /// Conservative mode: only exact keys and namespaced tags, for
    /// high-churn event types where broad invalidation would thrash
    Selective,
    /// Shorten TTLs instead of deleting, letting readers refresh lazily
    Lazy,
    /// Compare entity versions and route stale-event conflicts to a resolver
    Versioned(ConflictPolicy),
}

/// Queue state for the delayed strategy; one per engine, guarded by one lock
#[derive(Debug, Default)]
struct DelayedQueue {
    events: VecDeque<MutationEvent>,
    first_enqueued: Option<Instant>,
    /// Flush generation; lets a sleeping timer detect that its batch was
    /// already flushed by the size trigger
    flushes: u64,
}

/// Mutation-event consumer keeping cached read models coherent
#[derive(Debug)]
pub struct CoherenceEngine {
    inner: Arc<EngineInner>,
}

#[derive(Debug)]
struct EngineInner {
    coordinator: Arc<CacheCoordinator>,
    strategy: InvalidationStrategy,
    warmer: CacheWarmer,
    resolver: ConflictResolver,
    delayed: Mutex<DelayedQueue>,
    metrics: Arc<CacheMetrics>,
}

impl CoherenceEngine {
    /// Build an engine over a coordinator
    pub fn new(
        coordinator: Arc<CacheCoordinator>,
        strategy: InvalidationStrategy,
        warmer: CacheWarmer,
    ) -> Self {
        let resolver = match &strategy {
            InvalidationStrategy::Versioned(policy) => ConflictResolver::new(*policy),
            _ => ConflictResolver::new(ConflictPolicy::Version),
        };
        let metrics = coordinator.metrics_arc();
        Self {
            inner: Arc::new(EngineInner {
                coordinator,
                strategy,
                warmer,
                resolver,
                delayed: Mutex::new(DelayedQueue::default()),
                metrics,
            }),
        }
    }

    /// Configured strategy
    pub fn strategy(&self) -> &InvalidationStrategy {
        &self.inner.strategy
    }

    /// Number of events currently queued by the delayed strategy
    pub fn pending_events(&self) -> usize {
        self.inner.lock_queue().events.len()
    }

    /// Consume one mutation event
    pub async fn handle_event(&self, event: MutationEvent) {
        EngineInner::handle(&self.inner, event).await
    }

    /// Force-flush any queued delayed events, regardless of batch size or age
    pub async fn flush(&self) {
        self.inner.flush_delayed().await
    }
}

impl EngineInner {
    /// Per-event pipeline: derive → dispatch → warm → metrics
    async fn handle(this: &Arc<Self>, event: MutationEvent) {
        this.metrics.record_event();
        let namespace = this.coordinator.config().namespace.clone();
        let key_set = derive_key_set(&event, &namespace);
        if key_set.is_empty() {
            return;
        }
        match this.strategy.clone() {
            InvalidationStrategy::Immediate => {
                this.apply_key_set(&key_set).await;
                this.warm(&event).await;
            }
            InvalidationStrategy::Delayed {
                batch_size,
                batch_delay,
            } => {
                Self::enqueue_delayed(this, event, batch_size, batch_delay).await;
            }
            InvalidationStrategy::Selective => {
                this.apply_key_set(&selective_subset(key_set)).await;
                this.warm(&event).await;
            }
            InvalidationStrategy::Lazy => {
                this.apply_lazy(&key_set, &event).await;
            }
            InvalidationStrategy::Versioned(_) => {
                this.apply_versioned(&key_set, &event).await;
                this.warm(&event).await;
            }
        }
    }

    /// Invalidate everything a key set names; returns keys removed
    async fn apply_key_set(&self, set: &KeySet) -> usize {
        let mut removed = 0;
        for key in &set.exact {
            if self.coordinator.delete(key).await {
                removed += 1;
            }
        }
        for prefix in &set.prefixes {
            removed += self.coordinator.invalidate_matching(prefix);
        }
        removed += self.coordinator.invalidate_by_tags(&set.tags).await;
        removed
    }

    async fn warm(&self, event: &MutationEvent) {
        let warmed = self.warmer.warm_after(&self.coordinator, event).await;
        self.metrics.record_warmed(warmed as u64);
    }

    /// Delayed strategy: queue the event; flush once the batch is full or the
    /// oldest queued event has waited out the batch delay, whichever first
    async fn enqueue_delayed(
        this: &Arc<Self>,
        event: MutationEvent,
        batch_size: usize,
        batch_delay: Duration,
    ) {
        let (flush_now, timer_generation) = {
            let mut queue = this.lock_queue();
            queue.events.push_back(event);
            let timer_generation = if queue.first_enqueued.is_none() {
                queue.first_enqueued = Some(Instant::now());
                Some(queue.flushes)
            } else {
                None
            };
            (queue.events.len() >= batch_size, timer_generation)
        };

        if flush_now {
            this.flush_delayed().await;
        } else if let Some(generation) = timer_generation {
            // One timer per batch, armed when the queue goes non-empty
            let engine = Arc::clone(this);
            tokio::spawn(async move {
                tokio::time::sleep(batch_delay).await;
                let still_due = {
                    let queue = engine.lock_queue();
                    queue.flushes == generation && !queue.events.is_empty()
                };
                if still_due {
                    engine.flush_delayed().await;
                }
            });
        }
    }

    async fn flush_delayed(&self) {
        let batch: Vec<MutationEvent> = {
            let mut queue = self.lock_queue();
            if queue.events.is_empty() {
                return;
            }
            queue.first_enqueued = None;
            queue.flushes += 1;
            queue.events.drain(..).collect()
        };

        match self.invalidate_batch(&batch).await {
            Ok(removed) => {
                debug!(
                    "delayed flush invalidated {} keys across {} events",
                    removed,
                    batch.len()
                );
                // Warming every queued event would amplify a burst; the most
                // recent few carry the views readers will actually want next
                for event in batch.iter().rev().take(DELAYED_WARM_LIMIT) {
                    self.warm(event).await;
                }
            }
            Err(err) => {
                // Invalidation is a set operation, so replaying the batch on
                // the next cycle is an idempotent retry
                warn!(
                    "delayed flush failed, re-queueing {} events at the head: {}",
                    batch.len(),
                    err
                );
                let mut queue = self.lock_queue();
                for event in batch.into_iter().rev() {
                    queue.events.push_front(event);
                }
                if queue.first_enqueued.is_none() {
                    queue.first_enqueued = Some(Instant::now());
                }
            }
        }
    }

    /// Deduplicate a batch's derived keys and tags, then invalidate once
    async fn invalidate_batch(&self, batch: &[MutationEvent]) -> Result<usize, CacheError> {
        let namespace = self.coordinator.config().namespace.clone();
        let mut merged = KeySet::default();
        for event in batch {
            let set = derive_key_set(event, &namespace);
            for key in set.exact {
                if !merged.exact.contains(&key) {
                    merged.exact.push(key);
                }
            }
            for prefix in set.prefixes {
                if !merged.prefixes.contains(&prefix) {
                    merged.prefixes.push(prefix);
                }
            }
            for tag in set.tags {
                if !merged.tags.contains(&tag) {
                    merged.tags.push(tag);
                }
            }
        }
        Ok(self.apply_key_set(&merged).await)
    }

    /// Lazy strategy: shorten TTLs so the next reader refreshes through
    /// cache-aside, and record an observability marker per affected key
    async fn apply_lazy(&self, set: &KeySet, event: &MutationEvent) {
        let mut touched = 0;
        for key in &set.exact {
            if self.coordinator.expire(key, LAZY_TTL).await {
                touched += 1;
            }
            self.record_pending_marker(key, event).await;
        }
        let local = self.coordinator.local();
        for prefix in &set.prefixes {
            touched += local.expire_matching(prefix, LAZY_TTL);
        }
        touched += local.expire_by_tags(&set.tags, LAZY_TTL);
        self.metrics.record_invalidations(touched as u64);
    }

    async fn record_pending_marker(&self, key: &CacheKey, event: &MutationEvent) {
        let marker_key = match CacheKey::new(format!("invalidate:pending:{}", key)) {
            Ok(marker_key) => marker_key,
            Err(_) => return,
        };
        let marker = serde_json::json!({
            "key": key.as_str(),
            "event_id": event.id,
            "event_type": event.kind.name(),
            "requested_at_ms": epoch_millis(),
        });
        let options = WriteOptions::with_ttl(LAZY_MARKER_TTL).priority(CachePriority::Low);
        if let Err(err) = self.coordinator.set(&marker_key, marker, &options).await {
            debug!(
                "could not record pending-invalidation marker for {}: {}",
                key, err
            );
        }
    }

    /// Versioned strategy: per affected key, a cached entry with a newer
    /// version than the event is a conflict routed to the resolver; otherwise
    /// the event's snapshot overwrites the cache stamped with the event's
    /// version. List views not individually versioned age out at TTL.
    async fn apply_versioned(&self, set: &KeySet, event: &MutationEvent) {
        let event_version = event.effective_version();
        for key in &set.exact {
            match self.coordinator.local().peek(key) {
                None => {
                    if let Some(snapshot) = &event.snapshot {
                        self.write_versioned(key, snapshot.clone(), event, None).await;
                    }
                }
                Some(cached) => {
                    if cached.version.unwrap_or(0) > event_version {
                        let outcome = self
                            .resolver
                            .resolve(&self.coordinator, key, &cached, event)
                            .await;
                        match outcome {
                            ConflictOutcome::KeepCached => {
                                self.metrics.record_conflict_resolved();
                            }
                            ConflictOutcome::TakeIncoming => {
                                self.metrics.record_conflict_resolved();
                                self.supersede(key, event, Some(&cached)).await;
                            }
                            ConflictOutcome::Deferred => {
                                self.metrics.record_conflict_deferred();
                            }
                        }
                    } else {
                        self.supersede(key, event, Some(&cached)).await;
                    }
                }
            }
        }
    }

    /// Replace a cached entry with the event's data, or drop it when the
    /// event carries no snapshot
    async fn supersede(&self, key: &CacheKey, event: &MutationEvent, prior: Option<&CacheEntry>) {
        match &event.snapshot {
            Some(snapshot) => {
                self.write_versioned(key, snapshot.clone(), event, prior).await;
            }
            None => {
                self.coordinator.delete(key).await;
            }
        }
    }

    async fn write_versioned(
        &self,
        key: &CacheKey,
        value: serde_json::Value,
        event: &MutationEvent,
        prior: Option<&CacheEntry>,
    ) {
        let mut options = WriteOptions::default().version(event.effective_version());
        if let Some(prior) = prior {
            options.tags = prior.tags.clone();
            options.priority = prior.priority;
        }
        if let Err(err) = self.coordinator.set(key, value, &options).await {
            debug!("versioned overwrite failed for {}: {}", key, err);
        }
    }

    fn lock_queue(&self) -> MutexGuard<'_, DelayedQueue> {
        self.delayed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// The conservative subset the selective strategy processes: exact keys plus
/// namespaced tags; wildcards and broad tags are deliberately skipped
fn selective_subset(set: KeySet) -> KeySet {
    KeySet {
        exact: set.exact,
        prefixes: Vec::new(),
        tags: set.tags.into_iter().filter(|tag| tag.is_scoped()).collect(),
    }
}
