//! Reef Cache - multi-layer cache coherence engine
//!
//! A cache for read models that must stay consistent with a stream of domain
//! mutations without blocking request threads.
//!
//! # Features
//!
//! - **Two tiers**: a bounded in-process store with priority-aware LRU
//!   eviction, backed by a pluggable distributed store treated strictly as a
//!   cache
//! - **Cache-aside**: `get_or_set` with a caller-supplied fetch callback,
//!   batched multi-get, tag-based bulk invalidation
//! - **Event-driven coherence**: typed mutation events expand into affected
//!   keys and tags, dispatched through immediate, delayed, selective, lazy or
//!   versioned invalidation
//! - **Conflict resolution**: stale versioned events are resolved by policy
//!   or parked for manual review
//! - **Warming**: eager, predictive or lazy repopulation of the views a
//!   reader is likely to want next
//! - **Graceful degradation**: every distributed-store failure is bounded by
//!   a deadline and degrades to in-process-only operation; a cache outage
//!   never takes down the serving path

// Public API modules
pub mod prelude;
pub mod reef;

// Cache implementation modules
pub mod cache;
pub mod telemetry;

// Re-export the public API at the crate root for convenience
pub use prelude::*;
