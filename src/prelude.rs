//! Reef cache prelude - convenient imports for users
//!
//! This module provides everything collaborators need to wire the cache into
//! an application: the typed facade and builder, write options, key and tag
//! construction, the mutation-event vocabulary and the two pluggable seams
//! (distributed store backend, warming fetcher).

// The public API
pub use crate::reef::{ReefCache, ReefCacheBuilder};

// Error type surfaced by fallible operations
pub use crate::cache::error::CacheError;

// Key, tag and per-write configuration
pub use crate::cache::config::{CacheConfig, WriteOptions};
pub use crate::cache::entry::CachePriority;
pub use crate::cache::keys::{CacheKey, CacheKeyBuilder, Tag};

// Coherence vocabulary
pub use crate::cache::coherence::{
    ConflictPolicy, EventKind, InvalidationStrategy, ModerationAction, MutationEvent,
    WarmingStrategy,
};

// Pluggable seams
pub use crate::cache::coherence::warming::WarmingFetcher;
pub use crate::cache::tier::remote::backend::{RemoteResult, RemoteStore, RemoteStoreError};
pub use crate::cache::tier::remote::memory::MemoryRemoteStore;

// Metrics reporting
pub use crate::telemetry::MetricsSnapshot;
