//! Event-driven cache coherence
//!
//! Keeps cached read models consistent with live domain mutations: events
//! are expanded into affected keys and tags, dispatched through one of five
//! invalidation strategies, optionally followed by a warming pass, and
//! version conflicts are routed to a pluggable resolver.

pub mod conflict;
pub mod engine;
pub mod event;
pub mod warming;

pub use conflict::{ConflictOutcome, ConflictPolicy, ConflictResolver};
pub use engine::{CoherenceEngine, InvalidationStrategy};
pub use event::{derive_key_set, EventKind, KeySet, ModerationAction, MutationEvent};
pub use warming::{CacheWarmer, WarmingFetcher, WarmingStrategy};
