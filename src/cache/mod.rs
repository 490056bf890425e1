//! Cache system module
//!
//! Multi-layer cache with an in-process tier, a pluggable distributed tier,
//! a coordinator orchestrating reads and writes across both, and an
//! event-driven coherence layer keeping cached read models consistent with
//! domain mutations.

pub mod coherence;
pub mod config;
pub mod coordinator;
pub mod entry;
pub mod error;
pub mod keys;
pub mod tier;
