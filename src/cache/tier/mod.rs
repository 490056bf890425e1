//! Cache tiers
//!
//! Two layers with sharply different failure models: the in-process tier is
//! pure bookkeeping and never fails; the distributed tier is network-bound,
//! deadline-bounded, and degrades to a no-op whenever the backing store
//! misbehaves.

pub mod local;
pub mod remote;
