//! Runtime metrics for cache observability

pub mod metrics;

pub use metrics::{CacheMetrics, MetricsSnapshot};
