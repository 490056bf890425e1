//! Cache configuration types and defaults
//!
//! A flat configuration structure covering both tiers and the coherence
//! layer, plus the per-write options callers attach to individual `set`
//! calls. Unset write options fall back to the configured defaults, with
//! TTLs resolved per data category.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::coherence::engine::InvalidationStrategy;
use super::coherence::warming::WarmingStrategy;
use super::entry::CachePriority;
use super::error::CacheError;
use super::keys::Tag;

/// Main cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Namespace prefixed onto every key built through this cache
    pub namespace: String,
    /// In-process tier byte budget
    pub l1_max_bytes: u64,
    /// Fallback TTL when neither write options nor category resolve one
    pub default_ttl: Duration,
    /// Per data-category TTL overrides (`comments`, `analytics`, ...)
    pub category_ttls: HashMap<String, Duration>,
    /// Upper bound for any single distributed-tier call
    pub l2_timeout: Duration,
    /// How mutation events translate into invalidations
    pub invalidation: InvalidationStrategy,
    /// Post-invalidation warming behavior
    pub warming: WarmingStrategy,
    /// Compress distributed-tier payloads above the size floor
    pub compression: bool,
    /// TTL applied to entries written by the warmer
    pub warm_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let mut category_ttls = HashMap::new();
        category_ttls.insert("comments".to_string(), Duration::from_secs(120));
        category_ttls.insert("analytics".to_string(), Duration::from_secs(600));
        category_ttls.insert("profiles".to_string(), Duration::from_secs(900));
        Self {
            namespace: "cache".to_string(),
            l1_max_bytes: 64 * 1024 * 1024,
            default_ttl: Duration::from_secs(300),
            category_ttls,
            l2_timeout: Duration::from_millis(250),
            invalidation: InvalidationStrategy::Immediate,
            warming: WarmingStrategy::Disabled,
            compression: false,
            warm_ttl: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Validate configuration before construction
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.namespace.is_empty() {
            return Err(CacheError::configuration("namespace must not be empty"));
        }
        if self.l1_max_bytes == 0 {
            return Err(CacheError::configuration("l1_max_bytes must be positive"));
        }
        if self.default_ttl.is_zero() {
            return Err(CacheError::configuration("default_ttl must be positive"));
        }
        if self.l2_timeout.is_zero() {
            return Err(CacheError::configuration("l2_timeout must be positive"));
        }
        if let InvalidationStrategy::Delayed {
            batch_size,
            batch_delay,
        } = &self.invalidation
        {
            if *batch_size == 0 {
                return Err(CacheError::configuration("delayed batch_size must be > 0"));
            }
            if batch_delay.is_zero() {
                return Err(CacheError::configuration("delayed batch_delay must be > 0"));
            }
        }
        Ok(())
    }

    /// Resolve the TTL a write should use given its options
    pub fn resolve_ttl(&self, options: &WriteOptions) -> Duration {
        if let Some(ttl) = options.ttl {
            return ttl;
        }
        if let Some(category) = &options.category {
            if let Some(ttl) = self.category_ttls.get(category) {
                return *ttl;
            }
        }
        self.default_ttl
    }
}

/// Per-write options; unset fields take configured defaults
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Explicit TTL, overriding category and default
    pub ttl: Option<Duration>,
    /// Tags snapshotted onto the entry at write time
    pub tags: Vec<Tag>,
    /// Eviction priority
    pub priority: CachePriority,
    /// Per-write compression override for the distributed tier
    pub compression: Option<bool>,
    /// Data category used for TTL resolution
    pub category: Option<String>,
    /// Monotonic entity version for conflict detection
    pub version: Option<u64>,
}

impl WriteOptions {
    /// Options with an explicit TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    /// Builder-style tag attachment
    pub fn tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Builder-style priority
    pub fn priority(mut self, priority: CachePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Builder-style category
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Builder-style version stamp
    pub fn version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_resolution_prefers_explicit_then_category() {
        let config = CacheConfig::default();

        let explicit = WriteOptions::with_ttl(Duration::from_secs(5));
        assert_eq!(config.resolve_ttl(&explicit), Duration::from_secs(5));

        let category = WriteOptions::default().category("comments");
        assert_eq!(config.resolve_ttl(&category), Duration::from_secs(120));

        let fallback = WriteOptions::default().category("unknown");
        assert_eq!(config.resolve_ttl(&fallback), config.default_ttl);
    }

    #[test]
    fn validation_rejects_degenerate_budgets() {
        let mut config = CacheConfig::default();
        config.l1_max_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = CacheConfig::default();
        config.invalidation = InvalidationStrategy::Delayed {
            batch_size: 0,
            batch_delay: Duration::from_secs(1),
        };
        assert!(config.validate().is_err());

        assert!(CacheConfig::default().validate().is_ok());
    }
}
