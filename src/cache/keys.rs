//! Cache key and tag construction
//!
//! Keys are opaque namespaced strings that must be stable and collision-free
//! across logically distinct queries. The builder assembles them from a base
//! name plus a sorted parameter map so two call sites asking the same question
//! always produce byte-identical keys.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::CacheError;

/// Maximum accepted key length in bytes
const MAX_KEY_LEN: usize = 512;

/// Validated, namespaced cache key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Create a key from a pre-built string, validating shape
    pub fn new(raw: impl Into<String>) -> Result<Self, CacheError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(CacheError::invalid_key("key must not be empty"));
        }
        if raw.len() > MAX_KEY_LEN {
            return Err(CacheError::invalid_key(format!(
                "key exceeds {} bytes: {}",
                MAX_KEY_LEN,
                raw.len()
            )));
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(CacheError::invalid_key(
                "key must not contain whitespace or control characters",
            ));
        }
        Ok(Self(raw))
    }

    /// Start building a key under the given namespace
    pub fn builder(namespace: impl Into<String>) -> CacheKeyBuilder {
        CacheKeyBuilder {
            namespace: namespace.into(),
            segments: Vec::new(),
            params: BTreeMap::new(),
        }
    }

    /// Key contents as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key falls under a wildcard prefix
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Fluent builder assembling `namespace:seg:...:k=v` keys
///
/// Parameters are held in a `BTreeMap`, so iteration order (and therefore the
/// rendered key) is deterministic regardless of insertion order.
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    namespace: String,
    segments: Vec<String>,
    params: BTreeMap<String, String>,
}

impl CacheKeyBuilder {
    /// Append a fixed path segment
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Attach a named parameter; duplicate names keep the last value
    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    /// Render and validate the final key
    pub fn build(self) -> Result<CacheKey, CacheError> {
        if self.segments.is_empty() {
            return Err(CacheError::invalid_key("key requires at least one segment"));
        }
        let mut parts = Vec::with_capacity(1 + self.segments.len() + self.params.len());
        if !self.namespace.is_empty() {
            parts.push(self.namespace);
        }
        parts.extend(self.segments);
        for (name, value) in self.params {
            parts.push(format!("{}={}", name, value));
        }
        CacheKey::new(parts.join(":"))
    }
}

/// Invalidation tag attached to entries at write time
///
/// Tag membership is a snapshot taken when the entry is written; later tag
/// changes never retroactively affect entries already cached.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    /// Create a broad tag, e.g. `comments`
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Create a namespaced tag, e.g. `platform:tiktok`
    pub fn scoped(scope: &str, value: impl fmt::Display) -> Self {
        Self(format!("{}:{}", scope, value))
    }

    /// Tag contents as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespaced tags carry a `scope:value` shape
    pub fn is_scoped(&self) -> bool {
        self.0.contains(':')
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sorts_params_deterministically() {
        let a = CacheKey::builder("sm")
            .segment("comments")
            .param("platform", "tiktok")
            .param("page", 2)
            .build()
            .unwrap();
        let b = CacheKey::builder("sm")
            .segment("comments")
            .param("page", 2)
            .param("platform", "tiktok")
            .build()
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "sm:comments:page=2:platform=tiktok");
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(CacheKey::new("").is_err());
        assert!(CacheKey::new("has space").is_err());
        assert!(CacheKey::new("x".repeat(513)).is_err());
        assert!(CacheKey::new("user:42:comments").is_ok());
    }

    #[test]
    fn scoped_tags_are_detected() {
        assert!(Tag::scoped("platform", "tiktok").is_scoped());
        assert!(!Tag::new("comments").is_scoped());
    }
}
