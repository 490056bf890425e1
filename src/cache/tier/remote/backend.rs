//! Distributed store backend protocol
//!
//! Any key/value store exposing this minimal Redis-style command set is a
//! valid distributed tier: GET, SET with millisecond expiry, DEL, MGET,
//! EXPIRE and TTL over opaque byte payloads. The tier above treats the
//! backend as a cache, never as a source of truth, so every error here is
//! recoverable by degrading to in-process-only operation.

use async_trait::async_trait;

/// Distributed store call failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStoreError {
    /// Store unreachable (connection refused, outage, ...)
    Unavailable(String),
    /// Call exceeded its deadline
    Timeout,
    /// Backend-specific failure (protocol error, OOM, ...)
    Backend(String),
}

impl std::fmt::Display for RemoteStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteStoreError::Unavailable(msg) => write!(f, "Store unavailable: {}", msg),
            RemoteStoreError::Timeout => write!(f, "Store call timed out"),
            RemoteStoreError::Backend(msg) => write!(f, "Store backend error: {}", msg),
        }
    }
}

impl std::error::Error for RemoteStoreError {}

/// Result alias for backend calls
pub type RemoteResult<T> = Result<T, RemoteStoreError>;

/// Minimal distributed key/value protocol
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Fetch a payload
    async fn get(&self, key: &str) -> RemoteResult<Option<Vec<u8>>>;

    /// Store a payload with a millisecond time-to-live
    async fn set(&self, key: &str, value: Vec<u8>, ttl_ms: u64) -> RemoteResult<()>;

    /// Delete a key; returns whether it existed
    async fn del(&self, key: &str) -> RemoteResult<bool>;

    /// Batched fetch preserving input order
    async fn mget(&self, keys: &[&str]) -> RemoteResult<Vec<Option<Vec<u8>>>>;

    /// Rewrite a key's time-to-live; returns whether the key existed
    async fn expire(&self, key: &str, ttl_ms: u64) -> RemoteResult<bool>;

    /// Remaining time-to-live in milliseconds, `None` when absent
    async fn ttl(&self, key: &str) -> RemoteResult<Option<u64>>;
}
