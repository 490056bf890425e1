//! In-memory distributed store backend
//!
//! A complete [`RemoteStore`] implementation backed by a concurrent map with
//! lazy millisecond expiry. Used by single-process deployments that want the
//! full coordinator pipeline without a network store, and by tests — the
//! `set_unavailable` switch simulates a store outage for degraded-mode
//! coverage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::backend::{RemoteResult, RemoteStore, RemoteStoreError};

/// Stored payload with its expiry deadline
#[derive(Debug, Clone)]
struct StoredValue {
    payload: Vec<u8>,
    expires_at: Instant,
}

impl StoredValue {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Concurrent in-memory backend honoring millisecond TTLs
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    entries: DashMap<String, StoredValue>,
    unavailable: AtomicBool,
}

impl MemoryRemoteStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated outage; while set, every call fails `Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Number of live (unexpired) keys
    pub fn live_len(&self) -> usize {
        self.entries.iter().filter(|e| !e.value().is_expired()).count()
    }

    fn check_available(&self) -> RemoteResult<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(RemoteStoreError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }

    fn live_get(&self, key: &str) -> Option<Vec<u8>> {
        let expired = match self.entries.get(key) {
            Some(stored) => {
                if !stored.is_expired() {
                    return Some(stored.payload.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get(&self, key: &str) -> RemoteResult<Option<Vec<u8>>> {
        self.check_available()?;
        Ok(self.live_get(key))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_ms: u64) -> RemoteResult<()> {
        self.check_available()?;
        self.entries.insert(
            key.to_string(),
            StoredValue {
                payload: value,
                expires_at: Instant::now() + Duration::from_millis(ttl_ms),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> RemoteResult<bool> {
        self.check_available()?;
        match self.entries.remove(key) {
            Some((_, stored)) => Ok(!stored.is_expired()),
            None => Ok(false),
        }
    }

    async fn mget(&self, keys: &[&str]) -> RemoteResult<Vec<Option<Vec<u8>>>> {
        self.check_available()?;
        Ok(keys.iter().map(|key| self.live_get(key)).collect())
    }

    async fn expire(&self, key: &str, ttl_ms: u64) -> RemoteResult<bool> {
        self.check_available()?;
        match self.entries.get_mut(key) {
            Some(mut stored) if !stored.is_expired() => {
                stored.expires_at = Instant::now() + Duration::from_millis(ttl_ms);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> RemoteResult<Option<u64>> {
        self.check_available()?;
        Ok(self.entries.get(key).and_then(|stored| {
            let remaining = stored.expires_at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                None
            } else {
                Some(remaining.as_millis() as u64)
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn px_expiry_is_honored() {
        let store = MemoryRemoteStore::new();
        store.set("k", b"v".to_vec(), 20).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn mget_preserves_input_order() {
        let store = MemoryRemoteStore::new();
        store.set("a", b"1".to_vec(), 60_000).await.unwrap();
        store.set("c", b"3".to_vec(), 60_000).await.unwrap();

        let result = store.mget(&["a", "b", "c"]).await.unwrap();
        assert_eq!(result, vec![Some(b"1".to_vec()), None, Some(b"3".to_vec())]);
    }

    #[tokio::test]
    async fn outage_switch_fails_every_call() {
        let store = MemoryRemoteStore::new();
        store.set("k", b"v".to_vec(), 60_000).await.unwrap();
        store.set_unavailable(true);
        assert!(matches!(
            store.get("k").await,
            Err(RemoteStoreError::Unavailable(_))
        ));
        store.set_unavailable(false);
        assert!(store.get("k").await.is_ok());
    }

    #[tokio::test]
    async fn expire_and_ttl_round_trip() {
        let store = MemoryRemoteStore::new();
        store.set("k", b"v".to_vec(), 60_000).await.unwrap();
        assert!(store.expire("k", 5_000).await.unwrap());
        let ttl = store.ttl("k").await.unwrap().unwrap();
        assert!(ttl <= 5_000);
        assert!(!store.expire("missing", 1_000).await.unwrap());
    }
}
