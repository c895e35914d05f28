//! In-process cache store.

use super::CacheStore;
use crate::error::DbResult;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

struct Entry {
    payload: String,
    /// `None` never expires.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Concurrent map of `(region, key)` to payload. Expired entries are dropped
/// when read, and by the sweep task when one is running.
#[derive(Default)]
pub struct LocalStore {
    entries: DashMap<(String, String), Entry>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Sweep expired entries every `interval`. The task stops once the store
    /// is dropped.
    pub fn start_sweep_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let removed = store.purge_expired();
                if removed > 0 {
                    debug!(removed, "Swept expired cache entries");
                }
            }
        })
    }
}

#[async_trait]
impl CacheStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, region: &str, key: &str) -> DbResult<Option<String>> {
        let now = Instant::now();
        let k = (region.to_string(), key.to_string());
        if let Some(entry) = self.entries.get(&k) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.payload.clone()));
            }
        }
        self.entries.remove_if(&k, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(&self, region: &str, key: &str, payload: String, ttl: Duration) -> DbResult<()> {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Instant::now().checked_add(ttl)
        };
        self.entries.insert(
            (region.to_string(), key.to_string()),
            Entry {
                payload,
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, region: &str, key: &str) -> DbResult<()> {
        self.entries.remove(&(region.to_string(), key.to_string()));
        Ok(())
    }

    async fn clear(&self, region: &str) -> DbResult<()> {
        self.entries.retain(|(r, _), _| r != region);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = LocalStore::new();
        store
            .set("users", "k", "v".to_string(), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(store.get("users", "k").await.unwrap().as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("users", "k").await.unwrap(), None);
        // lazily removed on read
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_zero_ttl_never_expires() {
        let store = LocalStore::new();
        store.set("r", "k", "v".to_string(), Duration::ZERO).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.purge_expired(), 0);
        assert!(store.get("r", "k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_is_per_region() {
        let store = LocalStore::new();
        store.set("a", "1", "x".to_string(), Duration::ZERO).await.unwrap();
        store.set("a", "2", "x".to_string(), Duration::ZERO).await.unwrap();
        store.set("b", "1", "y".to_string(), Duration::ZERO).await.unwrap();

        store.clear("a").await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get("b", "1").await.unwrap().is_some());

        store.delete("b", "1").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_task_purges() {
        let store = Arc::new(LocalStore::new());
        store
            .set("r", "k", "v".to_string(), Duration::from_millis(5))
            .await
            .unwrap();
        let handle = store.start_sweep_task(Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.is_empty());

        drop(store);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let store = Arc::new(LocalStore::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for j in 0..100 {
                    let key = format!("{}-{}", i, j);
                    store.set("r", &key, key.clone(), Duration::ZERO).await.unwrap();
                    assert_eq!(store.get("r", &key).await.unwrap(), Some(key.clone()));
                    if j % 2 == 0 {
                        store.delete("r", &key).await.unwrap();
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.len(), 400);
    }
}
