//! In-process fallback store: sharded, size-capped, LRU-evicted.
//!
//! Stands in for the external KV backend whenever none is configured, or
//! whenever [`super::TieredCache`] detects the primary store is
//! unreachable.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use super::{Namespace, Store};
use crate::error::Result;

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// One LRU shard per namespace, each capped at `capacity` entries.
pub struct MemoryStore {
    shards: [Mutex<LruCache<Vec<u8>, Entry>>; 6],
    capacity: usize,
}

impl MemoryStore {
    /// Construct a store whose per-namespace shard holds at most `capacity`
    /// entries before evicting the least-recently-used.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            shards: std::array::from_fn(|_| Mutex::new(LruCache::new(cap))),
            capacity,
        }
    }

    fn shard(&self, namespace: Namespace) -> &Mutex<LruCache<Vec<u8>, Entry>> {
        let idx = match namespace {
            Namespace::Route => 0,
            Namespace::Response => 1,
            Namespace::Conversation => 2,
            Namespace::Budget => 3,
            Namespace::Rate => 4,
            Namespace::Pattern => 5,
        };
        &self.shards[idx]
    }

    /// Configured per-namespace capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn get(&self, namespace: Namespace, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut shard = self.shard(namespace).lock();
        match shard.get(key) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.value.clone())),
            Some(_) => {
                shard.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, namespace: Namespace, key: &[u8], value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut shard = self.shard(namespace).lock();
        shard.put(
            key.to_vec(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn incr(&self, namespace: Namespace, key: &[u8], amount: i64, ttl_on_create: Duration) -> Result<i64> {
        let mut shard = self.shard(namespace).lock();
        let current = match shard.get(key) {
            Some(entry) if !entry.is_expired() => {
                i64::from_le_bytes(entry.value.clone().try_into().unwrap_or([0; 8]))
            }
            _ => 0,
        };
        let new_value = current + amount;
        shard.put(
            key.to_vec(),
            Entry {
                value: new_value.to_le_bytes().to_vec(),
                expires_at: Instant::now() + ttl_on_create,
            },
        );
        Ok(new_value)
    }

    async fn decr_bounded(&self, namespace: Namespace, key: &[u8], amount: i64, floor: i64) -> Result<(i64, bool)> {
        let mut shard = self.shard(namespace).lock();
        let current = match shard.peek(key) {
            Some(entry) if !entry.is_expired() => {
                i64::from_le_bytes(entry.value.clone().try_into().unwrap_or([0; 8]))
            }
            _ => 0,
        };
        let candidate = current - amount;
        if candidate < floor {
            return Ok((current, false));
        }
        let ttl = shard
            .peek(key)
            .map(|e| e.expires_at.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_secs(30 * 60));
        shard.put(
            key.to_vec(),
            Entry {
                value: candidate.to_le_bytes().to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok((candidate, true))
    }

    async fn delete(&self, namespace: Namespace, key: &[u8]) -> Result<()> {
        self.shard(namespace).lock().pop(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_within_ttl_returns_value() {
        let store = MemoryStore::new(100);
        store
            .set(Namespace::Response, b"k", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            store.get(Namespace::Response, b"k").await.unwrap(),
            Some(b"v".to_vec())
        );
    }

    #[tokio::test]
    async fn expired_entry_reads_as_miss() {
        let store = MemoryStore::new(100);
        store
            .set(Namespace::Response, b"k", b"v".to_vec(), Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get(Namespace::Response, b"k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_accumulates() {
        let store = MemoryStore::new(100);
        store.incr(Namespace::Rate, b"k", 1, Duration::from_secs(60)).await.unwrap();
        let v = store.incr(Namespace::Rate, b"k", 1, Duration::from_secs(60)).await.unwrap();
        assert_eq!(v, 2);
    }

    #[tokio::test]
    async fn decr_bounded_refuses_underflow_without_mutating() {
        let store = MemoryStore::new(100);
        store.incr(Namespace::Budget, b"k", 5, Duration::from_secs(60)).await.unwrap();
        let (value, ok) = store.decr_bounded(Namespace::Budget, b"k", 10, 0).await.unwrap();
        assert!(!ok);
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn decr_bounded_concurrent_calls_admit_exactly_balance() {
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new(100));
        store.incr(Namespace::Budget, b"k", 10, Duration::from_secs(60)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..25 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.decr_bounded(Namespace::Budget, b"k", 1, 0).await.unwrap()
            }));
        }

        let mut admitted = 0;
        for h in handles {
            let (_, ok) = h.await.unwrap();
            if ok {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 10);
        let (final_value, _) = store.decr_bounded(Namespace::Budget, b"k", 0, 0).await.unwrap();
        assert_eq!(final_value, 0);
    }

    #[tokio::test]
    async fn lru_eviction_respects_capacity() {
        let store = MemoryStore::new(2);
        store.set(Namespace::Route, b"a", b"1".to_vec(), Duration::from_secs(60)).await.unwrap();
        store.set(Namespace::Route, b"b", b"2".to_vec(), Duration::from_secs(60)).await.unwrap();
        store.set(Namespace::Route, b"c", b"3".to_vec(), Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.get(Namespace::Route, b"a").await.unwrap(), None);
        assert_eq!(store.get(Namespace::Route, b"c").await.unwrap(), Some(b"3".to_vec()));
    }
}
