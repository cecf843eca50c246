//! Tiered store: an external primary with an in-process fallback.
//!
//! Shaped after the teacher's `checkpoint::tiered::MultiTierCheckpointer` —
//! writes go to the primary and, best-effort, to the fallback; reads try
//! the primary first and fall back on any [`crate::Error::TransientStoreError`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{MemoryStore, Namespace, Store};
use crate::error::{Error, Result};

/// A `Store` that prefers `primary` and transparently degrades to
/// `fallback` (an in-process [`MemoryStore`]) when the primary is
/// unreachable. `decr_bounded` is the one operation that does not degrade:
/// if the primary cannot guarantee atomicity, it is surfaced as
/// [`Error::TransientStoreError`] rather than silently served from the
/// (necessarily non-linearisable-with-primary) fallback.
pub struct TieredCache {
    primary: Option<Arc<dyn Store>>,
    fallback: Arc<MemoryStore>,
    primary_available: AtomicBool,
}

impl TieredCache {
    /// Construct a tiered cache with no external primary: all operations
    /// are served by the in-process fallback alone.
    #[must_use]
    pub fn fallback_only(fallback_capacity: usize) -> Self {
        Self {
            primary: None,
            fallback: Arc::new(MemoryStore::new(fallback_capacity)),
            primary_available: AtomicBool::new(false),
        }
    }

    /// Construct a tiered cache over an external primary store, with an
    /// in-process fallback of the given capacity.
    #[must_use]
    pub fn with_primary(primary: Arc<dyn Store>, fallback_capacity: usize) -> Self {
        Self {
            primary: Some(primary),
            fallback: Arc::new(MemoryStore::new(fallback_capacity)),
            primary_available: AtomicBool::new(true),
        }
    }
}

#[async_trait::async_trait]
impl Store for TieredCache {
    async fn get(&self, namespace: Namespace, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(primary) = &self.primary {
            match primary.get(namespace, key).await {
                Ok(hit) => {
                    self.primary_available.store(true, Ordering::Relaxed);
                    return Ok(hit);
                }
                Err(_) => {
                    self.primary_available.store(false, Ordering::Relaxed);
                }
            }
        }
        self.fallback.get(namespace, key).await
    }

    async fn set(&self, namespace: Namespace, key: &[u8], value: Vec<u8>, ttl: Duration) -> Result<()> {
        if let Some(primary) = &self.primary {
            if primary.set(namespace, key, value.clone(), ttl).await.is_ok() {
                self.primary_available.store(true, Ordering::Relaxed);
            } else {
                self.primary_available.store(false, Ordering::Relaxed);
            }
        }
        self.fallback.set(namespace, key, value, ttl).await
    }

    async fn incr(&self, namespace: Namespace, key: &[u8], amount: i64, ttl_on_create: Duration) -> Result<i64> {
        if let Some(primary) = &self.primary {
            if let Ok(v) = primary.incr(namespace, key, amount, ttl_on_create).await {
                self.primary_available.store(true, Ordering::Relaxed);
                return Ok(v);
            }
            self.primary_available.store(false, Ordering::Relaxed);
        }
        self.fallback.incr(namespace, key, amount, ttl_on_create).await
    }

    async fn decr_bounded(&self, namespace: Namespace, key: &[u8], amount: i64, floor: i64) -> Result<(i64, bool)> {
        if let Some(primary) = &self.primary {
            return match primary.decr_bounded(namespace, key, amount, floor).await {
                Ok(v) => {
                    self.primary_available.store(true, Ordering::Relaxed);
                    Ok(v)
                }
                Err(_) => {
                    self.primary_available.store(false, Ordering::Relaxed);
                    Err(Error::TransientStoreError(
                        "primary store unavailable; budget decrement cannot be guaranteed atomic".into(),
                    ))
                }
            };
        }
        // No external primary configured: the in-process store's own
        // locking provides the atomicity guarantee directly.
        self.fallback.decr_bounded(namespace, key, amount, floor).await
    }

    async fn delete(&self, namespace: Namespace, key: &[u8]) -> Result<()> {
        if let Some(primary) = &self.primary {
            let _ = primary.delete(namespace, key).await;
        }
        self.fallback.delete(namespace, key).await
    }

    fn is_available(&self) -> bool {
        self.primary.is_none() || self.primary_available.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFails;

    #[async_trait::async_trait]
    impl Store for AlwaysFails {
        async fn get(&self, _namespace: Namespace, _key: &[u8]) -> Result<Option<Vec<u8>>> {
            Err(Error::TransientStoreError("down".into()))
        }
        async fn set(&self, _namespace: Namespace, _key: &[u8], _value: Vec<u8>, _ttl: Duration) -> Result<()> {
            Err(Error::TransientStoreError("down".into()))
        }
        async fn incr(&self, _namespace: Namespace, _key: &[u8], _amount: i64, _ttl: Duration) -> Result<i64> {
            Err(Error::TransientStoreError("down".into()))
        }
        async fn decr_bounded(&self, _namespace: Namespace, _key: &[u8], _amount: i64, _floor: i64) -> Result<(i64, bool)> {
            Err(Error::TransientStoreError("down".into()))
        }
        async fn delete(&self, _namespace: Namespace, _key: &[u8]) -> Result<()> {
            Err(Error::TransientStoreError("down".into()))
        }
    }

    #[tokio::test]
    async fn primary_failure_degrades_reads_to_fallback() {
        let tiered = TieredCache::with_primary(Arc::new(AlwaysFails), 10);
        tiered
            .fallback
            .set(Namespace::Response, b"k", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(
            tiered.get(Namespace::Response, b"k").await.unwrap(),
            Some(b"v".to_vec())
        );
        assert!(!tiered.is_available());
    }

    #[tokio::test]
    async fn decr_bounded_surfaces_error_instead_of_degrading() {
        let tiered = TieredCache::with_primary(Arc::new(AlwaysFails), 10);
        let result = tiered.decr_bounded(Namespace::Budget, b"k", 1, 0).await;
        assert!(result.is_err());
    }
}
