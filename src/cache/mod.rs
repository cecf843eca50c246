//! Cache & Budget layer (C1).
//!
//! A keyed hot cache for routing decisions, responses, sessions, and
//! per-user budgets / rate-limit counters, with content-addressed keys and
//! tiered TTLs. Backed by an external KV store (a collaborator this crate
//! does not ship) with an in-process fallback that stands in whenever no
//! backing store is configured, or whenever it becomes unreachable.

mod budget;
mod key;
mod memory;
mod metrics;
mod tiered;

pub use budget::BudgetLedger;
pub use key::canonical_key;
pub use memory::MemoryStore;
pub use metrics::CacheMetrics;
pub use tiered::TieredCache;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Content-addressable / per-principal namespaces a cache entry lives in.
/// Each has its own default TTL (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Namespace {
    /// Cached worker-selection decisions, keyed by (task, quality, constraint-hash).
    Route,
    /// Cached provider/generation responses.
    Response,
    /// Per-session conversation history.
    Conversation,
    /// Per-principal monetary budget ledgers.
    Budget,
    /// Per-principal rate-limit counters.
    Rate,
    /// Bandit posteriors and worker-selection EMAs.
    Pattern,
}

impl Namespace {
    /// Default TTL for entries in this namespace, per §4.1's table.
    #[must_use]
    pub fn default_ttl(self) -> Duration {
        match self {
            Namespace::Route => Duration::from_secs(5 * 60),
            Namespace::Response => Duration::from_secs(30 * 60),
            Namespace::Conversation => Duration::from_secs(24 * 60 * 60),
            Namespace::Pattern => Duration::from_secs(60 * 60),
            // Budget/Rate TTLs are aligned to the caller's billing/sliding
            // window rather than a fixed default; callers must supply one.
            Namespace::Budget | Namespace::Rate => Duration::from_secs(30 * 60),
        }
    }

    fn is_content_addressed(self) -> bool {
        matches!(self, Namespace::Route | Namespace::Response | Namespace::Pattern)
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Namespace::Route => "route",
            Namespace::Response => "response",
            Namespace::Conversation => "conversation",
            Namespace::Budget => "budget",
            Namespace::Rate => "rate",
            Namespace::Pattern => "pattern",
        };
        write!(f, "{s}")
    }
}

/// A single cache entry as persisted (C3 data model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Opaque key bytes, already canonicalised.
    pub key: Vec<u8>,
    /// Opaque value bytes.
    pub value: Vec<u8>,
    /// Absolute expiry time, as milliseconds since the Unix epoch.
    pub expires_at_ms: i64,
    /// Namespace this entry belongs to.
    pub namespace: Namespace,
}

/// A pluggable backing store. Production deployments supply a real
/// external KV implementation (not shipped by this crate — see
/// `spec.md`'s "external collaborator" scoping); tests and the in-process
/// fallback use [`MemoryStore`].
///
/// All operations may fail with [`crate::Error::TransientStoreError`],
/// which callers treat as a cache miss for reads and a best-effort no-op
/// for writes — except `decr_bounded`, which must fail loudly rather than
/// silently degrade (§4.1).
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a raw entry by namespace and canonicalised key.
    async fn get(&self, namespace: Namespace, key: &[u8]) -> Result<Option<Vec<u8>>>;
    /// Store a raw entry with the given TTL.
    async fn set(&self, namespace: Namespace, key: &[u8], value: Vec<u8>, ttl: Duration) -> Result<()>;
    /// Atomically add `amount` to a counter, creating it with `ttl_on_create`
    /// if absent, and return the new value.
    async fn incr(&self, namespace: Namespace, key: &[u8], amount: i64, ttl_on_create: Duration) -> Result<i64>;
    /// Atomically subtract `amount` from a counter, refusing (returning
    /// `ok=false`, performing no mutation) if the result would fall below
    /// `floor`.
    async fn decr_bounded(&self, namespace: Namespace, key: &[u8], amount: i64, floor: i64) -> Result<(i64, bool)>;
    /// Remove an entry.
    async fn delete(&self, namespace: Namespace, key: &[u8]) -> Result<()>;
    /// Whether this store is currently reachable (used for the metrics view).
    fn is_available(&self) -> bool {
        true
    }
}

/// The public cache interface consumed by workflows, the model manager and
/// the router. Wraps a [`Store`] (typically a [`TieredCache`]) and exposes
/// the namespaced, TTL-aware, content-addressed operations of §4.1.
pub struct Cache {
    store: Box<dyn Store>,
    metrics: CacheMetrics,
}

impl Cache {
    /// Construct a cache over the given backing store.
    #[must_use]
    pub fn new(store: Box<dyn Store>) -> Self {
        Self {
            store,
            metrics: CacheMetrics::default(),
        }
    }

    /// Fetch a value. Any backend failure, or absence of the key, is
    /// reported as `None` ("degrade reads to miss").
    pub async fn get(&self, namespace: Namespace, key: &[u8]) -> Option<Vec<u8>> {
        let result = self.store.get(namespace, key).await;
        match result {
            Ok(hit) => {
                self.metrics.record_lookup(hit.is_some());
                hit
            }
            Err(_) => {
                self.metrics.record_lookup(false);
                None
            }
        }
    }

    /// Store a value with an explicit TTL. Backend failures degrade to a
    /// silent no-op.
    pub async fn set(&self, namespace: Namespace, key: &[u8], value: Vec<u8>, ttl: Duration) {
        let _ = self.store.set(namespace, key, value, ttl).await;
    }

    /// Atomically increment a counter, creating it with `ttl_on_create` if
    /// absent. Backend failures degrade to a no-op returning `0`; callers
    /// that need hard guarantees (e.g. rate limiting) should treat a `0`
    /// result alongside `!self.backing_available()` as "unknown", same as
    /// the budget path does explicitly via `decr_bounded`.
    pub async fn incr(&self, namespace: Namespace, key: &[u8], amount: i64, ttl_on_create: Duration) -> i64 {
        self.store
            .incr(namespace, key, amount, ttl_on_create)
            .await
            .unwrap_or(0)
    }

    /// Atomically decrement a bounded counter (e.g. a monetary budget).
    /// Unlike every other operation here, this one does **not** degrade
    /// silently: a backend failure is surfaced to the caller as
    /// [`crate::Error::TransientStoreError`], which the budget ledger turns
    /// into `BudgetUnknown`.
    pub async fn decr_bounded(&self, namespace: Namespace, key: &[u8], amount: i64, floor: i64) -> Result<(i64, bool)> {
        self.store.decr_bounded(namespace, key, amount, floor).await
    }

    /// Remove an entry. Backend failures degrade to a silent no-op.
    pub async fn delete(&self, namespace: Namespace, key: &[u8]) {
        let _ = self.store.delete(namespace, key).await;
    }

    /// Derive the cache key for `input` in `namespace`, applying content
    /// addressing or principal-scoping as appropriate.
    #[must_use]
    pub fn key_for(&self, namespace: Namespace, input: &impl Serialize, principal_id: Option<&str>, sub_id: Option<&str>) -> Vec<u8> {
        if namespace.is_content_addressed() {
            canonical_key(input)
        } else {
            let principal = principal_id.unwrap_or("");
            let mut s = format!("{namespace}:{principal}");
            if let Some(sub) = sub_id {
                s.push(':');
                s.push_str(sub);
            }
            s.into_bytes()
        }
    }

    /// A point-in-time snapshot of cache metrics.
    #[must_use]
    pub fn metrics_snapshot(&self) -> metrics::CacheMetricsSnapshot {
        self.metrics.snapshot(self.store.is_available())
    }
}
