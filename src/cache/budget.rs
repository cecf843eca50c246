//! Per-principal budget ledger (§3's `BudgetLedger`, §4.1's `decr_bounded`
//! consumer).
//!
//! Budget is strictly per-principal, with an optional per-session
//! sub-ledger (Open Question resolution, §9): per-request hard caps are
//! enforced separately via `constraints.max_cost`, not by this ledger.

use super::{Cache, Namespace};
use crate::error::{Error, Result};

/// Fixed-point budget representation: monetary units are tracked as
/// hundredths of a cent (`i64`) so `decr_bounded`'s integer counter
/// semantics apply without floating-point drift.
const SCALE: f64 = 100_000.0;

fn to_fixed(units: f64) -> i64 {
    (units * SCALE).round() as i64
}

fn from_fixed(fixed: i64) -> f64 {
    fixed as f64 / SCALE
}

/// Per-principal budget ledger, backed by the shared [`Cache`].
pub struct BudgetLedger<'a> {
    cache: &'a Cache,
}

impl<'a> BudgetLedger<'a> {
    /// Wrap a cache reference as a budget ledger view.
    #[must_use]
    pub fn new(cache: &'a Cache) -> Self {
        Self { cache }
    }

    /// Initialize (or top up) a principal's remaining budget for the
    /// current window. Idempotent only in the sense that it adds
    /// `amount`; callers seed a fresh window once per billing period.
    pub async fn grant(&self, principal_id: &str, amount: f64, window_ttl: std::time::Duration) -> f64 {
        let key = format!("budget:{principal_id}").into_bytes();
        let fixed = self
            .cache
            .incr(Namespace::Budget, &key, to_fixed(amount), window_ttl)
            .await;
        from_fixed(fixed)
    }

    /// Return `amount` to `principal_id`'s balance, e.g. the unused portion
    /// of a pre-flight reservation once the actual cost is known. Like
    /// [`Cache::incr`], degrades to a no-op if the backing store is
    /// unreachable.
    pub async fn refund(&self, principal_id: &str, amount: f64) {
        let key = format!("budget:{principal_id}").into_bytes();
        self.cache
            .incr(Namespace::Budget, &key, to_fixed(amount), std::time::Duration::from_secs(30 * 24 * 60 * 60))
            .await;
    }

    /// Atomically decrement `principal_id`'s remaining budget by `amount`.
    /// Fails with [`Error::BudgetExceeded`] if the result would go
    /// negative (no cost is recorded in that case), or
    /// [`Error::BudgetUnknown`] if the backing store cannot guarantee
    /// atomicity.
    pub async fn decrement(&self, principal_id: &str, amount: f64) -> Result<f64> {
        let key = format!("budget:{principal_id}").into_bytes();
        let fixed_amount = to_fixed(amount);
        match self.cache.decr_bounded(Namespace::Budget, &key, fixed_amount, 0).await {
            Ok((new_value, true)) => Ok(from_fixed(new_value)),
            Ok((current, false)) => Err(Error::BudgetExceeded {
                principal_id: principal_id.to_string(),
                requested: amount,
                remaining: from_fixed(current),
            }),
            Err(_) => Err(Error::BudgetUnknown {
                principal_id: principal_id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TieredCache;

    fn cache() -> Cache {
        Cache::new(Box::new(TieredCache::fallback_only(100)))
    }

    #[tokio::test]
    async fn decrement_beyond_balance_fails_without_recording_cost() {
        let cache = cache();
        let ledger = BudgetLedger::new(&cache);
        ledger.grant("p1", 0.001, std::time::Duration::from_secs(60)).await;

        let err = ledger.decrement("p1", 0.01).await.unwrap_err();
        assert_eq!(err.kind(), "BudgetExceeded");

        // Balance is unchanged by the failed attempt.
        let err2 = ledger.decrement("p1", 0.01).await.unwrap_err();
        assert_eq!(err2.kind(), "BudgetExceeded");
    }

    #[tokio::test]
    async fn decrement_within_balance_succeeds() {
        let cache = cache();
        let ledger = BudgetLedger::new(&cache);
        ledger.grant("p1", 1.0, std::time::Duration::from_secs(60)).await;

        let remaining = ledger.decrement("p1", 0.25).await.unwrap();
        assert!((remaining - 0.75).abs() < 1e-6);
    }
}
