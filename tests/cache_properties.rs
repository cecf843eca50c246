use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use switchyard_orchestrator::cache::{BudgetLedger, Cache, Namespace, TieredCache};

fn cache() -> Cache {
    Cache::new(Box::new(TieredCache::fallback_only(1000)))
}

#[tokio::test]
async fn set_then_get_round_trips_within_ttl() {
    let cache = cache();
    cache
        .set(Namespace::Response, b"k1", b"v1".to_vec(), Duration::from_secs(60))
        .await;
    assert_eq!(cache.get(Namespace::Response, b"k1").await, Some(b"v1".to_vec()));
}

#[tokio::test]
async fn a_miss_on_an_unwritten_key_returns_none() {
    let cache = cache();
    assert_eq!(cache.get(Namespace::Response, b"never-written").await, None);
}

#[tokio::test]
async fn decr_bounded_never_lets_the_ledger_go_negative_under_concurrency() {
    let cache = Arc::new(cache());
    let ledger_key_principal = "concurrent-principal";
    {
        let ledger = BudgetLedger::new(&cache);
        ledger.grant(ledger_key_principal, 1.0, Duration::from_secs(60)).await;
    }

    let mut handles = Vec::new();
    for _ in 0..20 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            let ledger = BudgetLedger::new(&cache);
            ledger.decrement(ledger_key_principal, 0.1).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            successes += 1;
        }
    }
    // Exactly 10 of the 20 callers should be admitted: 1.0 budget / 0.1 per call.
    assert_eq!(successes, 10);
}

proptest! {
    #[test]
    fn canonical_key_is_deterministic_for_equivalent_json(a in "[a-z]{1,8}", b in 0i64..1000) {
        let value1 = serde_json::json!({ "a": a.clone(), "b": b });
        let value2 = serde_json::json!({ "b": b, "a": a });
        let key1 = switchyard_orchestrator::cache::canonical_key(&value1);
        let key2 = switchyard_orchestrator::cache::canonical_key(&value2);
        prop_assert_eq!(key1, key2);
    }
}
