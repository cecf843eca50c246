use std::sync::Arc;

use proptest::prelude::*;
use switchyard_orchestrator::cache::{Cache, TieredCache};
use switchyard_orchestrator::config::Config;
use switchyard_orchestrator::router::{reward_score, AdaptiveRouter, RewardInputs};

fn router_with_arms(n: usize) -> AdaptiveRouter {
    let cache = Arc::new(Cache::new(Box::new(TieredCache::fallback_only(10))));
    let router = AdaptiveRouter::new(cache, &Config::default());
    for i in 0..n {
        router.register_arm(format!("arm-{i}"), format!("strategy-{i}"));
    }
    router
}

#[test]
fn select_arm_always_returns_a_registered_arm() {
    let router = router_with_arms(5);
    for _ in 0..200 {
        let chosen = router.select_arm().unwrap();
        assert!(chosen.starts_with("arm-"));
    }
}

#[test]
fn an_arm_fed_only_rewards_eventually_dominates_selection() {
    let router = router_with_arms(2);
    for _ in 0..500 {
        router.record_reward("arm-0", 1.0);
        router.record_reward("arm-1", 0.0);
    }

    let mut arm0_wins = 0;
    for _ in 0..200 {
        if router.select_arm().unwrap() == "arm-0" {
            arm0_wins += 1;
        }
    }
    // Not deterministic (Thompson sampling), but the posterior should be
    // overwhelmingly concentrated after 500 one-sided observations.
    assert!(arm0_wins > 150, "expected arm-0 to dominate, got {arm0_wins}/200");
}

proptest! {
    #[test]
    fn reward_score_is_always_in_unit_interval(
        success in any::<bool>(),
        response_time_s in 0.0f64..120.0,
        cost in 0.0f64..10.0,
        streaming in any::<bool>(),
    ) {
        let score = reward_score(&RewardInputs { success, response_time_s, cost, streaming });
        prop_assert!((0.0..=1.0).contains(&score));
        if !success {
            prop_assert_eq!(score, 0.0);
        }
    }

    #[test]
    fn faster_success_never_scores_below_a_slower_one_with_everything_else_equal(
        fast in 0.0f64..5.0,
        extra_delay in 0.0f64..60.0,
    ) {
        let slow = fast + extra_delay;
        let fast_score = reward_score(&RewardInputs { success: true, response_time_s: fast, cost: 0.0, streaming: false });
        let slow_score = reward_score(&RewardInputs { success: true, response_time_s: slow, cost: 0.0, streaming: false });
        prop_assert!(fast_score >= slow_score);
    }
}
