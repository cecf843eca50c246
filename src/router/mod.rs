//! Adaptive Router (C6): Thompson-sampling bandit over worker/strategy
//! arms, with a shadow-execution mode for safely evaluating new arms and
//! quarantine/recovery safety rails (§4.6).

mod reward;
mod shadow;

pub use reward::{reward_score, RewardInputs};
pub use shadow::{ShadowOutcome, ShadowRunner};

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use rand::thread_rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Beta, ContinuousCDF};
use tracing::{info, warn};

use crate::cache::{Cache, Namespace};
use crate::config::Config;
use crate::error::{Error, Result};

/// A single bandit arm: a worker or strategy the router chooses between.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditArm {
    /// Stable arm id.
    pub id: String,
    /// What this arm actually routes to (a worker id, a prompt strategy
    /// name, etc) — opaque to the bandit itself.
    pub strategy_ref: String,
    /// Beta posterior success shape parameter.
    pub alpha: f64,
    /// Beta posterior failure shape parameter.
    pub beta: f64,
    /// Cumulative reward ever observed.
    pub total_reward: f64,
    /// Number of times this arm has been selected.
    pub n_selections: u64,
    /// Timestamp of the last reward update.
    pub last_updated: chrono::DateTime<chrono::Utc>,
    /// Whether this arm is currently excluded from selection due to a poor
    /// recent success rate (§4.6's quarantine rail).
    #[serde(default)]
    pub quarantined: bool,
    /// Recent outcomes (`true` = success), bounded to the quarantine
    /// window, used to decide quarantine/recovery transitions.
    #[serde(default)]
    recent_outcomes: VecDeque<bool>,
}

impl BanditArm {
    /// A fresh arm with the cold-start prior `alpha = beta = 1`.
    #[must_use]
    pub fn new(id: impl Into<String>, strategy_ref: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            strategy_ref: strategy_ref.into(),
            alpha: 1.0,
            beta: 1.0,
            total_reward: 0.0,
            n_selections: 0,
            last_updated: chrono::Utc::now(),
            quarantined: false,
            recent_outcomes: VecDeque::new(),
        }
    }

    fn record(&mut self, reward: f64, window: usize, min_success: f64, recovery_threshold: f64) {
        self.alpha += reward;
        self.beta += 1.0 - reward;
        self.total_reward += reward;
        self.n_selections += 1;
        self.last_updated = chrono::Utc::now();

        self.recent_outcomes.push_back(reward >= 0.5);
        if self.recent_outcomes.len() > window {
            self.recent_outcomes.pop_front();
        }
        if self.recent_outcomes.len() >= window {
            let successes = self.recent_outcomes.iter().filter(|s| **s).count();
            let rate = successes as f64 / self.recent_outcomes.len() as f64;
            if self.quarantined {
                if rate >= recovery_threshold {
                    self.quarantined = false;
                }
            } else if rate < min_success {
                self.quarantined = true;
            }
        }
    }

    fn sample(&self) -> f64 {
        match Beta::new(self.alpha, self.beta) {
            Ok(dist) => {
                use rand::Rng;
                let u: f64 = thread_rng().gen();
                // Inverse-CDF sampling keeps this deterministic-under-seed
                // for tests that fix `rand`'s thread-local seed, and avoids
                // pulling in `statrs`'s own `rand` integration feature.
                dist.inverse_cdf(u)
            }
            Err(_) => 0.5,
        }
    }
}

/// Owns every bandit arm for a single decision point (e.g. "which worker
/// serves `response_generator`"). Cheaply cloneable.
#[derive(Clone)]
pub struct AdaptiveRouter {
    arms: Arc<DashMap<String, BanditArm>>,
    cache: Arc<Cache>,
    window: usize,
    min_success: f64,
    recovery_threshold: f64,
}

impl AdaptiveRouter {
    /// Construct a router backed by `cache` for checkpoint persistence, with
    /// quarantine parameters from `config`.
    #[must_use]
    pub fn new(cache: Arc<Cache>, config: &Config) -> Self {
        Self {
            arms: Arc::new(DashMap::new()),
            cache,
            window: config.bandit_quarantine_window,
            min_success: config.bandit_min_success,
            recovery_threshold: 0.5,
        }
    }

    /// Register a new arm if `id` is not already known. Idempotent.
    pub fn register_arm(&self, id: impl Into<String>, strategy_ref: impl Into<String>) {
        let id = id.into();
        self.arms.entry(id.clone()).or_insert_with(|| BanditArm::new(id, strategy_ref));
    }

    /// Thompson-sample every non-quarantined arm and return the winner's
    /// id. Ties (after floating-point sampling, vanishingly rare outside
    /// tests) break by fewest selections, then lexicographically by id.
    pub fn select_arm(&self) -> Result<String> {
        let mut best: Option<(String, f64, u64)> = None;
        for entry in self.arms.iter() {
            let arm = entry.value();
            if arm.quarantined {
                continue;
            }
            let sample = arm.sample();
            let better = match &best {
                None => true,
                Some((best_id, best_sample, best_n)) => {
                    sample > *best_sample
                        || (sample == *best_sample && arm.n_selections < *best_n)
                        || (sample == *best_sample && arm.n_selections == *best_n && arm.id < *best_id)
                }
            };
            if better {
                best = Some((arm.id.clone(), sample, arm.n_selections));
            }
        }

        match best {
            Some((id, _, _)) => Ok(id),
            None => {
                // Every arm is quarantined: fall back to the least-bad one
                // by empirical mean rather than refusing the request.
                self.arms
                    .iter()
                    .max_by(|a, b| {
                        let mean_a = a.alpha / (a.alpha + a.beta);
                        let mean_b = b.alpha / (b.alpha + b.beta);
                        mean_a.partial_cmp(&mean_b).unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|e| e.key().clone())
                    .ok_or_else(|| Error::NoEligibleWorker {
                        task_type: "bandit-arm".to_string(),
                        quality_tier: "n/a".to_string(),
                    })
            }
        }
    }

    /// Feed a reward observation back into `arm_id`'s posterior.
    pub fn record_reward(&self, arm_id: &str, reward: f64) {
        let reward = reward.clamp(0.0, 1.0);
        if let Some(mut arm) = self.arms.get_mut(arm_id) {
            let was_quarantined = arm.quarantined;
            arm.record(reward, self.window, self.min_success, self.recovery_threshold);
            if arm.quarantined && !was_quarantined {
                warn!(arm_id, "bandit arm quarantined after success rate fell below threshold");
            } else if was_quarantined && !arm.quarantined {
                info!(arm_id, "bandit arm recovered from quarantine");
            }
        }
    }

    /// Snapshot every arm, for persistence or introspection.
    #[must_use]
    pub fn snapshot(&self) -> Vec<BanditArm> {
        self.arms.iter().map(|e| e.value().clone()).collect()
    }

    /// Persist the current arm set to the `pattern` cache namespace.
    pub async fn checkpoint(&self, key: &str) {
        let arms = self.snapshot();
        if let Ok(bytes) = serde_json::to_vec(&arms) {
            self.cache
                .set(Namespace::Pattern, key.as_bytes(), bytes, Namespace::Pattern.default_ttl())
                .await;
        }
    }

    /// Restore arms previously persisted by [`AdaptiveRouter::checkpoint`].
    pub async fn restore(&self, key: &str) {
        if let Some(bytes) = self.cache.get(Namespace::Pattern, key.as_bytes()).await {
            if let Ok(arms) = serde_json::from_slice::<Vec<BanditArm>>(&bytes) {
                for arm in arms {
                    self.arms.insert(arm.id.clone(), arm);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> AdaptiveRouter {
        let cache = Arc::new(Cache::new(Box::new(crate::cache::TieredCache::fallback_only(10))));
        AdaptiveRouter::new(cache, &Config::default())
    }

    #[test]
    fn cold_start_arms_are_selectable() {
        let router = router();
        router.register_arm("a", "worker-a");
        router.register_arm("b", "worker-b");
        let chosen = router.select_arm().unwrap();
        assert!(chosen == "a" || chosen == "b");
    }

    #[test]
    fn repeated_failures_quarantine_an_arm() {
        let router = router();
        router.register_arm("bad", "worker-bad");
        for _ in 0..router.window {
            router.record_reward("bad", 0.0);
        }
        assert!(router.arms.get("bad").unwrap().quarantined);
    }

    #[test]
    fn quarantined_arm_is_excluded_unless_it_is_the_only_one() {
        let router = router();
        router.register_arm("only", "worker-only");
        for _ in 0..router.window {
            router.record_reward("only", 0.0);
        }
        // Still selectable: it is the only arm.
        assert_eq!(router.select_arm().unwrap(), "only");
    }

    #[tokio::test]
    async fn checkpoint_round_trips_through_cache() {
        let cache = Arc::new(Cache::new(Box::new(crate::cache::TieredCache::fallback_only(10))));
        let router = AdaptiveRouter::new(cache.clone(), &Config::default());
        router.register_arm("a", "worker-a");
        router.record_reward("a", 1.0);
        router.checkpoint("bandit:test").await;

        let restored = AdaptiveRouter::new(cache, &Config::default());
        restored.restore("bandit:test").await;
        assert_eq!(restored.snapshot().len(), 1);
        assert_eq!(restored.snapshot()[0].n_selections, 1);
    }
}
