//! Shadow execution: a detached background run of an alternative arm
//! against a copy of the live request, used to gather reward signal for
//! arms the live path didn't pick without affecting the caller (§4.6,
//! §9 Open Question resolution — shadow runs are best-effort and their
//! own failures never surface to the caller).

use rand::Rng;
use tracing::debug;

use super::reward::{reward_score, RewardInputs};
use super::AdaptiveRouter;
use crate::config::Config;

/// The result of a completed shadow run, ready to feed back into the
/// bandit.
#[derive(Debug, Clone, Copy)]
pub struct ShadowOutcome {
    /// Reward computed from the shadow run's inputs.
    pub reward: f64,
}

/// Decides whether to shadow a given request and dispatches the detached
/// task when it does.
#[derive(Clone)]
pub struct ShadowRunner {
    shadow_rate: f64,
    budget_per_window: f64,
}

impl ShadowRunner {
    /// Build a shadow runner from the process configuration.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            shadow_rate: config.shadow_rate,
            budget_per_window: config.shadow_budget_per_window,
        }
    }

    /// Whether this particular request should be shadowed, sampled
    /// independently of the live arm selection.
    #[must_use]
    pub fn should_shadow(&self) -> bool {
        rand::thread_rng().gen::<f64>() < self.shadow_rate
    }

    /// The per-window cost cap shadow runs must stay under, enforced by the
    /// caller's own budget ledger against a dedicated shadow principal.
    #[must_use]
    pub fn budget_per_window(&self) -> f64 {
        self.budget_per_window
    }

    /// Run `task` to completion in a detached background task, feeding its
    /// reward back into `router` for `arm_id` once it finishes. Errors
    /// inside `task` must be encoded as `success: false` in its
    /// [`RewardInputs`] — this function never surfaces a panic or error to
    /// the caller, since shadow execution must not affect the live path.
    pub fn spawn<F>(&self, router: AdaptiveRouter, arm_id: String, task: F)
    where
        F: std::future::Future<Output = RewardInputs> + Send + 'static,
    {
        tokio::spawn(async move {
            let inputs = task.await;
            let reward = reward_score(&inputs);
            debug!(arm_id = %arm_id, reward, "shadow run completed");
            router.record_reward(&arm_id, reward);
        });
    }
}
