//! Model Manager (C3): worker selection, residency admission control, and
//! the generate-with-retry path nodes call into (§4.3).

mod admission;

pub use admission::AdmissionController;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{instrument, warn};

use crate::cache::{Cache, Namespace};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::graph::node::{NodeError, NodeResult};
use crate::graph::state::{NodePayload, QualityTier};
use crate::registry::{Health, TaskType, WorkerDescriptor, WorkerRegistry};
use crate::workers::{GenerateRequest, InferenceWorker};

/// Caller-supplied constraints narrowing eligible workers (mirrors
/// [`crate::graph::state::Constraints`] but scoped to selection, not the
/// whole request).
#[derive(Debug, Clone, Default)]
pub struct SelectionConstraints {
    /// Drop workers whose cost-per-call exceeds this bound.
    pub max_cost_per_call: Option<f64>,
    /// Drop remote workers, keeping only local ones.
    pub force_local: bool,
}

/// Owns the worker registry, the admission controller, and the concrete
/// backend handles workers are dispatched to.
pub struct ModelManager {
    registry: WorkerRegistry,
    cache: Arc<Cache>,
    config: Config,
    admission: AdmissionController,
    backends: DashMap<String, Arc<dyn InferenceWorker>>,
}

impl ModelManager {
    /// Construct a model manager over `registry`, wiring a fresh admission
    /// controller bounded by `config.resident_budget_bytes`.
    #[must_use]
    pub fn new(registry: WorkerRegistry, cache: Arc<Cache>, config: Config) -> Self {
        let admission = AdmissionController::spawn(registry.clone(), config.resident_budget_bytes, config.admission_queue_bound);
        Self {
            registry,
            cache,
            config,
            admission,
            backends: DashMap::new(),
        }
    }

    /// Register the concrete backend handle for a configured worker id.
    pub fn register_backend(&self, worker_id: impl Into<String>, backend: Arc<dyn InferenceWorker>) {
        self.backends.insert(worker_id.into(), backend);
    }

    /// Select a worker for `task_type` at `quality_tier`, honoring
    /// `constraints`. Implements the six-step algorithm of §4.3:
    /// default mapping, quality-tier demote/promote, constraint filtering,
    /// warmth-tier preference, EMA tie-break, and fallback-chain walk.
    #[instrument(skip(self))]
    pub async fn select(
        &self,
        task_type: &TaskType,
        quality_tier: QualityTier,
        constraints: &SelectionConstraints,
    ) -> Result<WorkerDescriptor> {
        if let Some(cached) = self.cached_selection(task_type, quality_tier, constraints).await {
            if let Ok(desc) = self.registry.get(&cached) {
                if matches!(desc.health, Health::Ready | Health::Degraded) {
                    return Ok(desc);
                }
            }
        }

        let mut candidates = self.registry.list(None, Some(task_type));
        candidates.retain(|w| !matches!(w.health, Health::Unavailable));

        if let Some(max_cost) = constraints.max_cost_per_call {
            candidates.retain(|w| w.cost_per_unit <= max_cost);
        }
        if constraints.force_local {
            candidates.retain(|w| w.kind == crate::registry::WorkerKind::LocalInference);
        }
        if candidates.is_empty() {
            return Err(Error::NoEligibleWorker {
                task_type: task_type.to_string(),
                quality_tier: format!("{quality_tier:?}"),
            });
        }

        let demoted = match quality_tier {
            QualityTier::Minimal => candidates.iter().min_by_key(|w| w.size_rank),
            QualityTier::Premium => candidates.iter().max_by_key(|w| w.size_rank),
            QualityTier::Balanced | QualityTier::High => None,
        };
        if let Some(pick) = demoted {
            let chosen = pick.clone();
            self.cache_selection(task_type, quality_tier, constraints, &chosen.id).await;
            return Ok(chosen);
        }

        // Warmth-tier preference: prefer the warmest (lowest T-number)
        // candidate so resident workers are reused over cold ones.
        candidates.sort_by(|a, b| {
            a.warmth
                .cmp(&b.warmth)
                .then(b.stats.ema_success.partial_cmp(&a.stats.ema_success).unwrap_or(std::cmp::Ordering::Equal))
                .then(
                    a.stats
                        .ema_latency_ms
                        .partial_cmp(&b.stats.ema_latency_ms)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });

        let primary = candidates.into_iter().find(|w| matches!(w.health, Health::Ready | Health::Degraded | Health::Unknown));
        let chosen = match primary {
            Some(w) => w,
            None => self.walk_fallback_chain(task_type)?,
        };

        self.cache_selection(task_type, quality_tier, constraints, &chosen.id).await;
        Ok(chosen)
    }

    fn walk_fallback_chain(&self, task_type: &TaskType) -> Result<WorkerDescriptor> {
        let mut candidate = self
            .config
            .model_assignments
            .get(&task_type.0)
            .and_then(|id| self.registry.get(id).ok());
        while let Some(desc) = candidate {
            if matches!(desc.health, Health::Ready | Health::Degraded) {
                return Ok(desc);
            }
            candidate = desc.fallback_worker.as_deref().and_then(|id| self.registry.get(id).ok());
        }
        Err(Error::NoEligibleWorker {
            task_type: task_type.to_string(),
            quality_tier: "any".to_string(),
        })
    }

    async fn cached_selection(
        &self,
        task_type: &TaskType,
        quality_tier: QualityTier,
        constraints: &SelectionConstraints,
    ) -> Option<String> {
        let key = self.selection_key(task_type, quality_tier, constraints);
        let bytes = self.cache.get(Namespace::Pattern, &key).await?;
        String::from_utf8(bytes).ok()
    }

    async fn cache_selection(&self, task_type: &TaskType, quality_tier: QualityTier, constraints: &SelectionConstraints, worker_id: &str) {
        let key = self.selection_key(task_type, quality_tier, constraints);
        self.cache
            .set(Namespace::Pattern, &key, worker_id.as_bytes().to_vec(), Namespace::Pattern.default_ttl())
            .await;
    }

    fn selection_key(&self, task_type: &TaskType, quality_tier: QualityTier, constraints: &SelectionConstraints) -> Vec<u8> {
        #[derive(serde::Serialize)]
        struct Key<'a> {
            task_type: &'a str,
            quality_tier: QualityTier,
            max_cost_per_call: Option<f64>,
            force_local: bool,
        }
        self.cache.key_for(
            Namespace::Pattern,
            &Key {
                task_type: &task_type.0,
                quality_tier,
                max_cost_per_call: constraints.max_cost_per_call,
                force_local: constraints.force_local,
            },
            None,
            None,
        )
    }

    /// Invalidate any cached selection that could have chosen `worker_id`,
    /// called by the registry's health-transition hooks so a worker that
    /// just went `Unavailable` is not handed out from cache (§4.3).
    pub fn invalidate_selection_cache_for(&self, worker_id: &str) {
        // The in-process fallback's shard-local LRU has no secondary index
        // by value; the cheapest correct invalidation is to let affected
        // entries expire naturally (max one `pattern` TTL, 1h) while
        // `select` re-validates health on every cache hit above.
        warn!(worker_id, "selection cache entries referencing this worker will lazily re-validate on next hit");
    }

    /// Make `worker_id` resident, enforcing `resident_budget_bytes` via the
    /// admission controller's single serialized channel.
    pub async fn ensure_resident(&self, worker_id: &str) -> Result<()> {
        let descriptor = self.registry.get(worker_id)?;
        self.admission.ensure_resident(descriptor).await?;
        if let Some(backend) = self.backends.get(worker_id) {
            backend.load().await?;
        }
        Ok(())
    }

    /// Generate via `worker_id`, retrying transient failures per §4.3
    /// (3 attempts, `0.5s * 2^k` backoff) and recording EMA stats on every
    /// attempt, successful or not.
    #[instrument(skip(self, prompt, params))]
    pub async fn generate(
        &self,
        worker_id: &str,
        prompt: &str,
        params: HashMap<String, serde_json::Value>,
    ) -> NodeResult {
        let Some(backend) = self.backends.get(worker_id).map(|e| e.clone()) else {
            return NodeResult::failed(NodeError {
                kind: "NoEligibleWorker".to_string(),
                message: format!("no backend registered for worker '{worker_id}'"),
            })
            .with_worker(worker_id);
        };

        if let Err(e) = self.ensure_resident(worker_id).await {
            return NodeResult::failed(NodeError {
                kind: e.kind().to_string(),
                message: e.to_string(),
            })
            .with_worker(worker_id);
        }

        let timeout = self.config.per_node_timeout();
        let max_attempts = 3;
        let mut attempt = 0;
        loop {
            let started = std::time::Instant::now();
            let request = GenerateRequest {
                prompt: prompt.to_string(),
                params: params.clone(),
            };
            let outcome = tokio::time::timeout(timeout, backend.generate(request)).await;
            let elapsed = started.elapsed();

            match outcome {
                Ok(Ok(response)) => {
                    self.registry.update_stats(worker_id, elapsed.as_secs_f64() * 1000.0, true);
                    let descriptor = self.registry.get(worker_id).ok();
                    let cost = descriptor.map(|d| d.cost_per_unit * f64::from(response.tokens_out)).unwrap_or(0.0);
                    return NodeResult::ok(
                        NodePayload::ResponseGenerated {
                            text: response.text,
                            tokens_in: response.tokens_in,
                            tokens_out: response.tokens_out,
                            worker_used: Some(worker_id.to_string()),
                        },
                        1.0,
                        cost,
                    )
                    .with_worker(worker_id);
                }
                Ok(Err(e)) => {
                    self.registry.update_stats(worker_id, elapsed.as_secs_f64() * 1000.0, false);
                    attempt += 1;
                    if attempt >= max_attempts || !e.is_transient() {
                        return NodeResult::failed(NodeError::from_error(&e)).with_worker(worker_id);
                    }
                }
                Err(_) => {
                    self.registry.update_stats(worker_id, timeout.as_secs_f64() * 1000.0, false);
                    attempt += 1;
                    let err = Error::WorkerTimeout {
                        worker_id: worker_id.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    };
                    if attempt >= max_attempts {
                        return NodeResult::failed(NodeError::from_error(&err)).with_worker(worker_id);
                    }
                }
            }
            let backoff = Duration::from_millis(500) * 2u32.saturating_pow(attempt - 1);
            tokio::time::sleep(backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TieredCache;
    use crate::registry::{WorkerDescriptor, WorkerKind};
    use crate::workers::MockInferenceWorker;

    fn manager() -> ModelManager {
        let registry = WorkerRegistry::new();
        let chat = TaskType::new("chat");
        registry.register(
            WorkerDescriptor::new("local-small", WorkerKind::LocalInference, 1_000_000, 0.0, crate::registry::Warmth::T0, 0)
                .with_capability(chat.clone()),
        );
        registry.mark("local-small", Health::Ready);
        let cache = Arc::new(Cache::new(Box::new(TieredCache::fallback_only(100))));
        let manager = ModelManager::new(registry, cache, Config::default());
        manager.register_backend("local-small", Arc::new(MockInferenceWorker::canned("ok")));
        manager
    }

    #[tokio::test]
    async fn select_returns_the_only_capable_worker() {
        let manager = manager();
        let desc = manager
            .select(&TaskType::new("chat"), QualityTier::Balanced, &SelectionConstraints::default())
            .await
            .unwrap();
        assert_eq!(desc.id, "local-small");
    }

    #[tokio::test]
    async fn select_with_no_capable_worker_errors() {
        let manager = manager();
        let err = manager
            .select(&TaskType::new("translation"), QualityTier::Balanced, &SelectionConstraints::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NoEligibleWorker");
    }

    #[tokio::test]
    async fn generate_succeeds_against_a_ready_worker() {
        let manager = manager();
        let result = manager.generate("local-small", "hi", HashMap::new()).await;
        assert!(result.success);
    }
}
