//! Worker Registry (C2).
//!
//! Holds descriptors for inference workers and external providers:
//! capabilities, cost model, resource footprint, health. Health is derived
//! from a periodic probe task rather than asserted by callers.

mod probe;

pub use probe::{ProbeOutcome, ProbeTask};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Smoothing factor for the worker stats EMA. Fixed by design (§4.2).
pub const EMA_ALPHA: f64 = 0.2;

/// Number of samples considered for the `degraded` success-rate window.
pub const HEALTH_WINDOW: usize = 20;

/// Consecutive probe failures before a worker is marked `unavailable`.
pub const UNAVAILABLE_AFTER_FAILURES: u32 = 3;

/// Kind of worker or external provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerKind {
    /// A locally-hosted inference daemon.
    LocalInference,
    /// A remote (network) inference API.
    RemoteInference,
    /// A web search provider.
    WebSearch,
    /// A web page scraper.
    Scraper,
}

/// Warmth tier governing resident-set eviction priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Warmth {
    /// Pinned at startup, never evicted.
    T0,
    /// Loaded on first use, kept until idle-evicted under pressure.
    T1,
    /// Loaded on demand, evicted promptly when idle.
    T2,
    /// Never auto-loaded; requires explicit `ensure_resident`.
    T3,
}

/// Live health of a worker, derived by the probe task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Health {
    /// Never probed yet.
    Unknown,
    /// A probe is currently in flight.
    Probing,
    /// Last probe succeeded within `probe_interval`.
    Ready,
    /// Recent success rate fell below 0.5 over the health window.
    Degraded,
    /// Three consecutive probe failures.
    Unavailable,
}

/// A task-type tag, e.g. `classification`, `chat`, `synthesis`. Kept as an
/// opaque interned-ish string newtype rather than a closed enum: task types
/// are configuration data (`model_assignments.<task_type>`), not a compiled
/// set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskType(pub String);

impl TaskType {
    /// Build a task type tag from any string-like value.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rolling per-worker statistics, updated by [`WorkerRegistry::update_stats`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Exponential moving average of call latency, in milliseconds.
    pub ema_latency_ms: f64,
    /// Exponential moving average of call success (0..1).
    pub ema_success: f64,
    /// Total calls observed.
    pub total_calls: u64,
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self {
            ema_latency_ms: 0.0,
            ema_success: 1.0,
            total_calls: 0,
        }
    }
}

impl WorkerStats {
    fn observe(&mut self, latency_ms: f64, success: bool) {
        let sample_success = if success { 1.0 } else { 0.0 };
        if self.total_calls == 0 {
            self.ema_latency_ms = latency_ms;
            self.ema_success = sample_success;
        } else {
            self.ema_latency_ms = EMA_ALPHA * latency_ms + (1.0 - EMA_ALPHA) * self.ema_latency_ms;
            self.ema_success = EMA_ALPHA * sample_success + (1.0 - EMA_ALPHA) * self.ema_success;
        }
        self.total_calls += 1;
    }
}

/// Descriptor for a single worker or external provider (C2 data model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    /// Stable worker id, matches `worker.<id>` config keys.
    pub id: String,
    /// Worker kind.
    pub kind: WorkerKind,
    /// Task-type tags this worker can serve.
    pub capabilities: HashSet<TaskType>,
    /// Estimated resident footprint, in bytes.
    pub footprint_bytes: u64,
    /// Cost per call unit.
    pub cost_per_unit: f64,
    /// Warmth tier.
    pub warmth: Warmth,
    /// Live health, derived by the probe task.
    pub health: Health,
    /// Rolling stats.
    pub stats: WorkerStats,
    /// Worker id to fall back to when selection excludes this one.
    pub fallback_worker: Option<String>,
    /// Relative size rank within its capability set, used to demote/promote
    /// for `minimal`/`premium` quality tiers. Smaller is cheaper/smaller.
    pub size_rank: u32,
    /// Consecutive probe failures, private bookkeeping for health transitions.
    pub(crate) consecutive_failures: u32,
    /// Recent success samples (bounded to [`HEALTH_WINDOW`]) for the
    /// `degraded` determination.
    pub(crate) recent_successes: Vec<bool>,
    /// Wall-clock time this worker was last used, for idle-eviction.
    #[serde(skip, default = "Instant::now")]
    pub(crate) last_used: Instant,
}

impl WorkerDescriptor {
    /// Construct a descriptor with defaulted health/stats, the shape a
    /// registry entry has immediately after configuration but before the
    /// first probe.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        kind: WorkerKind,
        footprint_bytes: u64,
        cost_per_unit: f64,
        warmth: Warmth,
        size_rank: u32,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            capabilities: HashSet::new(),
            footprint_bytes,
            cost_per_unit,
            warmth,
            health: Health::Unknown,
            stats: WorkerStats::default(),
            fallback_worker: None,
            size_rank,
            consecutive_failures: 0,
            recent_successes: Vec::new(),
            last_used: Instant::now(),
        }
    }

    /// Builder-style capability addition.
    #[must_use]
    pub fn with_capability(mut self, task_type: TaskType) -> Self {
        self.capabilities.insert(task_type);
        self
    }

    /// Builder-style fallback worker id.
    #[must_use]
    pub fn with_fallback(mut self, worker_id: impl Into<String>) -> Self {
        self.fallback_worker = Some(worker_id.into());
        self
    }

    fn record_probe(&mut self, success: bool) {
        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
        self.recent_successes.push(success);
        if self.recent_successes.len() > HEALTH_WINDOW {
            self.recent_successes.remove(0);
        }
        self.health = self.derive_health();
    }

    fn derive_health(&self) -> Health {
        if self.consecutive_failures >= UNAVAILABLE_AFTER_FAILURES {
            return Health::Unavailable;
        }
        if self.recent_successes.len() >= HEALTH_WINDOW {
            let successes = self.recent_successes.iter().filter(|s| **s).count();
            let rate = successes as f64 / self.recent_successes.len() as f64;
            if rate < 0.5 {
                return Health::Degraded;
            }
        }
        Health::Ready
    }
}

/// The shared worker registry. Cheaply cloneable; interior state lives in a
/// `DashMap` so reads never block writers of other keys.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: Arc<DashMap<String, WorkerDescriptor>>,
}

impl WorkerRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            workers: Arc::new(DashMap::new()),
        }
    }

    /// Register or replace a worker descriptor.
    pub fn register(&self, descriptor: WorkerDescriptor) {
        self.workers.insert(descriptor.id.clone(), descriptor);
    }

    /// List workers, optionally filtered by kind and/or capability.
    #[must_use]
    pub fn list(&self, kind: Option<WorkerKind>, capability: Option<&TaskType>) -> Vec<WorkerDescriptor> {
        self.workers
            .iter()
            .map(|e| e.value().clone())
            .filter(|w| kind.map_or(true, |k| w.kind == k))
            .filter(|w| capability.map_or(true, |c| w.capabilities.contains(c)))
            .collect()
    }

    /// Fetch a single worker descriptor by id.
    pub fn get(&self, id: &str) -> Result<WorkerDescriptor> {
        self.workers
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::NoEligibleWorker {
                task_type: String::new(),
                quality_tier: String::new(),
            })
    }

    /// Set a worker's health directly (used by tests and manual overrides;
    /// the probe task drives transitions in production via
    /// [`WorkerRegistry::record_probe_outcome`]).
    pub fn mark(&self, id: &str, health: Health) {
        if let Some(mut entry) = self.workers.get_mut(id) {
            entry.health = health;
        }
    }

    /// Update rolling stats for a worker after a completed call.
    pub fn update_stats(&self, id: &str, latency_ms: f64, success: bool) {
        if let Some(mut entry) = self.workers.get_mut(id) {
            entry.stats.observe(latency_ms, success);
            entry.last_used = Instant::now();
        }
    }

    /// Feed a probe result into the worker's health state machine.
    pub fn record_probe_outcome(&self, id: &str, success: bool) {
        if let Some(mut entry) = self.workers.get_mut(id) {
            entry.record_probe(success);
        }
    }

    /// Touch a worker's `last_used` timestamp (residency bookkeeping).
    pub fn touch(&self, id: &str) {
        if let Some(mut entry) = self.workers.get_mut(id) {
            entry.last_used = Instant::now();
        }
    }

    /// Time since a worker was last used, if known.
    #[must_use]
    pub fn idle_for(&self, id: &str) -> Option<Duration> {
        self.workers.get(id).map(|e| e.last_used.elapsed())
    }
}
