//! Startup configuration surface.
//!
//! Every option the core reads at startup is a field here. The primary
//! format is TOML; [`Config::from_yaml_str`] is kept for operators who ship
//! YAML-based deployment manifests, mirroring the teacher's simultaneous
//! support for `toml` and `serde_yml` document formats elsewhere in its
//! config/document loading paths.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::registry::{TaskType, Warmth};

/// Top-level configuration, deserialized from a TOML (or YAML) document at
/// process startup and handed to every component's constructor explicitly —
/// no module-level singleton reads it back out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upper bound on sum of loaded worker footprints, in bytes.
    pub resident_budget_bytes: u64,
    /// Default graph engine per-node timeout, in milliseconds.
    pub per_node_timeout_ms: u64,
    /// Default wall-clock budget for a request, in milliseconds.
    pub request_deadline_default_ms: u64,
    /// Probability of shadow execution per request.
    pub shadow_rate: f64,
    /// Cost cap for shadow executions per rolling window.
    pub shadow_budget_per_window: f64,
    /// Per-principal-tier requests-per-minute rate limits.
    pub rate_limits: HashMap<String, u32>,
    /// Per-principal-tier monetary caps per billing window.
    pub monetary_budgets: HashMap<String, f64>,
    /// Cache backend URL (`None` uses the in-process fallback exclusively).
    pub cache_backing_url: Option<String>,
    /// Capacity of the in-process fallback cache, entries per namespace.
    pub cache_fallback_size: usize,
    /// Bandit checkpoint interval, in milliseconds.
    pub bandit_checkpoint_interval_ms: u64,
    /// Minimum empirical success rate before an arm is quarantined.
    pub bandit_min_success: f64,
    /// Window size (selections) over which bandit success rate is measured.
    pub bandit_quarantine_window: usize,
    /// Declared worker descriptors, by id.
    pub workers: HashMap<String, WorkerConfig>,
    /// Default `task_type -> worker_id` selection mapping.
    pub model_assignments: HashMap<String, String>,
    /// Residency discipline: warmth tier -> ordered worker ids.
    pub priority_tiers: HashMap<Warmth, Vec<String>>,
    /// Idle threshold after which a T1 worker becomes evictable, ms.
    pub t1_idle_threshold_ms: u64,
    /// Idle threshold after which a T2 worker is evicted, ms.
    pub t2_idle_threshold_ms: u64,
    /// Cooperative-cancellation grace period, in milliseconds.
    pub cancel_grace_ms: u64,
    /// Maximum depth of the admission controller's FIFO queue.
    pub admission_queue_bound: usize,
    /// Conservative per-request cost estimate the gateway reserves against
    /// a principal's budget before the model manager has selected a worker,
    /// used when the caller supplies no `constraints.max_cost`.
    pub default_request_cost_estimate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resident_budget_bytes: 16 * 1024 * 1024 * 1024,
            per_node_timeout_ms: 30_000,
            request_deadline_default_ms: 30_000,
            shadow_rate: 0.3,
            shadow_budget_per_window: 1.0,
            rate_limits: HashMap::new(),
            monetary_budgets: HashMap::new(),
            cache_backing_url: None,
            cache_fallback_size: 10_000,
            bandit_checkpoint_interval_ms: 60_000,
            bandit_min_success: 0.3,
            bandit_quarantine_window: 100,
            workers: HashMap::new(),
            model_assignments: HashMap::new(),
            priority_tiers: HashMap::new(),
            t1_idle_threshold_ms: 5 * 60_000,
            t2_idle_threshold_ms: 30_000,
            cancel_grace_ms: 2_000,
            admission_queue_bound: 64,
            default_request_cost_estimate: 0.01,
        }
    }
}

impl Config {
    /// Parse configuration from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Unknown(format!("invalid config toml: {e}")))
    }

    /// Parse configuration from a YAML document.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        serde_yml::from_str(s).map_err(|e| Error::Unknown(format!("invalid config yaml: {e}")))
    }

    /// Default request deadline as a [`Duration`].
    #[must_use]
    pub fn request_deadline_default(&self) -> Duration {
        Duration::from_millis(self.request_deadline_default_ms)
    }

    /// Default per-node timeout as a [`Duration`].
    #[must_use]
    pub fn per_node_timeout(&self) -> Duration {
        Duration::from_millis(self.per_node_timeout_ms)
    }

    /// Cooperative-cancellation grace period as a [`Duration`].
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

/// Declaration for a single worker, as read from `worker.<id>.*` config keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker kind (local-inference, remote-inference, web-search, scraper).
    pub kind: String,
    /// Estimated resident footprint in bytes.
    pub footprint_bytes: u64,
    /// Cost per call unit.
    pub cost_per_unit: f64,
    /// Warmth tier governing residency discipline.
    pub warmth: Warmth,
    /// Task-type tags this worker can serve.
    pub capabilities: Vec<TaskType>,
    /// Worker id to fall back to when this one has no eligible candidate.
    pub fallback_worker: Option<String>,
}
