//! The node contract (§4.4): a pure function of [`ExecutionState`]
//! returning a [`NodeResult`], wrapped by the engine with timing, timeouts
//! and retries.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::state::{ExecutionState, NodePayload};

/// A structured error attached to a [`NodeResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeError {
    /// Machine-readable kind, matching [`crate::Error::kind`].
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl NodeError {
    /// Build a node error from a crate [`crate::Error`].
    #[must_use]
    pub fn from_error(err: &crate::Error) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// The value every node returns; the engine merges it into the shared
/// state (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    /// Whether the node's own logic completed successfully.
    pub success: bool,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Typed payload to merge into `state.intermediate[node_name]`.
    pub data: Option<NodePayload>,
    /// Cost incurred by this node's execution.
    pub cost: f64,
    /// Wall-clock execution time, recorded by the engine regardless of
    /// outcome.
    #[serde(skip, default)]
    pub execution_time: Duration,
    /// Worker id used to produce this result, if any.
    pub worker_used: Option<String>,
    /// Structured error, if any.
    pub error: Option<NodeError>,
    /// Whether the node itself already resolved `error` into a safe,
    /// user-visible outcome; when `true`, the engine does not route to
    /// `error_handler` even though `error` is set.
    pub handled: bool,
    /// Free-form metadata (e.g. provider-specific diagnostics).
    pub metadata: serde_json::Value,
}

impl NodeResult {
    /// A successful result with no error and the given payload/cost.
    #[must_use]
    pub fn ok(data: NodePayload, confidence: f64, cost: f64) -> Self {
        Self {
            success: true,
            confidence,
            data: Some(data),
            cost,
            execution_time: Duration::ZERO,
            worker_used: None,
            error: None,
            handled: false,
            metadata: serde_json::Value::Null,
        }
    }

    /// A failed, unhandled result (will route to `error_handler` unless
    /// the node set `handled = true` via [`NodeResult::with_handled`]).
    #[must_use]
    pub fn failed(error: NodeError) -> Self {
        Self {
            success: false,
            confidence: 0.0,
            data: None,
            cost: 0.0,
            execution_time: Duration::ZERO,
            worker_used: None,
            error: Some(error),
            handled: false,
            metadata: serde_json::Value::Null,
        }
    }

    /// Mark this result (whether successful or not) as worker-attributed.
    #[must_use]
    pub fn with_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_used = Some(worker_id.into());
        self
    }

    /// Mark an error result as already handled by the node itself.
    #[must_use]
    pub fn with_handled(mut self, handled: bool) -> Self {
        self.handled = handled;
        self
    }

    /// Attach free-form metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A node-level declaration of retry behavior, evaluated transparently to
/// routing (only the final attempt's `NodeResult` is merged).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Base backoff; attempt `k` (0-indexed) waits `backoff * 2^k`.
    pub backoff: Duration,
    /// Error kinds eligible for retry.
    pub retry_on: HashSet<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::from_millis(500),
            retry_on: HashSet::new(),
        }
    }
}

impl RetryPolicy {
    /// The design-fixed default for worker generation calls: 3 attempts,
    /// `0.5s * 2^k` backoff, retrying transient worker/store failures
    /// (§4.3).
    #[must_use]
    pub fn worker_default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
            retry_on: ["WorkerTimeout", "TransientStoreError"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }

    /// Backoff before attempt `attempt` (0-indexed): `backoff * 2^attempt`.
    pub(crate) fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff * 2u32.saturating_pow(attempt)
    }
}

/// A pure function from [`ExecutionState`] to [`NodeResult`], wrapped by
/// the engine with timing, timeouts and retries (§4.4). Implementations
/// must not mutate `state` directly and must respect `state.deadline`.
#[async_trait]
pub trait Node: Send + Sync {
    /// The node's name, as it appears in `execution_path` and in edge
    /// declarations.
    fn name(&self) -> &str;

    /// Run this node once against `state`, without retry or timeout
    /// wrapping (the engine applies both around this call).
    async fn run(&self, state: &ExecutionState) -> NodeResult;

    /// This node's retry policy. Defaults to no retries.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Per-node timeout override; `None` uses the graph engine's default
    /// (`per_node_timeout_ms`).
    fn timeout_override(&self) -> Option<Duration> {
        None
    }
}

/// Adapt a plain async closure into a [`Node`], the way the teacher's
/// `StateGraph::add_node_from_fn` lets tests stand up minimal graphs
/// without a full `impl Node` block.
pub struct FnNode<F> {
    name: String,
    func: F,
}

impl<F> FnNode<F> {
    /// Wrap `func` as a node named `name`.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F, Fut> Node for FnNode<F>
where
    F: Fn(&ExecutionState) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = NodeResult> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, state: &ExecutionState) -> NodeResult {
        (self.func)(state).await
    }
}
