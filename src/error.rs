//! Crate-wide error taxonomy.
//!
//! Errors here are the *kinds* named in the orchestrator's error design:
//! they are carried as data on [`crate::graph::state::NodeResult`] rather
//! than raised as control flow across node boundaries. The engine only
//! ever surfaces an [`Error`] to a caller when both the primary path and
//! the workflow's `error_handler` have failed.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// The full error taxonomy consumed by the engine, router, cache and model
/// manager. Variant names match the kinds enumerated in the orchestrator's
/// error handling design one-to-one.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// A monetary or token budget would underflow. No cost is recorded.
    #[error("budget exceeded for principal {principal_id}: requested {requested}, remaining {remaining}")]
    BudgetExceeded {
        /// Principal whose budget was exhausted.
        principal_id: String,
        /// Amount the caller attempted to decrement.
        requested: f64,
        /// Balance remaining before the attempt.
        remaining: f64,
    },

    /// The backing store could not guarantee atomicity for a budget
    /// decrement; the caller must treat the balance as unknown and refuse
    /// the request rather than silently degrading.
    #[error("budget unknown for principal {principal_id}: backing store unavailable")]
    BudgetUnknown {
        /// Principal whose budget could not be checked.
        principal_id: String,
    },

    /// Per-principal rate cap reached.
    #[error("rate limited for principal {principal_id}: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Principal that was rate limited.
        principal_id: String,
        /// Suggested wait before retrying, in milliseconds.
        retry_after_ms: u64,
    },

    /// Wall-clock deadline passed mid-execution.
    #[error("deadline exceeded at node '{node}' after {elapsed_ms}ms")]
    DeadlineExceeded {
        /// Node that was executing when the deadline passed.
        node: String,
        /// Wall-clock time elapsed since request admission, in milliseconds.
        elapsed_ms: u64,
    },

    /// Per-call timeout against a worker.
    #[error("worker '{worker_id}' timed out after {timeout_ms}ms")]
    WorkerTimeout {
        /// Worker that timed out.
        worker_id: String,
        /// Configured timeout that was exceeded.
        timeout_ms: u64,
    },

    /// Selection could not find a worker satisfying the given constraints.
    #[error("no eligible worker for task type '{task_type}' at quality '{quality_tier}'")]
    NoEligibleWorker {
        /// Requested task type tag.
        task_type: String,
        /// Requested quality tier.
        quality_tier: String,
    },

    /// The admission controller's residency queue is full.
    #[error("resident set busy: queue depth {queue_depth} exceeds bound {bound}")]
    ResidentSetBusy {
        /// Current queue depth observed.
        queue_depth: usize,
        /// Configured bound on the queue.
        bound: usize,
    },

    /// Making a worker resident failed (load error, not capacity).
    #[error("failed to load worker '{worker_id}': {reason}")]
    LoadFailed {
        /// Worker that failed to load.
        worker_id: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The resident set is already at `resident_budget_bytes` and no
    /// evictable candidate exists.
    #[error("resident set full: {footprint_bytes} bytes requested, {available_bytes} available")]
    ResidentSetFull {
        /// Footprint of the worker that could not be admitted.
        footprint_bytes: u64,
        /// Bytes available in the resident budget at the time of the attempt.
        available_bytes: u64,
    },

    /// A predicate returned a label absent from its conditional-edge
    /// mapping, or the graph's static configuration is otherwise
    /// inconsistent. Counts as an internal bug signal.
    #[error("graph routing error at node '{node}': {reason}")]
    GraphRoutingError {
        /// Node whose outgoing edge could not be resolved.
        node: String,
        /// Description of the inconsistency.
        reason: String,
    },

    /// Generation output violated content policy; routed to the workflow's
    /// `error_handler`, which produces a safe refusal.
    #[error("content policy rejected output from worker '{worker_id}'")]
    ContentPolicyRejected {
        /// Worker whose output was rejected.
        worker_id: String,
    },

    /// The cache backend is unreachable. Reads degrade to miss, writes
    /// degrade to no-op (except `decr_bounded`, which surfaces as
    /// [`Error::BudgetUnknown`]).
    #[error("transient store error: {0}")]
    TransientStoreError(String),

    /// A node's graph definition is invalid at registration time.
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// A workflow's inputs failed validation against its declared schema.
    #[error("invalid workflow input for '{workflow_id}': {reason}")]
    InvalidInput {
        /// Workflow the input was validated against.
        workflow_id: String,
        /// Validation failure description.
        reason: String,
    },

    /// Catch-all. Always logged with the full state snapshot (minus
    /// secrets) for post-mortem.
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl Error {
    /// Short machine-readable kind tag, used in `response_meta.error_kind`
    /// and in bandit/metrics labels. Stable across error message wording
    /// changes.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Error::BudgetExceeded { .. } => "BudgetExceeded",
            Error::BudgetUnknown { .. } => "BudgetUnknown",
            Error::RateLimited { .. } => "RateLimited",
            Error::DeadlineExceeded { .. } => "DeadlineExceeded",
            Error::WorkerTimeout { .. } => "WorkerTimeout",
            Error::NoEligibleWorker { .. } => "NoEligibleWorker",
            Error::ResidentSetBusy { .. } => "ResidentSetBusy",
            Error::LoadFailed { .. } => "LoadFailed",
            Error::ResidentSetFull { .. } => "ResidentSetFull",
            Error::GraphRoutingError { .. } => "GraphRoutingError",
            Error::ContentPolicyRejected { .. } => "ContentPolicyRejected",
            Error::TransientStoreError(_) => "TransientStoreError",
            Error::InvalidGraph(_) => "InvalidGraph",
            Error::InvalidInput { .. } => "InvalidInput",
            Error::Unknown(_) => "Unknown",
        }
    }

    /// Whether this error kind is retryable per a node's own retry policy
    /// (connection/timeout/5xx-equivalent class).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::WorkerTimeout { .. } | Error::TransientStoreError(_)
        )
    }
}
