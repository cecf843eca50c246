//! The shared, typed execution state (§3's `ExecutionState`) and the
//! per-node result contract (§3's `NodeResult`).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller-supplied knob biasing worker selection toward cheaper/faster or
/// larger/better workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QualityTier {
    /// Demote to the smallest worker serving the capability.
    Minimal,
    /// Use the default selection mapping as-is.
    Balanced,
    /// Prefer larger/better workers within cost constraints.
    High,
    /// Promote to the largest worker serving the capability.
    Premium,
}

/// One turn of conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    /// `"user"` or `"assistant"` (or `"system"`).
    pub role: String,
    /// Turn content.
    pub content: String,
    /// Wall-clock timestamp the turn was recorded.
    pub ts: chrono::DateTime<chrono::Utc>,
}

/// A single cited search result, threaded from provider search through
/// enhancement and synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Result title.
    pub title: String,
    /// Source URL.
    pub url: String,
    /// Provider-returned snippet, possibly later replaced by enhanced content.
    pub snippet: String,
    /// Provider-reported relevance score in `[0, 1]`.
    pub relevance_score: f64,
    /// Set once `content_enhancer` has successfully scraped this result.
    pub enhanced: bool,
}

/// A citation attached to a synthesized answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Cited source title.
    pub title: String,
    /// Cited source URL.
    pub url: String,
}

/// The closed set of structured payloads a node can produce. `intermediate`
/// is keyed by producer-node name to this type, replacing the source
/// system's dynamically-typed `intermediate_results` mapping with a typed
/// sum type (per the design notes' re-architecture guidance).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum NodePayload {
    /// Produced by `context_loader`.
    ContextLoaded {
        /// Truncated recent history (last K exchanges).
        history: Vec<Exchange>,
        /// Summary of older entries, if any existed beyond the window.
        summary: Option<String>,
    },
    /// Produced by `intent_classifier`.
    IntentClassified {
        /// Classified intent label, or `"unknown"` on total failure.
        intent: String,
        /// Heuristic complexity score in `[0, 1]`.
        complexity_score: f64,
    },
    /// Produced by `response_generator`.
    ResponseGenerated {
        /// Generated text.
        text: String,
        /// Input token count.
        tokens_in: u32,
        /// Output token count.
        tokens_out: u32,
        /// Id of the worker that produced this response.
        worker_used: Option<String>,
    },
    /// Produced by `cache_writer`.
    CacheWritten,
    /// Produced by the search workflow's `router`.
    SearchRouted {
        /// Whether a search is needed at all for this query.
        search_needed: bool,
        /// Ordered provider ids to try.
        providers: Vec<String>,
        /// Maximum results to request.
        max_results: usize,
    },
    /// Produced by `provider_search`.
    ProviderSearched {
        /// Provider id that ultimately served the request.
        provider_used: String,
        /// Raw search results.
        results: Vec<SearchResult>,
    },
    /// Produced by `content_enhancer`.
    ContentEnhanced {
        /// Results after enhancement (un-enhanced ones kept as-is).
        results: Vec<SearchResult>,
    },
    /// Produced by `synthesiser`.
    Synthesized {
        /// Fused, cited answer text.
        text: String,
        /// Citation list.
        citations: Vec<Citation>,
        /// Combined confidence in `[0, 1]`.
        confidence: f64,
    },
    /// Produced by `finalise`.
    Finalised,
    /// Produced by a workflow's `error_handler`.
    ErrorHandled {
        /// Best-effort recovered text, if any could be assembled.
        recovered_text: Option<String>,
    },
}

/// Structured error/warning record appended to `state.errors` /
/// `state.warnings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Machine-readable error kind (matches [`crate::Error::kind`]).
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Node that produced this record.
    pub node: String,
}

/// Execution constraints supplied by the caller for a single invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Constraints {
    /// Drop workers whose cost-per-call exceeds this bound.
    pub max_cost_per_call: Option<f64>,
    /// Drop remote workers, keeping only local ones.
    pub force_local: bool,
    /// Hard cap on total cost for this single invocation, independent of
    /// the principal's budget ledger (Open Question resolution, §9).
    pub max_cost: Option<f64>,
}

/// The state object owned by a single in-flight request, mutated only by
/// the engine's currently-active node (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Unique id for this request.
    pub query_id: Uuid,
    /// Correlation id threaded through logs and the gateway response.
    pub correlation_id: Uuid,
    /// Principal (end user / API key) making the request.
    pub principal_id: String,
    /// Session id, used for conversation continuity.
    pub session_id: String,
    /// The original, immutable query text.
    pub original_query: String,
    /// Ordered conversation history prior to this request.
    pub conversation_history: Vec<Exchange>,
    /// Typed payloads keyed by producing node name.
    pub intermediate: HashMap<String, NodePayload>,
    /// Remaining monetary budget for this request's principal.
    pub budget_remaining: f64,
    /// Absolute wall-clock deadline for this request.
    #[serde(skip, default = "Instant::now")]
    pub deadline: Instant,
    /// Caller-supplied quality tier.
    pub quality_tier: QualityTier,
    /// Caller-supplied constraints.
    pub constraints: Constraints,
    /// Ordered sequence of node names actually run.
    pub execution_path: Vec<String>,
    /// Per-node confidence, in `[0, 1]`.
    pub confidences: HashMap<String, f64>,
    /// Per-node cost.
    pub costs: HashMap<String, f64>,
    /// Structured error records.
    pub errors: Vec<ErrorRecord>,
    /// Structured warning records.
    pub warnings: Vec<ErrorRecord>,
    /// Final response text, non-empty iff no unhandled error reached the
    /// terminal node.
    pub final_response: String,
    /// Structured response metadata (citations, error_kind, etc).
    pub response_meta: serde_json::Value,
    /// Monetary budget the request started with, used to check the cost
    /// invariant `sum(costs) <= (starting_budget - budget_remaining) + eps`.
    pub starting_budget: f64,
}

impl ExecutionState {
    /// Construct a fresh state at request admission.
    #[must_use]
    pub fn new(
        principal_id: impl Into<String>,
        session_id: impl Into<String>,
        original_query: impl Into<String>,
        budget_remaining: f64,
        deadline_from_now: Duration,
        quality_tier: QualityTier,
    ) -> Self {
        Self {
            query_id: Uuid::new_v4(),
            correlation_id: Uuid::new_v4(),
            principal_id: principal_id.into(),
            session_id: session_id.into(),
            original_query: original_query.into(),
            conversation_history: Vec::new(),
            intermediate: HashMap::new(),
            budget_remaining,
            deadline: Instant::now() + deadline_from_now,
            quality_tier,
            constraints: Constraints::default(),
            execution_path: Vec::new(),
            confidences: HashMap::new(),
            costs: HashMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            final_response: String::new(),
            response_meta: serde_json::Value::Null,
            starting_budget: budget_remaining,
        }
    }

    /// Time remaining until `deadline`, or `Duration::ZERO` if already past.
    #[must_use]
    pub fn time_remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn is_past_deadline(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Merge a node's result into this state. Only `node_name`'s own key in
    /// `intermediate` is written; cost/time/confidence accumulate; the
    /// node name is appended to `execution_path` exactly once.
    pub(crate) fn apply_result(&mut self, node_name: &str, result: &super::node::NodeResult) {
        self.execution_path.push(node_name.to_string());
        if let Some(data) = &result.data {
            self.intermediate.insert(node_name.to_string(), data.clone());
        }
        *self.costs.entry(node_name.to_string()).or_insert(0.0) += result.cost;
        self.confidences.insert(node_name.to_string(), result.confidence);
        if let Some(err) = &result.error {
            self.errors.push(ErrorRecord {
                kind: err.kind.clone(),
                message: err.message.clone(),
                node: node_name.to_string(),
            });
        }
    }

    /// Sum of all recorded per-node costs.
    #[must_use]
    pub fn total_cost(&self) -> f64 {
        self.costs.values().sum()
    }
}
