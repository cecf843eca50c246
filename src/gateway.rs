//! The gateway (§2): the single narrow entry point external callers use to
//! invoke a workflow, wrapping admission (rate limit, budget) around graph
//! execution and response assembly.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::cache::{BudgetLedger, Cache, Namespace};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::graph::state::{Constraints, QualityTier};
use crate::graph::{CompiledGraph, ExecutionState, StopReason};

/// Which compiled workflow a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowId {
    /// The conversational chat workflow (§5.1).
    Chat,
    /// The web-search-backed synthesis workflow (§5.2).
    Search,
}

/// A single invocation request.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Workflow to run.
    pub workflow_id: WorkflowId,
    /// Principal (end user / API key) making the request.
    pub principal_id: String,
    /// Session id, for conversation continuity.
    pub session_id: String,
    /// The raw user query.
    pub query: String,
    /// Caller-supplied quality tier.
    pub quality_tier: QualityTier,
    /// Caller-supplied constraints.
    pub constraints: Constraints,
}

/// The response handed back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct InvokeResponse {
    /// Unique id for this request.
    pub query_id: Uuid,
    /// Correlation id for log/trace joins.
    pub correlation_id: Uuid,
    /// Final response text.
    pub final_response: String,
    /// Structured response metadata (citations, error_kind, etc).
    pub response_meta: serde_json::Value,
    /// Ordered node names actually run.
    pub execution_path: Vec<String>,
    /// Total cost incurred across all nodes.
    pub total_cost: f64,
}

/// Owns the compiled workflow graphs and the shared cache/config the
/// gateway needs to admit and execute a request.
pub struct Gateway {
    cache: Arc<Cache>,
    config: Config,
    chat_graph: CompiledGraph,
    search_graph: CompiledGraph,
}

impl Gateway {
    /// Wire a gateway over the given compiled graphs.
    #[must_use]
    pub fn new(cache: Arc<Cache>, config: Config, chat_graph: CompiledGraph, search_graph: CompiledGraph) -> Self {
        Self {
            cache,
            config,
            chat_graph,
            search_graph,
        }
    }

    /// Run `request` end-to-end: rate limit, reserve an estimated cost
    /// against the principal's budget before any node runs, execute the
    /// graph, assemble the response, and reconcile the reservation against
    /// the cost actually incurred.
    #[instrument(skip(self, request), fields(principal = %request.principal_id, workflow = ?request.workflow_id))]
    pub async fn invoke(&self, request: InvokeRequest) -> Result<InvokeResponse> {
        self.check_rate_limit(&request.principal_id).await?;

        let reserved_cost = request
            .constraints
            .max_cost
            .unwrap_or(self.config.default_request_cost_estimate);
        let budget_remaining = self.reserve_budget(&request.principal_id, reserved_cost).await?;
        let deadline = self.config.request_deadline_default();

        let mut state = ExecutionState::new(
            request.principal_id.clone(),
            request.session_id.clone(),
            request.query.clone(),
            budget_remaining,
            deadline,
            request.quality_tier,
        );
        state.constraints = request.constraints;

        let graph = match request.workflow_id {
            WorkflowId::Chat => &self.chat_graph,
            WorkflowId::Search => &self.search_graph,
        };

        let (mut final_state, reason) = graph.execute(state, &self.config, None).await;
        crate::workflows::assemble_final_response(&mut final_state);

        let total_cost = final_state.total_cost();
        self.reconcile_budget(&request.principal_id, reserved_cost, total_cost).await;

        let workflow_label = match request.workflow_id {
            WorkflowId::Chat => "chat",
            WorkflowId::Search => "search",
        };
        crate::observability::metrics()
            .requests_total
            .with_label_values(&[workflow_label, &format!("{reason:?}")])
            .inc();

        info!(
            query_id = %final_state.query_id,
            reason = ?reason,
            total_cost,
            nodes = final_state.execution_path.len(),
            "request completed"
        );

        if reason == StopReason::Unrecoverable && final_state.final_response.is_empty() {
            return Err(final_state
                .errors
                .last()
                .map(|e| Error::Unknown(e.message.clone()))
                .unwrap_or_else(|| Error::Unknown("workflow ended without a response".to_string())));
        }

        Ok(InvokeResponse {
            query_id: final_state.query_id,
            correlation_id: final_state.correlation_id,
            final_response: final_state.final_response,
            response_meta: final_state.response_meta,
            execution_path: final_state.execution_path,
            total_cost,
        })
    }

    async fn check_rate_limit(&self, principal_id: &str) -> Result<()> {
        let limit = *self.config.rate_limits.get(principal_id).unwrap_or(&u32::MAX);
        if limit == u32::MAX {
            return Ok(());
        }
        let key = format!("rate:{principal_id}").into_bytes();
        let count = self.cache.incr(Namespace::Rate, &key, 1, Duration::from_secs(60)).await;
        if count > i64::from(limit) {
            return Err(Error::RateLimited {
                principal_id: principal_id.to_string(),
                retry_after_ms: 60_000,
            });
        }
        Ok(())
    }

    /// Seed a principal's ledger from its configured cap if this is its
    /// first request, then atomically reserve `amount` against it. Fails
    /// with [`Error::BudgetExceeded`]/[`Error::BudgetUnknown`] before any
    /// node has run, per §8's budget-exhaustion scenario. Returns the
    /// balance remaining after the reservation.
    async fn reserve_budget(&self, principal_id: &str, amount: f64) -> Result<f64> {
        let key = format!("budget:{principal_id}").into_bytes();
        if self.cache.get(Namespace::Budget, &key).await.is_none() {
            let cap = *self.config.monetary_budgets.get(principal_id).unwrap_or(&f64::MAX);
            if cap.is_finite() {
                let ledger = BudgetLedger::new(&self.cache);
                ledger.grant(principal_id, cap, Duration::from_secs(30 * 24 * 60 * 60)).await;
            }
        }
        let ledger = BudgetLedger::new(&self.cache);
        ledger.decrement(principal_id, amount).await
    }

    /// Reconcile the pre-flight reservation against the cost actually
    /// incurred: refund the unused portion, or charge the shortfall if
    /// execution cost more than reserved.
    async fn reconcile_budget(&self, principal_id: &str, reserved: f64, actual: f64) {
        let delta = reserved - actual;
        if delta.abs() <= f64::EPSILON {
            return;
        }
        let ledger = BudgetLedger::new(&self.cache);
        if delta > 0.0 {
            ledger.refund(principal_id, delta).await;
        } else if let Err(e) = ledger.decrement(principal_id, -delta).await {
            tracing::warn!(principal_id, error = %e, "failed to settle cost beyond the pre-flight reservation");
        }
    }
}
