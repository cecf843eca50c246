//! Graph construction and compiled execution (§4.2, §4.4).
//!
//! Mirrors the teacher's `StateGraph` / `CompiledGraph` split: a
//! [`GraphBuilder`] accumulates nodes and edges, `compile()` runs
//! [`super::validate::validate`] once and freezes the result into an
//! immutable [`CompiledGraph`] that the gateway executes against.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::error::Error;

use super::node::{Node, NodeError, NodeResult};
use super::state::ExecutionState;
use super::validate::{self, GraphValidationResult};

/// Where an edge leads: another node, or the graph's terminal `END`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeTarget {
    /// Continue execution at the named node.
    Node(String),
    /// Terminate execution successfully.
    End,
}

/// One outgoing edge from a node.
#[derive(Debug, Clone)]
pub struct Edge {
    pub(crate) target: EdgeTarget,
    /// `Some(label)` for a conditional edge branch; `None` for an
    /// unconditional edge.
    pub(crate) label: Option<String>,
    /// The full set of labels the node's predicate may return, repeated on
    /// every edge from the same node so [`validate::validate`] can check
    /// completeness without a separate side table.
    pub(crate) conditional_labels: Option<Vec<String>>,
}

type Predicate = dyn Fn(&ExecutionState) -> String + Send + Sync;

/// Accumulates nodes and edges before a one-time validation pass.
pub struct GraphBuilder {
    pub(crate) nodes: HashMap<String, Arc<dyn Node>>,
    pub(crate) edges: HashMap<String, Vec<Edge>>,
    pub(crate) predicates: HashMap<String, Arc<Predicate>>,
    pub(crate) entry_point: Option<String>,
    pub(crate) error_handler: Option<String>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    /// Start an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            predicates: HashMap::new(),
            entry_point: None,
            error_handler: None,
        }
    }

    /// Register a node. Panics-free; duplicate names overwrite the prior
    /// registration, matching the teacher's `StateGraph::add_node`.
    #[must_use]
    pub fn add_node(mut self, node: impl Node + 'static) -> Self {
        self.nodes.insert(node.name().to_string(), Arc::new(node));
        self
    }

    /// Add an unconditional edge `from -> to`.
    #[must_use]
    pub fn add_edge(mut self, from: &str, to: &str) -> Self {
        self.edges.entry(from.to_string()).or_default().push(Edge {
            target: EdgeTarget::Node(to.to_string()),
            label: None,
            conditional_labels: None,
        });
        self
    }

    /// Add an unconditional edge from `from` to the terminal `END`.
    #[must_use]
    pub fn add_edge_to_end(mut self, from: &str) -> Self {
        self.edges.entry(from.to_string()).or_default().push(Edge {
            target: EdgeTarget::End,
            label: None,
            conditional_labels: None,
        });
        self
    }

    /// Add a conditional edge: `predicate(state)` is evaluated after `from`
    /// runs, and its return value is looked up in `mapping` (`"__end__"`
    /// routes to the terminal `END`) to find the next node.
    #[must_use]
    pub fn add_conditional_edge(
        mut self,
        from: &str,
        predicate: impl Fn(&ExecutionState) -> String + Send + Sync + 'static,
        mapping: &[(&str, &str)],
    ) -> Self {
        let labels: Vec<String> = mapping.iter().map(|(label, _)| (*label).to_string()).collect();
        let entries = self.edges.entry(from.to_string()).or_default();
        for (label, target) in mapping {
            let target = if *target == "__end__" {
                EdgeTarget::End
            } else {
                EdgeTarget::Node((*target).to_string())
            };
            entries.push(Edge {
                target,
                label: Some((*label).to_string()),
                conditional_labels: Some(labels.clone()),
            });
        }
        self.predicates.insert(from.to_string(), Arc::new(predicate));
        self
    }

    /// Declare the single entry point.
    #[must_use]
    pub fn set_entry_point(mut self, name: &str) -> Self {
        self.entry_point = Some(name.to_string());
        self
    }

    /// Declare the node every unhandled node error and deadline overrun
    /// routes to.
    #[must_use]
    pub fn set_error_handler(mut self, name: &str) -> Self {
        self.error_handler = Some(name.to_string());
        self
    }

    /// Validate and freeze this builder into an executable graph.
    pub fn compile(self) -> crate::error::Result<CompiledGraph> {
        let validation = validate::validate(&self)?;
        for w in &validation.warnings {
            warn!(node = %w.node, message = %w.message, "graph validation warning");
        }
        Ok(CompiledGraph {
            nodes: self.nodes,
            edges: self.edges,
            predicates: self.predicates,
            entry_point: self.entry_point.expect("validated above"),
            error_handler: self.error_handler,
            validation,
        })
    }

    /// Freeze without validation. Only for tests exercising the executor in
    /// isolation from the validator.
    #[must_use]
    pub fn compile_without_validation(self) -> CompiledGraph {
        CompiledGraph {
            nodes: self.nodes,
            edges: self.edges,
            predicates: self.predicates,
            entry_point: self.entry_point.unwrap_or_default(),
            error_handler: self.error_handler,
            validation: GraphValidationResult::default(),
        }
    }
}

/// An immutable, validated graph, ready to execute requests.
pub struct CompiledGraph {
    nodes: HashMap<String, Arc<dyn Node>>,
    edges: HashMap<String, Vec<Edge>>,
    predicates: HashMap<String, Arc<Predicate>>,
    entry_point: String,
    error_handler: Option<String>,
    validation: GraphValidationResult,
}

/// Why execution stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Reached a terminal `END` edge normally.
    Completed,
    /// An unhandled node error reached the terminal node with no
    /// `error_handler` configured, or the handler itself failed.
    Unrecoverable,
    /// The request deadline passed.
    DeadlineExceeded,
    /// Cooperative cancellation was observed.
    Cancelled,
}

impl CompiledGraph {
    /// Validation warnings recorded at `compile()` time.
    #[must_use]
    pub fn validation(&self) -> &GraphValidationResult {
        &self.validation
    }

    /// Run `state` through the graph to completion, honoring per-node
    /// timeouts and retries, the request deadline, and cooperative
    /// cancellation (§4.4).
    #[instrument(skip(self, state, config, cancel), fields(query_id = %state.query_id))]
    pub async fn execute(
        &self,
        mut state: ExecutionState,
        config: &Config,
        cancel: Option<Arc<AtomicBool>>,
    ) -> (ExecutionState, StopReason) {
        let mut current = self.entry_point.clone();
        let mut in_error_handler = false;

        loop {
            if let Some(flag) = &cancel {
                if flag.load(Ordering::Relaxed) {
                    tokio::time::sleep(config.cancel_grace()).await;
                    return (state, StopReason::Cancelled);
                }
            }

            if state.is_past_deadline() {
                let Some(handler) = self.error_handler.clone() else {
                    return (state, StopReason::DeadlineExceeded);
                };
                if in_error_handler {
                    return (state, StopReason::DeadlineExceeded);
                }
                state.errors.push(super::state::ErrorRecord {
                    kind: "DeadlineExceeded".to_string(),
                    message: format!("request deadline exceeded before node '{current}'"),
                    node: current.clone(),
                });
                current = handler;
                in_error_handler = true;
                continue;
            }

            let Some(node) = self.nodes.get(&current) else {
                state.errors.push(super::state::ErrorRecord {
                    kind: "GraphRoutingError".to_string(),
                    message: format!("node '{current}' is not registered"),
                    node: current.clone(),
                });
                return (state, StopReason::Unrecoverable);
            };

            let result = self.run_with_retries(node.as_ref(), &state, config).await;
            state.apply_result(&current, &result);
            debug!(node = %current, success = result.success, cost = result.cost, "node executed");

            let unhandled_error = result.error.is_some() && !result.handled;
            if unhandled_error {
                let Some(handler) = self.error_handler.clone() else {
                    return (state, StopReason::Unrecoverable);
                };
                if in_error_handler {
                    // The error handler itself failed; do not loop forever.
                    return (state, StopReason::Unrecoverable);
                }
                current = handler;
                in_error_handler = true;
                continue;
            }

            match self.next(&current, &state) {
                Ok(Some(next)) => {
                    in_error_handler = in_error_handler && next == current;
                    current = next;
                }
                Ok(None) => return (state, StopReason::Completed),
                Err(e) => {
                    state.errors.push(super::state::ErrorRecord {
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                        node: current.clone(),
                    });
                    return (state, StopReason::Unrecoverable);
                }
            }
        }
    }

    async fn run_with_retries(&self, node: &dyn Node, state: &ExecutionState, config: &Config) -> NodeResult {
        let policy = node.retry_policy();
        let timeout = node.timeout_override().unwrap_or_else(|| config.per_node_timeout());
        let mut attempt = 0;
        loop {
            let started = std::time::Instant::now();
            let outcome = tokio::time::timeout(timeout, node.run(state)).await;
            let mut result = match outcome {
                Ok(result) => result,
                Err(_) => NodeResult::failed(NodeError {
                    kind: "WorkerTimeout".to_string(),
                    message: format!("node '{}' exceeded its {:?} timeout", node.name(), timeout),
                }),
            };
            result.execution_time = started.elapsed();
            crate::observability::metrics().node_latency_seconds.observe(result.execution_time.as_secs_f64());

            if result.success {
                return result;
            }
            let retryable = result
                .error
                .as_ref()
                .is_some_and(|e| policy.retry_on.contains(&e.kind));
            if !retryable || attempt + 1 >= policy.max_attempts {
                return result;
            }
            tokio::time::sleep(policy.backoff_for_attempt(attempt)).await;
            attempt += 1;
        }
    }

    /// Resolve the next node (or termination) after `current` has just run,
    /// evaluating its predicate if the edge set is conditional.
    fn next(&self, current: &str, state: &ExecutionState) -> crate::error::Result<Option<String>> {
        let Some(edges) = self.edges.get(current) else {
            return Ok(None);
        };
        if edges.is_empty() {
            return Ok(None);
        }
        if let Some(predicate) = self.predicates.get(current) {
            let label = predicate(state);
            for edge in edges {
                if edge.label.as_deref() == Some(label.as_str()) {
                    return Ok(resolve(&edge.target));
                }
            }
            return Err(Error::GraphRoutingError {
                node: current.to_string(),
                reason: format!("predicate returned unmapped label '{label}'"),
            });
        }
        Ok(resolve(&edges[0].target))
    }
}

fn resolve(target: &EdgeTarget) -> Option<String> {
    match target {
        EdgeTarget::Node(n) => Some(n.clone()),
        EdgeTarget::End => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::{FnNode, NodeError, NodeResult};
    use crate::graph::state::{ExecutionState, NodePayload, QualityTier};

    fn state() -> ExecutionState {
        ExecutionState::new("p1", "s1", "hi", 1.0, Duration::from_secs(30), QualityTier::Balanced)
    }

    #[tokio::test]
    async fn linear_graph_runs_to_completion() {
        let graph = GraphBuilder::new()
            .add_node(FnNode::new("a", |_s: &ExecutionState| async {
                NodeResult::ok(NodePayload::CacheWritten, 1.0, 0.0)
            }))
            .add_node(FnNode::new("b", |_s: &ExecutionState| async {
                NodeResult::ok(NodePayload::Finalised, 1.0, 0.0)
            }))
            .add_edge("a", "b")
            .add_edge_to_end("b")
            .set_entry_point("a")
            .compile()
            .unwrap();

        let (final_state, reason) = graph.execute(state(), &Config::default(), None).await;
        assert_eq!(reason, StopReason::Completed);
        assert_eq!(final_state.execution_path, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn unhandled_error_routes_to_error_handler() {
        let graph = GraphBuilder::new()
            .add_node(FnNode::new("a", |_s: &ExecutionState| async {
                NodeResult::failed(NodeError {
                    kind: "Unknown".to_string(),
                    message: "boom".to_string(),
                })
            }))
            .add_node(FnNode::new("error_handler", |_s: &ExecutionState| async {
                NodeResult::ok(
                    NodePayload::ErrorHandled {
                        recovered_text: Some("sorry".to_string()),
                    },
                    0.0,
                    0.0,
                )
                .with_handled(true)
            }))
            .add_edge_to_end("error_handler")
            .set_entry_point("a")
            .set_error_handler("error_handler")
            .compile_without_validation();

        let (final_state, reason) = graph.execute(state(), &Config::default(), None).await;
        assert_eq!(reason, StopReason::Completed);
        assert_eq!(final_state.execution_path, vec!["a", "error_handler"]);
        assert_eq!(final_state.errors.len(), 1);
    }

    #[tokio::test]
    async fn conditional_edge_with_unmapped_label_is_unrecoverable() {
        let graph = GraphBuilder::new()
            .add_node(FnNode::new("a", |_s: &ExecutionState| async {
                NodeResult::ok(NodePayload::CacheWritten, 1.0, 0.0)
            }))
            .add_node(FnNode::new("b", |_s: &ExecutionState| async {
                NodeResult::ok(NodePayload::Finalised, 1.0, 0.0)
            }))
            .add_conditional_edge("a", |_s| "unexpected".to_string(), &[("expected", "b")])
            .add_edge_to_end("b")
            .set_entry_point("a")
            .compile_without_validation();

        let (_state, reason) = graph.execute(state(), &Config::default(), None).await;
        assert_eq!(reason, StopReason::Unrecoverable);
    }
}
