//! The chat workflow (§5.1): `context_loader -> intent_classifier ->
//! response_generator -> cache_writer`, with an `error_handler` absorbing
//! any unhandled failure along the way.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::cache::{Cache, Namespace};
use crate::error::Error;
use crate::graph::node::{Node, NodeError, NodeResult, RetryPolicy};
use crate::graph::state::{Exchange, ExecutionState, NodePayload};
use crate::graph::{GraphBuilder, QualityTier};
use crate::model_manager::{ModelManager, SelectionConstraints};
use crate::registry::TaskType;

const HISTORY_WINDOW: usize = 10;

/// Terms that trip the heuristic content policy check (§5.1). This crate
/// does not call out to a moderation model; like [`IntentClassifier`], it
/// approximates one with a fixed heuristic.
const BANNED_TERMS: &[&str] = &["kill yourself", "build a bomb", "synthesize nerve agent"];

/// Whether `text` is empty or trips the heuristic content policy check.
fn violates_content_policy(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return true;
    }
    let lower = trimmed.to_lowercase();
    BANNED_TERMS.iter().any(|term| lower.contains(term))
}

/// Loads and truncates conversation history for the session.
pub struct ContextLoader {
    cache: Arc<Cache>,
}

impl ContextLoader {
    /// Build the node over a shared cache handle.
    #[must_use]
    pub fn new(cache: Arc<Cache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Node for ContextLoader {
    fn name(&self) -> &str {
        "context_loader"
    }

    async fn run(&self, state: &ExecutionState) -> NodeResult {
        let key = state.session_id.clone().into_bytes();
        let stored = self.cache.get(Namespace::Conversation, &key).await;
        let mut history: Vec<Exchange> = stored
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default();
        history.extend(state.conversation_history.iter().cloned());

        let summary = if history.len() > HISTORY_WINDOW {
            let dropped = history.len() - HISTORY_WINDOW;
            let summary = format!("{dropped} earlier exchange(s) omitted");
            history = history.split_off(dropped);
            Some(summary)
        } else {
            None
        };

        NodeResult::ok(NodePayload::ContextLoaded { history, summary }, 1.0, 0.0)
    }
}

/// Classifies intent and complexity from the raw query, heuristically —
/// this crate does not ship a classifier model.
pub struct IntentClassifier;

#[async_trait]
impl Node for IntentClassifier {
    fn name(&self) -> &str {
        "intent_classifier"
    }

    async fn run(&self, state: &ExecutionState) -> NodeResult {
        let query = state.original_query.trim();
        if query.is_empty() {
            return NodeResult::ok(
                NodePayload::IntentClassified {
                    intent: "unknown".to_string(),
                    complexity_score: 0.0,
                },
                0.0,
                0.0,
            );
        }

        let intent = if query.ends_with('?') {
            "question"
        } else if query.split_whitespace().count() <= 3 {
            "short_command"
        } else {
            "statement"
        };
        let complexity_score = (query.split_whitespace().count() as f64 / 80.0).clamp(0.0, 1.0);

        NodeResult::ok(
            NodePayload::IntentClassified {
                intent: intent.to_string(),
                complexity_score,
            },
            0.85,
            0.0,
        )
    }
}

/// Selects a worker and generates the assistant's reply.
pub struct ResponseGenerator {
    manager: Arc<ModelManager>,
}

impl ResponseGenerator {
    /// Build the node over a shared model manager.
    #[must_use]
    pub fn new(manager: Arc<ModelManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Node for ResponseGenerator {
    fn name(&self) -> &str {
        "response_generator"
    }

    async fn run(&self, state: &ExecutionState) -> NodeResult {
        let constraints = SelectionConstraints {
            max_cost_per_call: state.constraints.max_cost_per_call,
            force_local: state.constraints.force_local,
        };
        let worker = match self.manager.select(&TaskType::new("chat"), state.quality_tier, &constraints).await {
            Ok(w) => w,
            Err(e) => return NodeResult::failed(crate::graph::node::NodeError::from_error(&e)),
        };

        let prompt = build_prompt(state);
        let mut result = self.manager.generate(&worker.id, &prompt, super::default_generation_params()).await;
        if let QualityTier::Minimal | QualityTier::Balanced = state.quality_tier {
            debug!(worker = %worker.id, "response_generator used default-tier worker");
        }
        result.confidence = if result.success { 0.9 } else { result.confidence };

        if result.success {
            let text = match &result.data {
                Some(NodePayload::ResponseGenerated { text, .. }) => text.as_str(),
                _ => "",
            };
            if violates_content_policy(text) {
                return NodeResult::failed(NodeError::from_error(&Error::ContentPolicyRejected {
                    worker_id: worker.id.clone(),
                }))
                .with_worker(worker.id);
            }
        }
        result
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::worker_default()
    }
}

fn build_prompt(state: &ExecutionState) -> String {
    let history = state
        .intermediate
        .get("context_loader")
        .and_then(|p| match p {
            NodePayload::ContextLoaded { history, .. } => Some(history),
            _ => None,
        });
    let mut prompt = String::new();
    if let Some(history) = history {
        for exchange in history {
            prompt.push_str(&format!("{}: {}\n", exchange.role, exchange.content));
        }
    }
    prompt.push_str("user: ");
    prompt.push_str(&state.original_query);
    prompt
}

/// Appends the just-generated turn to the session's cached conversation
/// history.
pub struct CacheWriter {
    cache: Arc<Cache>,
}

impl CacheWriter {
    /// Build the node over a shared cache handle.
    #[must_use]
    pub fn new(cache: Arc<Cache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Node for CacheWriter {
    fn name(&self) -> &str {
        "cache_writer"
    }

    async fn run(&self, state: &ExecutionState) -> NodeResult {
        let Some(NodePayload::ResponseGenerated { text, .. }) = state.intermediate.get("response_generator") else {
            return NodeResult::ok(NodePayload::CacheWritten, 1.0, 0.0);
        };

        let mut history: Vec<Exchange> = state
            .intermediate
            .get("context_loader")
            .and_then(|p| match p {
                NodePayload::ContextLoaded { history, .. } => Some(history.clone()),
                _ => None,
            })
            .unwrap_or_default();
        history.push(Exchange {
            role: "user".to_string(),
            content: state.original_query.clone(),
            ts: chrono::Utc::now(),
        });
        history.push(Exchange {
            role: "assistant".to_string(),
            content: text.clone(),
            ts: chrono::Utc::now(),
        });

        if let Ok(bytes) = serde_json::to_vec(&history) {
            let key = state.session_id.clone().into_bytes();
            self.cache.set(Namespace::Conversation, &key, bytes, Namespace::Conversation.default_ttl()).await;
        }

        NodeResult::ok(NodePayload::CacheWritten, 1.0, 0.0)
    }
}

/// Produces a safe refusal when an earlier node failed without handling
/// its own error.
pub struct ChatErrorHandler;

#[async_trait]
impl Node for ChatErrorHandler {
    fn name(&self) -> &str {
        "error_handler"
    }

    async fn run(&self, _state: &ExecutionState) -> NodeResult {
        NodeResult::ok(
            NodePayload::ErrorHandled {
                recovered_text: Some("I ran into a problem and couldn't finish that request. Please try again.".to_string()),
            },
            0.0,
            0.0,
        )
        .with_handled(true)
    }
}

/// Build the compiled chat workflow graph over shared services.
pub fn build(cache: Arc<Cache>, manager: Arc<ModelManager>) -> crate::error::Result<crate::graph::CompiledGraph> {
    GraphBuilder::new()
        .add_node(ContextLoader::new(cache.clone()))
        .add_node(IntentClassifier)
        .add_node(ResponseGenerator::new(manager))
        .add_node(CacheWriter::new(cache))
        .add_node(ChatErrorHandler)
        .add_edge("context_loader", "intent_classifier")
        .add_edge("intent_classifier", "response_generator")
        .add_edge("response_generator", "cache_writer")
        .add_edge_to_end("cache_writer")
        .add_edge_to_end("error_handler")
        .set_entry_point("context_loader")
        .set_error_handler("error_handler")
        .compile()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TieredCache;
    use crate::config::Config;
    use crate::graph::state::QualityTier;
    use crate::registry::{Health, WorkerDescriptor, WorkerKind, WorkerRegistry};
    use crate::workers::MockInferenceWorker;
    use std::time::Duration;

    fn services() -> (Arc<Cache>, Arc<ModelManager>) {
        let cache = Arc::new(Cache::new(Box::new(TieredCache::fallback_only(100))));
        let registry = WorkerRegistry::new();
        registry.register(
            WorkerDescriptor::new("local-small", WorkerKind::LocalInference, 1, 0.0, crate::registry::Warmth::T0, 0)
                .with_capability(TaskType::new("chat")),
        );
        registry.mark("local-small", Health::Ready);
        let manager = Arc::new(ModelManager::new(registry, cache.clone(), Config::default()));
        manager.register_backend("local-small", Arc::new(MockInferenceWorker::canned("hi there")));
        (cache, manager)
    }

    #[tokio::test]
    async fn chat_workflow_completes_and_produces_a_response() {
        let (cache, manager) = services();
        let graph = build(cache, manager).unwrap();
        let state = ExecutionState::new("p1", "s1", "hello?", 10.0, Duration::from_secs(5), QualityTier::Balanced);
        let (mut final_state, reason) = graph.execute(state, &Config::default(), None).await;
        assert_eq!(reason, crate::graph::StopReason::Completed);
        super::super::assemble_final_response(&mut final_state);
        assert_eq!(final_state.final_response, "hi there");
    }

    #[tokio::test]
    async fn an_empty_response_is_rejected_and_routed_to_the_error_handler() {
        let cache = Arc::new(Cache::new(Box::new(TieredCache::fallback_only(100))));
        let registry = WorkerRegistry::new();
        registry.register(
            WorkerDescriptor::new("local-small", WorkerKind::LocalInference, 1, 0.0, crate::registry::Warmth::T0, 0)
                .with_capability(TaskType::new("chat")),
        );
        registry.mark("local-small", Health::Ready);
        let manager = Arc::new(ModelManager::new(registry, cache.clone(), Config::default()));
        manager.register_backend("local-small", Arc::new(MockInferenceWorker::canned("")));

        let graph = build(cache, manager).unwrap();
        let state = ExecutionState::new("p1", "s1", "hello?", 10.0, Duration::from_secs(5), QualityTier::Balanced);
        let (mut final_state, reason) = graph.execute(state, &Config::default(), None).await;
        assert_eq!(reason, crate::graph::StopReason::Completed);
        assert!(final_state.execution_path.contains(&"error_handler".to_string()));
        assert!(!final_state.execution_path.contains(&"cache_writer".to_string()));
        super::super::assemble_final_response(&mut final_state);
        assert!(final_state.final_response.contains("couldn't finish"));
    }
}
