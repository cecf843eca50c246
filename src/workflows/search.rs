//! The search workflow (§5.2): `router -> provider_search ->
//! content_enhancer -> synthesiser -> finalise`, with provider fallback
//! absorbed inside `provider_search` rather than surfaced as a graph edge.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::graph::node::{Node, NodeError, NodeResult};
use crate::graph::state::{ExecutionState, NodePayload, SearchResult};
use crate::graph::GraphBuilder;
use crate::model_manager::{ModelManager, SelectionConstraints};
use crate::registry::TaskType;
use crate::workers::{citations_from, SearchProvider, SearchRequest};

const DEFAULT_MAX_RESULTS: usize = 5;

/// Decides whether a search is needed at all, and which providers to try,
/// in priority order.
pub struct SearchRouter {
    providers: Vec<String>,
}

impl SearchRouter {
    /// Build the node with a fixed provider priority order.
    #[must_use]
    pub fn new(providers: Vec<String>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl Node for SearchRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn run(&self, state: &ExecutionState) -> NodeResult {
        let query = state.original_query.trim();
        let search_needed = !query.is_empty() && query.split_whitespace().count() > 1;
        NodeResult::ok(
            NodePayload::SearchRouted {
                search_needed,
                providers: self.providers.clone(),
                max_results: DEFAULT_MAX_RESULTS,
            },
            1.0,
            0.0,
        )
    }
}

/// Tries each provider in `router`'s priority order, absorbing individual
/// provider failures internally rather than surfacing them as a graph
/// routing decision (§5.2).
pub struct ProviderSearch {
    providers: std::collections::HashMap<String, Arc<dyn SearchProvider>>,
}

impl ProviderSearch {
    /// Build the node over a set of named providers.
    #[must_use]
    pub fn new(providers: std::collections::HashMap<String, Arc<dyn SearchProvider>>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl Node for ProviderSearch {
    fn name(&self) -> &str {
        "provider_search"
    }

    async fn run(&self, state: &ExecutionState) -> NodeResult {
        let Some(NodePayload::SearchRouted {
            search_needed,
            providers,
            max_results,
        }) = state.intermediate.get("router")
        else {
            return NodeResult::failed(NodeError {
                kind: "Unknown".to_string(),
                message: "provider_search ran before router".to_string(),
            });
        };

        if !*search_needed {
            return NodeResult::ok(
                NodePayload::ProviderSearched {
                    provider_used: "none".to_string(),
                    results: Vec::new(),
                },
                1.0,
                0.0,
            );
        }

        let request = SearchRequest {
            query: state.original_query.clone(),
            max_results: *max_results,
        };

        for provider_id in providers {
            let Some(provider) = self.providers.get(provider_id) else {
                continue;
            };
            match provider.search(request.clone()).await {
                Ok(results) => {
                    return NodeResult::ok(
                        NodePayload::ProviderSearched {
                            provider_used: provider_id.clone(),
                            results,
                        },
                        0.9,
                        0.0,
                    )
                    .with_worker(provider_id)
                }
                Err(e) => {
                    warn!(provider = %provider_id, error = %e, "search provider failed, trying next");
                }
            }
        }

        NodeResult::failed(NodeError {
            kind: "NoEligibleWorker".to_string(),
            message: "every configured search provider failed".to_string(),
        })
    }
}

/// Replaces each result's snippet with full scraped content where
/// available, leaving un-scrapable results as-is.
pub struct ContentEnhancer {
    scraper: Arc<dyn crate::workers::Scraper>,
}

impl ContentEnhancer {
    /// Build the node over a shared scraper.
    #[must_use]
    pub fn new(scraper: Arc<dyn crate::workers::Scraper>) -> Self {
        Self { scraper }
    }
}

#[async_trait]
impl Node for ContentEnhancer {
    fn name(&self) -> &str {
        "content_enhancer"
    }

    async fn run(&self, state: &ExecutionState) -> NodeResult {
        let Some(NodePayload::ProviderSearched { results, .. }) = state.intermediate.get("provider_search") else {
            return NodeResult::ok(NodePayload::ContentEnhanced { results: Vec::new() }, 1.0, 0.0);
        };

        let mut enhanced = Vec::with_capacity(results.len());
        for result in results.clone() {
            enhanced.push(self.enhance_one(result).await);
        }
        NodeResult::ok(NodePayload::ContentEnhanced { results: enhanced }, 1.0, 0.0)
    }
}

impl ContentEnhancer {
    async fn enhance_one(&self, mut result: SearchResult) -> SearchResult {
        match self.scraper.scrape(&result.url).await {
            Ok(Some(content)) => {
                result.snippet = content;
                result.enhanced = true;
            }
            Ok(None) | Err(_) => {}
        }
        result
    }
}

/// Fuses enhanced results into a single cited answer via the model
/// manager's synthesis worker.
pub struct Synthesiser {
    manager: Arc<ModelManager>,
}

impl Synthesiser {
    /// Build the node over a shared model manager.
    #[must_use]
    pub fn new(manager: Arc<ModelManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Node for Synthesiser {
    fn name(&self) -> &str {
        "synthesiser"
    }

    async fn run(&self, state: &ExecutionState) -> NodeResult {
        let results: Vec<SearchResult> = state
            .intermediate
            .get("content_enhancer")
            .and_then(|p| match p {
                NodePayload::ContentEnhanced { results } => Some(results.clone()),
                _ => None,
            })
            .unwrap_or_default();

        if results.is_empty() {
            return NodeResult::ok(
                NodePayload::Synthesized {
                    text: format!("I couldn't find anything relevant for \"{}\".", state.original_query),
                    citations: Vec::new(),
                    confidence: 0.3,
                },
                0.3,
                0.0,
            );
        }

        let constraints = SelectionConstraints {
            max_cost_per_call: state.constraints.max_cost_per_call,
            force_local: state.constraints.force_local,
        };
        let worker = match self.manager.select(&TaskType::new("synthesis"), state.quality_tier, &constraints).await {
            Ok(w) => w,
            Err(e) => return NodeResult::failed(NodeError::from_error(&e)),
        };

        let prompt = build_synthesis_prompt(&state.original_query, &results);
        let generated = self.manager.generate(&worker.id, &prompt, super::default_generation_params()).await;
        let Some(NodePayload::ResponseGenerated { text, .. }) = generated.data else {
            return NodeResult::failed(
                generated
                    .error
                    .unwrap_or_else(|| NodeError {
                        kind: "Unknown".to_string(),
                        message: "synthesis worker returned no text".to_string(),
                    }),
            );
        };

        NodeResult::ok(
            NodePayload::Synthesized {
                text,
                citations: citations_from(&results),
                confidence: 0.8,
            },
            0.8,
            generated.cost,
        )
    }
}

fn build_synthesis_prompt(query: &str, results: &[SearchResult]) -> String {
    let mut prompt = format!("Answer the question using the sources below.\nQuestion: {query}\n\nSources:\n");
    for (i, result) in results.iter().enumerate() {
        prompt.push_str(&format!("[{}] {} ({})\n{}\n\n", i + 1, result.title, result.url, result.snippet));
    }
    prompt
}

/// Terminal pass-through node; exists so the graph has a single named
/// success terminal distinct from the error path.
pub struct Finalise;

#[async_trait]
impl Node for Finalise {
    fn name(&self) -> &str {
        "finalise"
    }

    async fn run(&self, _state: &ExecutionState) -> NodeResult {
        NodeResult::ok(NodePayload::Finalised, 1.0, 0.0)
    }
}

/// Produces a safe fallback answer when an earlier node failed.
pub struct SearchErrorHandler;

#[async_trait]
impl Node for SearchErrorHandler {
    fn name(&self) -> &str {
        "error_handler"
    }

    async fn run(&self, _state: &ExecutionState) -> NodeResult {
        NodeResult::ok(
            NodePayload::ErrorHandled {
                recovered_text: Some("I couldn't complete that search right now. Please try again shortly.".to_string()),
            },
            0.0,
            0.0,
        )
        .with_handled(true)
    }
}

/// Build the compiled search workflow graph over shared services.
pub fn build(
    manager: Arc<ModelManager>,
    providers: std::collections::HashMap<String, Arc<dyn SearchProvider>>,
    scraper: Arc<dyn crate::workers::Scraper>,
) -> crate::error::Result<crate::graph::CompiledGraph> {
    let provider_ids: Vec<String> = providers.keys().cloned().collect();
    GraphBuilder::new()
        .add_node(SearchRouter::new(provider_ids))
        .add_node(ProviderSearch::new(providers))
        .add_node(ContentEnhancer::new(scraper))
        .add_node(Synthesiser::new(manager))
        .add_node(Finalise)
        .add_node(SearchErrorHandler)
        .add_edge("router", "provider_search")
        .add_edge("provider_search", "content_enhancer")
        .add_edge("content_enhancer", "synthesiser")
        .add_edge("synthesiser", "finalise")
        .add_edge_to_end("finalise")
        .add_edge_to_end("error_handler")
        .set_entry_point("router")
        .set_error_handler("error_handler")
        .compile()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, TieredCache};
    use crate::config::Config;
    use crate::graph::state::QualityTier;
    use crate::registry::{Health, WorkerDescriptor, WorkerKind, WorkerRegistry};
    use crate::workers::{MockInferenceWorker, MockScraper, MockSearchProvider};
    use std::time::Duration;

    fn services() -> (Arc<ModelManager>, std::collections::HashMap<String, Arc<dyn SearchProvider>>, Arc<dyn crate::workers::Scraper>) {
        let cache = Arc::new(Cache::new(Box::new(TieredCache::fallback_only(100))));
        let registry = WorkerRegistry::new();
        registry.register(
            WorkerDescriptor::new("synth-worker", WorkerKind::LocalInference, 1, 0.0, crate::registry::Warmth::T0, 0)
                .with_capability(TaskType::new("synthesis")),
        );
        registry.mark("synth-worker", Health::Ready);
        let manager = Arc::new(ModelManager::new(registry, cache, Config::default()));
        manager.register_backend("synth-worker", Arc::new(MockInferenceWorker::canned("Rust is a systems language.")));

        let mut providers: std::collections::HashMap<String, Arc<dyn SearchProvider>> = std::collections::HashMap::new();
        providers.insert(
            "web".to_string(),
            Arc::new(MockSearchProvider::with_results(vec![SearchResult {
                title: "Rust".to_string(),
                url: "https://rust-lang.org".to_string(),
                snippet: "A systems language".to_string(),
                relevance_score: 0.95,
                enhanced: false,
            }])),
        );
        (manager, providers, Arc::new(MockScraper))
    }

    #[tokio::test]
    async fn search_workflow_completes_with_citations() {
        let (manager, providers, scraper) = services();
        let graph = build(manager, providers, scraper).unwrap();
        let state = ExecutionState::new("p1", "s1", "what is rust", 10.0, Duration::from_secs(5), QualityTier::Balanced);
        let (mut final_state, reason) = graph.execute(state, &Config::default(), None).await;
        assert_eq!(reason, crate::graph::StopReason::Completed);
        super::super::assemble_final_response(&mut final_state);
        assert!(!final_state.final_response.is_empty());
        assert_eq!(final_state.execution_path, vec!["router", "provider_search", "content_enhancer", "synthesiser", "finalise"]);
    }
}
