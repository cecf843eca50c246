use std::collections::HashMap;
use std::sync::Arc;

use switchyard_orchestrator::cache::{Cache, TieredCache};
use switchyard_orchestrator::config::Config;
use switchyard_orchestrator::gateway::{Gateway, InvokeRequest, WorkflowId};
use switchyard_orchestrator::graph::state::{Constraints, QualityTier, SearchResult};
use switchyard_orchestrator::model_manager::ModelManager;
use switchyard_orchestrator::registry::{Health, TaskType, Warmth, WorkerDescriptor, WorkerKind, WorkerRegistry};
use switchyard_orchestrator::workers::{MockInferenceWorker, MockScraper, MockSearchProvider, SearchProvider};
use switchyard_orchestrator::workflows::{chat, search};

fn build_gateway(results: Vec<SearchResult>) -> Gateway {
    let config = Config::default();
    let cache = Arc::new(Cache::new(Box::new(TieredCache::fallback_only(100))));

    let registry = WorkerRegistry::new();
    registry.register(
        WorkerDescriptor::new("synth-default", WorkerKind::LocalInference, 1, 0.0, Warmth::T0, 0)
            .with_capability(TaskType::new("chat"))
            .with_capability(TaskType::new("synthesis")),
    );
    registry.mark("synth-default", Health::Ready);

    let manager = Arc::new(ModelManager::new(registry, cache.clone(), config.clone()));
    manager.register_backend("synth-default", Arc::new(MockInferenceWorker::canned("Rust is a systems programming language.")));

    let chat_graph = chat::build(cache.clone(), manager.clone()).unwrap();
    let mut providers: HashMap<String, Arc<dyn SearchProvider>> = HashMap::new();
    providers.insert("web".to_string(), Arc::new(MockSearchProvider::with_results(results)));
    let search_graph = search::build(manager, providers, Arc::new(MockScraper)).unwrap();

    Gateway::new(cache, config, chat_graph, search_graph)
}

fn sample_result() -> SearchResult {
    SearchResult {
        title: "Rust Programming Language".to_string(),
        url: "https://www.rust-lang.org".to_string(),
        snippet: "A language empowering everyone to build reliable software.".to_string(),
        relevance_score: 0.97,
        enhanced: false,
    }
}

#[tokio::test]
async fn a_search_with_results_produces_a_cited_synthesis() {
    let gateway = build_gateway(vec![sample_result()]);

    let response = gateway
        .invoke(InvokeRequest {
            workflow_id: WorkflowId::Search,
            principal_id: "user-1".to_string(),
            session_id: "session-1".to_string(),
            query: "what is the rust programming language".to_string(),
            quality_tier: QualityTier::Balanced,
            constraints: Constraints::default(),
        })
        .await
        .unwrap();

    assert_eq!(response.final_response, "Rust is a systems programming language.");
    assert_eq!(
        response.response_meta["citations"][0]["url"],
        "https://www.rust-lang.org"
    );
}

#[tokio::test]
async fn a_search_with_no_results_still_completes_with_a_graceful_answer() {
    let gateway = build_gateway(Vec::new());

    let response = gateway
        .invoke(InvokeRequest {
            workflow_id: WorkflowId::Search,
            principal_id: "user-1".to_string(),
            session_id: "session-1".to_string(),
            query: "an extremely obscure multi word query".to_string(),
            quality_tier: QualityTier::Balanced,
            constraints: Constraints::default(),
        })
        .await
        .unwrap();

    assert!(response.final_response.contains("couldn't find"));
    assert!(response.execution_path.contains(&"finalise".to_string()));
}
