use std::collections::HashMap;
use std::sync::Arc;

use switchyard_orchestrator::cache::{Cache, TieredCache};
use switchyard_orchestrator::config::Config;
use switchyard_orchestrator::gateway::{Gateway, InvokeRequest, WorkflowId};
use switchyard_orchestrator::graph::state::{Constraints, QualityTier};
use switchyard_orchestrator::model_manager::ModelManager;
use switchyard_orchestrator::registry::{Health, TaskType, Warmth, WorkerDescriptor, WorkerKind, WorkerRegistry};
use switchyard_orchestrator::workers::{MockInferenceWorker, MockScraper, MockSearchProvider, SearchProvider};
use switchyard_orchestrator::workflows::{chat, search};

fn build_gateway(worker: MockInferenceWorker) -> Gateway {
    let mut config = Config::default();
    config.monetary_budgets.insert("user-1".to_string(), 10.0);
    let cache = Arc::new(Cache::new(Box::new(TieredCache::fallback_only(100))));

    let registry = WorkerRegistry::new();
    registry.register(
        WorkerDescriptor::new("local-default", WorkerKind::LocalInference, 1, 0.0, Warmth::T0, 0)
            .with_capability(TaskType::new("chat"))
            .with_capability(TaskType::new("synthesis")),
    );
    registry.mark("local-default", Health::Ready);

    let manager = Arc::new(ModelManager::new(registry, cache.clone(), config.clone()));
    manager.register_backend("local-default", Arc::new(worker));

    let chat_graph = chat::build(cache.clone(), manager.clone()).unwrap();
    let mut providers: HashMap<String, Arc<dyn SearchProvider>> = HashMap::new();
    providers.insert("web".to_string(), Arc::new(MockSearchProvider::with_results(Vec::new())));
    let search_graph = search::build(manager, providers, Arc::new(MockScraper)).unwrap();

    Gateway::new(cache, config, chat_graph, search_graph)
}

#[tokio::test]
async fn a_successful_chat_round_trip_returns_the_generated_text() {
    let gateway = build_gateway(MockInferenceWorker::canned("Hello! How can I help?"));

    let response = gateway
        .invoke(InvokeRequest {
            workflow_id: WorkflowId::Chat,
            principal_id: "user-1".to_string(),
            session_id: "session-1".to_string(),
            query: "hi there".to_string(),
            quality_tier: QualityTier::Balanced,
            constraints: Constraints::default(),
        })
        .await
        .unwrap();

    assert_eq!(response.final_response, "Hello! How can I help?");
    assert_eq!(
        response.execution_path,
        vec!["context_loader", "intent_classifier", "response_generator", "cache_writer"]
    );
}

#[tokio::test]
async fn repeated_turns_in_the_same_session_accumulate_history() {
    let gateway = build_gateway(MockInferenceWorker::canned("ack"));

    for _ in 0..3 {
        gateway
            .invoke(InvokeRequest {
                workflow_id: WorkflowId::Chat,
                principal_id: "user-1".to_string(),
                session_id: "session-shared".to_string(),
                query: "continue the conversation".to_string(),
                quality_tier: QualityTier::Balanced,
                constraints: Constraints::default(),
            })
            .await
            .unwrap();
    }
    // No assertion beyond "it didn't fail repeatedly": context_loader reads
    // back what cache_writer appended on each prior turn.
}

#[tokio::test]
async fn a_failing_worker_is_recovered_by_the_error_handler() {
    let gateway = build_gateway(MockInferenceWorker::failing());

    let response = gateway
        .invoke(InvokeRequest {
            workflow_id: WorkflowId::Chat,
            principal_id: "user-1".to_string(),
            session_id: "session-2".to_string(),
            query: "this will fail".to_string(),
            quality_tier: QualityTier::Balanced,
            constraints: Constraints::default(),
        })
        .await
        .unwrap();

    assert!(response.final_response.contains("couldn't finish"));
    assert!(response.execution_path.contains(&"error_handler".to_string()));
}

#[tokio::test]
async fn an_exhausted_budget_is_rejected_before_any_node_runs() {
    let gateway = build_gateway(MockInferenceWorker::canned("should never be called"));

    let err = gateway
        .invoke(InvokeRequest {
            workflow_id: WorkflowId::Chat,
            principal_id: "broke-user".to_string(),
            session_id: "session-3".to_string(),
            query: "anything".to_string(),
            quality_tier: QualityTier::Balanced,
            constraints: Constraints {
                max_cost: Some(1000.0),
                ..Constraints::default()
            },
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "BudgetExceeded");
}
