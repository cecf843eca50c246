//! Thin runnable wiring: reads configuration, stands up the shared
//! services, compiles both workflows, and runs one example chat request.
//! A real deployment wires the [`switchyard_orchestrator::gateway::Gateway`]
//! behind its own transport (HTTP, gRPC, a CLI) instead of this example.

use std::collections::HashMap;
use std::sync::Arc;

use switchyard_orchestrator::cache::{Cache, TieredCache};
use switchyard_orchestrator::config::Config;
use switchyard_orchestrator::gateway::{Gateway, InvokeRequest, WorkflowId};
use switchyard_orchestrator::graph::state::{Constraints, QualityTier};
use switchyard_orchestrator::model_manager::ModelManager;
use switchyard_orchestrator::observability::init_tracing;
use switchyard_orchestrator::registry::{Health, TaskType, WorkerDescriptor, WorkerKind, WorkerRegistry, Warmth};
use switchyard_orchestrator::workers::{MockInferenceWorker, MockScraper, MockSearchProvider, SearchProvider};
use switchyard_orchestrator::workflows::{chat, search};

#[tokio::main]
async fn main() -> switchyard_orchestrator::Result<()> {
    init_tracing();

    let config = Config::default();
    let cache = Arc::new(Cache::new(Box::new(TieredCache::fallback_only(config.cache_fallback_size))));

    let registry = WorkerRegistry::new();
    registry.register(
        WorkerDescriptor::new("local-default", WorkerKind::LocalInference, 2 * 1024 * 1024 * 1024, 0.0001, Warmth::T0, 0)
            .with_capability(TaskType::new("chat"))
            .with_capability(TaskType::new("synthesis")),
    );
    registry.mark("local-default", Health::Ready);

    let manager = Arc::new(ModelManager::new(registry, cache.clone(), config.clone()));
    manager.register_backend(
        "local-default",
        Arc::new(MockInferenceWorker::canned("This is a demonstration response from the orchestrator's default worker.")),
    );

    let chat_graph = chat::build(cache.clone(), manager.clone())?;

    let mut providers: HashMap<String, Arc<dyn SearchProvider>> = HashMap::new();
    providers.insert("web".to_string(), Arc::new(MockSearchProvider::with_results(Vec::new())));
    let search_graph = search::build(manager, providers, Arc::new(MockScraper))?;

    let gateway = Gateway::new(cache, config, chat_graph, search_graph);

    let response = gateway
        .invoke(InvokeRequest {
            workflow_id: WorkflowId::Chat,
            principal_id: "demo-user".to_string(),
            session_id: "demo-session".to_string(),
            query: "What can you help me with?".to_string(),
            quality_tier: QualityTier::Balanced,
            constraints: Constraints::default(),
        })
        .await?;

    println!("{}", response.final_response);
    Ok(())
}
