use std::path::{Path, PathBuf};
use std::sync::Arc;

use substrate_budget::BudgetEnforcer;
use substrate_core::{ConfigStore, EventBus};
use substrate_dispatch::{AdapterRegistry, CliAdapter, EchoAdapter, WorkerPoolManager};
use substrate_routing::RoutingEngine;
use substrate_store::DecisionStore;
use tracing::info;

/// Singletons wired once at process startup, per the shared-state section of
/// the concurrency model: one `EventBus`, `AdapterRegistry`, `ConfigStore`,
/// and `DecisionStore` connection for the life of the process.
pub struct EngineState {
    pub state_dir: PathBuf,
    pub config: ConfigStore,
    pub event_bus: EventBus,
    pub store: Arc<DecisionStore>,
    pub adapters: AdapterRegistry,
    pub pool: Arc<WorkerPoolManager>,
    pub budget: Arc<BudgetEnforcer>,
    pub routing: Arc<RoutingEngine>,
}

/// Mirrors the teacher's `build_state`: construct every singleton, wire the
/// subscribers, and hand back a single bag the CLI commands and the `serve`
/// surface both read from.
pub async fn build_state(state_dir: &Path) -> anyhow::Result<EngineState> {
    let config = ConfigStore::new(state_dir.join("config.yaml"), serde_json::json!({})).await?;
    let typed_config = config.get().await?;

    let event_bus = EventBus::new();
    let store = Arc::new(DecisionStore::open(&state_dir.join("decisions.sqlite3")).await?);

    let adapters = AdapterRegistry::new();
    adapters.register(Arc::new(EchoAdapter::new("echo"))).await;
    for (id, provider) in &typed_config.providers {
        if !provider.enabled {
            continue;
        }
        if let Some(cli_path) = &provider.cli_path {
            adapters
                .register(Arc::new(CliAdapter::new(id.clone(), cli_path.clone(), provider.max_concurrent)))
                .await;
        }
    }

    let pool = Arc::new(WorkerPoolManager::new(
        typed_config.global.max_concurrent_tasks as usize,
        event_bus.clone(),
    ));
    event_bus.subscribe(pool.clone()).await;

    let budget = Arc::new(BudgetEnforcer::new(event_bus.clone(), typed_config.budget.clone()).with_store(store.clone()));
    event_bus.subscribe(budget.clone()).await;

    let routing = Arc::new(RoutingEngine::new(
        adapters.clone(),
        typed_config.providers.clone(),
        Some(typed_config.routing_policy.clone()),
    ));

    info!(state_dir = %state_dir.display(), "substrate engine state initialized");

    Ok(EngineState {
        state_dir: state_dir.to_path_buf(),
        config,
        event_bus,
        store,
        adapters,
        pool,
        budget,
        routing,
    })
}
