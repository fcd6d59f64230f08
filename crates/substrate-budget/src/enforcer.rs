use std::collections::HashMap;
use std::sync::Arc;

use substrate_core::config::BudgetConfig;
use substrate_core::event_bus::{EventBus, EventSubscriber};
use substrate_store::DecisionStore;
use substrate_types::{RunStatus, SubstrateEvent};
use tokio::sync::RwLock;
use tracing::{error, warn};

use crate::types::{BudgetCheckResult, BudgetLimit};

/// Tracks per-task caps and per-session running totals and publishes
/// `budget:exceeded:*` events through the bus it is attached to. Holds no
/// reference to the worker pool — termination is the pool's own
/// subscription, not a call this type makes (see the cyclic-ownership note
/// this mirrors).
pub struct BudgetEnforcer {
    event_bus: EventBus,
    store: Option<Arc<DecisionStore>>,
    defaults: RwLock<BudgetConfig>,
    task_caps: RwLock<HashMap<String, BudgetLimit>>,
    session_totals: RwLock<HashMap<String, f64>>,
}

impl BudgetEnforcer {
    pub fn new(event_bus: EventBus, defaults: BudgetConfig) -> Self {
        Self {
            event_bus,
            store: None,
            defaults: RwLock::new(defaults),
            task_caps: RwLock::new(HashMap::new()),
            session_totals: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_store(mut self, store: Arc<DecisionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn check_task_budget(&self, task_id: &str, current_cost_usd: f64) -> BudgetCheckResult {
        let budget_usd = self.task_budget(task_id).await;
        if current_cost_usd > budget_usd {
            BudgetCheckResult::task_exceeded(current_cost_usd, budget_usd)
        } else {
            BudgetCheckResult::within_budget(current_cost_usd, budget_usd)
        }
    }

    pub async fn check_session_budget(&self, _session_id: &str, total_cost_usd: f64) -> BudgetCheckResult {
        let cap = self.defaults.read().await.default_session_budget_usd;
        if total_cost_usd > cap {
            BudgetCheckResult::session_exceeded(total_cost_usd, cap)
        } else {
            BudgetCheckResult::within_budget(total_cost_usd, cap)
        }
    }

    pub async fn record_task_budget_cap(&self, task_id: &str, cap: f64) {
        self.task_caps
            .write()
            .await
            .insert(task_id.to_string(), BudgetLimit::from_cap(cap));
    }

    pub async fn apply_config_subset(&self, budget: BudgetConfig) {
        *self.defaults.write().await = budget;
    }

    async fn task_budget(&self, task_id: &str) -> f64 {
        if let Some(limit) = self.task_caps.read().await.get(task_id).copied() {
            if let Some(cap) = limit.max_cost_usd {
                return cap;
            }
        }
        self.defaults.read().await.default_task_budget_usd
    }

    async fn record_session_cost(&self, session_id: &str, cost_usd: f64) -> f64 {
        let mut totals = self.session_totals.write().await;
        let entry = totals.entry(session_id.to_string()).or_insert(0.0);
        *entry += cost_usd;
        *entry
    }

    async fn handle_cost_recorded(&self, run_id: &str, task_id: &str, session_id: &str, cost_usd: f64) {
        let task_result = self.check_task_budget(task_id, cost_usd).await;
        if task_result.exceeded {
            self.event_bus
                .publish(SubstrateEvent::BudgetExceededTask {
                    run_id: run_id.to_string(),
                    task_id: task_id.to_string(),
                })
                .await;
            return;
        }

        let session_total = self.record_session_cost(session_id, cost_usd).await;
        let session_result = self.check_session_budget(session_id, session_total).await;
        if session_result.exceeded {
            self.event_bus
                .publish(SubstrateEvent::SessionBudgetExceeded {
                    session_id: session_id.to_string(),
                })
                .await;
        }
    }

    async fn handle_task_routed(&self, task_id: &str) {
        if self.task_caps.read().await.contains_key(task_id) {
            return;
        }
        let default = self.defaults.read().await.default_task_budget_usd;
        self.record_task_budget_cap(task_id, default).await;
    }

    async fn handle_session_exceeded(&self, session_id: &str) {
        let Some(store) = &self.store else { return };
        if let Err(err) = store.update_pipeline_run_status(session_id, RunStatus::Paused, None).await {
            warn!(session_id, error = %err, "failed to mark pipeline run paused after budget exceeded");
        }
    }
}

#[async_trait::async_trait]
impl EventSubscriber for BudgetEnforcer {
    fn name(&self) -> &str {
        "budget-enforcer"
    }

    async fn handle(&self, event: &SubstrateEvent) -> anyhow::Result<()> {
        match event {
            SubstrateEvent::CostRecorded {
                run_id,
                task_id,
                session_id,
                cost_usd,
            } => {
                self.handle_cost_recorded(run_id, task_id, session_id, *cost_usd).await;
            }
            SubstrateEvent::TaskRouted { task_id, .. } => {
                self.handle_task_routed(task_id).await;
            }
            SubstrateEvent::SessionBudgetExceeded { session_id } => {
                self.handle_session_exceeded(session_id).await;
            }
            SubstrateEvent::ConfigReloaded { changed_keys } => {
                if changed_keys.iter().any(|key| key.starts_with("budget")) {
                    // The new subset is pushed by the config-reload caller via
                    // `apply_config_subset`; this handler only observes the event.
                }
            }
            _ => {}
        }
        Ok(())
    }
}
