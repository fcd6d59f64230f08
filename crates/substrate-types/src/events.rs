use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events flowing across the process-wide event bus. Tagged the way the
/// teacher tags its mission events, so wire consumers get a stable `type` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubstrateEvent {
    TaskReady {
        run_id: String,
        task_id: String,
    },
    TaskRouted {
        run_id: String,
        task_id: String,
        agent: String,
    },
    TaskStarted {
        run_id: String,
        task_id: String,
        worker_id: String,
    },
    TaskFinished {
        run_id: String,
        task_id: String,
        status: String,
    },
    CostRecorded {
        run_id: String,
        task_id: String,
        session_id: String,
        cost_usd: f64,
    },
    BudgetExceededTask {
        run_id: String,
        task_id: String,
    },
    SessionBudgetExceeded {
        session_id: String,
    },
    ConfigReloaded {
        changed_keys: Vec<String>,
    },
}

impl SubstrateEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SubstrateEvent::TaskReady { .. } => "task_ready",
            SubstrateEvent::TaskRouted { .. } => "task_routed",
            SubstrateEvent::TaskStarted { .. } => "task_started",
            SubstrateEvent::TaskFinished { .. } => "task_finished",
            SubstrateEvent::CostRecorded { .. } => "cost_recorded",
            SubstrateEvent::BudgetExceededTask { .. } => "budget_exceeded_task",
            SubstrateEvent::SessionBudgetExceeded { .. } => "session_budget_exceeded",
            SubstrateEvent::ConfigReloaded { .. } => "config_reloaded",
        }
    }
}

/// NDJSON result envelope used by the CLI surface (see external interfaces).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
    pub version: String,
    pub command: String,
}
