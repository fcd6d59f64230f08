use serde::{Deserialize, Serialize};
use substrate_types::TaskType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingMode {
    Subscription,
    Api,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorConfidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorRecommendation {
    pub agent: String,
    pub confidence: MonitorConfidence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub agent: Option<String>,
    pub billing_mode: BillingMode,
    pub rationale: String,
    pub monitor_influenced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_recommendation: Option<MonitorRecommendation>,
}

/// A task as seen by the routing engine: just enough to select an agent.
#[derive(Debug, Clone)]
pub struct RoutableTask {
    pub task_type: TaskType,
    pub explicit_agent_id: Option<String>,
}

pub fn task_type_key(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::Coding => "coding",
        TaskType::Testing => "testing",
        TaskType::Docs => "docs",
        TaskType::Debugging => "debugging",
        TaskType::Refactoring => "refactoring",
    }
}
