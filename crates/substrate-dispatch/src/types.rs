use serde::{Deserialize, Serialize};
use substrate_types::TaskType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Normal,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Everything an adapter needs to run one task, independent of the
/// originating task graph.
#[derive(Debug, Clone)]
pub struct DispatchTask {
    pub id: String,
    pub prompt: String,
    pub task_type: TaskType,
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub timeout: std::time::Duration,
    pub priority: Priority,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            timeout: std::time::Duration::from_millis(180_000),
            priority: Priority::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenEstimate {
    pub input: u64,
    pub output: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResult {
    pub id: String,
    pub status: DispatchStatus,
    pub exit_code: Option<i32>,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    pub duration_ms: u64,
    pub token_estimate: TokenEstimate,
}

impl DispatchResult {
    pub fn cancelled(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: DispatchStatus::Cancelled,
            exit_code: None,
            output: String::new(),
            parsed: None,
            parse_error: None,
            duration_ms: 0,
            token_estimate: TokenEstimate::default(),
        }
    }

    pub fn timeout(id: impl Into<String>, duration_ms: u64, token_estimate: TokenEstimate) -> Self {
        Self {
            id: id.into(),
            status: DispatchStatus::Timeout,
            exit_code: None,
            output: String::new(),
            parsed: None,
            parse_error: None,
            duration_ms,
            token_estimate,
        }
    }
}
