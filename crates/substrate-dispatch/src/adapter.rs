use std::sync::Arc;
use std::time::Instant;

use substrate_core::SubstrateError;
use substrate_types::TaskType;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::types::{DispatchOptions, DispatchResult, DispatchStatus, DispatchTask, TokenEstimate};

#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub id: String,
    pub supports: Vec<TaskType>,
    pub max_concurrent: u32,
}

/// A driver for an external agent CLI. Mirrors the teacher's `Provider`
/// trait: an info accessor plus the one suspension point callers observe.
#[async_trait::async_trait]
pub trait Adapter: Send + Sync {
    fn info(&self) -> AdapterInfo;

    async fn health_check(&self) -> bool;

    /// The sole suspension point. Implementations must honor `cancel`
    /// cooperatively — the pool relies on it to reach a running subprocess.
    async fn dispatch(&self, task: &DispatchTask, opts: &DispatchOptions, cancel: CancellationToken) -> DispatchResult;
}

/// Holds every registered adapter and resolves a dispatch target the way
/// the teacher's `ProviderRegistry::select_provider` does: explicit id wins,
/// then the configured default, then the first healthy adapter.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: Arc<RwLock<Vec<Arc<dyn Adapter>>>>,
    default_adapter: Arc<RwLock<Option<String>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, adapter: Arc<dyn Adapter>) {
        self.adapters.write().await.push(adapter);
    }

    pub async fn set_default(&self, adapter_id: impl Into<String>) {
        *self.default_adapter.write().await = Some(adapter_id.into());
    }

    pub async fn is_registered(&self, adapter_id: &str) -> bool {
        self.adapters.read().await.iter().any(|a| a.info().id == adapter_id)
    }

    pub async fn healthy_ids(&self) -> Vec<String> {
        let adapters = self.adapters.read().await;
        let mut ids = Vec::new();
        for adapter in adapters.iter() {
            if adapter.health_check().await {
                ids.push(adapter.info().id);
            }
        }
        ids.sort();
        ids
    }

    /// Healthy adapters that advertise support for `task_type`, alphabetical
    /// by id for deterministic selection.
    pub async fn healthy_supporting(&self, task_type: TaskType) -> Vec<String> {
        let adapters = self.adapters.read().await;
        let mut ids = Vec::new();
        for adapter in adapters.iter() {
            let info = adapter.info();
            if info.supports.contains(&task_type) && adapter.health_check().await {
                ids.push(info.id);
            }
        }
        ids.sort();
        ids
    }

    pub async fn is_healthy(&self, adapter_id: &str) -> bool {
        let adapters = self.adapters.read().await;
        match adapters.iter().find(|a| a.info().id == adapter_id) {
            Some(adapter) => adapter.health_check().await,
            None => false,
        }
    }

    pub async fn select(&self, explicit_id: Option<&str>) -> Result<Arc<dyn Adapter>, SubstrateError> {
        let adapters = self.adapters.read().await;

        if let Some(id) = explicit_id {
            return adapters
                .iter()
                .find(|a| a.info().id == id)
                .cloned()
                .ok_or_else(|| SubstrateError::NotFound(format!("adapter `{id}` is not registered")));
        }

        if let Some(default_id) = self.default_adapter.read().await.clone() {
            if let Some(found) = adapters.iter().find(|a| a.info().id == default_id) {
                return Ok(found.clone());
            }
        }

        adapters
            .first()
            .cloned()
            .ok_or_else(|| SubstrateError::NotFound("no adapters registered".to_string()))
    }
}

/// Always-available adapter used for tests and as a deterministic fallback.
/// Echoes the prompt back as output rather than invoking any subprocess.
pub struct EchoAdapter {
    id: String,
}

impl EchoAdapter {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait::async_trait]
impl Adapter for EchoAdapter {
    fn info(&self) -> AdapterInfo {
        AdapterInfo {
            id: self.id.clone(),
            supports: vec![
                TaskType::Coding,
                TaskType::Testing,
                TaskType::Docs,
                TaskType::Debugging,
                TaskType::Refactoring,
            ],
            max_concurrent: 4,
        }
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn dispatch(&self, task: &DispatchTask, _opts: &DispatchOptions, cancel: CancellationToken) -> DispatchResult {
        let start = Instant::now();
        if cancel.is_cancelled() {
            return DispatchResult::cancelled(task.id.clone());
        }
        DispatchResult {
            id: task.id.clone(),
            status: DispatchStatus::Completed,
            exit_code: Some(0),
            output: task.prompt.clone(),
            parsed: Some(serde_json::json!({ "result": "success" })),
            parse_error: None,
            duration_ms: start.elapsed().as_millis() as u64,
            token_estimate: TokenEstimate {
                input: task.prompt.len() as u64 / 4,
                output: task.prompt.len() as u64 / 4,
            },
        }
    }
}

/// Thin driver over an external agent CLI subprocess. Argument construction
/// and output parsing are adapter-specific and intentionally left minimal —
/// the dispatch contract is specified at the `DispatchResult` shape, not at
/// how any particular CLI is invoked.
pub struct CliAdapter {
    id: String,
    cli_path: String,
    max_concurrent: u32,
}

impl CliAdapter {
    pub fn new(id: impl Into<String>, cli_path: impl Into<String>, max_concurrent: u32) -> Self {
        Self {
            id: id.into(),
            cli_path: cli_path.into(),
            max_concurrent,
        }
    }
}

#[async_trait::async_trait]
impl Adapter for CliAdapter {
    fn info(&self) -> AdapterInfo {
        AdapterInfo {
            id: self.id.clone(),
            supports: vec![
                TaskType::Coding,
                TaskType::Testing,
                TaskType::Docs,
                TaskType::Debugging,
                TaskType::Refactoring,
            ],
            max_concurrent: self.max_concurrent,
        }
    }

    async fn health_check(&self) -> bool {
        tokio::process::Command::new(&self.cli_path)
            .arg("--version")
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    async fn dispatch(&self, task: &DispatchTask, opts: &DispatchOptions, cancel: CancellationToken) -> DispatchResult {
        let start = Instant::now();
        let mut child = match tokio::process::Command::new(&self.cli_path)
            .arg("--prompt")
            .arg(&task.prompt)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                return DispatchResult {
                    id: task.id.clone(),
                    status: DispatchStatus::Failed,
                    exit_code: None,
                    output: String::new(),
                    parsed: None,
                    parse_error: Some(err.to_string()),
                    duration_ms: start.elapsed().as_millis() as u64,
                    token_estimate: TokenEstimate::default(),
                };
            }
        };

        let wait = child.wait_with_output();
        tokio::pin!(wait);

        let outcome = tokio::select! {
            result = &mut wait => Some(result),
            _ = tokio::time::sleep(opts.timeout) => None,
            _ = cancel.cancelled() => None,
        };

        match outcome {
            Some(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let parsed: Option<serde_json::Value> = serde_json::from_str(&stdout).ok();
                DispatchResult {
                    id: task.id.clone(),
                    status: if output.status.success() {
                        DispatchStatus::Completed
                    } else {
                        DispatchStatus::Failed
                    },
                    exit_code: output.status.code(),
                    parse_error: if parsed.is_none() {
                        Some("adapter output was not valid JSON".to_string())
                    } else {
                        None
                    },
                    output: stdout,
                    parsed,
                    duration_ms: start.elapsed().as_millis() as u64,
                    token_estimate: TokenEstimate::default(),
                }
            }
            Some(Err(err)) => DispatchResult {
                id: task.id.clone(),
                status: DispatchStatus::Failed,
                exit_code: None,
                output: String::new(),
                parsed: None,
                parse_error: Some(err.to_string()),
                duration_ms: start.elapsed().as_millis() as u64,
                token_estimate: TokenEstimate::default(),
            },
            None => {
                let _ = child.start_kill();
                if cancel.is_cancelled() {
                    DispatchResult::cancelled(task.id.clone())
                } else {
                    DispatchResult::timeout(task.id.clone(), start.elapsed().as_millis() as u64, TokenEstimate::default())
                }
            }
        }
    }
}
