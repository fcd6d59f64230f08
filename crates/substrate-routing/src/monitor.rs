use substrate_types::TaskType;

use crate::types::MonitorRecommendation;

/// An advisory agent consulted before routing commits to a choice. Errors
/// from this trait are treated as soft failures by the routing engine — they
/// never block a route, they only suppress the advisory.
#[async_trait::async_trait]
pub trait MonitorAgent: Send + Sync {
    async fn get_recommendation(&self, task_type: TaskType) -> anyhow::Result<MonitorRecommendation>;
}
