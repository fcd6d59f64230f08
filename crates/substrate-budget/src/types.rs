use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetAction {
    Continue,
    Terminate,
    TerminateAll,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BudgetCheckResult {
    pub exceeded: bool,
    pub action: BudgetAction,
    pub current_cost_usd: f64,
    pub budget_usd: f64,
    pub percentage_used: f64,
}

impl BudgetCheckResult {
    pub fn within_budget(current_cost_usd: f64, budget_usd: f64) -> Self {
        Self {
            exceeded: false,
            action: BudgetAction::Continue,
            current_cost_usd,
            budget_usd,
            percentage_used: percentage(current_cost_usd, budget_usd),
        }
    }

    pub fn task_exceeded(current_cost_usd: f64, budget_usd: f64) -> Self {
        Self {
            exceeded: true,
            action: BudgetAction::Terminate,
            current_cost_usd,
            budget_usd,
            percentage_used: percentage(current_cost_usd, budget_usd),
        }
    }

    pub fn session_exceeded(current_cost_usd: f64, budget_usd: f64) -> Self {
        Self {
            exceeded: true,
            action: BudgetAction::TerminateAll,
            current_cost_usd,
            budget_usd,
            percentage_used: percentage(current_cost_usd, budget_usd),
        }
    }
}

fn percentage(current: f64, budget: f64) -> f64 {
    if budget <= 0.0 {
        100.0
    } else {
        (current / budget) * 100.0
    }
}

/// A task or session's budget envelope. The teacher's
/// `tandem-orchestrator::agent_team::BudgetLimit` also bounds step count,
/// tool-call count, and wall-clock duration per spawned agent; none of those
/// have a source here — task graphs carry only a cost cap, and dispatch has
/// no step or tool-call concept — so this keeps only the field this crate
/// actually enforces.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BudgetLimit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_usd: Option<f64>,
}

impl BudgetLimit {
    pub fn from_cap(cap: f64) -> Self {
        Self { max_cost_usd: Some(cap) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_used_saturates_to_100_when_budget_is_zero() {
        let result = BudgetCheckResult::task_exceeded(5.0, 0.0);
        assert_eq!(result.percentage_used, 100.0);
    }

    #[test]
    fn within_budget_reports_continue() {
        let result = BudgetCheckResult::within_budget(0.5, 1.0);
        assert!(!result.exceeded);
        assert_eq!(result.action, BudgetAction::Continue);
        assert_eq!(result.percentage_used, 50.0);
    }
}
