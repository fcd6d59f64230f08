use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u32,
    #[serde(default)]
    pub budget_cap_tokens: u64,
    #[serde(default)]
    pub budget_cap_usd: f64,
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: String,
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_max_concurrent_tasks() -> u32 {
    4
}

fn default_workspace_dir() -> String {
    ".".to_string()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            budget_cap_tokens: 0,
            budget_cap_usd: 0.0,
            workspace_dir: default_workspace_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionRouting {
    Auto,
    Subscription,
    Api,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimit {
    pub tokens: u64,
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderEntry {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_routing")]
    pub subscription_routing: SubscriptionRouting,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
}

fn default_routing() -> SubscriptionRouting {
    SubscriptionRouting::Auto
}

fn default_max_concurrent() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RoutingRule {
    pub task_type: String,
    pub preferred_provider: String,
    #[serde(default)]
    pub fallback_providers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RoutingPolicyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BudgetConfig {
    #[serde(default = "default_task_budget")]
    pub default_task_budget_usd: f64,
    #[serde(default = "default_session_budget")]
    pub default_session_budget_usd: f64,
    #[serde(default)]
    pub planning_costs_count_against_budget: bool,
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold_percent: u8,
}

fn default_task_budget() -> f64 {
    1.0
}

fn default_session_budget() -> f64 {
    10.0
}

fn default_warning_threshold() -> u8 {
    80
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_task_budget_usd: default_task_budget(),
            default_session_budget_usd: default_session_budget(),
            planning_costs_count_against_budget: false,
            warning_threshold_percent: default_warning_threshold(),
        }
    }
}

/// The fully-merged, typed configuration view. `deny_unknown_fields` at every
/// level enforces the strict top-level schema from the external interfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubstrateConfig {
    pub config_format_version: String,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub providers: HashMap<String, ProviderEntry>,
    #[serde(default)]
    pub routing_policy: RoutingPolicyConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
}

impl Default for SubstrateConfig {
    fn default() -> Self {
        Self {
            config_format_version: crate::config::migration::CURRENT_FORMAT_VERSION.to_string(),
            global: GlobalConfig::default(),
            providers: HashMap::new(),
            routing_policy: RoutingPolicyConfig::default(),
            budget: BudgetConfig::default(),
        }
    }
}
