use std::collections::HashMap;
use std::sync::Arc;

use substrate_core::config::{ProviderEntry, RoutingPolicyConfig, SubscriptionRouting};
use substrate_dispatch::AdapterRegistry;
use substrate_types::normalize_agent_id;
use tracing::debug;

use crate::monitor::MonitorAgent;
use crate::types::{task_type_key, BillingMode, MonitorConfidence, RoutableTask, RoutingDecision};

/// Selects an agent for a task. Holds no mutable state beyond what it reads
/// at construction time — adapter health is queried live through the
/// registry on every call.
pub struct RoutingEngine {
    adapters: AdapterRegistry,
    providers: HashMap<String, ProviderEntry>,
    policy: Option<RoutingPolicyConfig>,
    monitor: Option<Arc<dyn MonitorAgent>>,
    use_monitor_recommendations: bool,
}

impl RoutingEngine {
    pub fn new(adapters: AdapterRegistry, providers: HashMap<String, ProviderEntry>, policy: Option<RoutingPolicyConfig>) -> Self {
        Self {
            adapters,
            providers,
            policy,
            monitor: None,
            use_monitor_recommendations: false,
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn MonitorAgent>, use_monitor_recommendations: bool) -> Self {
        self.monitor = Some(monitor);
        self.use_monitor_recommendations = use_monitor_recommendations;
        self
    }

    fn billing_mode_for(&self, agent: &str) -> BillingMode {
        match self.providers.get(agent).map(|p| p.subscription_routing) {
            Some(SubscriptionRouting::Disabled) => BillingMode::Unavailable,
            Some(SubscriptionRouting::Api) => BillingMode::Api,
            Some(SubscriptionRouting::Auto) | Some(SubscriptionRouting::Subscription) | None => BillingMode::Subscription,
        }
    }

    fn normalized(raw: &str) -> String {
        normalize_agent_id(raw).unwrap_or_else(|| raw.to_string())
    }

    pub async fn route(&self, task: &RoutableTask) -> RoutingDecision {
        let (mut decision, selected_agent) = self.select(task).await;

        if let (Some(monitor), true) = (&self.monitor, self.use_monitor_recommendations) {
            match monitor.get_recommendation(task.task_type).await {
                Ok(recommendation) => {
                    if recommendation.confidence >= MonitorConfidence::Medium {
                        if let Some(agent) = &selected_agent {
                            if agent != &recommendation.agent {
                                debug!(
                                    selected = agent,
                                    recommended = recommendation.agent,
                                    "routing policy overrode monitor recommendation"
                                );
                            }
                        }
                        decision.monitor_influenced = true;
                        decision.monitor_recommendation = Some(recommendation);
                    }
                }
                Err(err) => {
                    debug!(error = %err, "monitor recommendation failed; proceeding without advisory");
                    decision.monitor_influenced = false;
                }
            }
        }

        decision
    }

    async fn select(&self, task: &RoutableTask) -> (RoutingDecision, Option<String>) {
        // Step 1: explicit agent.
        if let Some(raw) = &task.explicit_agent_id {
            let agent = Self::normalized(raw);
            if self.adapters.is_registered(&agent).await && self.adapters.is_healthy(&agent).await {
                return (
                    RoutingDecision {
                        agent: Some(agent.clone()),
                        billing_mode: self.billing_mode_for(&agent),
                        rationale: format!("explicit agent `{agent}` is registered and healthy"),
                        monitor_influenced: false,
                        monitor_recommendation: None,
                    },
                    Some(agent),
                );
            }
        }

        // Step 2: routing policy rule for this task type.
        if let Some(policy) = &self.policy {
            let key = task_type_key(task.task_type);
            if let Some(rule) = policy.rules.iter().find(|r| r.task_type == key) {
                let preferred = Self::normalized(&rule.preferred_provider);
                if self.adapters.is_healthy(&preferred).await {
                    return (
                        RoutingDecision {
                            agent: Some(preferred.clone()),
                            billing_mode: self.billing_mode_for(&preferred),
                            rationale: format!("policy rule for `{key}` selected preferred provider `{preferred}`"),
                            monitor_influenced: false,
                            monitor_recommendation: None,
                        },
                        Some(preferred),
                    );
                }
                for fallback in &rule.fallback_providers {
                    let fallback = Self::normalized(fallback);
                    if self.adapters.is_healthy(&fallback).await {
                        return (
                            RoutingDecision {
                                agent: Some(fallback.clone()),
                                billing_mode: self.billing_mode_for(&fallback),
                                rationale: format!("policy rule for `{key}` fell back to `{fallback}`"),
                                monitor_influenced: false,
                                monitor_recommendation: None,
                            },
                            Some(fallback),
                        );
                    }
                }
            }
        }

        // Step 3: no policy (or no matching rule) — any healthy adapter
        // supporting this task type, alphabetical for determinism.
        let candidates = self.adapters.healthy_supporting(task.task_type).await;
        if let Some(agent) = candidates.into_iter().next() {
            return (
                RoutingDecision {
                    agent: Some(agent.clone()),
                    billing_mode: self.billing_mode_for(&agent),
                    rationale: format!("no policy match; selected healthy adapter `{agent}` supporting {}", task_type_key(task.task_type)),
                    monitor_influenced: false,
                    monitor_recommendation: None,
                },
                Some(agent),
            );
        }

        // Step 4: nothing available.
        (
            RoutingDecision {
                agent: None,
                billing_mode: BillingMode::Unavailable,
                rationale: format!("no healthy adapter supports {}", task_type_key(task.task_type)),
                monitor_influenced: false,
                monitor_recommendation: None,
            },
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use substrate_dispatch::EchoAdapter;
    use substrate_types::TaskType;

    async fn registry_with(ids: &[&str]) -> AdapterRegistry {
        let registry = AdapterRegistry::new();
        for id in ids {
            registry.register(Arc::new(EchoAdapter::new(*id))).await;
        }
        registry
    }

    #[tokio::test]
    async fn explicit_agent_wins_when_healthy() {
        let adapters = registry_with(&["claude-code", "codex"]).await;
        let engine = RoutingEngine::new(adapters, HashMap::new(), None);
        let decision = engine
            .route(&RoutableTask {
                task_type: TaskType::Coding,
                explicit_agent_id: Some("codex".into()),
            })
            .await;
        assert_eq!(decision.agent.as_deref(), Some("codex"));
    }

    #[tokio::test]
    async fn explicit_agent_is_normalized_before_lookup() {
        let adapters = registry_with(&["claude-code"]).await;
        let engine = RoutingEngine::new(adapters, HashMap::new(), None);
        let decision = engine
            .route(&RoutableTask {
                task_type: TaskType::Coding,
                explicit_agent_id: Some("claude-cli".into()),
            })
            .await;
        assert_eq!(decision.agent.as_deref(), Some("claude-code"));
    }

    #[tokio::test]
    async fn falls_back_to_alphabetical_healthy_adapter_without_policy() {
        let adapters = registry_with(&["zeta", "alpha"]).await;
        let engine = RoutingEngine::new(adapters, HashMap::new(), None);
        let decision = engine
            .route(&RoutableTask {
                task_type: TaskType::Coding,
                explicit_agent_id: None,
            })
            .await;
        assert_eq!(decision.agent.as_deref(), Some("alpha"));
    }

    #[tokio::test]
    async fn no_adapters_returns_unavailable() {
        let adapters = AdapterRegistry::new();
        let engine = RoutingEngine::new(adapters, HashMap::new(), None);
        let decision = engine
            .route(&RoutableTask {
                task_type: TaskType::Coding,
                explicit_agent_id: None,
            })
            .await;
        assert_eq!(decision.billing_mode, BillingMode::Unavailable);
        assert!(decision.agent.is_none());
    }
}
