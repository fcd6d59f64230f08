use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use substrate_dispatch::{AdapterRegistry, DispatchOptions, DispatchStatus, DispatchTask, WorkerPoolManager};
use substrate_store::DecisionStore;
use substrate_types::{Decision, TaskType};
use tracing::warn;

use crate::context::{estimate_tokens, resolve_context_ref, summarize_decisions};
use crate::prompt::PromptTemplateSource;
use crate::types::{
    ContextSource, PersistKey, PhaseResult, StepDefinition, StepOutcome, StepTokenUsage,
    ABSOLUTE_MAX_PROMPT_TOKENS, TOKENS_PER_DECISION,
};

/// Executes an ordered list of steps within one phase of one pipeline run,
/// halting on the first step failure. Holds no state across calls — every
/// run's context (params, decisions so far, prior step outputs) is either
/// passed in or fetched fresh from the Decision Store.
pub struct StepRunner {
    store: Arc<DecisionStore>,
    templates: Arc<dyn PromptTemplateSource>,
    adapters: Arc<AdapterRegistry>,
    pool: Arc<WorkerPoolManager>,
    base_budget_tokens: u64,
}

impl StepRunner {
    pub fn new(
        store: Arc<DecisionStore>,
        templates: Arc<dyn PromptTemplateSource>,
        adapters: Arc<AdapterRegistry>,
        pool: Arc<WorkerPoolManager>,
        base_budget_tokens: u64,
    ) -> Self {
        Self {
            store,
            templates,
            adapters,
            pool,
            base_budget_tokens,
        }
    }

    pub async fn execute_phase(
        &self,
        run_id: &str,
        phase: &str,
        steps: &[StepDefinition],
        params: &Value,
    ) -> PhaseResult {
        let mut outcomes = Vec::with_capacity(steps.len());
        let mut step_outputs: HashMap<String, Value> = HashMap::new();
        let mut total = StepTokenUsage::default();

        for step in steps {
            let outcome = match self.execute_step(run_id, phase, step, params, &step_outputs).await {
                Ok(outcome) => outcome,
                Err(err) => StepOutcome {
                    name: step.name.clone(),
                    success: false,
                    output: None,
                    error: Some(format!("unexpected error: {err}")),
                    token_usage: StepTokenUsage::default(),
                },
            };

            total.input += outcome.token_usage.input;
            total.output += outcome.token_usage.output;
            let failed = !outcome.success;
            let error = outcome.error.clone();

            if let Some(output) = &outcome.output {
                step_outputs.insert(step.name.clone(), output.clone());
            }
            outcomes.push(outcome);

            if failed {
                return PhaseResult {
                    success: false,
                    steps: outcomes,
                    token_usage: total,
                    error,
                };
            }
        }

        PhaseResult {
            success: true,
            steps: outcomes,
            token_usage: total,
            error: None,
        }
    }

    async fn execute_step(
        &self,
        run_id: &str,
        phase: &str,
        step: &StepDefinition,
        params: &Value,
        step_outputs: &HashMap<String, Value>,
    ) -> anyhow::Result<StepOutcome> {
        // 1. Resolve context, one rendered string per placeholder.
        let mut resolved: HashMap<String, String> = HashMap::new();
        let mut decision_placeholders: Vec<String> = Vec::new();
        let mut all_decisions: Vec<Decision> = Vec::new();

        for context_ref in &step.context {
            if let ContextSource::Decision { phase, category } = &context_ref.source {
                let decisions = self.store.get_decisions_by_phase_for_run(run_id, phase).await?;
                let filtered: Vec<Decision> = decisions.into_iter().filter(|d| d.category == *category).collect();
                all_decisions.extend(filtered);
                decision_placeholders.push(context_ref.placeholder.clone());
            }
            let rendered = resolve_context_ref(context_ref, params, &self.store, run_id, step_outputs).await?;
            resolved.insert(context_ref.placeholder.clone(), rendered);
        }

        // 2. Load + interpolate template.
        let template = self.templates.load(&step.task_type)?;
        let mut prompt = interpolate(&template, &resolved);

        // 3. Dynamic budget + summarization.
        let budget = (self.base_budget_tokens + all_decisions.len() as u64 * TOKENS_PER_DECISION).min(ABSOLUTE_MAX_PROMPT_TOKENS);
        if estimate_tokens(&prompt) > budget {
            let refs: Vec<&Decision> = all_decisions.iter().collect();
            match summarize_decisions(&refs, budget) {
                Some(summary) => {
                    for placeholder in &decision_placeholders {
                        resolved.insert(placeholder.clone(), summary.clone());
                    }
                    prompt = interpolate(&template, &resolved);
                }
                None => {
                    return Ok(StepOutcome {
                        name: step.name.clone(),
                        success: false,
                        output: None,
                        error: Some("prompt exceeds budget after summarization".to_string()),
                        token_usage: StepTokenUsage::default(),
                    });
                }
            }
        }

        // 4. Dispatch.
        let adapter = self.adapters.select(None).await?;
        let dispatch_task = DispatchTask {
            id: format!("{run_id}:{phase}:{}", step.name),
            prompt,
            task_type: task_type_for(&step.task_type),
            agent_id: None,
        };
        let handle = self.pool.dispatch(dispatch_task, adapter, DispatchOptions::default()).await;
        let result = handle.result().await;

        let token_usage = StepTokenUsage {
            input: result.token_estimate.input,
            output: result.token_estimate.output,
        };

        if result.status != DispatchStatus::Completed {
            let reason = match result.status {
                DispatchStatus::Failed => "dispatch failed",
                DispatchStatus::Timeout => "timed out",
                DispatchStatus::Cancelled => "cancelled",
                DispatchStatus::Completed => unreachable!(),
            };
            return Ok(StepOutcome {
                name: step.name.clone(),
                success: false,
                output: None,
                error: Some(reason.to_string()),
                token_usage,
            });
        }

        let Some(parsed) = result.parsed.clone() else {
            return Ok(StepOutcome {
                name: step.name.clone(),
                success: false,
                output: None,
                error: Some(
                    result
                        .parse_error
                        .clone()
                        .unwrap_or_else(|| "schema validation failed".to_string()),
                ),
                token_usage,
            });
        };

        if parsed.get("result").and_then(Value::as_str) == Some("failed") {
            return Ok(StepOutcome {
                name: step.name.clone(),
                success: false,
                output: Some(parsed),
                error: Some("agent reported failure".to_string()),
                token_usage,
            });
        }

        // 5. Persist decisions.
        for rule in &step.persist {
            let Some(value) = parsed.get(rule.field.as_str()) else {
                warn!(step = step.name.as_str(), field = rule.field.as_str(), "persist rule referenced a missing output field");
                continue;
            };
            match &rule.key {
                PersistKey::Fixed(key) => {
                    self.store
                        .upsert_decision(Some(run_id), phase, &rule.category, key, value.clone(), None)
                        .await?;
                }
                PersistKey::Array => {
                    if let Value::Array(items) = value {
                        for (index, item) in items.iter().enumerate() {
                            let key = format!("{}-{index}", step.name);
                            self.store
                                .upsert_decision(Some(run_id), phase, &rule.category, &key, item.clone(), None)
                                .await?;
                        }
                    }
                }
            }
        }

        // 6. Register artifact.
        if let Some(registration) = &step.register_artifact {
            let summary = (registration.summarize)(&parsed);
            self.store
                .create_artifact(Some(run_id), phase, &registration.kind, &registration.path, None, Some(&summary))
                .await?;
        }

        Ok(StepOutcome {
            name: step.name.clone(),
            success: true,
            output: Some(parsed),
            error: None,
            token_usage,
        })
    }
}

fn task_type_for(key: &str) -> TaskType {
    match key {
        "testing" => TaskType::Testing,
        "docs" => TaskType::Docs,
        "debugging" => TaskType::Debugging,
        "refactoring" => TaskType::Refactoring,
        _ => TaskType::Coding,
    }
}

fn interpolate(template: &str, resolved: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (placeholder, value) in resolved {
        let token = format!("{{{{{placeholder}}}}}");
        out = out.replace(&token, value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::StaticTemplateSource;
    use crate::types::{ContextRef, ContextSource, PersistKey, PersistRule};
    use serde_json::json;
    use substrate_core::EventBus;
    use substrate_dispatch::EchoAdapter;

    async fn harness() -> (StepRunner, Arc<DecisionStore>, String) {
        let store = Arc::new(DecisionStore::open_in_memory().await.unwrap());
        let run = store.create_pipeline_run("standard", None).await.unwrap();

        let adapters = Arc::new(AdapterRegistry::new());
        adapters.register(Arc::new(EchoAdapter::new("echo"))).await;
        let pool = Arc::new(WorkerPoolManager::new(4, EventBus::new()));
        let templates = Arc::new(StaticTemplateSource::new([(
            "coding".to_string(),
            "task: {{task_name}}".to_string(),
        )]));

        let runner = StepRunner::new(store.clone(), templates, adapters, pool, 500);
        (runner, store, run.id)
    }

    #[tokio::test]
    async fn single_step_succeeds_and_persists_decisions() {
        let (runner, store, run_id) = harness().await;

        let step = StepDefinition {
            name: "step-1".to_string(),
            task_type: "coding".to_string(),
            context: vec![ContextRef {
                placeholder: "task_name".to_string(),
                source: ContextSource::Param("task_name".to_string()),
            }],
            persist: vec![PersistRule {
                field: "result".to_string(),
                category: "runtime".to_string(),
                key: PersistKey::Fixed("step-1-result".to_string()),
            }],
            register_artifact: None,
        };

        let result = runner
            .execute_phase(&run_id, "plan", &[step], &json!({ "task_name": "build the thing" }))
            .await;

        assert!(result.success);
        assert_eq!(result.steps.len(), 1);
        assert!(result.steps[0].success);

        let decisions = store.get_decisions_by_phase_for_run(&run_id, "plan").await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].key, "step-1-result");
    }

    #[tokio::test]
    async fn halts_on_first_failing_step_and_skips_the_rest() {
        let (runner, _store, run_id) = harness().await;

        let failing = StepDefinition {
            name: "missing-param".to_string(),
            task_type: "coding".to_string(),
            context: vec![ContextRef {
                placeholder: "task_name".to_string(),
                source: ContextSource::Param("task_name".to_string()),
            }],
            persist: vec![],
            register_artifact: None,
        };
        let second = StepDefinition {
            name: "never-runs".to_string(),
            task_type: "coding".to_string(),
            context: vec![],
            persist: vec![],
            register_artifact: None,
        };

        let result = runner.execute_phase(&run_id, "plan", &[failing, second], &json!({})).await;

        assert!(!result.success);
        assert_eq!(result.steps.len(), 1);
        assert!(result.steps[0].error.as_ref().unwrap().starts_with("unexpected error"));
    }

    #[tokio::test]
    async fn step_referencing_prior_step_output_resolves_it() {
        let (runner, _store, run_id) = harness().await;

        let step_one = StepDefinition {
            name: "step-1".to_string(),
            task_type: "coding".to_string(),
            context: vec![ContextRef {
                placeholder: "task_name".to_string(),
                source: ContextSource::Param("task_name".to_string()),
            }],
            persist: vec![],
            register_artifact: None,
        };
        let step_two = StepDefinition {
            name: "step-2".to_string(),
            task_type: "coding".to_string(),
            context: vec![ContextRef {
                placeholder: "task_name".to_string(),
                source: ContextSource::Step("step-1".to_string()),
            }],
            persist: vec![],
            register_artifact: None,
        };

        let result = runner
            .execute_phase(&run_id, "plan", &[step_one, step_two], &json!({ "task_name": "build it" }))
            .await;

        assert!(result.success);
        assert_eq!(result.steps.len(), 2);
    }
}
