use std::collections::HashSet;
use std::path::Path;

use substrate_dispatch::{DispatchOptions, DispatchStatus, DispatchTask};
use substrate_graph::{parse_task_graph_document, propagate_blocked, ready, validate};
use substrate_routing::RoutableTask;
use substrate_store::DecisionStore;
use substrate_types::{ResultEnvelope, SubstrateEvent, TaskStatus, TokenUsage};
use tracing::{info, warn};

use crate::state::EngineState;

fn envelope(command: &str, success: bool, data: Option<serde_json::Value>, error: Option<String>) -> ResultEnvelope {
    ResultEnvelope {
        success,
        data,
        error,
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        command: command.to_string(),
    }
}

fn print_envelope(envelope: &ResultEnvelope) {
    println!("{}", serde_json::to_string(envelope).expect("ResultEnvelope always serializes"));
}

fn is_json_path(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("json")
}

/// `substrate validate <task-graph-file>` — schema/cycle/dangle validation
/// only, no dispatch. Exit code 2 on failure.
pub async fn validate_command(state: &EngineState, path: &Path) -> anyhow::Result<i32> {
    let source = tokio::fs::read_to_string(path).await?;
    let mut graph = match parse_task_graph_document(&source, is_json_path(path)) {
        Ok(graph) => graph,
        Err(err) => {
            print_envelope(&envelope("validate", false, None, Some(err.to_string())));
            return Ok(2);
        }
    };

    let known_agents: HashSet<String> = state.adapters.healthy_ids().await.into_iter().collect();
    let report = validate(&mut graph, Some(&known_agents));
    let summary = report.summary(&graph);

    let data = serde_json::json!({
        "valid": report.valid,
        "summary": summary,
        "errors": report.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
        "warnings": report.warnings.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
        "auto_fixed": report.auto_fixed,
    });

    print_envelope(&envelope("validate", report.valid, Some(data), None));
    Ok(if report.valid { 0 } else { 2 })
}

/// `substrate run <task-graph-file>` — parse, validate, and execute a task
/// graph against a fresh pipeline run, one dependency wave at a time.
pub async fn run_command(state: &EngineState, path: &Path) -> anyhow::Result<i32> {
    let source = tokio::fs::read_to_string(path).await?;
    let mut graph = match parse_task_graph_document(&source, is_json_path(path)) {
        Ok(graph) => graph,
        Err(err) => {
            print_envelope(&envelope("run", false, None, Some(err.to_string())));
            return Ok(2);
        }
    };

    let known_agents: HashSet<String> = state.adapters.healthy_ids().await.into_iter().collect();
    let report = validate(&mut graph, Some(&known_agents));
    if !report.valid {
        let data = serde_json::json!({
            "errors": report.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
        });
        print_envelope(&envelope("run", false, Some(data), Some("task graph failed validation".to_string())));
        return Ok(2);
    }

    let pipeline_run = state.store.create_pipeline_run(&graph.session.name, None).await?;
    info!(run_id = %pipeline_run.id, tasks = graph.tasks.len(), "starting pipeline run");

    if let Some(cap) = graph.session.budget_usd {
        // Session-level cap: any task inherits it unless it carries its own.
        for task in &graph.tasks {
            if task.budget_usd.is_none() {
                state.budget.record_task_budget_cap(&task.id, cap).await;
            }
        }
    }
    for task in &graph.tasks {
        if let Some(cap) = task.budget_usd {
            state.budget.record_task_budget_cap(&task.id, cap).await;
        }
    }

    let mut overall_success = true;
    loop {
        let ready_ids: Vec<String> = ready(&graph).into_iter().map(str::to_string).collect();
        if ready_ids.is_empty() {
            break;
        }

        let mut tasks = Vec::with_capacity(ready_ids.len());
        for task_id in &ready_ids {
            graph.task_mut(task_id).unwrap().status = TaskStatus::InProgress;
            tasks.push(graph.task(task_id).unwrap().clone());
        }
        let waves = tasks.iter().map(|task| run_one_task(state, &pipeline_run.id, task));
        let outcomes = futures::future::join_all(waves).await;

        for (task_id, completed) in ready_ids.into_iter().zip(outcomes) {
            let status = if completed { TaskStatus::Completed } else { TaskStatus::Failed };
            if !completed {
                overall_success = false;
            }
            graph.task_mut(&task_id).unwrap().status = status;
        }
        propagate_blocked(&mut graph);
    }

    let final_status = if overall_success {
        substrate_types::RunStatus::Completed
    } else {
        substrate_types::RunStatus::Failed
    };
    state.store.update_pipeline_run_status(&pipeline_run.id, final_status, None).await?;

    let data = serde_json::json!({
        "run_id": pipeline_run.id,
        "tasks": graph.tasks.iter().map(|t| serde_json::json!({"id": t.id, "status": t.status})).collect::<Vec<_>>(),
    });
    print_envelope(&envelope("run", overall_success, Some(data), None));
    Ok(if overall_success { 0 } else { 1 })
}

/// Routes, dispatches, and persists cost for one task node. Returns whether
/// the task completed successfully.
async fn run_one_task(state: &EngineState, run_id: &str, task: &substrate_types::TaskNode) -> bool {
    state
        .event_bus
        .publish(SubstrateEvent::TaskReady {
            run_id: run_id.to_string(),
            task_id: task.id.clone(),
        })
        .await;

    let decision = state
        .routing
        .route(&RoutableTask {
            task_type: task.task_type,
            explicit_agent_id: task.agent.clone(),
        })
        .await;

    let Some(agent) = decision.agent.clone() else {
        warn!(task_id = task.id.as_str(), "no agent available to route this task");
        return false;
    };

    state
        .event_bus
        .publish(SubstrateEvent::TaskRouted {
            run_id: run_id.to_string(),
            task_id: task.id.clone(),
            agent: agent.clone(),
        })
        .await;

    let adapter = match state.adapters.select(Some(agent.as_str())).await {
        Ok(adapter) => adapter,
        Err(err) => {
            warn!(task_id = task.id.as_str(), error = %err, "adapter selection failed after routing");
            return false;
        }
    };

    let dispatch_task = DispatchTask {
        id: task.id.clone(),
        prompt: task.prompt.clone(),
        task_type: task.task_type,
        agent_id: Some(agent.clone()),
    };
    let handle = state.pool.dispatch(dispatch_task, adapter, DispatchOptions::default()).await;
    state
        .event_bus
        .publish(SubstrateEvent::TaskStarted {
            run_id: run_id.to_string(),
            task_id: task.id.clone(),
            worker_id: handle.id.clone(),
        })
        .await;

    let result = handle.result().await;
    let succeeded = result.status == DispatchStatus::Completed;

    let cost_usd = estimate_cost_usd(&result.token_estimate);
    record_cost(state.store.as_ref(), run_id, &task.id, &agent, result.token_estimate.input, result.token_estimate.output, cost_usd).await;
    // The Budget Enforcer is already subscribed to `CostRecorded`; it runs its
    // own check and publishes `budget:exceeded:*` itself (see the
    // cyclic-ownership note — this runner never decides that directly).
    state
        .event_bus
        .publish(SubstrateEvent::CostRecorded {
            run_id: run_id.to_string(),
            task_id: task.id.clone(),
            session_id: run_id.to_string(),
            cost_usd,
        })
        .await;

    state
        .event_bus
        .publish(SubstrateEvent::TaskFinished {
            run_id: run_id.to_string(),
            task_id: task.id.clone(),
            status: if succeeded { "completed".to_string() } else { "failed".to_string() },
        })
        .await;

    succeeded
}

/// Flat per-million-token estimate; the adapter layer has no native cost
/// figure to report, so this keeps the budget machinery exercised end to end
/// without inventing a provider-specific pricing table.
fn estimate_cost_usd(estimate: &substrate_dispatch::TokenEstimate) -> f64 {
    const USD_PER_1K_TOKENS: f64 = 0.002;
    ((estimate.input + estimate.output) as f64 / 1000.0) * USD_PER_1K_TOKENS
}

async fn record_cost(store: &DecisionStore, run_id: &str, task_id: &str, agent: &str, input: u64, output: u64, cost_usd: f64) {
    let usage = TokenUsage {
        pipeline_run_id: run_id.to_string(),
        phase: task_id.to_string(),
        agent: agent.to_string(),
        input_tokens: input,
        output_tokens: output,
        cost_usd,
        metadata: None,
        created_at: chrono::Utc::now(),
    };
    if let Err(err) = store.record_token_usage(&usage).await {
        warn!(task_id, error = %err, "failed to record token usage");
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::state::build_state;

    const VALID_GRAPH: &str = r#"
version: "1"
session:
  name: demo
tasks:
  a:
    name: Write the thing
    prompt: write it
    type: coding
  b:
    name: Test the thing
    prompt: test it
    type: testing
    depends_on: [a]
"#;

    const CYCLIC_GRAPH: &str = r#"
version: "1"
session:
  name: demo
tasks:
  a:
    name: A
    prompt: a
    type: coding
    depends_on: [b]
  b:
    name: B
    prompt: b
    type: coding
    depends_on: [a]
"#;

    async fn write_graph(dir: &std::path::Path, source: &str) -> PathBuf {
        let path = dir.join("graph.yaml");
        tokio::fs::write(&path, source).await.unwrap();
        path
    }

    #[tokio::test]
    async fn validate_command_accepts_well_formed_graph() {
        let tmp = tempfile::tempdir().unwrap();
        let state = build_state(tmp.path()).await.unwrap();
        let graph_path = write_graph(tmp.path(), VALID_GRAPH).await;

        let code = validate_command(&state, &graph_path).await.unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn validate_command_rejects_cyclic_graph() {
        let tmp = tempfile::tempdir().unwrap();
        let state = build_state(tmp.path()).await.unwrap();
        let graph_path = write_graph(tmp.path(), CYCLIC_GRAPH).await;

        let code = validate_command(&state, &graph_path).await.unwrap();
        assert_eq!(code, 2);
    }

    #[tokio::test]
    async fn run_command_executes_every_task_against_the_echo_adapter() {
        let tmp = tempfile::tempdir().unwrap();
        let state = build_state(tmp.path()).await.unwrap();
        let graph_path = write_graph(tmp.path(), VALID_GRAPH).await;

        let code = run_command(&state, &graph_path).await.unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn run_command_rejects_an_invalid_graph_without_dispatching() {
        let tmp = tempfile::tempdir().unwrap();
        let state = build_state(tmp.path()).await.unwrap();
        let graph_path = write_graph(tmp.path(), CYCLIC_GRAPH).await;

        let code = run_command(&state, &graph_path).await.unwrap();
        assert_eq!(code, 2);
    }
}
