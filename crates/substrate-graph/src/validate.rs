use std::collections::HashSet;

use substrate_core::{SubstrateError, ValidationCategory};
use substrate_types::{normalize_agent_id, TaskGraph};

use crate::cycle::find_cycle;

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<SubstrateError>,
    pub warnings: Vec<SubstrateError>,
    pub auto_fixed: Vec<String>,
}

impl ValidationReport {
    pub fn summary(&self, graph: &TaskGraph) -> String {
        let adjacency = crate::adjacency::build_adjacency_list(graph);
        format!(
            "{} tasks, {} root(s), {} leaf(s), max depth {}",
            graph.tasks.len(),
            adjacency.root_tasks.len(),
            adjacency.leaf_tasks.len(),
            adjacency.max_depth
        )
    }
}

/// Runs the full post-schema validation pipeline against an already-parsed
/// graph. Schema violations are caught earlier, at parse time; everything
/// here accumulates rather than short-circuits. `known_agents` is optional —
/// when absent, step 6 (agent availability) is skipped.
pub fn validate(graph: &mut TaskGraph, known_agents: Option<&HashSet<String>>) -> ValidationReport {
    let mut report = ValidationReport::default();

    // Step 2: agent-name normalization.
    for task in &mut graph.tasks {
        if let Some(raw) = &task.agent {
            if let Some(normalized) = normalize_agent_id(raw) {
                if &normalized != raw {
                    report.auto_fixed.push(format!("tasks.{}.agent: {raw} -> {normalized}", task.id));
                    task.agent = Some(normalized);
                }
            }
        }
    }

    // Step 3: empty graph.
    if graph.tasks.is_empty() {
        report.errors.push(SubstrateError::validation(
            ValidationCategory::EmptyGraph,
            "tasks",
            "task graph has no tasks",
        ));
    }

    // Step 4: dangling references.
    let known_ids: HashSet<&str> = graph.tasks.iter().map(|t| t.id.as_str()).collect();
    for task in &graph.tasks {
        for dep in &task.depends_on {
            if !known_ids.contains(dep.as_str()) {
                report.errors.push(
                    SubstrateError::validation(
                        ValidationCategory::DanglingRef,
                        format!("tasks.{}.depends_on", task.id),
                        format!("task `{}` depends on unknown task `{dep}`", task.id),
                    )
                    .with_suggestion(format!("remove or correct the reference to `{dep}`")),
                );
            }
        }
    }

    // Step 5: cycle detection (only meaningful once references resolve).
    if let Some(cycle_path) = find_cycle(graph) {
        report.errors.push(SubstrateError::validation(
            ValidationCategory::Cycle,
            "tasks",
            format!("dependency cycle: {}", cycle_path.join(" \u{2192} ")),
        ));
    }

    // Step 6: agent availability (warning only).
    if let Some(known_agents) = known_agents {
        for task in &graph.tasks {
            if let Some(agent) = &task.agent {
                if !known_agents.contains(agent.as_str()) {
                    report.warnings.push(SubstrateError::validation(
                        ValidationCategory::Schema,
                        format!("tasks.{}.agent", task.id),
                        format!("agent `{agent}` is not registered (agent_unavailable)"),
                    ));
                }
            }
        }
    }

    // Step 7: budget warnings.
    for task in &graph.tasks {
        if task.budget_usd.is_none() {
            report.warnings.push(SubstrateError::validation(
                ValidationCategory::NoBudget,
                format!("tasks.{}.budget_usd", task.id),
                format!("task `{}` has no budget_usd set", task.id),
            ));
        }
    }

    report.valid = report.errors.is_empty();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_task_graph_document;

    #[test]
    fn valid_chain_has_no_errors_and_summary_matches() {
        let mut graph = parse_task_graph_document(
            "version: \"1\"\nsession:\n  name: s\ntasks:\n  a:\n    name: A\n    prompt: p\n    type: coding\n    budget_usd: 1.0\n  b:\n    name: B\n    prompt: p\n    type: coding\n    depends_on: [a]\n    budget_usd: 1.0\n  c:\n    name: C\n    prompt: p\n    type: coding\n    depends_on: [b]\n    budget_usd: 1.0\n",
            false,
        )
        .unwrap();
        let report = validate(&mut graph, None);
        assert!(report.valid);
        assert!(report.errors.is_empty());
        assert_eq!(report.summary(&graph), "3 tasks, 1 root(s), 1 leaf(s), max depth 2");
    }

    #[test]
    fn dangling_reference_names_the_missing_task() {
        let mut graph = parse_task_graph_document(
            "version: \"1\"\nsession:\n  name: s\ntasks:\n  b:\n    name: B\n    prompt: p\n    type: coding\n    depends_on: [x]\n",
            false,
        )
        .unwrap();
        let report = validate(&mut graph, None);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        match &report.errors[0] {
            SubstrateError::Validation { field, message, .. } => {
                assert_eq!(field, "tasks.b.depends_on");
                assert!(message.contains('x'));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn missing_budget_is_a_warning_not_an_error() {
        let mut graph = parse_task_graph_document(
            "version: \"1\"\nsession:\n  name: s\ntasks:\n  a:\n    name: A\n    prompt: p\n    type: coding\n",
            false,
        )
        .unwrap();
        let report = validate(&mut graph, None);
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn agent_aliases_are_normalized_and_recorded() {
        let mut graph = parse_task_graph_document(
            "version: \"1\"\nsession:\n  name: s\ntasks:\n  a:\n    name: A\n    prompt: p\n    type: coding\n    agent: claude-cli\n    budget_usd: 1.0\n",
            false,
        )
        .unwrap();
        let report = validate(&mut graph, None);
        assert_eq!(graph.tasks[0].agent.as_deref(), Some("claude-code"));
        assert_eq!(report.auto_fixed.len(), 1);
    }
}
