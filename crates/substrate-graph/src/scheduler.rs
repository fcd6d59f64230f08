use std::collections::BTreeMap;

use substrate_types::{TaskGraph, TaskStatus};

use crate::adjacency::depths;

/// The scheduler never persists the ready frontier — it's derived fresh from
/// the graph's current task statuses on every call.
pub fn ready(graph: &TaskGraph) -> Vec<&str> {
    graph
        .tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Pending)
        .filter(|task| {
            task.depends_on
                .iter()
                .all(|dep| graph.task(dep).map(|d| d.status == TaskStatus::Completed).unwrap_or(false))
        })
        .map(|task| task.id.as_str())
        .collect()
}

/// Marks every pending descendant of a failed or cancelled task `blocked`,
/// recursing through the dependents chain. Completed/failed ancestors are
/// the only trigger — a cancelled task cancels its descendants too.
pub fn propagate_blocked(graph: &mut TaskGraph) {
    loop {
        let blocked_now: Vec<String> = graph
            .tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Pending)
            .filter(|task| {
                task.depends_on.iter().any(|dep| {
                    graph
                        .task(dep)
                        .map(|d| matches!(d.status, TaskStatus::Failed | TaskStatus::Blocked | TaskStatus::Cancelled))
                        .unwrap_or(false)
                })
            })
            .map(|task| task.id.clone())
            .collect();

        if blocked_now.is_empty() {
            break;
        }
        for id in &blocked_now {
            if let Some(task) = graph.task_mut(id) {
                task.status = TaskStatus::Blocked;
            }
        }
    }
}

/// Ambient convenience view: groups tasks into waves by dependency depth, the
/// way a caller that wants to drive execution purely off static structure
/// (rather than live status) would. Wave `n` contains every task whose
/// longest dependency chain has length `n`.
pub fn execution_waves(graph: &TaskGraph) -> Vec<Vec<String>> {
    let depth = depths(graph);
    let mut waves: BTreeMap<u32, Vec<String>> = BTreeMap::new();
    for task in &graph.tasks {
        let d = depth.get(&task.id).copied().unwrap_or(0);
        waves.entry(d).or_default().push(task.id.clone());
    }
    waves.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_task_graph_document;

    const CHAIN: &str = "version: \"1\"\nsession:\n  name: s\ntasks:\n  a:\n    name: A\n    prompt: p\n    type: coding\n  b:\n    name: B\n    prompt: p\n    type: coding\n    depends_on: [a]\n  c:\n    name: C\n    prompt: p\n    type: coding\n    depends_on: [b]\n";

    #[test]
    fn ready_only_returns_root_tasks_initially() {
        let graph = parse_task_graph_document(CHAIN, false).unwrap();
        assert_eq!(ready(&graph), vec!["a"]);
    }

    #[test]
    fn ready_advances_as_dependencies_complete() {
        let mut graph = parse_task_graph_document(CHAIN, false).unwrap();
        graph.task_mut("a").unwrap().status = substrate_types::TaskStatus::Completed;
        assert_eq!(ready(&graph), vec!["b"]);
    }

    #[test]
    fn failed_dependency_blocks_descendants() {
        let mut graph = parse_task_graph_document(CHAIN, false).unwrap();
        graph.task_mut("a").unwrap().status = substrate_types::TaskStatus::Failed;
        propagate_blocked(&mut graph);
        assert_eq!(graph.task("b").unwrap().status, substrate_types::TaskStatus::Blocked);
        assert_eq!(graph.task("c").unwrap().status, substrate_types::TaskStatus::Blocked);
        assert!(ready(&graph).is_empty());
    }

    #[test]
    fn execution_waves_group_by_depth() {
        let graph = parse_task_graph_document(CHAIN, false).unwrap();
        let waves = execution_waves(&graph);
        assert_eq!(waves, vec![vec!["a".to_string()], vec!["b".to_string()], vec!["c".to_string()]]);
    }
}
