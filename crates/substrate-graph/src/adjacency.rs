use std::collections::{BTreeMap, BTreeSet, HashMap};

use substrate_core::{SubstrateError, ValidationCategory};
use substrate_types::TaskGraph;

#[derive(Debug, Clone, Default)]
pub struct AdjacencyList {
    pub root_tasks: Vec<String>,
    pub leaf_tasks: Vec<String>,
    pub dependents: BTreeMap<String, Vec<String>>,
    pub max_depth: u32,
}

/// Builds root/leaf sets, the dependents map, and the max dependency-chain
/// depth. Assumes `graph` is already known acyclic.
pub fn build_adjacency_list(graph: &TaskGraph) -> AdjacencyList {
    let mut dependents: BTreeMap<String, Vec<String>> = graph.tasks.iter().map(|t| (t.id.clone(), Vec::new())).collect();
    let mut root_tasks = Vec::new();

    for task in &graph.tasks {
        if task.depends_on.is_empty() {
            root_tasks.push(task.id.clone());
        }
        for dep in &task.depends_on {
            dependents.entry(dep.clone()).or_default().push(task.id.clone());
        }
    }

    let leaf_tasks: Vec<String> = graph
        .tasks
        .iter()
        .filter(|t| dependents.get(&t.id).map(Vec::is_empty).unwrap_or(true))
        .map(|t| t.id.clone())
        .collect();

    let depth = depths(graph);
    let max_depth = depth.values().copied().max().unwrap_or(0);

    AdjacencyList {
        root_tasks,
        leaf_tasks,
        dependents,
        max_depth,
    }
}

/// Depth of a task is the length of the longest dependency chain beneath it;
/// roots are depth 0. Memoized depth-first walk; assumes acyclic input.
pub fn depths(graph: &TaskGraph) -> HashMap<String, u32> {
    let by_id: HashMap<&str, &BTreeSet<String>> = graph.tasks.iter().map(|t| (t.id.as_str(), &t.depends_on)).collect();
    let mut memo: HashMap<String, u32> = HashMap::new();

    fn depth_of<'a>(id: &'a str, by_id: &HashMap<&'a str, &'a BTreeSet<String>>, memo: &mut HashMap<String, u32>) -> u32 {
        if let Some(&d) = memo.get(id) {
            return d;
        }
        let deps = by_id.get(id).copied();
        let d = match deps {
            Some(deps) if !deps.is_empty() => deps
                .iter()
                .map(|dep| by_id.get(dep.as_str()).map(|_| depth_of(dep, by_id, memo) + 1).unwrap_or(0))
                .max()
                .unwrap_or(0),
            _ => 0,
        };
        memo.insert(id.to_string(), d);
        d
    }

    for task in &graph.tasks {
        depth_of(&task.id, &by_id, &mut memo);
    }
    memo
}

/// Kahn's algorithm with ties broken by lowest original insertion index, so
/// the output is deterministic and "stable by insertion order of the tasks
/// map" as the ready frontier evolves.
pub fn topo_sort(graph: &TaskGraph) -> Result<Vec<String>, SubstrateError> {
    let index_of: HashMap<&str, usize> = graph.tasks.iter().enumerate().map(|(i, t)| (t.id.as_str(), i)).collect();
    let mut indegree: HashMap<&str, usize> = graph.tasks.iter().map(|t| (t.id.as_str(), t.depends_on.len())).collect();
    let adjacency = build_adjacency_list(graph);

    let mut ready: BTreeSet<(usize, String)> = graph
        .tasks
        .iter()
        .filter(|t| t.depends_on.is_empty())
        .map(|t| (index_of[t.id.as_str()], t.id.clone()))
        .collect();

    let mut order = Vec::with_capacity(graph.tasks.len());
    while let Some((idx, id)) = ready.iter().next().cloned() {
        ready.remove(&(idx, id.clone()));
        order.push(id.clone());
        if let Some(dependents) = adjacency.dependents.get(&id) {
            for dependent in dependents {
                if let Some(count) = indegree.get_mut(dependent.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert((index_of[dependent.as_str()], dependent.clone()));
                    }
                }
            }
        }
    }

    if order.len() != graph.tasks.len() {
        return Err(SubstrateError::validation(
            ValidationCategory::Cycle,
            "tasks",
            "graph contains a cycle; topo_sort requires an acyclic graph",
        ));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_task_graph_document;

    const CHAIN: &str = "version: \"1\"\nsession:\n  name: s\ntasks:\n  a:\n    name: A\n    prompt: p\n    type: coding\n  b:\n    name: B\n    prompt: p\n    type: coding\n    depends_on: [a]\n  c:\n    name: C\n    prompt: p\n    type: coding\n    depends_on: [b]\n";

    #[test]
    fn three_task_chain_has_expected_shape() {
        let graph = parse_task_graph_document(CHAIN, false).unwrap();
        let adjacency = build_adjacency_list(&graph);
        assert_eq!(adjacency.root_tasks, vec!["a"]);
        assert_eq!(adjacency.leaf_tasks, vec!["c"]);
        assert_eq!(adjacency.max_depth, 2);
    }

    #[test]
    fn topo_sort_respects_every_edge() {
        let graph = parse_task_graph_document(CHAIN, false).unwrap();
        let order = topo_sort(&graph).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn single_node_is_root_and_leaf_with_zero_depth() {
        let graph = parse_task_graph_document(
            "version: \"1\"\nsession:\n  name: s\ntasks:\n  only:\n    name: Only\n    prompt: p\n    type: coding\n",
            false,
        )
        .unwrap();
        let adjacency = build_adjacency_list(&graph);
        assert_eq!(adjacency.root_tasks, vec!["only"]);
        assert_eq!(adjacency.leaf_tasks, vec!["only"]);
        assert_eq!(adjacency.max_depth, 0);
    }
}
