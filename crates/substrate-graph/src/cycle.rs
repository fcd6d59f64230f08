use std::collections::HashMap;

use substrate_types::TaskGraph;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Iterative DFS with three-color marking. Returns the closed cycle path
/// (`["a", "b", "a"]`) on the first back-edge found; `None` if acyclic.
pub fn find_cycle(graph: &TaskGraph) -> Option<Vec<String>> {
    let deps: HashMap<&str, Vec<&str>> = graph
        .tasks
        .iter()
        .map(|t| (t.id.as_str(), t.depends_on.iter().map(String::as_str).collect()))
        .collect();
    let mut color: HashMap<&str, Color> = graph.tasks.iter().map(|t| (t.id.as_str(), Color::White)).collect();

    for start in graph.tasks.iter().map(|t| t.id.as_str()) {
        if color.get(start) != Some(&Color::White) {
            continue;
        }

        let mut path: Vec<&str> = vec![start];
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        color.insert(start, Color::Gray);

        while let Some(&mut (node, ref mut idx)) = stack.last_mut() {
            let children = deps.get(node).cloned().unwrap_or_default();
            if *idx < children.len() {
                let child = children[*idx];
                *idx += 1;
                match color.get(child).copied() {
                    Some(Color::White) => {
                        color.insert(child, Color::Gray);
                        stack.push((child, 0));
                        path.push(child);
                    }
                    Some(Color::Gray) => {
                        let start_pos = path.iter().position(|n| *n == child).expect("gray node is on the path");
                        let mut cycle_path: Vec<String> = path[start_pos..].iter().map(|s| s.to_string()).collect();
                        cycle_path.push(child.to_string());
                        return Some(cycle_path);
                    }
                    Some(Color::Black) | None => {}
                }
            } else {
                color.insert(node, Color::Black);
                stack.pop();
                path.pop();
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_task_graph_document;

    #[test]
    fn chain_has_no_cycle() {
        let graph = parse_task_graph_document(
            "version: \"1\"\nsession:\n  name: s\ntasks:\n  a:\n    name: A\n    prompt: p\n    type: coding\n  b:\n    name: B\n    prompt: p\n    type: coding\n    depends_on: [a]\n",
            false,
        )
        .unwrap();
        assert!(find_cycle(&graph).is_none());
    }

    #[test]
    fn two_task_cycle_is_detected() {
        let graph = parse_task_graph_document(
            "version: \"1\"\nsession:\n  name: s\ntasks:\n  a:\n    name: A\n    prompt: p\n    type: coding\n    depends_on: [b]\n  b:\n    name: B\n    prompt: p\n    type: coding\n    depends_on: [a]\n",
            false,
        )
        .unwrap();
        let path = find_cycle(&graph).expect("cycle detected");
        assert!(path.contains(&"a".to_string()));
        assert!(path.contains(&"b".to_string()));
        assert_eq!(path.first(), path.last());
    }
}
