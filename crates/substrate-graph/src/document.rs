use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use substrate_core::{SubstrateError, ValidationCategory};
use substrate_types::{SessionMeta, TaskGraph, TaskNode, TaskType};

/// On-disk shape of a task node. `depends_on` is a plain `Vec` here (not the
/// `BTreeSet` the in-memory `TaskNode` uses) so documents that list the same
/// dependency twice are a schema concern, not silently deduplicated.
#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawTaskNode {
    name: String,
    #[serde(default)]
    description: Option<String>,
    prompt: String,
    #[serde(rename = "type")]
    task_type: TaskType,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    budget_usd: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawSession {
    name: String,
    #[serde(default)]
    budget_usd: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawDocument {
    version: String,
    session: RawSession,
    #[serde(default)]
    tasks: IndexMap<String, RawTaskNode>,
}

/// Parses a task-graph document. YAML is assumed unless `is_json` is set or
/// the source is detected as JSON (first non-whitespace byte is `{`).
pub fn parse_task_graph_document(source: &str, is_json: bool) -> Result<TaskGraph, SubstrateError> {
    let looks_like_json = is_json || source.trim_start().starts_with('{');

    let raw: RawDocument = if looks_like_json {
        serde_json::from_str(source).map_err(|err| schema_error("$", err.to_string()))?
    } else {
        serde_yaml::from_str(source).map_err(|err| schema_error("$", err.to_string()))?
    };

    if raw.session.name.trim().is_empty() {
        return Err(schema_error("session.name", "session name must not be empty"));
    }

    let mut tasks = Vec::with_capacity(raw.tasks.len());
    for (id, raw_task) in raw.tasks {
        if raw_task.name.trim().is_empty() {
            return Err(schema_error(format!("tasks.{id}.name"), "task name must not be empty"));
        }
        if raw_task.prompt.trim().is_empty() {
            return Err(schema_error(format!("tasks.{id}.prompt"), "task prompt must not be empty"));
        }
        tasks.push(TaskNode {
            id,
            name: raw_task.name,
            description: raw_task.description,
            prompt: raw_task.prompt,
            task_type: raw_task.task_type,
            depends_on: raw_task.depends_on.into_iter().collect::<BTreeSet<_>>(),
            agent: raw_task.agent,
            budget_usd: raw_task.budget_usd,
            status: Default::default(),
        });
    }

    Ok(TaskGraph {
        version: raw.version,
        session: SessionMeta {
            name: raw.session.name,
            budget_usd: raw.session.budget_usd,
        },
        tasks,
    })
}

/// Renders a task graph back to YAML, preserving task insertion order, for
/// the `parse -> render -> parse` round-trip property.
pub fn render_task_graph_yaml(graph: &TaskGraph) -> Result<String, SubstrateError> {
    let mut tasks = IndexMap::with_capacity(graph.tasks.len());
    for task in &graph.tasks {
        tasks.insert(
            task.id.clone(),
            RawTaskNode {
                name: task.name.clone(),
                description: task.description.clone(),
                prompt: task.prompt.clone(),
                task_type: task.task_type,
                depends_on: task.depends_on.iter().cloned().collect(),
                agent: task.agent.clone(),
                budget_usd: task.budget_usd,
            },
        );
    }
    let document = RawDocument {
        version: graph.version.clone(),
        session: RawSession {
            name: graph.session.name.clone(),
            budget_usd: graph.session.budget_usd,
        },
        tasks,
    };
    serde_yaml::to_string(&document).map_err(|err| SubstrateError::Fatal(err.to_string()))
}

fn schema_error(field: impl Into<String>, message: impl Into<String>) -> SubstrateError {
    SubstrateError::validation(ValidationCategory::Schema, field, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
version: "1"
session:
  name: demo
tasks:
  a:
    name: Task A
    prompt: do a
    type: coding
  b:
    name: Task B
    prompt: do b
    type: testing
    depends_on: [a]
"#;

    #[test]
    fn parses_yaml_preserving_task_order() {
        let graph = parse_task_graph_document(YAML, false).unwrap();
        let ids: Vec<&str> = graph.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn detects_json_by_leading_brace() {
        let json = r#"{"version":"1","session":{"name":"demo"},"tasks":{}}"#;
        let graph = parse_task_graph_document(json, false).unwrap();
        assert_eq!(graph.session.name, "demo");
    }

    #[test]
    fn rejects_empty_session_name() {
        let yaml = "version: \"1\"\nsession:\n  name: \"\"\ntasks: {}\n";
        let err = parse_task_graph_document(yaml, false).unwrap_err();
        assert!(matches!(err, SubstrateError::Validation { .. }));
    }

    #[test]
    fn round_trip_preserves_adjacency_and_order() {
        let graph = parse_task_graph_document(YAML, false).unwrap();
        let rendered = render_task_graph_yaml(&graph).unwrap();
        let reparsed = parse_task_graph_document(&rendered, false).unwrap();
        let ids: Vec<&str> = reparsed.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(reparsed.tasks[1].depends_on, graph.tasks[1].depends_on);
    }
}
