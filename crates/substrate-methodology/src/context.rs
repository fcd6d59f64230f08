use std::collections::HashMap;

use serde_json::Value;
use substrate_store::DecisionStore;
use substrate_types::Decision;

use crate::types::{ContextRef, ContextSource, CATEGORY_PRIORITY};

pub(crate) async fn resolve_context_ref(
    context_ref: &ContextRef,
    params: &Value,
    store: &DecisionStore,
    run_id: &str,
    step_outputs: &HashMap<String, Value>,
) -> anyhow::Result<String> {
    match &context_ref.source {
        ContextSource::Param(key) => params
            .get(key)
            .map(render_scalar)
            .ok_or_else(|| anyhow::anyhow!("param `{key}` is not present")),
        ContextSource::Decision { phase, category } => {
            let decisions = store.get_decisions_by_phase_for_run(run_id, phase).await?;
            let filtered: Vec<&Decision> = decisions.iter().filter(|d| d.category == *category).collect();
            Ok(format_decisions_markdown(&format!("{phase}/{category}"), &filtered))
        }
        ContextSource::Step(step_name) => {
            let output = step_outputs
                .get(step_name)
                .ok_or_else(|| anyhow::anyhow!("step `{step_name}` has no recorded output yet"))?;
            Ok(format_step_output(output))
        }
    }
}

pub(crate) fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Header, then one bullet per decision: `- key: value (rationale)`, arrays
/// rendered as indented sub-bullets.
pub(crate) fn format_decisions_markdown(header: &str, decisions: &[&Decision]) -> String {
    let mut out = format!("## {header}\n");
    for decision in decisions {
        out.push_str(&bullet_line(&decision.key, &decision.value, decision.rationale.as_deref()));
    }
    out
}

fn bullet_line(key: &str, value: &Value, rationale: Option<&str>) -> String {
    let mut line = String::new();
    match value {
        Value::Array(items) => {
            line.push_str(&format!("- {key}:\n"));
            for item in items {
                line.push_str(&format!("  - {}\n", render_scalar(item)));
            }
        }
        other => {
            let rendered = render_scalar(other);
            match rationale {
                Some(r) => line.push_str(&format!("- {key}: {rendered} ({r})\n")),
                None => line.push_str(&format!("- {key}: {rendered}\n")),
            }
        }
    }
    line
}

/// All fields of a step's parsed output except `result`, one `key: value`
/// line per field.
fn format_step_output(output: &Value) -> String {
    let Value::Object(map) = output else {
        return render_scalar(output);
    };
    let mut out = String::new();
    for (key, value) in map {
        if key == "result" {
            continue;
        }
        out.push_str(&format!("- {key}: {}\n", render_scalar(value)));
    }
    out
}

pub(crate) fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64 / 4).max(1)
}

/// Replaces full decision dumps with a compact, category-priority-sorted
/// list, trimming lowest-priority entries until the rendered text is no
/// longer than `budget` tokens (by `estimate_tokens`). Returns `None` if it
/// still doesn't fit after trimming everything.
pub(crate) fn summarize_decisions(decisions: &[&Decision], budget: u64) -> Option<String> {
    let mut sorted: Vec<&&Decision> = decisions.iter().collect();
    sorted.sort_by_key(|d| category_rank(&d.category));

    while !sorted.is_empty() {
        let rendered = render_summary(&sorted);
        if estimate_tokens(&rendered) <= budget {
            return Some(rendered);
        }
        sorted.pop();
    }
    None
}

fn render_summary(decisions: &[&&Decision]) -> String {
    let mut out = String::new();
    for decision in decisions {
        let mut line = format!("- {}: {}", decision.key, render_scalar(&decision.value));
        if line.len() > 120 {
            line.truncate(120);
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn category_rank(category: &str) -> usize {
    CATEGORY_PRIORITY
        .iter()
        .position(|c| *c == category)
        .unwrap_or(CATEGORY_PRIORITY.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn decision(category: &str, key: &str, value: Value) -> Decision {
        Decision {
            id: "id".into(),
            pipeline_run_id: None,
            phase: "plan".into(),
            category: category.into(),
            key: key.into(),
            value,
            rationale: None,
            superseded_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn summary_sorts_by_category_priority_before_trimming() {
        let a = decision("ci", "pipeline", Value::String("x".into()));
        let b = decision("data", "schema", Value::String("y".into()));
        let refs = vec![&a, &b];
        let rendered = summarize_decisions(&refs, 1000).unwrap();
        assert!(rendered.find("schema").unwrap() < rendered.find("pipeline").unwrap());
    }

    #[test]
    fn summary_trims_lowest_priority_entries_first_to_fit_budget() {
        let a = decision("other", "low-priority-key", Value::String("a".repeat(200)));
        let b = decision("data", "high-priority-key", Value::String("b".into()));
        let refs = vec![&a, &b];
        let rendered = summarize_decisions(&refs, 5).unwrap();
        assert!(rendered.contains("high-priority-key"));
        assert!(!rendered.contains("low-priority-key"));
    }

    #[test]
    fn summary_returns_none_when_nothing_fits() {
        let a = decision("other", "k", Value::String("x".repeat(500)));
        let refs = vec![&a];
        assert!(summarize_decisions(&refs, 0).is_none());
    }
}
