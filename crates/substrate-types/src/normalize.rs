/// Normalizes known agent-id aliases to their canonical form. Shared between
/// the task-graph engine (auto-fix on validation) and the routing engine
/// (selection input), so the alias table lives in one place.
pub fn normalize_agent_id(raw: &str) -> Option<String> {
    match raw {
        "claude" | "claude-cli" => Some("claude-code".to_string()),
        "codex-cli" => Some("codex".to_string()),
        "gemini-cli" | "gemini-code" => Some("gemini".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_known_aliases() {
        assert_eq!(normalize_agent_id("claude").as_deref(), Some("claude-code"));
        assert_eq!(
            normalize_agent_id("claude-cli").as_deref(),
            Some("claude-code")
        );
        assert_eq!(normalize_agent_id("codex-cli").as_deref(), Some("codex"));
        assert_eq!(normalize_agent_id("gemini-code").as_deref(), Some("gemini"));
    }

    #[test]
    fn leaves_unknown_ids_untouched() {
        assert_eq!(normalize_agent_id("claude-code"), None);
        assert_eq!(normalize_agent_id("custom-agent"), None);
    }
}
