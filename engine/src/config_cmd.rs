use substrate_types::ResultEnvelope;

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

pub async fn get(state: &EngineState, key: &str) -> anyhow::Result<i32> {
    // Route through the masked export so a `config get providers.foo.api_key_env`
    // never prints a live secret, matching the masked-YAML-output requirement
    // for the full config dump.
    let masked_yaml = state.config.masked_export().await?;
    let value: serde_json::Value = serde_yaml::from_str(&masked_yaml)?;
    let segments: Vec<&str> = key.split('.').collect();
    let mut current = &value;
    for segment in &segments {
        match current.get(segment) {
            Some(found) => current = found,
            None => {
                print_envelope(&envelope("config get", false, None, Some(format!("no such key `{key}`"))));
                return Ok(2);
            }
        }
    }
    print_envelope(&envelope("config get", true, Some(serde_json::json!({ key: current })), None));
    Ok(0)
}

pub async fn set(state: &EngineState, key: &str, value: &str) -> anyhow::Result<i32> {
    let coerced = coerce(value);
    match state.config.set(key, coerced).await {
        Ok(()) => {
            print_envelope(&envelope("config set", true, Some(serde_json::json!({ key: value })), None));
            Ok(0)
        }
        Err(err) => {
            print_envelope(&envelope("config set", false, None, Some(err.to_string())));
            Ok(2)
        }
    }
}

pub async fn migrate(state: &EngineState) -> anyhow::Result<i32> {
    match state.config.reload().await {
        Ok(changed) => {
            print_envelope(&envelope("config migrate", true, Some(serde_json::json!({ "changed_keys": changed })), None));
            Ok(0)
        }
        Err(err) => {
            print_envelope(&envelope("config migrate", false, None, Some(err.to_string())));
            Ok(1)
        }
    }
}

fn coerce(raw: &str) -> serde_json::Value {
    if raw.eq_ignore_ascii_case("true") {
        return serde_json::Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return serde_json::Value::Bool(false);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return serde_json::Value::Number(i.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return serde_json::Value::Number(n);
        }
    }
    serde_json::Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::build_state;

    #[test]
    fn coerce_recognizes_bools_and_numbers_before_falling_back_to_string() {
        assert_eq!(coerce("true"), serde_json::Value::Bool(true));
        assert_eq!(coerce("FALSE"), serde_json::Value::Bool(false));
        assert_eq!(coerce("42"), serde_json::json!(42));
        assert_eq!(coerce("3.5"), serde_json::json!(3.5));
        assert_eq!(coerce("claude-code"), serde_json::json!("claude-code"));
    }

    #[tokio::test]
    async fn set_then_get_round_trips_through_the_merged_config() {
        let tmp = tempfile::tempdir().unwrap();
        let state = build_state(tmp.path()).await.unwrap();

        let code = set(&state, "global.max_concurrent_tasks", "8").await.unwrap();
        assert_eq!(code, 0);

        let code = get(&state, "global.max_concurrent_tasks").await.unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn get_reports_exit_code_two_for_an_unknown_key() {
        let tmp = tempfile::tempdir().unwrap();
        let state = build_state(tmp.path()).await.unwrap();

        let code = get(&state, "global.does_not_exist").await.unwrap();
        assert_eq!(code, 2);
    }

    #[tokio::test]
    async fn migrate_reloads_the_config_without_error() {
        let tmp = tempfile::tempdir().unwrap();
        let state = build_state(tmp.path()).await.unwrap();

        let code = migrate(&state).await.unwrap();
        assert_eq!(code, 0);
    }
}
