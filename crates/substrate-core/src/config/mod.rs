mod migration;
mod types;

pub use migration::{Migrator, CURRENT_FORMAT_VERSION};
pub use types::*;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::Value;
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::SubstrateError;

const FIXED_LENGTH_MASK: &str = "********";

/// Layers merged lowest-to-highest: defaults, global, project, env, cli.
/// Mirrors the teacher's `ConfigLayers`, trimmed to the layers this contract
/// actually names.
#[derive(Debug, Clone, Default)]
struct ConfigLayers {
    global: Value,
    project: Value,
    env: Value,
    cli: Value,
}

pub struct ConfigStore {
    project_path: PathBuf,
    global_path: Option<PathBuf>,
    migrator: Migrator,
    layers: RwLock<ConfigLayers>,
}

impl ConfigStore {
    pub async fn new(project_path: impl Into<PathBuf>, cli_overrides: Value) -> anyhow::Result<Self> {
        let project_path = project_path.into();
        let global_path = dirs::config_dir().map(|dir| dir.join("substrate").join("config.yaml"));
        let migrator = Migrator::with_default_steps();

        let global = match &global_path {
            Some(path) => load_layer(path, &migrator).await?,
            None => Value::Object(Default::default()),
        };
        let project = load_layer(&project_path, &migrator).await?;
        let env = env_layer();

        Ok(Self {
            project_path,
            global_path,
            migrator,
            layers: RwLock::new(ConfigLayers {
                global,
                project,
                env,
                cli: cli_overrides,
            }),
        })
    }

    /// Returns the typed, fully-merged configuration.
    pub async fn get(&self) -> Result<SubstrateConfig, SubstrateError> {
        let merged = self.effective_value().await;
        serde_json::from_value(merged).map_err(|err| SubstrateError::Config(err.to_string()))
    }

    async fn effective_value(&self) -> Value {
        let layers = self.layers.read().await;
        let mut merged = serde_json::to_value(SubstrateConfig::default())
            .expect("SubstrateConfig always serializes");
        deep_merge(&mut merged, &layers.global);
        deep_merge(&mut merged, &layers.project);
        deep_merge(&mut merged, &layers.env);
        deep_merge(&mut merged, &layers.cli);
        merged
    }

    /// Sets a scalar value at a dotted path in the project layer, then
    /// reloads the merged view. Rejects paths that resolve to an object.
    pub async fn set(&self, dotted_path: &str, value: Value) -> Result<(), SubstrateError> {
        if value.is_object() {
            return Err(SubstrateError::Config(format!(
                "`{dotted_path}` resolves to an object; use a deeper path (UseDeeperPath)"
            )));
        }

        let merged = self.effective_value().await;
        let segments: Vec<&str> = dotted_path.split('.').collect();
        if let Some(existing) = resolve_path(&merged, &segments) {
            if existing.is_object() {
                return Err(SubstrateError::Config(format!(
                    "`{dotted_path}` resolves to an object; use a deeper path (UseDeeperPath)"
                )));
            }
        }

        {
            let mut layers = self.layers.write().await;
            set_path(&mut layers.project, &segments, value);
        }

        self.save_project().await?;
        Ok(())
    }

    async fn save_project(&self) -> Result<(), SubstrateError> {
        let layers = self.layers.read().await;
        let yaml = serde_yaml::to_string(&layers.project)
            .map_err(|err| SubstrateError::Config(err.to_string()))?;
        if let Some(parent) = self.project_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| SubstrateError::Config(err.to_string()))?;
        }
        fs::write(&self.project_path, yaml)
            .await
            .map_err(|err| SubstrateError::Config(err.to_string()))?;
        Ok(())
    }

    /// Fully reloads every layer from disk, rebuilding the merged view.
    /// Returns the set of top-level keys whose effective value changed.
    pub async fn reload(&self) -> Result<Vec<String>, SubstrateError> {
        let before = self.effective_value().await;

        let global = match &self.global_path {
            Some(path) => load_layer(path, &self.migrator)
                .await
                .map_err(|err| SubstrateError::Config(err.to_string()))?,
            None => Value::Object(Default::default()),
        };
        let project = load_layer(&self.project_path, &self.migrator)
            .await
            .map_err(|err| SubstrateError::Config(err.to_string()))?;

        {
            let mut layers = self.layers.write().await;
            layers.global = global;
            layers.project = project;
            layers.env = env_layer();
        }

        let after = self.effective_value().await;
        Ok(changed_top_level_keys(&before, &after))
    }

    /// Renders the merged config with every `api_key_env`-referenced secret
    /// replaced by a fixed-length mask, never the live environment value.
    pub async fn masked_export(&self) -> Result<String, SubstrateError> {
        let config = self.get().await?;
        let mut value = serde_json::to_value(&config).map_err(|err| SubstrateError::Config(err.to_string()))?;
        if let Some(providers) = value.get_mut("providers").and_then(|p| p.as_object_mut()) {
            for provider in providers.values_mut() {
                if let Some(env_name) = provider.get("api_key_env").and_then(|v| v.as_str()) {
                    if std::env::var(env_name).is_ok() {
                        provider["api_key_env"] =
                            Value::String(format!("{env_name} ({FIXED_LENGTH_MASK})"));
                    }
                }
            }
        }
        serde_yaml::to_string(&value).map_err(|err| SubstrateError::Config(err.to_string()))
    }
}

async fn load_layer(path: &Path, migrator: &Migrator) -> anyhow::Result<Value> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Value::Object(Default::default())),
        Err(err) => return Err(err).with_context(|| format!("failed to read {}", path.display())),
    };
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let mut value: Value = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse config at {}", path.display()))?;

    let found_version = value
        .get("config_format_version")
        .and_then(|v| v.as_str())
        .unwrap_or(CURRENT_FORMAT_VERSION)
        .to_string();

    if !migrator.is_supported(&found_version) {
        let backup_path = path.with_extension(format!("bak.v{found_version}"));
        fs::write(&backup_path, &raw)
            .await
            .with_context(|| format!("failed to write migration backup {}", backup_path.display()))?;
        let (migrated, _changed) = migrator
            .migrate(value, &found_version)
            .map_err(|err| anyhow::anyhow!(err))?;
        value = migrated;
        let migrated_yaml = serde_yaml::to_string(&value)?;
        fs::write(path, migrated_yaml)
            .await
            .with_context(|| format!("failed to persist migrated config to {}", path.display()))?;
    }

    Ok(value)
}

/// Fixed set of recognized `SUBSTRATE_*` environment variables, coerced to
/// bool/int/float/string. Unknown env keys are ignored.
fn env_layer() -> Value {
    let mut global = serde_json::Map::new();
    if let Some(v) = coerced_env("SUBSTRATE_LOG_LEVEL") {
        global.insert("log_level".to_string(), v);
    }
    if let Some(v) = coerced_env("SUBSTRATE_MAX_CONCURRENT_TASKS") {
        global.insert("max_concurrent_tasks".to_string(), v);
    }
    if let Some(v) = coerced_env("SUBSTRATE_BUDGET_CAP_TOKENS") {
        global.insert("budget_cap_tokens".to_string(), v);
    }
    if let Some(v) = coerced_env("SUBSTRATE_BUDGET_CAP_USD") {
        global.insert("budget_cap_usd".to_string(), v);
    }
    if let Some(v) = coerced_env("SUBSTRATE_WORKSPACE_DIR") {
        global.insert("workspace_dir".to_string(), v);
    }

    let mut layer = serde_json::Map::new();
    if !global.is_empty() {
        layer.insert("global".to_string(), Value::Object(global));
    }

    let mut providers = serde_json::Map::new();
    for (key, value) in std::env::vars() {
        let Some(provider_id) = key
            .strip_prefix("SUBSTRATE_")
            .and_then(|rest| rest.strip_suffix("_ENABLED"))
        else {
            continue;
        };
        let provider_id = provider_id.to_ascii_lowercase();
        providers.insert(
            provider_id,
            serde_json::json!({ "enabled": coerce_env_value(&value) }),
        );
    }
    if !providers.is_empty() {
        layer.insert("providers".to_string(), Value::Object(providers));
    }

    Value::Object(layer)
}

fn coerced_env(name: &str) -> Option<Value> {
    std::env::var(name).ok().map(|v| coerce_env_value(&v))
}

fn coerce_env_value(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(i.into());
    }
    if looks_like_float(raw) {
        if let Ok(f) = raw.parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Value::Number(n);
            }
        }
    }
    Value::String(raw.to_string())
}

fn looks_like_float(raw: &str) -> bool {
    raw.contains('.') && raw.replace(['-', '.'], "").chars().all(|c| c.is_ascii_digit())
}

/// Recursively merges `overlay` into `base`. Nested objects are merged
/// key-by-key; arrays and scalars are replaced wholesale.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

fn resolve_path<'a>(value: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments {
        current = current.get(segment)?;
    }
    Some(current)
}

fn set_path(root: &mut Value, segments: &[&str], value: Value) {
    if !root.is_object() {
        *root = Value::Object(Default::default());
    }
    let Some((last, rest)) = segments.split_last() else {
        return;
    };
    let mut current = root;
    for segment in rest {
        let obj = current.as_object_mut().expect("ensured object above");
        current = obj
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
        if !current.is_object() {
            *current = Value::Object(Default::default());
        }
    }
    current
        .as_object_mut()
        .expect("ensured object above")
        .insert(last.to_string(), value);
}

fn changed_top_level_keys(before: &Value, after: &Value) -> Vec<String> {
    let (Some(before), Some(after)) = (before.as_object(), after.as_object()) else {
        return Vec::new();
    };
    let mut keys: HashMap<&String, ()> = HashMap::new();
    for k in before.keys().chain(after.keys()) {
        keys.insert(k, ());
    }
    keys.into_keys()
        .filter(|k| before.get(*k) != after.get(*k))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_project_path() -> PathBuf {
        std::env::temp_dir().join(format!("substrate-config-test-{}", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn defaults_apply_when_no_files_exist() {
        let store = ConfigStore::new(temp_project_path(), Value::Object(Default::default()))
            .await
            .expect("config store builds");
        let config = store.get().await.expect("typed config");
        assert_eq!(config.global.max_concurrent_tasks, 4);
        assert_eq!(config.budget.default_task_budget_usd, 1.0);
    }

    #[tokio::test]
    async fn set_rejects_object_valued_paths() {
        let store = ConfigStore::new(temp_project_path(), Value::Object(Default::default()))
            .await
            .expect("config store builds");
        let err = store
            .set("global", serde_json::json!({"log_level": "debug"}))
            .await
            .expect_err("object value rejected");
        assert!(matches!(err, SubstrateError::Config(_)));
    }

    #[tokio::test]
    async fn set_then_reload_persists_the_scalar() {
        let path = temp_project_path();
        let store = ConfigStore::new(path.clone(), Value::Object(Default::default()))
            .await
            .expect("config store builds");
        store
            .set("global.max_concurrent_tasks", serde_json::json!(12))
            .await
            .expect("scalar set succeeds");

        store.reload().await.expect("reload succeeds");
        let config = store.get().await.expect("typed config");
        assert_eq!(config.global.max_concurrent_tasks, 12);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn deep_merge_replaces_arrays_and_merges_objects() {
        let mut base = serde_json::json!({
            "global": {"max_concurrent_tasks": 4, "workspace_dir": "."},
            "routing_policy": {"rules": ["a"]},
        });
        let overlay = serde_json::json!({
            "global": {"max_concurrent_tasks": 8},
            "routing_policy": {"rules": ["b", "c"]},
        });
        deep_merge(&mut base, &overlay);
        assert_eq!(base["global"]["max_concurrent_tasks"], 8);
        assert_eq!(base["global"]["workspace_dir"], ".");
        assert_eq!(base["routing_policy"]["rules"], serde_json::json!(["b", "c"]));
    }

    #[test]
    fn env_coercion_recognizes_bool_int_float_and_string() {
        assert_eq!(coerce_env_value("true"), Value::Bool(true));
        assert_eq!(coerce_env_value("false"), Value::Bool(false));
        assert_eq!(coerce_env_value("42"), Value::Number(42.into()));
        assert_eq!(coerce_env_value("-3"), Value::Number((-3).into()));
        assert_eq!(coerce_env_value("hello"), Value::String("hello".to_string()));
        match coerce_env_value("3.5") {
            Value::Number(n) => assert!((n.as_f64().unwrap() - 3.5).abs() < f64::EPSILON),
            other => panic!("expected number, got {other:?}"),
        }
    }
}
