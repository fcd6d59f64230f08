use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::error::SubstrateError;

/// The format version this build of Substrate writes and reads natively.
pub const CURRENT_FORMAT_VERSION: &str = "2";

const SUPPORTED_FORMAT_VERSIONS: &[&str] = &["2"];

type MigrationStep = fn(Value) -> Value;

/// Applies pure, ordered `config -> config` steps from an old
/// `config_format_version` up to [`CURRENT_FORMAT_VERSION`]. Each step is
/// keyed by the version it migrates *from*.
pub struct Migrator {
    steps: HashMap<u32, MigrationStep>,
}

impl Migrator {
    pub fn with_default_steps() -> Self {
        let mut steps: HashMap<u32, MigrationStep> = HashMap::new();
        steps.insert(1, migrate_v1_to_v2);
        Self { steps }
    }

    pub fn is_supported(&self, version: &str) -> bool {
        SUPPORTED_FORMAT_VERSIONS.contains(&version)
    }

    /// Migrates `config` from `from_version` to current, returning the
    /// migrated document and the top-level keys any step touched.
    pub fn migrate(
        &self,
        mut config: Value,
        from_version: &str,
    ) -> Result<(Value, Vec<String>), SubstrateError> {
        let mut version: u32 = from_version.parse().map_err(|_| incompatible(from_version))?;
        let current: u32 = CURRENT_FORMAT_VERSION
            .parse()
            .expect("CURRENT_FORMAT_VERSION is always a valid integer");

        let mut changed_keys = BTreeSet::new();
        while version < current {
            let Some(step) = self.steps.get(&version) else {
                return Err(incompatible(from_version));
            };
            let before = config.clone();
            config = step(config);
            collect_changed_top_level_keys(&before, &config, &mut changed_keys);
            version += 1;
        }

        if let Some(obj) = config.as_object_mut() {
            obj.insert(
                "config_format_version".to_string(),
                Value::String(CURRENT_FORMAT_VERSION.to_string()),
            );
        }
        Ok((config, changed_keys.into_iter().collect()))
    }
}

impl Default for Migrator {
    fn default() -> Self {
        Self::with_default_steps()
    }
}

fn incompatible(found: &str) -> SubstrateError {
    SubstrateError::IncompatibleFormat {
        found: found.to_string(),
        current: CURRENT_FORMAT_VERSION.to_string(),
        message: format!(
            "no migration path registered from config_format_version `{found}`; run `substrate config migrate` after reviewing the `.bak` file"
        ),
    }
}

/// v1 stored routing rules as flat top-level `routing_rules`/`default_provider`
/// keys; v2 nests them under `routing_policy`.
fn migrate_v1_to_v2(mut config: Value) -> Value {
    if let Some(obj) = config.as_object_mut() {
        let default_provider = obj.remove("default_provider");
        if let Some(rules) = obj.remove("routing_rules") {
            let mut policy = serde_json::json!({ "rules": rules });
            if let Some(default_provider) = default_provider {
                policy["default_provider"] = default_provider;
            }
            obj.insert("routing_policy".to_string(), policy);
        } else if let Some(default_provider) = default_provider {
            obj.insert(
                "routing_policy".to_string(),
                serde_json::json!({ "default_provider": default_provider, "rules": [] }),
            );
        }
    }
    config
}

fn collect_changed_top_level_keys(before: &Value, after: &Value, out: &mut BTreeSet<String>) {
    let (Some(before), Some(after)) = (before.as_object(), after.as_object()) else {
        return;
    };
    let mut keys: BTreeSet<&String> = before.keys().collect();
    keys.extend(after.keys());
    for key in keys {
        if before.get(key) != after.get(key) {
            out.insert(key.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrates_v1_routing_rules_into_nested_policy() {
        let migrator = Migrator::with_default_steps();
        let v1 = serde_json::json!({
            "config_format_version": "1",
            "default_provider": "claude-code",
            "routing_rules": [{"task_type": "coding", "preferred_provider": "claude-code", "fallback_providers": []}],
        });

        let (migrated, changed) = migrator.migrate(v1, "1").expect("migration succeeds");

        assert_eq!(migrated["config_format_version"], "2");
        assert_eq!(migrated["routing_policy"]["default_provider"], "claude-code");
        assert!(migrated.get("routing_rules").is_none());
        assert!(migrated.get("default_provider").is_none());
        assert!(changed.contains(&"routing_policy".to_string()));
    }

    #[test]
    fn rejects_a_version_with_no_registered_path() {
        let migrator = Migrator::with_default_steps();
        let err = migrator
            .migrate(serde_json::json!({}), "0")
            .expect_err("version 0 has no migration step");
        assert!(matches!(err, SubstrateError::IncompatibleFormat { .. }));
    }

    #[test]
    fn already_current_is_a_no_op() {
        let migrator = Migrator::with_default_steps();
        let current = serde_json::json!({"config_format_version": "2", "global": {}});
        let (migrated, changed) = migrator
            .migrate(current.clone(), "2")
            .expect("no-op migration succeeds");
        assert_eq!(migrated, current);
        assert!(changed.is_empty());
    }
}
