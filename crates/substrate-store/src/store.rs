use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use substrate_core::{SubstrateError, ValidationCategory};
use substrate_types::{
    Artifact, Constraint, Decision, PipelineRun, RequirementStatus, RunStatus, TokenUsage,
    TokenUsageSummary,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::schema::{db_err, init_schema};
use crate::version::get_next_version;

/// Amendment chains longer than this are rejected with `ChainTooDeep`.
pub const MAX_AMENDMENT_DEPTH: u32 = 10;

/// Content-addressed, append-only store of decisions, artifacts, and
/// pipeline runs. Single-writer from the application's perspective; writes
/// go through this connection only.
pub struct DecisionStore {
    conn: Arc<Mutex<Connection>>,
}

impl DecisionStore {
    pub async fn open(db_path: &Path) -> Result<Self, SubstrateError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| SubstrateError::Fatal(err.to_string()))?;
        }
        let conn = Connection::open(db_path).map_err(db_err)?;
        conn.busy_timeout(std::time::Duration::from_secs(10))
            .map_err(db_err)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn open_in_memory() -> Result<Self, SubstrateError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ---- Pipeline runs -------------------------------------------------

    pub async fn create_pipeline_run(
        &self,
        methodology: &str,
        parent_run_id: Option<&str>,
    ) -> Result<PipelineRun, SubstrateError> {
        let conn = self.conn.lock().await;

        if let Some(parent_id) = parent_run_id {
            let parent = query_pipeline_run(&conn, parent_id)?
                .ok_or_else(|| SubstrateError::NotFound(format!("pipeline run {parent_id}")))?;
            if parent.status != RunStatus::Completed {
                return Err(SubstrateError::validation(
                    ValidationCategory::Schema,
                    "parent_run_id",
                    format!("parent run {parent_id} is not completed"),
                ));
            }
        }

        let now = Utc::now();
        let run = PipelineRun {
            id: Uuid::new_v4().to_string(),
            methodology: methodology.to_string(),
            current_phase: None,
            status: RunStatus::Running,
            config_json: None,
            token_usage_json: None,
            parent_run_id: parent_run_id.map(str::to_string),
            created_at: now,
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO pipeline_runs (id, methodology, current_phase, status, config_json, token_usage_json, parent_run_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run.id,
                run.methodology,
                run.current_phase,
                run_status_str(run.status),
                run.config_json.as_ref().map(|v| v.to_string()),
                run.token_usage_json.as_ref().map(|v| v.to_string()),
                run.parent_run_id,
                run.created_at.to_rfc3339(),
                run.updated_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;

        Ok(run)
    }

    pub async fn get_pipeline_run(&self, id: &str) -> Result<PipelineRun, SubstrateError> {
        let conn = self.conn.lock().await;
        query_pipeline_run(&conn, id)?.ok_or_else(|| SubstrateError::NotFound(format!("pipeline run {id}")))
    }

    pub async fn update_pipeline_run_status(
        &self,
        id: &str,
        status: RunStatus,
        current_phase: Option<&str>,
    ) -> Result<(), SubstrateError> {
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                "UPDATE pipeline_runs SET status = ?1, current_phase = COALESCE(?2, current_phase), updated_at = ?3 WHERE id = ?4",
                params![run_status_str(status), current_phase, Utc::now().to_rfc3339(), id],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(SubstrateError::NotFound(format!("pipeline run {id}")));
        }
        Ok(())
    }

    /// Walks `parent_run_id` pointers root-first. Fails `ChainTooDeep` if the
    /// chain exceeds `max_depth`.
    pub async fn get_amendment_run_chain(
        &self,
        run_id: &str,
        max_depth: u32,
    ) -> Result<Vec<(PipelineRun, u32)>, SubstrateError> {
        let conn = self.conn.lock().await;
        let mut chain = Vec::new();
        let mut current = query_pipeline_run(&conn, run_id)?
            .ok_or_else(|| SubstrateError::NotFound(format!("pipeline run {run_id}")))?;

        loop {
            chain.push(current.clone());
            // `chain.len() - 1` is the 0-indexed depth of the entry just
            // pushed; a chain of `max_depth + 1` entries (depths 0..=max_depth)
            // is the deepest one that still succeeds.
            if chain.len() as u32 > max_depth + 1 {
                return Err(SubstrateError::ChainTooDeep { max_depth });
            }
            match &current.parent_run_id {
                Some(parent_id) => {
                    current = query_pipeline_run(&conn, parent_id)?
                        .ok_or_else(|| SubstrateError::NotFound(format!("pipeline run {parent_id}")))?;
                }
                None => break,
            }
        }

        chain.reverse();
        Ok(chain
            .into_iter()
            .enumerate()
            .map(|(depth, run)| (run, depth as u32))
            .collect())
    }

    // ---- Decisions -------------------------------------------------------

    pub async fn upsert_decision(
        &self,
        pipeline_run_id: Option<&str>,
        phase: &str,
        category: &str,
        key: &str,
        value: serde_json::Value,
        rationale: Option<&str>,
    ) -> Result<Decision, SubstrateError> {
        if key.is_empty() {
            return Err(SubstrateError::validation(
                ValidationCategory::Schema,
                "key",
                "decision key must not be empty",
            ));
        }

        let conn = self.conn.lock().await;
        let now = Utc::now();

        let existing_id: Option<String> = conn
            .query_row(
                "SELECT id FROM decisions WHERE IFNULL(pipeline_run_id,'') = IFNULL(?1,'') AND category = ?2 AND key = ?3",
                params![pipeline_run_id, category, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        let value_json = value.to_string();

        let id = match existing_id {
            Some(id) => {
                conn.execute(
                    "UPDATE decisions SET value = ?1, rationale = ?2, updated_at = ?3 WHERE id = ?4",
                    params![value_json, rationale, now.to_rfc3339(), id],
                )
                .map_err(db_err)?;
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                conn.execute(
                    "INSERT INTO decisions (id, pipeline_run_id, phase, category, key, value, rationale, superseded_by, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?8)",
                    params![id, pipeline_run_id, phase, category, key, value_json, rationale, now.to_rfc3339()],
                )
                .map_err(db_err)?;
                id
            }
        };

        query_decision(&conn, &id)?.ok_or_else(|| SubstrateError::Fatal("decision vanished after upsert".into()))
    }

    pub async fn supersede_decision(
        &self,
        original_id: &str,
        superseding_id: &str,
    ) -> Result<(), SubstrateError> {
        let conn = self.conn.lock().await;

        let original = query_decision(&conn, original_id)?
            .ok_or_else(|| SubstrateError::NotFound(format!("decision {original_id}")))?;
        query_decision(&conn, superseding_id)?
            .ok_or_else(|| SubstrateError::NotFound(format!("decision {superseding_id}")))?;

        if original.superseded_by.is_some() {
            return Err(SubstrateError::Conflict(format!(
                "decision {original_id} is already superseded"
            )));
        }

        conn.execute(
            "UPDATE decisions SET superseded_by = ?1, updated_at = ?2 WHERE id = ?3",
            params![superseding_id, Utc::now().to_rfc3339(), original_id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn load_parent_run_decisions(&self, parent_run_id: &str) -> Result<Vec<Decision>, SubstrateError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, pipeline_run_id, phase, category, key, value, rationale, superseded_by, created_at, updated_at
                 FROM decisions WHERE pipeline_run_id = ?1 AND superseded_by IS NULL ORDER BY created_at ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![parent_run_id], row_to_decision)
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    pub async fn get_decisions_by_phase_for_run(
        &self,
        pipeline_run_id: &str,
        phase: &str,
    ) -> Result<Vec<Decision>, SubstrateError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, pipeline_run_id, phase, category, key, value, rationale, superseded_by, created_at, updated_at
                 FROM decisions WHERE pipeline_run_id = ?1 AND phase = ?2 AND superseded_by IS NULL ORDER BY created_at ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![pipeline_run_id, phase], row_to_decision)
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    // ---- Artifacts ---------------------------------------------------

    pub async fn create_artifact(
        &self,
        pipeline_run_id: Option<&str>,
        phase: &str,
        artifact_type: &str,
        path: &str,
        content_hash: Option<&str>,
        summary: Option<&str>,
    ) -> Result<Artifact, SubstrateError> {
        let conn = self.conn.lock().await;
        let artifact = Artifact {
            id: Uuid::new_v4().to_string(),
            pipeline_run_id: pipeline_run_id.map(str::to_string),
            phase: phase.to_string(),
            artifact_type: artifact_type.to_string(),
            path: path.to_string(),
            content_hash: content_hash.map(str::to_string),
            summary: summary.map(str::to_string),
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO artifacts (id, pipeline_run_id, phase, type, path, content_hash, summary, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                artifact.id,
                artifact.pipeline_run_id,
                artifact.phase,
                artifact.artifact_type,
                artifact.path,
                artifact.content_hash,
                artifact.summary,
                artifact.created_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(artifact)
    }

    pub async fn latest_artifact_of_type(
        &self,
        phase: &str,
        artifact_type: &str,
    ) -> Result<Option<Artifact>, SubstrateError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, pipeline_run_id, phase, type, path, content_hash, summary, created_at
             FROM artifacts WHERE phase = ?1 AND type = ?2 ORDER BY created_at DESC, rowid DESC LIMIT 1",
            params![phase, artifact_type],
            row_to_artifact,
        )
        .optional()
        .map_err(db_err)
    }

    // ---- Requirements & constraints -----------------------------------

    pub async fn create_requirement(
        &self,
        pipeline_run_id: Option<&str>,
        source: &str,
        requirement_type: &str,
        description: &str,
        priority: u32,
    ) -> Result<(), SubstrateError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO requirements (id, pipeline_run_id, source, type, description, priority, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                Uuid::new_v4().to_string(),
                pipeline_run_id,
                source,
                requirement_type,
                description,
                priority,
                requirement_status_str(RequirementStatus::Active),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn create_constraint(
        &self,
        pipeline_run_id: Option<&str>,
        category: &str,
        description: &str,
        source: &str,
    ) -> Result<Constraint, SubstrateError> {
        let conn = self.conn.lock().await;
        let constraint = Constraint {
            id: Uuid::new_v4().to_string(),
            pipeline_run_id: pipeline_run_id.map(str::to_string),
            category: category.to_string(),
            description: description.to_string(),
            source: source.to_string(),
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO constraints (id, pipeline_run_id, category, description, source, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                constraint.id,
                constraint.pipeline_run_id,
                constraint.category,
                constraint.description,
                constraint.source,
                constraint.created_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(constraint)
    }

    // ---- Token usage ---------------------------------------------------

    pub async fn record_token_usage(&self, usage: &TokenUsage) -> Result<(), SubstrateError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO token_usage (id, pipeline_run_id, phase, agent, input_tokens, output_tokens, cost_usd, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                Uuid::new_v4().to_string(),
                usage.pipeline_run_id,
                usage.phase,
                usage.agent,
                usage.input_tokens as i64,
                usage.output_tokens as i64,
                usage.cost_usd,
                usage.metadata.as_ref().map(|v| v.to_string()),
                usage.created_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_token_usage_summary(&self, run_id: &str) -> Result<Vec<TokenUsageSummary>, SubstrateError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT phase, agent, SUM(input_tokens), SUM(output_tokens), SUM(cost_usd)
                 FROM token_usage WHERE pipeline_run_id = ?1 GROUP BY phase, agent ORDER BY phase, agent",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok(TokenUsageSummary {
                    phase: row.get(0)?,
                    agent: row.get(1)?,
                    input_tokens: row.get::<_, i64>(2)? as u64,
                    output_tokens: row.get::<_, i64>(3)? as u64,
                    cost_usd: row.get(4)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    // ---- Plan versions --------------------------------------------------

    pub async fn get_next_plan_version(&self, plan_id: &str) -> Result<u32, SubstrateError> {
        let conn = self.conn.lock().await;
        query_next_plan_version(&conn, plan_id)
    }

    pub async fn create_plan_version(
        &self,
        plan_id: &str,
        task_graph_yaml: &str,
        feedback_used: Option<&str>,
        planning_cost_usd: f64,
    ) -> Result<u32, SubstrateError> {
        // Computed and inserted under one lock acquisition so two concurrent
        // callers for the same plan_id can't both read the same "next
        // version" and then race on the INSERT's primary key.
        let conn = self.conn.lock().await;
        let version = query_next_plan_version(&conn, plan_id)?;
        conn.execute(
            "INSERT INTO plan_versions (plan_id, version, task_graph_yaml, feedback_used, planning_cost_usd, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                plan_id,
                version,
                task_graph_yaml,
                feedback_used,
                planning_cost_usd,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(version)
    }
}

fn query_next_plan_version(conn: &Connection, plan_id: &str) -> Result<u32, SubstrateError> {
    let max_version: Option<i64> = conn
        .query_row(
            "SELECT MAX(version) FROM plan_versions WHERE plan_id = ?1",
            params![plan_id],
            |row| row.get(0),
        )
        .map_err(db_err)?;
    match max_version {
        Some(v) => get_next_version(&v.to_string()).map(|s| s.parse().expect("get_next_version returns an integer string")),
        None => Ok(1),
    }
}

fn query_pipeline_run(conn: &Connection, id: &str) -> Result<Option<PipelineRun>, SubstrateError> {
    conn.query_row(
        "SELECT id, methodology, current_phase, status, config_json, token_usage_json, parent_run_id, created_at, updated_at
         FROM pipeline_runs WHERE id = ?1",
        params![id],
        row_to_pipeline_run,
    )
    .optional()
    .map_err(db_err)
}

fn query_decision(conn: &Connection, id: &str) -> Result<Option<Decision>, SubstrateError> {
    conn.query_row(
        "SELECT id, pipeline_run_id, phase, category, key, value, rationale, superseded_by, created_at, updated_at
         FROM decisions WHERE id = ?1",
        params![id],
        row_to_decision,
    )
    .optional()
    .map_err(db_err)
}

fn row_to_pipeline_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<PipelineRun> {
    let status: String = row.get(3)?;
    let config_json: Option<String> = row.get(4)?;
    let token_usage_json: Option<String> = row.get(5)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    Ok(PipelineRun {
        id: row.get(0)?,
        methodology: row.get(1)?,
        current_phase: row.get(2)?,
        status: parse_run_status(&status),
        config_json: config_json.and_then(|s| serde_json::from_str(&s).ok()),
        token_usage_json: token_usage_json.and_then(|s| serde_json::from_str(&s).ok()),
        parent_run_id: row.get(6)?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

fn row_to_decision(row: &rusqlite::Row<'_>) -> rusqlite::Result<Decision> {
    let value: String = row.get(5)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    Ok(Decision {
        id: row.get(0)?,
        pipeline_run_id: row.get(1)?,
        phase: row.get(2)?,
        category: row.get(3)?,
        key: row.get(4)?,
        value: serde_json::from_str(&value).unwrap_or(serde_json::Value::Null),
        rationale: row.get(6)?,
        superseded_by: row.get(7)?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

fn row_to_artifact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Artifact> {
    let created_at: String = row.get(7)?;
    Ok(Artifact {
        id: row.get(0)?,
        pipeline_run_id: row.get(1)?,
        phase: row.get(2)?,
        artifact_type: row.get(3)?,
        path: row.get(4)?,
        content_hash: row.get(5)?,
        summary: row.get(6)?,
        created_at: parse_timestamp(&created_at),
    })
}

fn parse_timestamp(raw: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn run_status_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
        RunStatus::Paused => "paused",
    }
}

fn parse_run_status(raw: &str) -> RunStatus {
    match raw {
        "completed" => RunStatus::Completed,
        "failed" => RunStatus::Failed,
        "paused" => RunStatus::Paused,
        _ => RunStatus::Running,
    }
}

fn requirement_status_str(status: RequirementStatus) -> &'static str {
    match status {
        RequirementStatus::Active => "active",
        RequirementStatus::Satisfied => "satisfied",
        RequirementStatus::Dropped => "dropped",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_decision_twice_updates_the_same_row() {
        let store = DecisionStore::open_in_memory().await.unwrap();
        let first = store
            .upsert_decision(Some("run-1"), "planning", "data", "schema", serde_json::json!("v1"), None)
            .await
            .unwrap();
        let second = store
            .upsert_decision(Some("run-1"), "planning", "data", "schema", serde_json::json!("v2"), None)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.value, serde_json::json!("v2"));
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn supersede_twice_fails_conflict() {
        let store = DecisionStore::open_in_memory().await.unwrap();
        let a = store
            .upsert_decision(Some("run-1"), "p", "cat", "a", serde_json::json!(1), None)
            .await
            .unwrap();
        let b = store
            .upsert_decision(Some("run-1"), "p", "cat", "b", serde_json::json!(2), None)
            .await
            .unwrap();
        let c = store
            .upsert_decision(Some("run-1"), "p", "cat", "c", serde_json::json!(3), None)
            .await
            .unwrap();

        store.supersede_decision(&a.id, &b.id).await.unwrap();
        let err = store.supersede_decision(&a.id, &c.id).await.unwrap_err();
        assert!(matches!(err, SubstrateError::Conflict(_)));
    }

    #[tokio::test]
    async fn load_parent_run_decisions_excludes_superseded() {
        let store = DecisionStore::open_in_memory().await.unwrap();
        let a = store
            .upsert_decision(Some("run-1"), "p", "cat", "a", serde_json::json!(1), None)
            .await
            .unwrap();
        let b = store
            .upsert_decision(Some("run-1"), "p", "cat", "b", serde_json::json!(2), None)
            .await
            .unwrap();
        store.supersede_decision(&a.id, &b.id).await.unwrap();

        let active = store.load_parent_run_decisions("run-1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b.id);
    }

    #[tokio::test]
    async fn amendment_chain_beyond_max_depth_fails() {
        let store = DecisionStore::open_in_memory().await.unwrap();
        let mut parent: Option<String> = None;
        // A chain one entry past the last one that succeeds: depths 0..=MAX_AMENDMENT_DEPTH
        // (MAX_AMENDMENT_DEPTH + 1 entries) is the last that succeeds, so this
        // builds MAX_AMENDMENT_DEPTH + 2 entries (depths 0..=MAX_AMENDMENT_DEPTH+1).
        for _ in 0..MAX_AMENDMENT_DEPTH + 2 {
            let run = store.create_pipeline_run("waterfall", parent.as_deref()).await.unwrap();
            store
                .update_pipeline_run_status(&run.id, RunStatus::Completed, None)
                .await
                .unwrap();
            parent = Some(run.id);
        }
        let leaf = parent.unwrap();
        let err = store
            .get_amendment_run_chain(&leaf, MAX_AMENDMENT_DEPTH)
            .await
            .unwrap_err();
        assert!(matches!(err, SubstrateError::ChainTooDeep { max_depth } if max_depth == MAX_AMENDMENT_DEPTH));
    }

    #[tokio::test]
    async fn amendment_chain_at_max_depth_returns_root_first() {
        let store = DecisionStore::open_in_memory().await.unwrap();
        let mut parent: Option<String> = None;
        let mut ids = Vec::new();
        // Depths 0..=MAX_AMENDMENT_DEPTH is MAX_AMENDMENT_DEPTH + 1 entries —
        // the deepest chain that still succeeds.
        for _ in 0..=MAX_AMENDMENT_DEPTH {
            let run = store.create_pipeline_run("waterfall", parent.as_deref()).await.unwrap();
            store
                .update_pipeline_run_status(&run.id, RunStatus::Completed, None)
                .await
                .unwrap();
            ids.push(run.id.clone());
            parent = Some(run.id);
        }
        let leaf = parent.unwrap();
        let chain = store.get_amendment_run_chain(&leaf, MAX_AMENDMENT_DEPTH).await.unwrap();
        assert_eq!(chain.len(), MAX_AMENDMENT_DEPTH as usize + 1);
        assert_eq!(chain[0].0.id, ids[0]);
        assert_eq!(chain[0].1, 0);
        assert_eq!(chain.last().unwrap().1, MAX_AMENDMENT_DEPTH);
    }

    #[tokio::test]
    async fn token_usage_summary_groups_by_phase_and_agent() {
        let store = DecisionStore::open_in_memory().await.unwrap();
        let run = store.create_pipeline_run("waterfall", None).await.unwrap();
        store
            .record_token_usage(&TokenUsage {
                pipeline_run_id: run.id.clone(),
                phase: "planning".into(),
                agent: "claude-code".into(),
                input_tokens: 100,
                output_tokens: 200,
                cost_usd: 0.05,
                metadata: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .record_token_usage(&TokenUsage {
                pipeline_run_id: run.id.clone(),
                phase: "planning".into(),
                agent: "claude-code".into(),
                input_tokens: 50,
                output_tokens: 25,
                cost_usd: 0.01,
                metadata: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let summary = store.get_token_usage_summary(&run.id).await.unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].input_tokens, 150);
        assert_eq!(summary[0].output_tokens, 225);
    }

    #[tokio::test]
    async fn plan_versions_increment_monotonically() {
        let store = DecisionStore::open_in_memory().await.unwrap();
        let v1 = store.create_plan_version("plan-a", "tasks: {}", None, 0.1).await.unwrap();
        let v2 = store.create_plan_version("plan-a", "tasks: {}", None, 0.1).await.unwrap();
        assert_eq!(v1, 1);
        assert_eq!(v2, 2);
    }

    #[tokio::test]
    async fn empty_decision_key_is_rejected() {
        let store = DecisionStore::open_in_memory().await.unwrap();
        let err = store
            .upsert_decision(None, "p", "cat", "", serde_json::json!(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SubstrateError::Validation { .. }));
    }

    #[tokio::test]
    async fn create_pipeline_run_rejects_non_completed_parent() {
        let store = DecisionStore::open_in_memory().await.unwrap();
        let parent = store.create_pipeline_run("waterfall", None).await.unwrap();
        let err = store
            .create_pipeline_run("waterfall", Some(&parent.id))
            .await
            .unwrap_err();
        assert!(matches!(err, SubstrateError::Validation { .. }));
    }
}
