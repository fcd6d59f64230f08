use rusqlite::Connection;

use substrate_core::SubstrateError;

/// Creates every table the Decision Store needs if absent, then applies
/// additive-column migrations the way `PRAGMA table_info` inspection does
/// upstream (SQLite has no `ADD COLUMN IF NOT EXISTS`).
pub(crate) fn init_schema(conn: &Connection) -> Result<(), SubstrateError> {
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
        .map_err(db_err)?;
    conn.execute("PRAGMA synchronous = NORMAL", []).map_err(db_err)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pipeline_runs (
            id TEXT PRIMARY KEY,
            methodology TEXT NOT NULL,
            current_phase TEXT,
            status TEXT NOT NULL,
            config_json TEXT,
            token_usage_json TEXT,
            parent_run_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )
    .map_err(db_err)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS decisions (
            id TEXT PRIMARY KEY,
            pipeline_run_id TEXT,
            phase TEXT NOT NULL,
            category TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            rationale TEXT,
            superseded_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )
    .map_err(db_err)?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_decisions_upsert_key
         ON decisions(IFNULL(pipeline_run_id, ''), category, key)",
        [],
    )
    .map_err(db_err)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_decisions_run ON decisions(pipeline_run_id, created_at)",
        [],
    )
    .map_err(db_err)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS artifacts (
            id TEXT PRIMARY KEY,
            pipeline_run_id TEXT,
            phase TEXT NOT NULL,
            type TEXT NOT NULL,
            path TEXT NOT NULL,
            content_hash TEXT,
            summary TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )
    .map_err(db_err)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_artifacts_phase_type ON artifacts(phase, type, created_at)",
        [],
    )
    .map_err(db_err)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS requirements (
            id TEXT PRIMARY KEY,
            pipeline_run_id TEXT,
            source TEXT NOT NULL,
            type TEXT NOT NULL,
            description TEXT NOT NULL,
            priority TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )
    .map_err(db_err)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS constraints (
            id TEXT PRIMARY KEY,
            pipeline_run_id TEXT,
            category TEXT NOT NULL,
            description TEXT NOT NULL,
            source TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )
    .map_err(db_err)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS token_usage (
            id TEXT PRIMARY KEY,
            pipeline_run_id TEXT NOT NULL,
            phase TEXT NOT NULL,
            agent TEXT NOT NULL,
            input_tokens INTEGER NOT NULL,
            output_tokens INTEGER NOT NULL,
            cost_usd REAL NOT NULL,
            metadata TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )
    .map_err(db_err)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_token_usage_run ON token_usage(pipeline_run_id, phase, agent)",
        [],
    )
    .map_err(db_err)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS plan_versions (
            plan_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            task_graph_yaml TEXT NOT NULL,
            feedback_used TEXT,
            planning_cost_usd REAL NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (plan_id, version)
        )",
        [],
    )
    .map_err(db_err)?;

    let existing_cols: std::collections::HashSet<String> = {
        let mut stmt = conn
            .prepare("PRAGMA table_info(pipeline_runs)")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(db_err)?;
        rows.collect::<Result<_, _>>().map_err(db_err)?
    };
    if !existing_cols.contains("parent_run_id") {
        conn.execute("ALTER TABLE pipeline_runs ADD COLUMN parent_run_id TEXT", [])
            .map_err(db_err)?;
    }

    Ok(())
}

pub(crate) fn db_err(err: rusqlite::Error) -> SubstrateError {
    SubstrateError::Fatal(format!("decision store: {err}"))
}
