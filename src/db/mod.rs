//! Connection pool + idempotent schema bootstrap.
//!
//! No external migration tool: schema setup is `CREATE TABLE IF NOT EXISTS`
//! plus a guarded-by-probe `ALTER TABLE ... ADD COLUMN` for columns added
//! after a table's first release, so a fresh checkout runs with no separate
//! migration step.

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::config::AppConfig;
use crate::error::{Error, Result};

pub type DbPool = Pool<SqliteConnectionManager>;

pub fn build_pool(cfg: &AppConfig) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(&cfg.database_url).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
        )
    });

    let pool = Pool::builder()
        .min_idle(Some(1))
        .max_size(cfg.pool_burst)
        .connection_timeout(Duration::from_secs(10))
        .build(manager)
        .map_err(|e| Error::storage(format!("building connection pool: {e}")))?;

    {
        let conn = pool.get()?;
        bootstrap_schema(&conn)?;
    }

    log::info!(
        "database pool ready at {} (size {}, burst {})",
        cfg.database_url,
        cfg.pool_size,
        cfg.pool_burst
    );

    Ok(pool)
}

/// Idempotent DDL. Safe to run against an empty file or an already-migrated one.
pub fn bootstrap_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS runs (
            id               TEXT PRIMARY KEY,
            graph_id         TEXT,
            graph_version    TEXT,
            framework        TEXT,
            agent_id         TEXT,
            status           TEXT NOT NULL DEFAULT 'completed',
            started_at       TEXT NOT NULL,
            ended_at         TEXT,
            input_state      TEXT,
            output_state     TEXT,
            tags             TEXT NOT NULL DEFAULT '[]',
            total_tokens     INTEGER NOT NULL DEFAULT 0,
            total_cost       REAL NOT NULL DEFAULT 0,
            total_latency_ms INTEGER NOT NULL DEFAULT 0,
            error            TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_runs_framework ON runs(framework);
        CREATE INDEX IF NOT EXISTS idx_runs_status    ON runs(status);
        CREATE INDEX IF NOT EXISTS idx_runs_agent_id   ON runs(agent_id);
        CREATE INDEX IF NOT EXISTS idx_runs_graph_id   ON runs(graph_id);
        CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);

        CREATE TABLE IF NOT EXISTS node_executions (
            id          TEXT PRIMARY KEY,
            run_id      TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            node_key    TEXT NOT NULL,
            node_type   TEXT,
            \"order\"     INTEGER NOT NULL,
            status      TEXT NOT NULL DEFAULT 'completed',
            started_at  TEXT,
            ended_at    TEXT,
            latency_ms  INTEGER NOT NULL DEFAULT 0,
            state_in    TEXT,
            state_out   TEXT,
            state_diff  TEXT,
            error       TEXT,
            UNIQUE(run_id, \"order\")
        );
        CREATE INDEX IF NOT EXISTS idx_node_executions_run_id ON node_executions(run_id);

        CREATE TABLE IF NOT EXISTS messages (
            id                 TEXT PRIMARY KEY,
            node_execution_id  TEXT NOT NULL REFERENCES node_executions(id) ON DELETE CASCADE,
            \"order\"            INTEGER NOT NULL,
            role               TEXT NOT NULL,
            content            TEXT,
            model              TEXT,
            provider           TEXT,
            input_tokens       INTEGER NOT NULL DEFAULT 0,
            output_tokens      INTEGER NOT NULL DEFAULT 0,
            total_tokens       INTEGER NOT NULL DEFAULT 0,
            cost               REAL NOT NULL DEFAULT 0,
            latency_ms         INTEGER NOT NULL DEFAULT 0,
            tool_calls         TEXT,
            tool_results       TEXT,
            raw_request        TEXT,
            raw_response       TEXT,
            UNIQUE(node_execution_id, \"order\")
        );
        CREATE INDEX IF NOT EXISTS idx_messages_node_execution_id ON messages(node_execution_id);

        CREATE TABLE IF NOT EXISTS edges (
            id              TEXT PRIMARY KEY,
            run_id          TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            from_node       TEXT NOT NULL,
            to_node         TEXT NOT NULL,
            condition_label TEXT,
            \"order\"         INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_edges_run_id ON edges(run_id);

        CREATE TABLE IF NOT EXISTS evaluations (
            id                 TEXT PRIMARY KEY,
            run_id             TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            node_execution_id  TEXT REFERENCES node_executions(id) ON DELETE CASCADE,
            evaluator          TEXT NOT NULL,
            score              REAL,
            label              TEXT,
            comment            TEXT,
            is_automated       INTEGER NOT NULL DEFAULT 0,
            created_at         TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_evaluations_run_id ON evaluations(run_id);

        CREATE TABLE IF NOT EXISTS extensions (
            id           TEXT PRIMARY KEY,
            name         TEXT NOT NULL UNIQUE,
            version      TEXT NOT NULL,
            description  TEXT,
            status       TEXT NOT NULL DEFAULT 'disabled',
            manifest     TEXT NOT NULL,
            install_path TEXT NOT NULL,
            has_backend  INTEGER NOT NULL DEFAULT 0,
            has_frontend INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS extension_data (
            id           TEXT PRIMARY KEY,
            extension_id TEXT NOT NULL REFERENCES extensions(id) ON DELETE CASCADE,
            key          TEXT NOT NULL,
            value        TEXT NOT NULL,
            updated_at   TEXT NOT NULL,
            UNIQUE(extension_id, key)
        );
        CREATE INDEX IF NOT EXISTS idx_extension_data_ext ON extension_data(extension_id);

        CREATE TABLE IF NOT EXISTS extension_network_audit (
            id                     INTEGER PRIMARY KEY AUTOINCREMENT,
            extension_id           TEXT NOT NULL REFERENCES extensions(id) ON DELETE CASCADE,
            extension_name         TEXT NOT NULL,
            target_url             TEXT NOT NULL,
            method                 TEXT NOT NULL,
            request_headers        TEXT NOT NULL,
            request_body_hash      TEXT,
            request_body_size      INTEGER,
            response_status        INTEGER,
            response_time_ms       INTEGER,
            response_headers       TEXT,
            response_body_excerpt  TEXT,
            response_body_size     INTEGER,
            allowed                INTEGER NOT NULL,
            blocked_reason         TEXT,
            error                  TEXT,
            created_at             TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_extension_id ON extension_network_audit(extension_id);
        CREATE INDEX IF NOT EXISTS idx_audit_created_at   ON extension_network_audit(created_at);
        ",
    )
    .map_err(Error::storage)?;

    Ok(())
}

/// Run a closure against a pooled connection on a blocking thread, the way
/// every handler in this crate talks to SQLite (`rusqlite::Connection` is not
/// `Send`-across-`.await` friendly).
pub async fn with_conn<F, T>(pool: &DbPool, f: F) -> Result<T>
where
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        f(&mut conn)
    })
    .await
    .map_err(|e| Error::storage(format!("blocking task panicked: {e}")))?
}

#[cfg(test)]
pub fn test_pool() -> DbPool {
    let manager = SqliteConnectionManager::memory().with_init(|conn| {
        conn.execute_batch("PRAGMA foreign_keys=ON;")
    });
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    let conn = pool.get().unwrap();
    bootstrap_schema(&conn).unwrap();
    pool
}
