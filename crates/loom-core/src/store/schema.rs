//! SQLite schema DDL and migration framework.

use rusqlite::Connection;

use crate::errors::{LoomError, LoomResult};

/// Current schema version. Migrations run from whatever the DB currently
/// reports up to this value.
pub const SCHEMA_VERSION: i32 = 1;

/// Core DDL statements: 9 CREATE TABLE + 4 CREATE INDEX.
///
/// Executed with `CREATE … IF NOT EXISTS` so they are safe to replay on an
/// already-initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // ── tables (9) ──────────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS repo_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS repositories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        identity_key TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        root_path TEXT NOT NULL,
        remote_url TEXT,
        last_indexed_commit TEXT,
        last_git_analysis_commit TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        last_error TEXT,
        index_epoch INTEGER NOT NULL DEFAULT 0,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP,
        updated_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        path TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        start_line INTEGER NOT NULL,
        end_line INTEGER NOT NULL,
        content TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        last_seen_commit TEXT,
        UNIQUE(repository_id, path, chunk_index, content_hash)
    );",
    "CREATE TABLE IF NOT EXISTS file_metadata (
        repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        path TEXT NOT NULL,
        language TEXT,
        exports_json TEXT NOT NULL DEFAULT '[]',
        imports_json TEXT NOT NULL DEFAULT '[]',
        docstring TEXT,
        sections_json TEXT NOT NULL DEFAULT '[]',
        internals_json TEXT NOT NULL DEFAULT '[]',
        PRIMARY KEY(repository_id, path)
    );",
    "CREATE TABLE IF NOT EXISTS file_imports (
        repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        source_path TEXT NOT NULL,
        target_path TEXT NOT NULL,
        PRIMARY KEY(repository_id, source_path, target_path)
    );",
    "CREATE TABLE IF NOT EXISTS file_stats (
        repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        path TEXT NOT NULL,
        total_commits INTEGER NOT NULL DEFAULT 0,
        recent_commits INTEGER NOT NULL DEFAULT 0,
        last_modified INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY(repository_id, path)
    );",
    "CREATE TABLE IF NOT EXISTS file_cochanges (
        repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        path_a TEXT NOT NULL,
        path_b TEXT NOT NULL,
        count INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY(repository_id, path_a, path_b),
        CHECK(path_a < path_b)
    );",
    "CREATE TABLE IF NOT EXISTS index_locks (
        lock_key INTEGER PRIMARY KEY,
        repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        owner_token TEXT NOT NULL,
        acquired_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL
    );",
    // ── indexes (4) ─────────────────────────────────────────────────────
    "CREATE INDEX IF NOT EXISTS idx_chunks_repo_path ON chunks(repository_id, path);",
    "CREATE INDEX IF NOT EXISTS idx_file_imports_target ON file_imports(repository_id, target_path);",
    "CREATE INDEX IF NOT EXISTS idx_file_cochanges_b ON file_cochanges(repository_id, path_b);",
    "CREATE INDEX IF NOT EXISTS idx_index_locks_repo ON index_locks(repository_id);",
];

// ─── Migration framework ────────────────────────────────────────────────────

/// Run all pending migrations from the current stored version up to
/// [`SCHEMA_VERSION`]. Each step is wrapped in a SAVEPOINT so a failure
/// rolls back only that single step.
pub fn migrate_schema(conn: &Connection) -> LoomResult<()> {
    let mut current_version = get_schema_version(conn);

    while current_version < SCHEMA_VERSION {
        let next_version = current_version + 1;
        conn.execute_batch("SAVEPOINT loom_migrate_step;")?;

        let step_result = (|| -> LoomResult<()> {
            apply_step(conn, next_version)?;
            set_schema_version(conn, next_version)?;
            record_migration_step(conn, current_version, next_version, "success", None)?;
            conn.execute_batch("RELEASE SAVEPOINT loom_migrate_step;")?;
            Ok(())
        })();

        match step_result {
            Ok(()) => {
                tracing::debug!(version = next_version, "applied schema migration");
                current_version = next_version;
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT loom_migrate_step;");
                let _ = conn.execute_batch("RELEASE SAVEPOINT loom_migrate_step;");
                let _ = record_migration_step(
                    conn,
                    current_version,
                    next_version,
                    "failed",
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Read the current schema version from `repo_meta`.
/// Returns 0 when the key is absent or unparseable.
pub fn get_schema_version(conn: &Connection) -> i32 {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM repo_meta WHERE key = 'schema_version';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<i32>().unwrap_or(0),
        Err(_) => 0,
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> LoomResult<()> {
    conn.execute(
        "INSERT INTO repo_meta(key, value) \
         VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

fn record_migration_step(
    conn: &Connection,
    from_v: i32,
    to_v: i32,
    status: &str,
    error_msg: Option<&str>,
) -> LoomResult<()> {
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![from_v, to_v, status, error_msg],
    )?;
    Ok(())
}

// ─── Individual migration steps ─────────────────────────────────────────────

/// Bring the schema up to `version`. Version 1 is the baseline created by
/// [`SCHEMA_STATEMENTS`]; later versions add their steps here.
fn apply_step(_conn: &Connection, version: i32) -> LoomResult<()> {
    match version {
        1 => Ok(()),
        other => Err(LoomError::Index(format!(
            "no migration step for schema version {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        for stmt in SCHEMA_STATEMENTS {
            conn.execute_batch(stmt).unwrap();
        }
        conn
    }

    #[test]
    fn schema_statement_counts() {
        // 9 tables + 4 indexes
        assert_eq!(SCHEMA_STATEMENTS.len(), 13);
    }

    #[test]
    fn migrate_fresh_database() {
        let conn = fresh();
        migrate_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);

        let steps: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM migration_history WHERE status = 'success';",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(steps, SCHEMA_VERSION as i64);
    }

    #[test]
    fn migrate_idempotent() {
        let conn = fresh();
        migrate_schema(&conn).unwrap();
        migrate_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn baseline_includes_partner_lookup_index() {
        let conn = fresh();
        migrate_schema(&conn).unwrap();
        assert_eq!(SCHEMA_VERSION, 1);
        let found: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master \
                 WHERE type = 'index' AND name = 'idx_file_cochanges_b';",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(found, 1);
    }

    #[test]
    fn newer_stored_version_is_left_alone() {
        let conn = fresh();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();
        migrate_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION + 1);
    }

    #[test]
    fn cochange_pairs_must_be_canonical() {
        let conn = fresh();
        conn.execute(
            "INSERT INTO repositories(identity_key, name, root_path) VALUES ('k', 'r', '/r');",
            [],
        )
        .unwrap();
        let ok = conn.execute(
            "INSERT INTO file_cochanges(repository_id, path_a, path_b, count) VALUES (1, 'a', 'b', 1);",
            [],
        );
        assert!(ok.is_ok());
        let bad = conn.execute(
            "INSERT INTO file_cochanges(repository_id, path_a, path_b, count) VALUES (1, 'b', 'a', 1);",
            [],
        );
        assert!(bad.is_err());
    }
}
