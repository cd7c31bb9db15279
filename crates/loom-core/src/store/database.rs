//! SQLite storage layer for Loom.
//!
//! Every public method opens its own connection, so a `Database` is cheap to
//! clone and share across threads. Each structural table is replaced inside
//! its own transaction so readers always see a consistent table.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::errors::LoomResult;
use crate::indexer::history::HistoryDelta;
use crate::models::{
    ChunkRecord, CochangePartner, FileCochange, FileMetadata, FileStat, ImportEdge, IndexStatus,
    Repository,
};
use crate::store::schema;

const BUSY_TIMEOUT_MS: u64 = 5_000;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if raw == "~" || raw.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if raw.len() > 2 {
                expanded.push(&raw[2..]);
            }
            return expanded;
        }
    }
    path.to_path_buf()
}

const REPOSITORY_COLUMNS: &str = "id, identity_key, name, root_path, remote_url, \
     last_indexed_commit, last_git_analysis_commit, status, last_error, index_epoch";

fn row_to_repository(row: &Row<'_>) -> rusqlite::Result<Repository> {
    let status: String = row.get(7)?;
    Ok(Repository {
        id: row.get(0)?,
        identity_key: row.get(1)?,
        name: row.get(2)?,
        root_path: row.get(3)?,
        remote_url: row.get(4)?,
        last_indexed_commit: row.get(5)?,
        last_git_analysis_commit: row.get(6)?,
        status: status.parse().unwrap_or(IndexStatus::Pending),
        last_error: row.get(8)?,
        index_epoch: row.get(9)?,
    })
}

fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<ChunkRecord> {
    Ok(ChunkRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        chunk_index: row.get(2)?,
        start_line: row.get(3)?,
        end_line: row.get(4)?,
        content: row.get(5)?,
        content_hash: row.get(6)?,
        last_seen_commit: row.get(7)?,
    })
}

fn decode_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// A new chunk to persist for one file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewChunk {
    pub chunk_index: i64,
    pub start_line: i64,
    pub end_line: i64,
    pub content: String,
    pub content_hash: String,
}

/// Per-file chunk diff, applied atomically by [`Database::apply_chunk_changes`].
#[derive(Clone, Debug, Default)]
pub struct ChunkChanges {
    pub delete_ids: Vec<i64>,
    /// `(id, start_line, end_line)` for unchanged chunks whose position moved
    /// or whose last-seen commit needs refreshing.
    pub refresh: Vec<(i64, i64, i64)>,
    pub insert: Vec<NewChunk>,
}

impl ChunkChanges {
    pub fn is_empty(&self) -> bool {
        self.delete_ids.is_empty() && self.refresh.is_empty() && self.insert.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// SQLite store shared by the indexer and the query layer.
#[derive(Clone, Debug)]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and bring its
    /// schema up to date.
    pub fn open(db_path: impl AsRef<Path>) -> LoomResult<Self> {
        let expanded = expand_tilde(db_path.as_ref());
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(&expanded)
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Self { db_path: resolved };
        db.init_schema()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Open a new connection with foreign keys and a busy timeout.
    pub fn connect(&self) -> LoomResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    fn init_schema(&self) -> LoomResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        schema::migrate_schema(&conn)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Repositories
    // -----------------------------------------------------------------------

    /// Insert a repository, or return the existing row for `identity_key`.
    pub fn insert_or_get_repository(
        &self,
        identity_key: &str,
        name: &str,
        root_path: &str,
        remote_url: Option<&str>,
    ) -> LoomResult<Repository> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO repositories(identity_key, name, root_path, remote_url) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(identity_key) DO NOTHING;",
            params![identity_key, name, root_path, remote_url],
        )?;
        let repo = conn.query_row(
            &format!("SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE identity_key = ?1;"),
            params![identity_key],
            row_to_repository,
        )?;
        Ok(repo)
    }

    pub fn get_repository(&self, repository_id: i64) -> LoomResult<Option<Repository>> {
        let conn = self.connect()?;
        let repo = conn
            .query_row(
                &format!("SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE id = ?1;"),
                params![repository_id],
                row_to_repository,
            )
            .optional()?;
        Ok(repo)
    }

    pub fn list_repositories(&self) -> LoomResult<Vec<Repository>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {REPOSITORY_COLUMNS} FROM repositories ORDER BY id;"))?;
        let rows = stmt
            .query_map([], row_to_repository)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete a repository and, by cascade, everything it owns.
    pub fn delete_repository(&self, repository_id: i64) -> LoomResult<bool> {
        let conn = self.connect()?;
        let deleted = conn.execute(
            "DELETE FROM repositories WHERE id = ?1;",
            params![repository_id],
        )?;
        Ok(deleted > 0)
    }

    pub fn set_status(
        &self,
        repository_id: i64,
        status: IndexStatus,
        last_error: Option<&str>,
    ) -> LoomResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE repositories SET status = ?2, last_error = ?3, \
             updated_at = CURRENT_TIMESTAMP WHERE id = ?1;",
            params![repository_id, status.as_str(), last_error],
        )?;
        Ok(())
    }

    /// Mark a run successful: record HEAD, clear the error, bump the epoch.
    pub fn finish_index(&self, repository_id: i64, head: Option<&str>) -> LoomResult<i64> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE repositories SET status = 'ready', last_error = NULL, \
             last_indexed_commit = COALESCE(?2, last_indexed_commit), \
             index_epoch = index_epoch + 1, updated_at = CURRENT_TIMESTAMP \
             WHERE id = ?1;",
            params![repository_id, head],
        )?;
        let epoch = conn.query_row(
            "SELECT index_epoch FROM repositories WHERE id = ?1;",
            params![repository_id],
            |row| row.get(0),
        )?;
        Ok(epoch)
    }

    /// Bump the epoch without touching the commit watermark.
    pub fn bump_epoch(&self, repository_id: i64) -> LoomResult<i64> {
        self.finish_index(repository_id, None)
    }

    // -----------------------------------------------------------------------
    // Chunks
    // -----------------------------------------------------------------------

    pub fn count_chunks(&self, repository_id: i64) -> LoomResult<i64> {
        let conn = self.connect()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE repository_id = ?1;",
            params![repository_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_indexed_files(&self, repository_id: i64) -> LoomResult<i64> {
        let conn = self.connect()?;
        let count = conn.query_row(
            "SELECT COUNT(DISTINCT path) FROM chunks WHERE repository_id = ?1;",
            params![repository_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Distinct paths that currently have chunks, sorted.
    pub fn indexed_paths(&self, repository_id: i64) -> LoomResult<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT path FROM chunks WHERE repository_id = ?1 ORDER BY path;",
        )?;
        let rows = stmt
            .query_map(params![repository_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    }

    /// Chunks of one file ordered by chunk index.
    pub fn chunks_for_path(&self, repository_id: i64, path: &str) -> LoomResult<Vec<ChunkRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, path, chunk_index, start_line, end_line, content, content_hash, \
             last_seen_commit FROM chunks WHERE repository_id = ?1 AND path = ?2 \
             ORDER BY chunk_index, id;",
        )?;
        let rows = stmt
            .query_map(params![repository_id, path], row_to_chunk)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// All chunks grouped by path, in path order.
    pub fn chunks_by_path(
        &self,
        repository_id: i64,
    ) -> LoomResult<BTreeMap<String, Vec<ChunkRecord>>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, path, chunk_index, start_line, end_line, content, content_hash, \
             last_seen_commit FROM chunks WHERE repository_id = ?1 \
             ORDER BY path, chunk_index, id;",
        )?;
        let mut grouped: BTreeMap<String, Vec<ChunkRecord>> = BTreeMap::new();
        for chunk in stmt.query_map(params![repository_id], row_to_chunk)? {
            let chunk = chunk?;
            grouped.entry(chunk.path.clone()).or_default().push(chunk);
        }
        Ok(grouped)
    }

    /// Apply one file's chunk diff in a single transaction.
    pub fn apply_chunk_changes(
        &self,
        repository_id: i64,
        path: &str,
        commit: Option<&str>,
        changes: &ChunkChanges,
    ) -> LoomResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        {
            let mut delete = tx.prepare("DELETE FROM chunks WHERE id = ?1;")?;
            for id in &changes.delete_ids {
                delete.execute(params![id])?;
            }
            let mut refresh = tx.prepare(
                "UPDATE chunks SET start_line = ?2, end_line = ?3, \
                 last_seen_commit = COALESCE(?4, last_seen_commit) WHERE id = ?1;",
            )?;
            for (id, start, end) in &changes.refresh {
                refresh.execute(params![id, start, end, commit])?;
            }
            let mut insert = tx.prepare(
                "INSERT INTO chunks(repository_id, path, chunk_index, start_line, end_line, \
                 content, content_hash, last_seen_commit) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                 ON CONFLICT(repository_id, path, chunk_index, content_hash) DO UPDATE SET \
                     start_line = excluded.start_line, \
                     end_line = excluded.end_line, \
                     last_seen_commit = excluded.last_seen_commit;",
            )?;
            for chunk in &changes.insert {
                insert.execute(params![
                    repository_id,
                    path,
                    chunk.chunk_index,
                    chunk.start_line,
                    chunk.end_line,
                    chunk.content,
                    chunk.content_hash,
                    commit,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove every chunk of `path`; returns how many were deleted.
    pub fn delete_chunks_for_path(&self, repository_id: i64, path: &str) -> LoomResult<usize> {
        let conn = self.connect()?;
        let deleted = conn.execute(
            "DELETE FROM chunks WHERE repository_id = ?1 AND path = ?2;",
            params![repository_id, path],
        )?;
        Ok(deleted)
    }

    // -----------------------------------------------------------------------
    // File metadata and import graph
    // -----------------------------------------------------------------------

    /// Replace the repository's metadata rows.
    pub fn replace_file_metadata(
        &self,
        repository_id: i64,
        files: &[FileMetadata],
    ) -> LoomResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM file_metadata WHERE repository_id = ?1;",
            params![repository_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO file_metadata(repository_id, path, language, exports_json, \
                 imports_json, docstring, sections_json, internals_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            )?;
            for file in files {
                stmt.execute(params![
                    repository_id,
                    file.path,
                    file.language,
                    serde_json::to_string(&file.exports)?,
                    serde_json::to_string(&file.imports)?,
                    file.docstring,
                    serde_json::to_string(&file.sections)?,
                    serde_json::to_string(&file.internals)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// All metadata rows in path order.
    pub fn load_file_metadata(&self, repository_id: i64) -> LoomResult<Vec<FileMetadata>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT path, language, exports_json, imports_json, docstring, sections_json, \
             internals_json FROM file_metadata WHERE repository_id = ?1 ORDER BY path;",
        )?;
        let rows = stmt
            .query_map(params![repository_id], |row| {
                Ok(FileMetadata {
                    path: row.get(0)?,
                    language: row.get(1)?,
                    exports: decode_list(&row.get::<_, String>(2)?),
                    imports: decode_list(&row.get::<_, String>(3)?),
                    docstring: row.get(4)?,
                    sections: decode_list(&row.get::<_, String>(5)?),
                    internals: decode_list(&row.get::<_, String>(6)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Replace the repository's import edges.
    pub fn replace_import_edges(&self, repository_id: i64, edges: &[ImportEdge]) -> LoomResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM file_imports WHERE repository_id = ?1;",
            params![repository_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO file_imports(repository_id, source_path, target_path) \
                 VALUES (?1, ?2, ?3);",
            )?;
            for edge in edges {
                stmt.execute(params![repository_id, edge.source_path, edge.target_path])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_import_edges(&self, repository_id: i64) -> LoomResult<Vec<ImportEdge>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT source_path, target_path FROM file_imports WHERE repository_id = ?1 \
             ORDER BY source_path, target_path;",
        )?;
        let rows = stmt
            .query_map(params![repository_id], |row| {
                Ok(ImportEdge {
                    source_path: row.get(0)?,
                    target_path: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Number of importers per target path.
    pub fn import_indegrees(&self, repository_id: i64) -> LoomResult<HashMap<String, i64>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT target_path, COUNT(*) FROM file_imports WHERE repository_id = ?1 \
             GROUP BY target_path;",
        )?;
        let rows = stmt
            .query_map(params![repository_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<HashMap<String, i64>, _>>()?;
        Ok(rows)
    }

    /// Files importing `path`, sorted.
    pub fn importers_of(&self, repository_id: i64, path: &str) -> LoomResult<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT source_path FROM file_imports WHERE repository_id = ?1 AND target_path = ?2 \
             ORDER BY source_path;",
        )?;
        let rows = stmt
            .query_map(params![repository_id, path], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Git history
    // -----------------------------------------------------------------------

    pub fn load_file_stats(&self, repository_id: i64) -> LoomResult<HashMap<String, FileStat>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT path, total_commits, recent_commits, last_modified FROM file_stats \
             WHERE repository_id = ?1;",
        )?;
        let rows = stmt
            .query_map(params![repository_id], |row| {
                let stat = FileStat {
                    path: row.get(0)?,
                    total_commits: row.get(1)?,
                    recent_commits: row.get(2)?,
                    last_modified: row.get(3)?,
                };
                Ok((stat.path.clone(), stat))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    }

    /// Pairs whose accumulated count has reached `min_count`.
    pub fn load_cochanges(
        &self,
        repository_id: i64,
        min_count: i64,
    ) -> LoomResult<Vec<FileCochange>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT path_a, path_b, count FROM file_cochanges \
             WHERE repository_id = ?1 AND count >= ?2 \
             ORDER BY path_a, path_b;",
        )?;
        let rows = stmt
            .query_map(params![repository_id, min_count], |row| {
                Ok(FileCochange {
                    path_a: row.get(0)?,
                    path_b: row.get(1)?,
                    count: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Strongest co-change partners of `path` in either pair position, among
    /// pairs whose accumulated count has reached `min_count`.
    pub fn cochange_partners(
        &self,
        repository_id: i64,
        path: &str,
        min_count: i64,
        limit: usize,
    ) -> LoomResult<Vec<CochangePartner>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT partner, count FROM ( \
                 SELECT path_b AS partner, count FROM file_cochanges \
                 WHERE repository_id = ?1 AND path_a = ?2 AND count >= ?3 \
                 UNION ALL \
                 SELECT path_a AS partner, count FROM file_cochanges \
                 WHERE repository_id = ?1 AND path_b = ?2 AND count >= ?3 \
             ) ORDER BY count DESC, partner ASC LIMIT ?4;",
        )?;
        let rows = stmt
            .query_map(params![repository_id, path, min_count, limit as i64], |row| {
                Ok(CochangePartner {
                    path: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Persist a history delta and advance the analysis watermark.
    ///
    /// Stats accumulate (`last_modified` takes the max). Every pair
    /// accumulates its running count, including pairs still below the
    /// co-change minimum; readers apply the minimum. With `replace`, prior
    /// stats and pairs are dropped first.
    pub fn apply_history(
        &self,
        repository_id: i64,
        delta: &HistoryDelta,
        replace: bool,
        watermark: &str,
    ) -> LoomResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        if replace {
            tx.execute(
                "DELETE FROM file_stats WHERE repository_id = ?1;",
                params![repository_id],
            )?;
            tx.execute(
                "DELETE FROM file_cochanges WHERE repository_id = ?1;",
                params![repository_id],
            )?;
        }
        {
            let mut stats = tx.prepare(
                "INSERT INTO file_stats(repository_id, path, total_commits, recent_commits, \
                 last_modified) VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(repository_id, path) DO UPDATE SET \
                     total_commits = total_commits + excluded.total_commits, \
                     recent_commits = recent_commits + excluded.recent_commits, \
                     last_modified = MAX(last_modified, excluded.last_modified);",
            )?;
            for stat in delta.stats.values() {
                stats.execute(params![
                    repository_id,
                    stat.path,
                    stat.total_commits,
                    stat.recent_commits,
                    stat.last_modified,
                ])?;
            }

            let mut pairs = tx.prepare(
                "INSERT INTO file_cochanges(repository_id, path_a, path_b, count) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(repository_id, path_a, path_b) DO UPDATE SET \
                     count = count + excluded.count;",
            )?;
            for ((a, b), count) in &delta.pairs {
                pairs.execute(params![repository_id, a, b, count])?;
            }
        }
        tx.execute(
            "UPDATE repositories SET last_git_analysis_commit = ?2, \
             updated_at = CURRENT_TIMESTAMP WHERE id = ?1;",
            params![repository_id, watermark],
        )?;
        tx.commit()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
