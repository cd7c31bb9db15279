//! Engine facade: repository registry, indexing, status and search.
//!
//! Transports (HTTP, CLI, MCP tools) call these operations; every result type
//! is `Serialize` so it can be emitted as JSON directly.

use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::errors::{LoomError, LoomResult};
use crate::indexer::git::GitRepo;
use crate::indexer::pipeline;
use crate::models::{
    identity_key, IndexReport, IndexStatus, IndexStatusReport, Repository, SearchResponse,
};
use crate::query::cache::{CacheOutcome, SearchCache};
use crate::query::guards::{clamp_limit, MAX_SEARCH_LIMIT};
use crate::query::search;
use crate::store::database::Database;

pub struct Engine {
    db: Database,
    config: EngineConfig,
    cache: SearchCache,
}

impl Engine {
    /// Open (or create) the datastore at `db_path`.
    pub fn open(db_path: impl AsRef<Path>, config: EngineConfig) -> LoomResult<Self> {
        let db = Database::open(db_path)?;
        Ok(Self::with_database(db, config))
    }

    pub fn with_database(db: Database, config: EngineConfig) -> Self {
        let cache = SearchCache::new(config.search_cache_entries, config.search_cache_ttl_secs);
        Self { db, config, cache }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn repository(&self, repository_id: i64) -> LoomResult<Repository> {
        self.db
            .get_repository(repository_id)?
            .ok_or_else(|| LoomError::NotFound(format!("repository {repository_id}")))
    }

    /// Register a repository rooted at `root_path`. Idempotent: a repository
    /// with the same identity key (normalized remote, else root path) is
    /// returned as is.
    pub fn register_repository(
        &self,
        root_path: &str,
        name: Option<&str>,
        remote_url: Option<&str>,
    ) -> LoomResult<Repository> {
        let trimmed = root_path.trim();
        if trimmed.is_empty() {
            return Err(LoomError::InvalidInput("repository root is empty".to_string()));
        }
        let root: PathBuf = Path::new(trimmed).canonicalize().map_err(|err| {
            LoomError::InvalidInput(format!("repository root {trimmed} is not accessible: {err}"))
        })?;
        if !root.is_dir() {
            return Err(LoomError::InvalidInput(format!(
                "repository root is not a directory: {}",
                root.display()
            )));
        }
        let root_str = root.to_string_lossy().replace('\\', "/");

        let remote = match remote_url.map(str::trim).filter(|r| !r.is_empty()) {
            Some(remote) => Some(remote.to_string()),
            None => GitRepo::open(&root, self.config.max_git_output_bytes)
                .and_then(|git| git.remote_url("origin")),
        };
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| root_str.clone()),
        };

        let key = identity_key(remote.as_deref(), &root_str);
        let repo = self
            .db
            .insert_or_get_repository(&key, &name, &root_str, remote.as_deref())?;
        tracing::info!(repository_id = repo.id, root = %root_str, "repository registered");
        Ok(repo)
    }

    /// Index the repository; see [`pipeline::run_index`].
    pub fn run_index(&self, repository_id: i64, force: bool) -> LoomResult<IndexReport> {
        let report = pipeline::run_index(&self.db, &self.config, repository_id, force)?;
        self.cache.invalidate_repository(repository_id);
        Ok(report)
    }

    /// Re-chunk the listed files without a git pass.
    pub fn reindex_paths(&self, repository_id: i64, paths: &[String]) -> LoomResult<IndexReport> {
        let report = pipeline::reindex_paths(&self.db, &self.config, repository_id, paths)?;
        self.cache.invalidate_repository(repository_id);
        Ok(report)
    }

    pub fn get_index_status(&self, repository_id: i64) -> LoomResult<IndexStatusReport> {
        let repo = self.repository(repository_id)?;
        let current_head = GitRepo::open(Path::new(&repo.root_path), self.config.max_git_output_bytes)
            .and_then(|git| git.head_commit().ok().flatten());
        let moved = current_head.is_some() && current_head != repo.last_indexed_commit;
        Ok(IndexStatusReport {
            status: repo.status,
            is_stale: repo.status != IndexStatus::Ready || moved,
            last_indexed_commit: repo.last_indexed_commit,
            current_head,
            chunk_count: self.db.count_chunks(repository_id)?,
            files_indexed: self.db.count_indexed_files(repository_id)?,
            embedded_count: 0,
            last_error: repo.last_error,
        })
    }

    /// Ranked structural search. Results are cached per index epoch.
    pub fn search(&self, repository_id: i64, query: &str, limit: i64) -> LoomResult<SearchResponse> {
        let repo = self.repository(repository_id)?;
        let limit = clamp_limit(limit, MAX_SEARCH_LIMIT);
        let key = SearchCache::cache_key(repo.id, repo.index_epoch, limit, query.trim());
        let (response, outcome) = self
            .cache
            .get_or_compute(&key, || {
                search::search(
                    &self.db,
                    repo.id,
                    query,
                    limit,
                    self.config.cochange_min_count,
                )
            })?;
        tracing::debug!(
            repository_id,
            cached = outcome == CacheOutcome::Hit,
            "search served"
        );
        Ok(response)
    }

    /// Delete the repository and everything indexed for it.
    pub fn remove_repository(&self, repository_id: i64) -> LoomResult<bool> {
        let removed = self.db.delete_repository(repository_id)?;
        self.cache.invalidate_repository(repository_id);
        if removed {
            tracing::info!(repository_id, "repository removed");
        }
        Ok(removed)
    }

    pub fn list_repositories(&self) -> LoomResult<Vec<Repository>> {
        self.db.list_repositories()
    }

    pub fn get_repository(&self, repository_id: i64) -> LoomResult<Repository> {
        self.repository(repository_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CochangePartner;
    use crate::testing::GitFixture;

    fn engine() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path().join("index.db"), EngineConfig::default()).unwrap();
        (dir, engine)
    }

    fn root_of(fx: &GitFixture) -> String {
        fx.root().to_string_lossy().into_owned()
    }

    #[test]
    fn test_register_is_idempotent_and_discovers_remote() {
        let fx = GitFixture::new();
        fx.git(&["remote", "add", "origin", "git@github.com:Acme/Widgets.git"]);
        let (_dir, engine) = engine();

        let first = engine.register_repository(&root_of(&fx), None, None).unwrap();
        assert_eq!(first.remote_url.as_deref(), Some("git@github.com:Acme/Widgets.git"));
        assert_eq!(first.status, IndexStatus::Pending);
        let again = engine
            .register_repository(&root_of(&fx), Some("renamed"), Some("https://github.com/acme/widgets"))
            .unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(engine.list_repositories().unwrap().len(), 1);
    }

    #[test]
    fn test_register_rejects_bad_roots() {
        let (dir, engine) = engine();
        assert!(matches!(
            engine.register_repository("  ", None, None),
            Err(LoomError::InvalidInput(_))
        ));
        let missing = dir.path().join("nope");
        assert!(matches!(
            engine.register_repository(&missing.to_string_lossy(), None, None),
            Err(LoomError::InvalidInput(_))
        ));
        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(matches!(
            engine.register_repository(&file.to_string_lossy(), None, None),
            Err(LoomError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_end_to_end_structural_search() {
        let fx = GitFixture::new();
        fx.write(
            "src/a.ts",
            "import { render } from './b';\nexport function main() { return render(); }\n",
        );
        fx.write(
            "src/b.ts",
            "/** Renders the quarterly ledger summary. */\nexport function render() { return 1; }\n",
        );
        fx.write("src/c.ts", "export const version = 0;\n");
        fx.write("src/unrelated.ts", "export const other = 1;\n");
        fx.commit_all("init");
        for i in 1..=4 {
            fx.write("src/b.ts", &format!(
                "/** Renders the quarterly ledger summary. */\nexport function render() {{ return {i}; }}\n"
            ));
            fx.write("src/c.ts", &format!("export const version = {i};\n"));
            fx.commit_all(&format!("bump {i}"));
        }

        let (_dir, engine) = engine();
        let repo = engine.register_repository(&root_of(&fx), Some("demo"), None).unwrap();
        let report = engine.run_index(repo.id, false).unwrap();
        assert_eq!(report.files_scanned, 4);

        let response = engine.search(repo.id, "ledger", 10).unwrap();
        assert_eq!(response.terms, vec!["ledger"]);
        let hits = &response.results["ledger"];
        assert_eq!(hits[0].path, "src/b.ts");
        assert!(hits.iter().all(|m| m.path != "src/unrelated.ts"));
        assert_eq!(hits[0].importers, vec!["src/a.ts"]);
        assert_eq!(hits[0].cochanges[0].path, "src/c.ts");
        assert_eq!(hits[0].cochanges[0].count, 5);
        assert_eq!(hits[0].language.as_deref(), Some("typescript"));

        // Co-change pairs read the same from either side.
        let c_side = engine
            .database()
            .cochange_partners(repo.id, "src/c.ts", 2, 5)
            .unwrap();
        assert_eq!(c_side[0].path, "src/b.ts");
        assert_eq!(c_side[0].count, 5);
    }

    #[test]
    fn test_cochange_counts_accumulate_across_per_commit_runs() {
        let fx = GitFixture::new();
        let (_dir, engine) = engine();
        let repo = engine.register_repository(&root_of(&fx), None, None).unwrap();

        for i in 1..=5 {
            fx.write("src/b.ts", &format!("/** Ledger totals. */\nexport const b = {i};\n"));
            fx.write("src/c.ts", &format!("export const c = {i};\n"));
            fx.commit_all(&format!("change {i}"));
            engine.run_index(repo.id, false).unwrap();

            let partners = engine
                .database()
                .cochange_partners(repo.id, "src/b.ts", engine.config().cochange_min_count, 5)
                .unwrap();
            if i < engine.config().cochange_min_count {
                assert!(partners.is_empty());
            } else {
                assert_eq!(partners, vec![CochangePartner { path: "src/c.ts".into(), count: i }]);
            }
        }

        let hits = &engine.search(repo.id, "ledger", 10).unwrap().results["ledger"];
        assert_eq!(hits[0].path, "src/b.ts");
        assert_eq!(hits[0].cochanges[0].path, "src/c.ts");
        assert_eq!(hits[0].cochanges[0].count, 5);
    }

    #[test]
    fn test_status_tracks_head_and_reindex_is_noop() {
        let fx = GitFixture::new();
        fx.write("a.ts", "export const a = 1;\n");
        fx.commit_all("init");
        let (_dir, engine) = engine();
        let repo = engine.register_repository(&root_of(&fx), None, None).unwrap();

        let before = engine.get_index_status(repo.id).unwrap();
        assert!(before.is_stale);
        assert_eq!(before.chunk_count, 0);

        engine.run_index(repo.id, false).unwrap();
        let status = engine.get_index_status(repo.id).unwrap();
        assert_eq!(status.status, IndexStatus::Ready);
        assert!(!status.is_stale);
        assert_eq!(status.current_head, status.last_indexed_commit);
        assert_eq!(status.chunk_count, 1);
        assert_eq!(status.files_indexed, 1);
        assert_eq!(status.embedded_count, 0);

        let noop = engine.run_index(repo.id, false).unwrap();
        assert_eq!(noop.chunks_created, 0);
        assert_eq!(noop.chunks_deleted, 0);

        fx.write("a.ts", "export const a = 2;\n");
        fx.commit_all("edit");
        assert!(engine.get_index_status(repo.id).unwrap().is_stale);
    }

    #[test]
    fn test_search_cache_follows_index_epoch() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("alpha.ts"), "export const alpha = 1;\n").unwrap();
        let (_dir, engine) = engine();
        let repo = engine
            .register_repository(&tmp.path().to_string_lossy(), None, None)
            .unwrap();
        engine.run_index(repo.id, false).unwrap();
        assert_eq!(engine.search(repo.id, "beta", 5).unwrap().results["beta"].len(), 0);

        std::fs::write(tmp.path().join("beta.ts"), "export const beta = 1;\n").unwrap();
        engine
            .reindex_paths(repo.id, &["beta.ts".to_string()])
            .unwrap();
        assert_eq!(engine.search(repo.id, "beta", 5).unwrap().results["beta"].len(), 1);
    }

    #[test]
    fn test_remove_repository_cascades() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.ts"), "export const a = 1;\n").unwrap();
        let (_dir, engine) = engine();
        let repo = engine
            .register_repository(&tmp.path().to_string_lossy(), None, None)
            .unwrap();
        engine.run_index(repo.id, false).unwrap();

        assert!(engine.remove_repository(repo.id).unwrap());
        assert!(!engine.remove_repository(repo.id).unwrap());
        assert_eq!(engine.database().count_chunks(repo.id).unwrap(), 0);
        assert!(engine.database().load_file_metadata(repo.id).unwrap().is_empty());
        assert!(matches!(engine.get_repository(repo.id), Err(LoomError::NotFound(_))));
        assert!(matches!(engine.search(repo.id, "a", 5), Err(LoomError::NotFound(_))));
        assert!(matches!(
            engine.get_index_status(repo.id),
            Err(LoomError::NotFound(_))
        ));
    }
}
