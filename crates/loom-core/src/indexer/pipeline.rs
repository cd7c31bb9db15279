//! Indexing pipeline orchestration with Rayon-based parallelism.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Instant;

use rayon::prelude::*;

use crate::config::EngineConfig;
use crate::errors::{LoomError, LoomResult};
use crate::indexer::chunker::{chunk_content, reassemble, Chunk};
use crate::indexer::filesystem::{discover_files, is_excluded, read_source_file, repo_relative_path};
use crate::indexer::git::{FileChange, GitRepo};
use crate::indexer::history::run_history_pass;
use crate::indexer::imports::build_import_edges;
use crate::indexer::languages::detect_language;
use crate::indexer::metadata::extract_metadata;
use crate::models::{ChunkRecord, FileMetadata, IndexReport, IndexStatus, Repository};
use crate::store::database::{ChunkChanges, Database, NewChunk};
use crate::store::lock::RepoLease;

/// Files read and chunked per parallel batch. Bounds resident file text.
const FILE_BATCH_SIZE: usize = 256;

/// Paths to (re)chunk and paths whose chunks must go.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScanPlan {
    pub upserts: Vec<String>,
    pub deletes: Vec<String>,
    pub full: bool,
}

/// Outcome of reading one file for chunking.
enum LoadedFile {
    Chunks(Vec<Chunk>),
    /// Missing, oversized, binary or non-UTF-8: drop any stored chunks.
    Absent,
    /// Transient read failure: keep stored chunks as they are.
    Failed(LoomError),
}

fn load_file_worker(root: &Path, rel_path: &str, config: &EngineConfig) -> LoadedFile {
    match read_source_file(root, rel_path, config.max_file_bytes) {
        Ok(Some(text)) => LoadedFile::Chunks(chunk_content(&text, &config.chunking)),
        Ok(None) => LoadedFile::Absent,
        Err(err) => LoadedFile::Failed(err),
    }
}

fn build_pool() -> Option<rayon::ThreadPool> {
    match rayon::ThreadPoolBuilder::new()
        .thread_name(|i| format!("loom-index-{i}"))
        .build()
    {
        Ok(pool) => Some(pool),
        Err(err) => {
            tracing::warn!(error = %err, "failed to build index thread pool; running sequentially");
            None
        }
    }
}

/// Map `f` over `items` on `pool`, or sequentially without one.
fn parallel_map<T, R, F>(pool: Option<&rayon::ThreadPool>, items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    match pool {
        Some(pool) => pool.install(|| items.par_iter().map(&f).collect()),
        None => items.iter().map(f).collect(),
    }
}

/// Running chunk count against `max_chunks_per_repo`.
#[derive(Debug)]
struct ChunkBudget {
    stored: u64,
    max: u64,
    dropped: u64,
}

impl ChunkBudget {
    fn release(&mut self, count: usize) {
        self.stored = self.stored.saturating_sub(count as u64);
    }

    fn try_take(&mut self) -> bool {
        if self.stored < self.max {
            self.stored += 1;
            true
        } else {
            self.dropped += 1;
            false
        }
    }
}

/// Diff stored chunks against freshly produced ones by
/// `(chunk_index, content_hash)`. Returns the changes and the number of
/// unchanged chunks.
fn diff_chunks(
    existing: &[ChunkRecord],
    fresh: Vec<Chunk>,
    budget: &mut ChunkBudget,
) -> (ChunkChanges, usize) {
    let mut stored: HashMap<(i64, String), &ChunkRecord> = existing
        .iter()
        .map(|c| ((c.chunk_index, c.content_hash.clone()), c))
        .collect();

    let mut changes = ChunkChanges::default();
    let mut pending = Vec::new();
    let mut unchanged = 0;
    for chunk in fresh {
        let key = (chunk.chunk_index as i64, chunk.content_hash.clone());
        match stored.remove(&key) {
            Some(record) => {
                unchanged += 1;
                changes
                    .refresh
                    .push((record.id, chunk.start_line as i64, chunk.end_line as i64));
            }
            None => pending.push(chunk),
        }
    }

    changes.delete_ids = stored.values().map(|c| c.id).collect();
    changes.delete_ids.sort_unstable();
    budget.release(changes.delete_ids.len());

    for chunk in pending {
        if !budget.try_take() {
            continue;
        }
        changes.insert.push(NewChunk {
            chunk_index: chunk.chunk_index as i64,
            start_line: chunk.start_line as i64,
            end_line: chunk.end_line as i64,
            content: chunk.content,
            content_hash: chunk.content_hash,
        });
    }
    (changes, unchanged)
}

/// Decide which files this run touches.
fn plan_scan(
    db: &Database,
    config: &EngineConfig,
    repo: &Repository,
    git: Option<&GitRepo>,
    head: Option<&str>,
    force: bool,
) -> LoomResult<ScanPlan> {
    if !force {
        if let (Some(git), Some(last), Some(head)) =
            (git, repo.last_indexed_commit.as_deref(), head)
        {
            match git.diff_name_status(last, head) {
                Ok(changes) => {
                    let mut plan = ScanPlan::default();
                    for change in changes {
                        let path = change.path().to_string();
                        match change {
                            FileChange::Deleted(_) => plan.deletes.push(path),
                            _ if is_excluded(&path, config) => {
                                tracing::debug!(path = %path, "skipping excluded changed file");
                            }
                            _ => plan.upserts.push(path),
                        }
                    }
                    plan.upserts.sort();
                    plan.upserts.dedup();
                    plan.deletes.sort();
                    plan.deletes.dedup();
                    return Ok(plan);
                }
                Err(err) => {
                    tracing::warn!(
                        repository_id = repo.id,
                        error = %err,
                        "diff against last indexed commit failed; running full scan"
                    );
                }
            }
        }
    }

    let discovered = discover_files(Path::new(&repo.root_path), config)?;
    let present: BTreeSet<&str> = discovered.iter().map(String::as_str).collect();
    let deletes = db
        .indexed_paths(repo.id)?
        .into_iter()
        .filter(|path| !present.contains(path.as_str()))
        .collect();
    Ok(ScanPlan {
        upserts: discovered,
        deletes,
        full: true,
    })
}

/// Apply a scan plan to the chunk store. Deletions first, then upserts in
/// sorted path order, batch by batch.
fn apply_plan(
    db: &Database,
    config: &EngineConfig,
    repo: &Repository,
    lease: &RepoLease,
    plan: &ScanPlan,
    commit: Option<&str>,
    pool: Option<&rayon::ThreadPool>,
) -> LoomResult<IndexReport> {
    let root = Path::new(&repo.root_path);
    let mut report = IndexReport::default();
    let mut budget = ChunkBudget {
        stored: db.count_chunks(repo.id)?.max(0) as u64,
        max: config.max_chunks_per_repo,
        dropped: 0,
    };

    for path in &plan.deletes {
        let removed = db.delete_chunks_for_path(repo.id, path)?;
        budget.release(removed);
        report.chunks_deleted += removed as u64;
    }

    for batch in plan.upserts.chunks(FILE_BATCH_SIZE) {
        let loaded = parallel_map(pool, batch, |path| load_file_worker(root, path, config));
        for (path, file) in batch.iter().zip(loaded) {
            report.files_scanned += 1;
            match file {
                LoadedFile::Chunks(fresh) => {
                    let existing = db.chunks_for_path(repo.id, path)?;
                    let (changes, unchanged) = diff_chunks(&existing, fresh, &mut budget);
                    db.apply_chunk_changes(repo.id, path, commit, &changes)?;
                    report.chunks_unchanged += unchanged as u64;
                    report.chunks_created += changes.insert.len() as u64;
                    report.chunks_deleted += changes.delete_ids.len() as u64;
                }
                LoadedFile::Absent => {
                    let removed = db.delete_chunks_for_path(repo.id, path)?;
                    budget.release(removed);
                    report.chunks_deleted += removed as u64;
                }
                LoadedFile::Failed(err) => {
                    tracing::warn!(path = %path, error = %err, "skipping unreadable file");
                }
            }
        }
        lease.renew()?;
    }

    if budget.dropped > 0 {
        tracing::info!(
            repository_id = repo.id,
            dropped = budget.dropped,
            max = config.max_chunks_per_repo,
            "chunk capacity reached; new chunks dropped"
        );
    }
    Ok(report)
}

/// Re-extract metadata for every chunked file and rebuild the import graph.
/// Returns `(files, edges)`.
pub fn rebuild_structure(
    db: &Database,
    repository_id: i64,
    pool: Option<&rayon::ThreadPool>,
) -> LoomResult<(usize, usize)> {
    let grouped: Vec<(String, Vec<ChunkRecord>)> =
        db.chunks_by_path(repository_id)?.into_iter().collect();
    let files: Vec<FileMetadata> = parallel_map(pool, &grouped, |(path, chunks)| {
        let content = reassemble(
            chunks
                .iter()
                .map(|c| (c.chunk_index, c.start_line, c.end_line, c.content.as_str())),
        );
        extract_metadata(path, &content, detect_language(path))
    });
    let edges = build_import_edges(&files);
    db.replace_file_metadata(repository_id, &files)?;
    db.replace_import_edges(repository_id, &edges)?;
    tracing::debug!(
        repository_id,
        files = files.len(),
        edges = edges.len(),
        "structure rebuilt"
    );
    Ok((files.len(), edges.len()))
}

fn load_repository(db: &Database, repository_id: i64) -> LoomResult<Repository> {
    db.get_repository(repository_id)?
        .ok_or_else(|| LoomError::NotFound(format!("repository {repository_id}")))
}

/// Record a failed run on the repository row and hand the error back.
fn record_failure(db: &Database, repository_id: i64, err: LoomError) -> LoomError {
    tracing::warn!(repository_id, error = %err, "index run failed");
    if let Err(status_err) = db.set_status(repository_id, IndexStatus::Error, Some(&err.to_string())) {
        tracing::warn!(repository_id, error = %status_err, "failed to record index error");
    }
    err
}

fn index_locked(
    db: &Database,
    config: &EngineConfig,
    repo: &Repository,
    lease: &RepoLease,
    force: bool,
) -> LoomResult<IndexReport> {
    let root = Path::new(&repo.root_path);
    if !root.is_dir() {
        return Err(LoomError::Index(format!(
            "repository root is missing: {}",
            repo.root_path
        )));
    }
    let git = GitRepo::open(root, config.max_git_output_bytes);
    let head = match &git {
        Some(git) => git.head_commit()?,
        None => None,
    };
    if !force && head.is_some() && head == repo.last_indexed_commit {
        tracing::info!(repository_id = repo.id, "index already up to date");
        return Ok(IndexReport::default());
    }

    db.set_status(repo.id, IndexStatus::Indexing, None)?;
    let pool = build_pool();

    let plan = plan_scan(db, config, repo, git.as_ref(), head.as_deref(), force)?;
    tracing::info!(
        repository_id = repo.id,
        full = plan.full,
        upserts = plan.upserts.len(),
        deletes = plan.deletes.len(),
        "chunking files"
    );
    let report = apply_plan(db, config, repo, lease, &plan, head.as_deref(), pool.as_ref())?;

    rebuild_structure(db, repo.id, pool.as_ref())?;
    lease.renew()?;

    if let (Some(git), Some(head)) = (&git, head.as_deref()) {
        run_history_pass(db, repo, git, head, config)?;
        lease.renew()?;
    }

    let epoch = db.finish_index(repo.id, head.as_deref())?;
    tracing::info!(
        repository_id = repo.id,
        epoch,
        files = report.files_scanned,
        created = report.chunks_created,
        unchanged = report.chunks_unchanged,
        deleted = report.chunks_deleted,
        "index run complete"
    );
    Ok(report)
}

/// Bring a repository's index up to date with its working tree and HEAD.
///
/// Holds the repository lease for the whole run. When HEAD matches the last
/// indexed commit and `force` is false, returns a zero report without
/// touching anything.
pub fn run_index(
    db: &Database,
    config: &EngineConfig,
    repository_id: i64,
    force: bool,
) -> LoomResult<IndexReport> {
    let started = Instant::now();
    let repo = load_repository(db, repository_id)?;
    let lease = RepoLease::acquire(db, repository_id, config.lock_ttl_secs)?;

    let mut report = index_locked(db, config, &repo, &lease, force)
        .map_err(|err| record_failure(db, repository_id, err))?;
    lease.release()?;
    report.duration_ms = started.elapsed().as_millis() as u64;
    Ok(report)
}

/// Re-chunk specific files (for example after a file-watch event) and
/// rebuild metadata and the import graph. Git history and the commit
/// watermark are left alone.
pub fn reindex_paths(
    db: &Database,
    config: &EngineConfig,
    repository_id: i64,
    paths: &[String],
) -> LoomResult<IndexReport> {
    let started = Instant::now();
    let repo = load_repository(db, repository_id)?;
    let root = Path::new(&repo.root_path);

    let mut plan = ScanPlan::default();
    for raw in paths {
        let rel = repo_relative_path(root, raw)?;
        if is_excluded(&rel, config) {
            plan.deletes.push(rel);
        } else {
            plan.upserts.push(rel);
        }
    }
    plan.upserts.sort();
    plan.upserts.dedup();
    plan.deletes.sort();
    plan.deletes.dedup();

    let lease = RepoLease::acquire(db, repository_id, config.lock_ttl_secs)?;
    let run = || -> LoomResult<IndexReport> {
        db.set_status(repo.id, IndexStatus::Indexing, None)?;
        let pool = build_pool();
        let report = apply_plan(db, config, &repo, &lease, &plan, None, pool.as_ref())?;
        rebuild_structure(db, repo.id, pool.as_ref())?;
        db.bump_epoch(repo.id)?;
        Ok(report)
    };
    let mut report = run().map_err(|err| record_failure(db, repository_id, err))?;
    lease.release()?;
    report.duration_ms = started.elapsed().as_millis() as u64;
    tracing::debug!(
        repository_id,
        files = report.files_scanned,
        "paths reindexed"
    );
    Ok(report)
}
