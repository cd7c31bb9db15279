//! Git history mining: per-file activity and pairwise co-change counts.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::EngineConfig;
use crate::errors::LoomResult;
use crate::indexer::git::{CommitRecord, GitRepo};
use crate::models::{FileStat, Repository};
use crate::store::database::Database;

/// Aggregated effect of a batch of commits.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistoryDelta {
    pub stats: BTreeMap<String, FileStat>,
    /// Canonical `(min, max)` path pairs and how often they changed together.
    pub pairs: BTreeMap<(String, String), i64>,
    pub commits_analyzed: usize,
    pub commits_skipped: usize,
}

/// Fold commits into per-file stats and pair counts.
///
/// Commits touching more than `max_files_per_commit` files are skipped
/// entirely. `recent_cutoff` is a unix timestamp; commits at or after it
/// count as recent.
pub fn accumulate(
    commits: &[CommitRecord],
    max_files_per_commit: usize,
    recent_cutoff: i64,
) -> HistoryDelta {
    let mut delta = HistoryDelta::default();
    for commit in commits {
        let files: BTreeSet<&str> = commit.files.iter().map(String::as_str).collect();
        if files.len() > max_files_per_commit {
            delta.commits_skipped += 1;
            continue;
        }
        delta.commits_analyzed += 1;
        let recent = commit.timestamp >= recent_cutoff;
        for path in &files {
            let stat = delta
                .stats
                .entry((*path).to_string())
                .or_insert_with(|| FileStat {
                    path: (*path).to_string(),
                    ..FileStat::default()
                });
            stat.total_commits += 1;
            if recent {
                stat.recent_commits += 1;
            }
            stat.last_modified = stat.last_modified.max(commit.timestamp);
        }
        // BTreeSet iteration is sorted, so (a, b) is already canonical.
        let ordered: Vec<&str> = files.into_iter().collect();
        for (i, a) in ordered.iter().enumerate() {
            for b in &ordered[i + 1..] {
                *delta
                    .pairs
                    .entry(((*a).to_string(), (*b).to_string()))
                    .or_insert(0) += 1;
            }
        }
    }
    delta
}

/// What a history pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistoryOutcome {
    pub commits_analyzed: usize,
    pub full_rescan: bool,
    pub watermark: Option<String>,
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Run the incremental git-history pass for `repo` up to `head`.
///
/// An incremental pass that finds nothing (or whose bounded log fails) while
/// HEAD has moved means history was rewritten: fall back to a full rescan
/// that replaces stats and co-change rows. A failing full log leaves the
/// stored history and watermark untouched.
pub fn run_history_pass(
    db: &Database,
    repo: &Repository,
    git: &GitRepo,
    head: &str,
    config: &EngineConfig,
) -> LoomResult<HistoryOutcome> {
    let since = repo.last_git_analysis_commit.as_deref();
    if since == Some(head) {
        tracing::debug!(repository_id = repo.id, "git history already analyzed at HEAD");
        return Ok(HistoryOutcome {
            watermark: Some(head.to_string()),
            ..HistoryOutcome::default()
        });
    }

    let mut full_rescan = since.is_none();
    let mut commits = None;
    if let Some(since) = since {
        match git.log(Some(since), config.max_commits_per_call) {
            Ok(found) if !found.is_empty() => commits = Some(found),
            Ok(_) => {
                tracing::info!(
                    repository_id = repo.id,
                    since,
                    "no commits since watermark; history rewritten, rescanning"
                );
                full_rescan = true;
            }
            Err(err) => {
                tracing::warn!(
                    repository_id = repo.id,
                    error = %err,
                    "incremental git log failed; rescanning full history"
                );
                full_rescan = true;
            }
        }
    }
    let commits = match commits {
        Some(found) => found,
        None => match git.log(None, config.max_commits_per_call) {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(
                    repository_id = repo.id,
                    error = %err,
                    "git log failed; no commits analyzed"
                );
                return Ok(HistoryOutcome::default());
            }
        },
    };

    let cutoff = now_secs() - config.recent_window_days * 86_400;
    let delta = accumulate(&commits, config.max_files_per_commit, cutoff);
    let watermark = commits
        .first()
        .map(|c| c.hash.clone())
        .unwrap_or_else(|| head.to_string());

    db.apply_history(repo.id, &delta, full_rescan, &watermark)?;
    tracing::info!(
        repository_id = repo.id,
        analyzed = delta.commits_analyzed,
        skipped = delta.commits_skipped,
        full_rescan,
        "git history pass complete"
    );
    Ok(HistoryOutcome {
        commits_analyzed: delta.commits_analyzed,
        full_rescan,
        watermark: Some(watermark),
    })
}
