//! Shared typed models used across indexing, storage, and query layers.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::LoomError;

// ---------------------------------------------------------------------------
// Identity helpers
// ---------------------------------------------------------------------------

/// Normalize a git remote URL so that equivalent spellings collapse.
///
/// `git@github.com:Org/Repo.git`, `https://user@github.com/org/repo` and
/// `ssh://git@github.com/org/repo.git/` all normalize to
/// `github.com/org/repo`.
pub fn normalize_remote_url(url: &str) -> String {
    let mut value = url.trim().to_lowercase();
    if let Some(idx) = value.find("://") {
        value = value[idx + 3..].to_string();
    } else if let Some((host, path)) = value.split_once(':') {
        // scp-like syntax: [user@]host:path
        if !host.contains('/') {
            value = format!("{host}/{path}");
        }
    }
    if let Some((_, rest)) = value.split_once('@') {
        if !rest.is_empty() {
            value = rest.to_string();
        }
    }
    while value.ends_with('/') {
        value.pop();
    }
    if let Some(stripped) = value.strip_suffix(".git") {
        value = stripped.to_string();
    }
    value
}

/// Derive the repository identity key: SHA-256 of the normalized remote URL,
/// or of the root path when there is no remote.
pub fn identity_key(remote_url: Option<&str>, root_path: &str) -> String {
    let source = match remote_url.map(normalize_remote_url) {
        Some(remote) if !remote.is_empty() => format!("remote:{remote}"),
        _ => format!("path:{}", root_path.replace('\\', "/")),
    };
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Lifecycle state of a repository index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Pending,
    Indexing,
    Ready,
    Error,
}

impl IndexStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IndexStatus::Pending => "pending",
            IndexStatus::Indexing => "indexing",
            IndexStatus::Ready => "ready",
            IndexStatus::Error => "error",
        }
    }
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexStatus {
    type Err = LoomError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(IndexStatus::Pending),
            "indexing" => Ok(IndexStatus::Indexing),
            "ready" => Ok(IndexStatus::Ready),
            "error" => Ok(IndexStatus::Error),
            other => Err(LoomError::Index(format!("unknown index status: {other}"))),
        }
    }
}

/// One tracked codebase.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Repository {
    pub id: i64,
    pub identity_key: String,
    pub name: String,
    pub root_path: String,
    pub remote_url: Option<String>,
    pub last_indexed_commit: Option<String>,
    pub last_git_analysis_commit: Option<String>,
    pub status: IndexStatus,
    pub last_error: Option<String>,
    /// Bumped after every successful index run; versions cached searches.
    pub index_epoch: i64,
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

/// A persisted chunk row.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChunkRecord {
    pub id: i64,
    pub path: String,
    pub chunk_index: i64,
    pub start_line: i64,
    pub end_line: i64,
    pub content: String,
    pub content_hash: String,
    pub last_seen_commit: Option<String>,
}

// ---------------------------------------------------------------------------
// Structural metadata
// ---------------------------------------------------------------------------

/// Per-file structural metadata, derived from reassembled chunk content.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub path: String,
    pub language: Option<String>,
    pub exports: Vec<String>,
    pub imports: Vec<String>,
    pub docstring: Option<String>,
    pub sections: Vec<String>,
    pub internals: Vec<String>,
}

/// A resolved, directed import between two repository files.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ImportEdge {
    pub source_path: String,
    pub target_path: String,
}

/// Git activity for one file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FileStat {
    pub path: String,
    pub total_commits: i64,
    pub recent_commits: i64,
    pub last_modified: i64,
}

/// An unordered co-change pair stored canonically (`path_a < path_b`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileCochange {
    pub path_a: String,
    pub path_b: String,
    pub count: i64,
}

/// A co-change partner as seen from one file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CochangePartner {
    pub path: String,
    pub count: i64,
}

// ---------------------------------------------------------------------------
// Operation results
// ---------------------------------------------------------------------------

/// Summary of a single `run_index` call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub files_scanned: u64,
    pub chunks_created: u64,
    pub chunks_unchanged: u64,
    pub chunks_deleted: u64,
    pub duration_ms: u64,
}

/// Snapshot answer to `get_index_status`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IndexStatusReport {
    pub status: IndexStatus,
    pub last_indexed_commit: Option<String>,
    pub current_head: Option<String>,
    pub is_stale: bool,
    pub chunk_count: i64,
    pub files_indexed: i64,
    /// Always zero: this engine stores no embeddings.
    pub embedded_count: i64,
    pub last_error: Option<String>,
}

/// One ranked file with its structural context.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EnrichedMatch {
    pub path: String,
    pub score: f64,
    pub language: Option<String>,
    pub matched_terms: Vec<String>,
    pub importers: Vec<String>,
    pub cochanges: Vec<CochangePartner>,
    pub is_hub: bool,
    pub hub_score: f64,
    pub exports: Vec<String>,
    pub docstring: Option<String>,
}

/// Search results regrouped per query term, in query order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SearchResponse {
    pub terms: Vec<String>,
    pub results: IndexMap<String, Vec<EnrichedMatch>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_remote_equivalent_forms() {
        let expected = "github.com/org/repo";
        assert_eq!(normalize_remote_url("git@github.com:Org/Repo.git"), expected);
        assert_eq!(normalize_remote_url("https://github.com/org/repo"), expected);
        assert_eq!(
            normalize_remote_url("ssh://git@github.com/org/repo.git/"),
            expected
        );
        assert_eq!(
            normalize_remote_url("https://user@github.com/org/repo.git"),
            expected
        );
    }

    #[test]
    fn test_identity_key_prefers_remote() {
        let a = identity_key(Some("git@github.com:org/repo.git"), "/tmp/a");
        let b = identity_key(Some("https://github.com/org/repo"), "/tmp/b");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_identity_key_falls_back_to_path() {
        let a = identity_key(None, "/tmp/a");
        let b = identity_key(Some("   "), "/tmp/a");
        let c = identity_key(None, "/tmp/c");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            IndexStatus::Pending,
            IndexStatus::Indexing,
            IndexStatus::Ready,
            IndexStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<IndexStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<IndexStatus>().is_err());
    }
}
