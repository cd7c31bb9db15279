//! Engine configuration with `LOOM_*` environment overrides.

use crate::indexer::chunker::ChunkParams;

/// Tunable limits for indexing, git analysis and search.
///
/// `Default` holds the production values. [`EngineConfig::from_env`] layers
/// environment overrides on top of them.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub chunking: ChunkParams,
    /// Hard cap on stored chunks per repository. New chunks past the cap are
    /// dropped without error.
    pub max_chunks_per_repo: u64,
    /// Files larger than this are not indexed.
    pub max_file_bytes: u64,
    /// Minimum co-change count before a new pair is persisted.
    pub cochange_min_count: i64,
    /// Commits touching more files than this are ignored by git analysis.
    pub max_files_per_commit: usize,
    pub max_commits_per_call: usize,
    pub max_git_output_bytes: u64,
    pub recent_window_days: i64,
    /// Lease lifetime for the per-repository index lock.
    pub lock_ttl_secs: i64,
    pub search_cache_entries: usize,
    pub search_cache_ttl_secs: f64,
    pub exclude_sensitive: bool,
    pub exclude_patterns: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkParams::default(),
            max_chunks_per_repo: 50_000,
            max_file_bytes: 1024 * 1024,
            cochange_min_count: 2,
            max_files_per_commit: 50,
            max_commits_per_call: 5_000,
            max_git_output_bytes: 32 * 1024 * 1024,
            recent_window_days: 90,
            lock_ttl_secs: 15 * 60,
            search_cache_entries: 256,
            search_cache_ttl_secs: 30.0,
            exclude_sensitive: true,
            exclude_patterns: Vec::new(),
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(val) => {
            let v = val.trim().to_lowercase();
            if default {
                !matches!(v.as_str(), "0" | "false" | "no" | "off")
            } else {
                matches!(v.as_str(), "1" | "true" | "yes" | "on")
            }
        }
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring unparseable override");
            None
        }
    }
}

impl EngineConfig {
    /// Default configuration overlaid with any `LOOM_*` variables present.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse::<usize>("LOOM_CHUNK_TARGET_LINES") {
            config.chunking.target_lines = v.max(1);
        }
        if let Some(v) = env_parse::<usize>("LOOM_CHUNK_OVERLAP_LINES") {
            config.chunking.overlap_lines = v;
        }
        if let Some(v) = env_parse::<u64>("LOOM_MAX_CHUNKS_PER_REPO") {
            config.max_chunks_per_repo = v;
        }
        if let Some(v) = env_parse::<u64>("LOOM_MAX_FILE_BYTES") {
            config.max_file_bytes = v;
        }
        if let Some(v) = env_parse::<i64>("LOOM_COCHANGE_MIN_COUNT") {
            config.cochange_min_count = v.max(1);
        }
        if let Some(v) = env_parse::<usize>("LOOM_MAX_FILES_PER_COMMIT") {
            config.max_files_per_commit = v.max(2);
        }
        if let Some(v) = env_parse::<usize>("LOOM_MAX_COMMITS_PER_CALL") {
            config.max_commits_per_call = v.max(1);
        }
        if let Some(v) = env_parse::<i64>("LOOM_RECENT_WINDOW_DAYS") {
            config.recent_window_days = v.max(1);
        }
        if let Some(v) = env_parse::<i64>("LOOM_LOCK_TTL_SECS") {
            config.lock_ttl_secs = v.max(1);
        }
        config.exclude_sensitive = env_flag("LOOM_EXCLUDE_SENSITIVE", true);
        if let Ok(raw) = std::env::var("LOOM_EXCLUDE") {
            config.exclude_patterns = raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
        config
    }
}
