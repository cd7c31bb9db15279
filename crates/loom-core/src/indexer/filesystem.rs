//! File discovery and reading for indexing passes.

use std::path::{Component, Path};

use ignore::WalkBuilder;

use crate::config::EngineConfig;
use crate::errors::{LoomError, LoomResult};

/// Per-repository ignore file, read with `.gitignore` semantics.
pub const IGNORE_FILE_NAME: &str = ".loomignore";

const DEFAULT_SENSITIVE_EXCLUDE_PATTERNS: &[&str] = &[
    ".env",
    ".env.*",
    "*.pem",
    "*.key",
    "*.p12",
    "*.pfx",
    "*secret*",
    "*secrets*",
    "*credential*",
    "id_rsa",
    "id_dsa",
    "id_ed25519",
];

const IMPLICIT_IGNORED_DIRS: &[&str] = &[".git", ".hg", ".svn", ".loom"];

struct ExcludeRule {
    pattern: String,
    directory_only: bool,
}

impl ExcludeRule {
    fn parse(raw: &str) -> Option<ExcludeRule> {
        let stripped = raw.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            return None;
        }
        let directory_only = stripped.ends_with('/');
        let pattern = stripped.trim_end_matches('/');
        let pattern = pattern.strip_prefix("./").unwrap_or(pattern);
        Some(ExcludeRule {
            pattern: pattern.to_string(),
            directory_only,
        })
    }

    fn matches(&self, rel_path: &str) -> bool {
        if self.directory_only {
            // Only directory prefixes can match: any file below the directory.
            return rel_path.starts_with(&format!("{}/", self.pattern))
                || rel_path
                    .split('/')
                    .rev()
                    .skip(1)
                    .any(|segment| glob_match(segment, &self.pattern));
        }
        let file_name = rel_path.rsplit('/').next().unwrap_or(rel_path);
        glob_match(rel_path, &self.pattern)
            || glob_match(file_name, &self.pattern)
            || rel_path.starts_with(&format!("{}/", self.pattern))
    }
}

/// Glob match supporting `*` and `?`.
pub fn glob_match(text: &str, pattern: &str) -> bool {
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    let (tl, pl) = (t.len(), p.len());
    let mut dp = vec![vec![false; pl + 1]; tl + 1];
    dp[0][0] = true;
    for j in 1..=pl {
        if p[j - 1] == '*' {
            dp[0][j] = dp[0][j - 1];
        }
    }
    for i in 1..=tl {
        for j in 1..=pl {
            if p[j - 1] == '*' {
                dp[i][j] = dp[i][j - 1] || dp[i - 1][j];
            } else if p[j - 1] == '?' || t[i - 1] == p[j - 1] {
                dp[i][j] = dp[i - 1][j - 1];
            }
        }
    }
    dp[tl][pl]
}

fn exclude_rules(config: &EngineConfig) -> Vec<ExcludeRule> {
    let mut rules = Vec::new();
    if config.exclude_sensitive {
        rules.extend(
            DEFAULT_SENSITIVE_EXCLUDE_PATTERNS
                .iter()
                .filter_map(|p| ExcludeRule::parse(p)),
        );
    }
    rules.extend(
        config
            .exclude_patterns
            .iter()
            .filter_map(|p| ExcludeRule::parse(p)),
    );
    rules
}

/// Whether `rel_path` lives under a VCS/engine directory or is excluded by
/// the sensitive-file list or the configured exclude patterns.
pub fn is_excluded(rel_path: &str, config: &EngineConfig) -> bool {
    rel_path
        .split('/')
        .rev()
        .skip(1)
        .any(|dir| IMPLICIT_IGNORED_DIRS.contains(&dir))
        || exclude_rules(config).iter().any(|rule| rule.matches(rel_path))
}

/// Walk the repository and return sorted, `/`-separated relative paths.
///
/// Honors `.gitignore`, `.git/info/exclude`, `.loomignore`, the sensitive
/// file list and `EngineConfig::exclude_patterns`. Hidden files are walked.
pub fn discover_files(root: &Path, config: &EngineConfig) -> LoomResult<Vec<String>> {
    if !root.is_dir() {
        return Err(LoomError::InvalidInput(format!(
            "repository root is not a directory: {}",
            root.display()
        )));
    }
    let rules = exclude_rules(config);

    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .git_ignore(true)
        .git_exclude(true)
        .git_global(false)
        .require_git(false)
        .parents(false)
        .add_custom_ignore_filename(IGNORE_FILE_NAME);
    let walker = builder
        .filter_entry(|entry| {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            !(is_dir
                && entry
                    .file_name()
                    .to_str()
                    .map(|name| IMPLICIT_IGNORED_DIRS.contains(&name))
                    .unwrap_or(false))
        })
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable entry during discovery");
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        if rel.is_empty() || rules.iter().any(|rule| rule.matches(&rel)) {
            continue;
        }
        files.push(rel);
    }
    files.sort();
    files.dedup();
    tracing::debug!(root = %root.display(), files = files.len(), "discovered files");
    Ok(files)
}

/// Read a repository file as UTF-8 text.
///
/// Returns `Ok(None)` for files that are missing, oversized, binary, or not
/// valid UTF-8; the caller treats those as absent.
pub fn read_source_file(root: &Path, rel_path: &str, max_bytes: u64) -> LoomResult<Option<String>> {
    let path = root.join(rel_path);
    let meta = match std::fs::metadata(&path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if !meta.is_file() {
        return Ok(None);
    }
    if meta.len() > max_bytes {
        tracing::debug!(path = rel_path, bytes = meta.len(), "skipping oversized file");
        return Ok(None);
    }
    let bytes = std::fs::read(&path)?;
    if bytes.contains(&0) {
        tracing::debug!(path = rel_path, "skipping binary file");
        return Ok(None);
    }
    match String::from_utf8(bytes) {
        Ok(text) => Ok(Some(text)),
        Err(_) => {
            tracing::debug!(path = rel_path, "skipping non-UTF-8 file");
            Ok(None)
        }
    }
}

/// Normalize a caller-supplied path into a repository-relative path.
///
/// Accepts relative paths or absolute paths under `root`; rejects anything
/// that escapes the repository.
pub fn repo_relative_path(root: &Path, raw: &str) -> LoomResult<String> {
    let candidate = Path::new(raw.trim());
    let relative = if candidate.is_absolute() {
        candidate.strip_prefix(root).map_err(|_| {
            LoomError::InvalidInput(format!("path is outside the repository: {raw}"))
        })?
    } else {
        candidate
    };

    let mut parts: Vec<String> = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(LoomError::InvalidInput(format!(
                        "path escapes the repository: {raw}"
                    )));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(LoomError::InvalidInput(format!(
                    "path is outside the repository: {raw}"
                )));
            }
        }
    }
    if parts.is_empty() {
        return Err(LoomError::InvalidInput(format!("empty path: {raw:?}")));
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("config.pem", "*.pem"));
        assert!(glob_match("my_secret_file", "*secret*"));
        assert!(glob_match("a.ts", "?.ts"));
        assert!(!glob_match("ab.ts", "?.ts"));
        assert!(!glob_match("main.rs", "*.pem"));
    }

    #[test]
    fn test_discover_respects_ignores_and_sensitive_files() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "src/a.ts", "export const a = 1;");
        write(root, "src/b.py", "x = 1");
        write(root, ".env", "TOKEN=1");
        write(root, "certs/server.pem", "----");
        write(root, "dist/bundle.js", "min");
        write(root, "generated/out.ts", "gen");
        write(root, ".gitignore", "dist/\n");
        write(root, ".loomignore", "generated\n");
        write(root, ".git/HEAD", "ref: refs/heads/main");

        let files = discover_files(root, &EngineConfig::default()).unwrap();
        assert_eq!(files, vec![".gitignore", ".loomignore", "src/a.ts", "src/b.py"]);
    }

    #[test]
    fn test_discover_with_custom_excludes_and_sensitive_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "src/a.ts", "a");
        write(root, "vendor/lib.js", "v");
        write(root, "keys/dev.key", "k");

        let config = EngineConfig {
            exclude_sensitive: false,
            exclude_patterns: vec!["vendor/".to_string()],
            ..EngineConfig::default()
        };
        let files = discover_files(root, &config).unwrap();
        assert_eq!(files, vec!["keys/dev.key", "src/a.ts"]);
    }

    #[test]
    fn test_read_source_file_skips_binary_and_oversized() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "ok.ts", "hello");
        write(root, "big.ts", &"x".repeat(64));
        std::fs::write(root.join("bin.dat"), [0u8, 1, 2]).unwrap();
        std::fs::write(root.join("latin1.txt"), [0xE9u8, 0x41]).unwrap();

        assert_eq!(read_source_file(root, "ok.ts", 32).unwrap().as_deref(), Some("hello"));
        assert_eq!(read_source_file(root, "big.ts", 32).unwrap(), None);
        assert_eq!(read_source_file(root, "bin.dat", 32).unwrap(), None);
        assert_eq!(read_source_file(root, "latin1.txt", 32).unwrap(), None);
        assert_eq!(read_source_file(root, "missing.ts", 32).unwrap(), None);
        // A regular file where a directory is expected is an I/O error, not
        // an absent file.
        assert!(read_source_file(root, "ok.ts/inner.ts", 32).is_err());
    }

    #[test]
    fn test_repo_relative_path() {
        let root = Path::new("/srv/repo");
        assert_eq!(repo_relative_path(root, "src/./a.ts").unwrap(), "src/a.ts");
        assert_eq!(repo_relative_path(root, "/srv/repo/src/a.ts").unwrap(), "src/a.ts");
        assert!(matches!(
            repo_relative_path(root, "../etc/passwd"),
            Err(LoomError::InvalidInput(_))
        ));
        assert!(matches!(
            repo_relative_path(root, "/etc/passwd"),
            Err(LoomError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_is_excluded() {
        let config = EngineConfig::default();
        assert!(is_excluded(".git/config", &config));
        assert!(is_excluded("deploy/.env", &config));
        assert!(!is_excluded("src/git.rs", &config));
        assert!(!is_excluded(".git", &config));
    }
}
