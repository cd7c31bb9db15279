//! Thin, output-bounded wrapper over the `git` CLI.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::errors::{LoomError, LoomResult};

const RECORD_SEP: char = '\u{1e}';
const FIELD_SEP: char = '\u{1f}';

/// A file-level change between two commits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileChange {
    Added(String),
    Modified(String),
    Deleted(String),
}

impl FileChange {
    pub fn path(&self) -> &str {
        match self {
            FileChange::Added(p) | FileChange::Modified(p) | FileChange::Deleted(p) => p,
        }
    }
}

/// One non-merge commit and the files it touched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitRecord {
    pub hash: String,
    /// Committer time, unix seconds.
    pub timestamp: i64,
    pub files: Vec<String>,
}

struct GitOutput {
    stdout: String,
    truncated: bool,
}

/// A git work tree rooted exactly at a repository root.
#[derive(Clone, Debug)]
pub struct GitRepo {
    root: PathBuf,
    max_output_bytes: u64,
}

impl GitRepo {
    /// Open `root` as a git work tree. Returns `None` when `root` is not the
    /// top level of a work tree or `git` is unavailable.
    pub fn open(root: &Path, max_output_bytes: u64) -> Option<GitRepo> {
        let repo = GitRepo {
            root: root.to_path_buf(),
            max_output_bytes,
        };
        let top = repo.run(&["rev-parse", "--show-toplevel"]).ok()?;
        let top = PathBuf::from(top.stdout.trim());
        let same_root = match (top.canonicalize(), root.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if !same_root {
            tracing::debug!(root = %root.display(), "not a git work tree root");
            return None;
        }
        Some(repo)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run(&self, args: &[&str]) -> LoomResult<GitOutput> {
        let mut child = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(["-c", "core.quotepath=off"])
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| LoomError::Git(format!("failed to run git {}: {e}", args.join(" "))))?;

        let mut buf = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            stdout
                .take(self.max_output_bytes.saturating_add(1))
                .read_to_end(&mut buf)?;
        }
        let truncated = buf.len() as u64 > self.max_output_bytes;
        if truncated {
            buf.truncate(self.max_output_bytes as usize);
            let _ = child.kill();
        }
        let output = child.wait_with_output()?;
        if !truncated && !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LoomError::Git(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }
        if truncated {
            tracing::warn!(
                command = args.first().copied().unwrap_or_default(),
                limit = self.max_output_bytes,
                "git output truncated"
            );
        }
        Ok(GitOutput {
            stdout: String::from_utf8_lossy(&buf).into_owned(),
            truncated,
        })
    }

    /// Current HEAD commit, or `None` on an unborn branch.
    pub fn head_commit(&self) -> LoomResult<Option<String>> {
        match self.run(&["rev-parse", "--verify", "--quiet", "HEAD^{commit}"]) {
            Ok(out) => {
                let head = out.stdout.trim();
                Ok((!head.is_empty()).then(|| head.to_string()))
            }
            Err(LoomError::Git(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// URL of the named remote, if configured.
    pub fn remote_url(&self, remote: &str) -> Option<String> {
        let out = self.run(&["remote", "get-url", remote]).ok()?;
        let url = out.stdout.trim();
        (!url.is_empty()).then(|| url.to_string())
    }

    /// Files changed between two commits, renames split into delete + add.
    pub fn diff_name_status(&self, from: &str, to: &str) -> LoomResult<Vec<FileChange>> {
        let out = self.run(&["diff", "--name-status", "--no-renames", from, to, "--"])?;
        if out.truncated {
            return Err(LoomError::Git("diff output exceeded the byte limit".to_string()));
        }
        Ok(parse_name_status(&out.stdout))
    }

    /// Non-merge commits newest first, optionally only those after `since`.
    pub fn log(&self, since: Option<&str>, max_commits: usize) -> LoomResult<Vec<CommitRecord>> {
        let limit = format!("-n{}", max_commits.max(1));
        let format = format!("--format={RECORD_SEP}%H{FIELD_SEP}%ct");
        let range = since.map(|s| format!("{s}..HEAD"));
        let mut args = vec!["log", "--no-merges", "--name-only", format.as_str(), limit.as_str()];
        if let Some(range) = range.as_deref() {
            args.push(range);
        }
        args.push("--");
        let out = self.run(&args)?;
        Ok(parse_log(&out.stdout, out.truncated))
    }
}

/// Parse `git diff --name-status` output.
pub fn parse_name_status(stdout: &str) -> Vec<FileChange> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let status = parts.next()?.trim();
            let path = parts.next()?.trim();
            if path.is_empty() {
                return None;
            }
            let path = path.to_string();
            match status.chars().next()? {
                'A' => Some(FileChange::Added(path)),
                'D' => Some(FileChange::Deleted(path)),
                'M' | 'T' => Some(FileChange::Modified(path)),
                other => {
                    tracing::debug!(status = %other, path = %path, "ignoring diff status");
                    None
                }
            }
        })
        .collect()
}

/// Parse record-separated `git log --name-only` output. A truncated stream
/// drops its last, possibly partial, record.
pub fn parse_log(stdout: &str, truncated: bool) -> Vec<CommitRecord> {
    let mut records: Vec<CommitRecord> = stdout
        .split(RECORD_SEP)
        .filter_map(|record| {
            let mut lines = record.lines();
            let header = lines.next()?;
            let (hash, ts) = header.split_once(FIELD_SEP)?;
            let hash = hash.trim();
            if hash.is_empty() {
                return None;
            }
            let files = lines
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            Some(CommitRecord {
                hash: hash.to_string(),
                timestamp: ts.trim().parse().unwrap_or(0),
                files,
            })
        })
        .collect();
    if truncated {
        records.pop();
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::GitFixture;

    #[test]
    fn test_parse_name_status() {
        let out = "A\tsrc/new.ts\nM\tsrc/a.ts\nD\told.py\nT\tlink\nX\tweird\n";
        assert_eq!(
            parse_name_status(out),
            vec![
                FileChange::Added("src/new.ts".into()),
                FileChange::Modified("src/a.ts".into()),
                FileChange::Deleted("old.py".into()),
                FileChange::Modified("link".into()),
            ]
        );
    }

    #[test]
    fn test_parse_log_records() {
        let out = "\u{1e}abc\u{1f}1700000000\n\nsrc/a.ts\nsrc/b.ts\n\u{1e}def\u{1f}1690000000\n\nREADME.md\n";
        let records = parse_log(out, false);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].hash, "abc");
        assert_eq!(records[0].timestamp, 1_700_000_000);
        assert_eq!(records[0].files, vec!["src/a.ts", "src/b.ts"]);
        assert_eq!(records[1].files, vec!["README.md"]);

        let truncated = parse_log(out, true);
        assert_eq!(truncated.len(), 1);
    }

    #[test]
    fn test_git_repo_head_diff_and_log() {
        let fx = GitFixture::new();
        let git = GitRepo::open(fx.root(), 1 << 20).expect("git work tree");
        assert_eq!(git.head_commit().unwrap(), None);

        fx.write("a.ts", "a");
        fx.write("b.ts", "b");
        let first = fx.commit_all("first");
        fx.write("a.ts", "a2");
        fx.remove("b.ts");
        fx.write("c.ts", "c");
        let second = fx.commit_all("second");

        assert_eq!(git.head_commit().unwrap().as_deref(), Some(second.as_str()));
        let mut changes = git.diff_name_status(&first, &second).unwrap();
        changes.sort_by(|a, b| a.path().cmp(b.path()));
        assert_eq!(
            changes,
            vec![
                FileChange::Modified("a.ts".into()),
                FileChange::Deleted("b.ts".into()),
                FileChange::Added("c.ts".into()),
            ]
        );

        let all = git.log(None, 100).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].hash, second);
        let since = git.log(Some(&first), 100).unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].files, vec!["a.ts", "b.ts", "c.ts"]);
    }

    #[test]
    fn test_open_rejects_plain_directory() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(GitRepo::open(tmp.path(), 1024).is_none());
    }

    #[test]
    fn test_bounded_output_truncates_log() {
        let fx = GitFixture::new();
        for i in 0..5 {
            fx.write(&format!("file_{i}.ts"), "x");
            fx.commit_all(&format!("commit {i}"));
        }
        let git = GitRepo::open(fx.root(), 120).unwrap();
        let records = git.log(None, 100).unwrap();
        assert!(records.len() < 5);
    }
}
