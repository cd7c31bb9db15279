//! Test fixtures: scratch git repositories driven through the `git` CLI.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

pub struct GitFixture {
    dir: TempDir,
    clock: std::cell::Cell<i64>,
}

impl GitFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let fx = GitFixture {
            dir,
            clock: std::cell::Cell::new(now_secs() - 3600),
        };
        fx.git(&["init", "-q"]);
        fx.git(&["config", "user.email", "dev@example.com"]);
        fx.git(&["config", "user.name", "Dev"]);
        fx.git(&["config", "commit.gpgsign", "false"]);
        fx
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .arg("-C")
            .arg(self.root())
            .args(args)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.root().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub fn remove(&self, rel: &str) {
        std::fs::remove_file(self.root().join(rel)).unwrap();
    }

    /// Stage everything and commit; returns the new HEAD. Commit times
    /// advance one second per commit so log order is deterministic.
    pub fn commit_all(&self, message: &str) -> String {
        self.git(&["add", "-A"]);
        let ts = self.clock.get();
        self.clock.set(ts + 1);
        let date = format!("@{ts} +0000");
        let output = Command::new("git")
            .arg("-C")
            .arg(self.root())
            .args(["commit", "-q", "--allow-empty", "-m", message])
            .env("GIT_AUTHOR_DATE", &date)
            .env("GIT_COMMITTER_DATE", &date)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git commit failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        self.git(&["rev-parse", "HEAD"])
    }
}

pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
