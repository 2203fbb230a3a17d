//! Shared test utilities for versioned-config integration tests.
//!
//! Provides `UpstreamRepo`, a throwaway git repository standing in for the
//! remote configuration repository, plus a few helpers for building specs.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

use versioned_config::{RemoteSpec, RevisionId};

/// Runs git in `dir` and returns trimmed stdout, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args([
            "-c",
            "user.email=tests@localhost",
            "-c",
            "user.name=Config Tests",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .env("LC_ALL", "C")
        .output()
        .expect("Failed to run git");

    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A local repository acting as the remote, on branch `master`.
pub struct UpstreamRepo {
    dir: TempDir,
}

impl UpstreamRepo {
    /// Creates an empty repository (no commits yet).
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        git(dir.path(), &["init", "-q"]);
        git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/master"]);
        Self { dir }
    }

    /// Creates a repository with one commit holding `files`.
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let repo = Self::new();
        for (path, content) in files {
            repo.edit_file(path, content);
        }
        repo.commit("initial");
        repo
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// URL the engine clones from.
    pub fn url(&self) -> String {
        self.dir.path().display().to_string()
    }

    /// Writes `content` to `path`, creating parent directories.
    pub fn edit_file(&self, path: &str, content: &str) -> &Self {
        let full = self.dir.path().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        fs::write(&full, content).expect("Failed to write file");
        self
    }

    /// Appends `content` to `path`.
    pub fn append_file(&self, path: &str, content: &str) -> &Self {
        let full = self.dir.path().join(path);
        let mut existing = fs::read_to_string(&full).unwrap_or_default();
        existing.push_str(content);
        fs::write(&full, existing).expect("Failed to append to file");
        self
    }

    pub fn remove_file(&self, path: &str) -> &Self {
        fs::remove_file(self.dir.path().join(path)).expect("Failed to remove file");
        self
    }

    /// Commits everything in the working tree and returns the new head.
    pub fn commit(&self, message: &str) -> RevisionId {
        git(self.path(), &["add", "-A"]);
        git(self.path(), &["commit", "-q", "--allow-empty", "-m", message]);
        self.head()
    }

    pub fn head(&self) -> RevisionId {
        RevisionId::parse(&git(self.path(), &["rev-parse", "HEAD"])).expect("Invalid head")
    }

    /// Moves the branch back to `revision`, discarding later commits.
    pub fn reset_to(&self, revision: &RevisionId) {
        git(self.path(), &["reset", "-q", "--hard", revision.as_str()]);
    }

    /// Creates `branch` at the current head without switching to it.
    pub fn create_branch(&self, branch: &str) {
        git(self.path(), &["branch", branch]);
    }
}

/// Spec tracking `master` of `upstream`, checked out under `checkout`.
pub fn persistent_spec(upstream: &UpstreamRepo, checkout: &Path) -> RemoteSpec {
    RemoteSpec::new([upstream.url()], "master")
        .expect("Invalid spec")
        .with_local_repository(checkout)
}

/// Checkout location inside a scratch directory; not created yet.
pub fn checkout_in(scratch: &TempDir) -> PathBuf {
    scratch.path().join("checkout")
}

pub fn paths(items: &[&str]) -> Vec<PathBuf> {
    items.iter().map(PathBuf::from).collect()
}
