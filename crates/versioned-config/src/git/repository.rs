//! Git checkout backed by the `git` command line client.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use walkdir::WalkDir;

use super::auth::build_auth_env;
use super::command::run_git;
use super::parse::{format_git_error, parse_name_status};
use crate::backend::RepositoryBackend;
use crate::config::{Remote, RemoteCredentials, RemoteSpec};
use crate::error::{classify_git_error, GitError, RemoteFailure, Result, VersioningError};
use crate::revision::RevisionId;

/// A checkout of the configuration repository.
///
/// Every configured remote is registered under its generated name
/// (`remote0`, `remote1`, ...) so network operations can fall back from one
/// to the next.
pub struct GitBackend {
    dir: PathBuf,
    remotes: Vec<Remote>,
    branch: String,
    timeout: Option<Duration>,
}

impl GitBackend {
    /// Opens the checkout at `dir`, cloning it first if the directory is
    /// missing or empty.
    ///
    /// An existing checkout is used as-is without contacting any remote.
    pub fn open_or_clone(spec: &RemoteSpec, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| VersioningError::io(&dir, e))?;
        let dir = fs::canonicalize(&dir).map_err(|e| VersioningError::io(&dir, e))?;

        let backend = Self {
            dir,
            remotes: spec.remotes().to_vec(),
            branch: spec.branch().to_string(),
            timeout: spec.timeout(),
        };

        if backend.dir_is_empty()? {
            backend.clone_first_available()?;
        } else {
            if !backend.dir.join(".git").exists() {
                return Err(VersioningError::Configuration(format!(
                    "checkout directory {} is not empty and is not a git checkout",
                    backend.dir.display()
                )));
            }
            log::info!("Reusing existing config checkout at {}", backend.dir.display());
            backend.register_remotes(None);
        }

        Ok(backend)
    }

    /// Remotes in priority order.
    pub fn remotes(&self) -> &[Remote] {
        &self.remotes
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    fn dir_is_empty(&self) -> Result<bool> {
        let mut entries = fs::read_dir(&self.dir).map_err(|e| VersioningError::io(&self.dir, e))?;
        Ok(entries.next().is_none())
    }

    /// Runs git with the environment needed for `credentials`.
    fn git(
        &self,
        args: &[&str],
        credentials: &RemoteCredentials,
    ) -> std::result::Result<Output, GitError> {
        let auth = build_auth_env(credentials)?;
        let output = run_git(&self.dir, args, &auth.env_vars, self.timeout);
        drop(auth);
        output
    }

    /// Like [`Self::git`], but a non-zero exit becomes a classified error.
    fn git_checked(
        &self,
        args: &[&str],
        credentials: &RemoteCredentials,
    ) -> std::result::Result<Output, GitError> {
        let output = self.git(args, credentials)?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(classify_git_error(&format_git_error(&output)))
        }
    }

    fn local_git(&self, args: &[&str]) -> std::result::Result<Output, GitError> {
        self.git_checked(args, &RemoteCredentials::None)
    }

    fn clone_first_available(&self) -> Result<()> {
        let mut failures = Vec::new();

        for (index, remote) in self.remotes.iter().enumerate() {
            let args = [
                "clone",
                "--branch",
                self.branch.as_str(),
                "--origin",
                remote.name(),
                "--",
                remote.url(),
                ".",
            ];

            match self.git_checked(&args, remote.credentials()) {
                Ok(_) => {
                    log::info!(
                        "Cloned config repository from {} into {}",
                        remote.display_name(),
                        self.dir.display()
                    );
                    self.register_remotes(Some(index));
                    return Ok(());
                }
                Err(error) => {
                    log::warn!(
                        "While cloning remote {} ({}): {}; trying next remote",
                        remote.name(),
                        remote.url(),
                        error
                    );
                    failures.push(remote_failure(remote, error));
                    self.clear_checkout()?;
                }
            }
        }

        Err(unavailable("clone", failures))
    }

    /// Removes whatever a failed clone left behind.
    fn clear_checkout(&self) -> Result<()> {
        let entries = fs::read_dir(&self.dir).map_err(|e| VersioningError::io(&self.dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| VersioningError::io(&self.dir, e))?.path();
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.map_err(|e| VersioningError::io(&path, e))?;
        }
        Ok(())
    }

    /// Makes every remote (except `skip`) known to the checkout under its
    /// generated name. Local only; failures just reduce the fallback list.
    fn register_remotes(&self, skip: Option<usize>) {
        for (index, remote) in self.remotes.iter().enumerate() {
            if Some(index) == skip {
                continue;
            }

            let exists = self.local_git(&["remote", "get-url", remote.name()]).is_ok();
            let verb = if exists { "set-url" } else { "add" };
            if let Err(e) = self.local_git(&["remote", verb, remote.name(), remote.url()]) {
                log::warn!(
                    "Could not register remote {} ({}): {}",
                    remote.name(),
                    remote.url(),
                    e
                );
            }
        }
    }

    fn head_if_any(&self) -> Option<RevisionId> {
        self.local_git(&["rev-parse", "--verify", "--quiet", "HEAD^{commit}"])
            .ok()
            .and_then(|output| RevisionId::parse(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl RepositoryBackend for GitBackend {
    fn checkout_dir(&self) -> &Path {
        &self.dir
    }

    fn pull(&self) -> Result<bool> {
        let before = self.head_if_any();
        let mut failures = Vec::new();

        for remote in &self.remotes {
            let args = [
                "pull",
                "--ff-only",
                "--no-rebase",
                "--quiet",
                remote.name(),
                self.branch.as_str(),
            ];

            match self.git_checked(&args, remote.credentials()) {
                Ok(_) => {
                    let after = self.head_if_any();
                    log::debug!("Pulled {} from {}", self.branch, remote.display_name());
                    return Ok(before != after);
                }
                Err(error) => {
                    log::warn!(
                        "While fetching remote {} ({}): {}; trying next remote",
                        remote.name(),
                        remote.url(),
                        error
                    );
                    failures.push(remote_failure(remote, error));
                }
            }
        }

        // A rewritten branch needs a new checkout, not another attempt
        if let Some(pos) = failures
            .iter()
            .position(|f| matches!(f.error, GitError::Diverged(_)))
        {
            return Err(VersioningError::HistoryDiverged {
                branch: self.branch.clone(),
                source: Box::new(failures.swap_remove(pos)),
            });
        }

        Err(unavailable("pull", failures))
    }

    fn current_head(&self) -> Result<RevisionId> {
        self.head_if_any().ok_or_else(|| VersioningError::NoCommits {
            branch: self.branch.clone(),
        })
    }

    fn diff_paths(&self, old: &RevisionId, new: &RevisionId) -> Result<BTreeSet<PathBuf>> {
        let args = [
            "diff",
            "--name-status",
            "--no-renames",
            "-z",
            old.as_str(),
            new.as_str(),
        ];

        self.local_git(&args)
            .map(|output| parse_name_status(&output.stdout))
            .map_err(|source| VersioningError::DiffFailure {
                old: old.clone(),
                new: new.clone(),
                source,
            })
    }

    fn checkout_branch(&self, branch: &str) -> Result<()> {
        let first_error = match self.local_git(&["checkout", "-f", branch]) {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };

        // No local branch yet: create one from the first remote that has it
        for remote in &self.remotes {
            let start_point = format!("{}/{}", remote.name(), branch);
            if self
                .local_git(&["checkout", "-f", "-B", branch, &start_point])
                .is_ok()
            {
                return Ok(());
            }
        }

        Err(VersioningError::BranchCheckout {
            branch: branch.to_string(),
            source: first_error,
        })
    }

    fn list_files(&self) -> Result<BTreeSet<PathBuf>> {
        let mut files = BTreeSet::new();
        let walker = WalkDir::new(&self.dir)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| !(e.depth() == 1 && e.file_name() == ".git"));

        for entry in walker {
            let entry = entry.map_err(|source| VersioningError::Walk {
                path: self.dir.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.dir) {
                files.insert(relative.to_path_buf());
            }
        }

        Ok(files)
    }
}

fn remote_failure(remote: &Remote, error: GitError) -> RemoteFailure {
    RemoteFailure {
        remote: remote.name().to_string(),
        url: remote.url().to_string(),
        error,
    }
}

fn unavailable(operation: &'static str, failures: Vec<RemoteFailure>) -> VersioningError {
    let mut failures = failures.into_iter();
    match failures.next() {
        Some(first) => VersioningError::RepositoryUnavailable {
            operation,
            first: Box::new(first),
            suppressed: failures.collect(),
        },
        None => VersioningError::Configuration("no remotes configured".to_string()),
    }
}
