//! Error types for the versioned configuration engine.

use std::path::PathBuf;
use thiserror::Error;

use crate::revision::RevisionId;

/// Failure of a single git invocation.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Failed to run git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Git network error: {0}")]
    Network(String),

    #[error("Git authentication failed: {0}")]
    AuthFailed(String),

    #[error("Git operation timed out after {0}s")]
    Timeout(u64),

    /// The local branch can't be fast-forwarded to the remote one.
    #[error("Git history diverged: {0}")]
    Diverged(String),

    #[error("Git operation failed: {0}")]
    Operation(String),
}

/// A git failure attributed to one configured remote.
#[derive(Error, Debug)]
#[error("remote '{remote}' ({url}): {error}")]
pub struct RemoteFailure {
    /// Remote name inside the checkout (`remote0`, `remote1`, ...).
    pub remote: String,
    /// Credential-free remote URL.
    pub url: String,
    #[source]
    pub error: GitError,
}

/// Errors surfaced by the repository backend and the sync engine.
#[derive(Error, Debug)]
pub enum VersioningError {
    #[error(
        "All configured remotes failed to {operation}; first failure: {first}{}",
        suppressed_suffix(.suppressed)
    )]
    RepositoryUnavailable {
        operation: &'static str,
        #[source]
        first: Box<RemoteFailure>,
        suppressed: Vec<RemoteFailure>,
    },

    #[error("Branch '{branch}' was rewritten upstream and can't be fast-forwarded: {source}")]
    HistoryDiverged {
        branch: String,
        #[source]
        source: Box<RemoteFailure>,
    },

    #[error("Branch '{branch}' has no commits")]
    NoCommits { branch: String },

    #[error("Can't compute changed paths between {old} and {new}: {source}")]
    DiffFailure {
        old: RevisionId,
        new: RevisionId,
        #[source]
        source: GitError,
    },

    #[error("Could not check out branch '{branch}' from config repo, please ensure it exists: {source}")]
    BranchCheckout {
        branch: String,
        #[source]
        source: GitError,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to start config update thread: {0}")]
    PollerStart(#[source] std::io::Error),

    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk checkout '{path}': {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

fn suppressed_suffix(suppressed: &[RemoteFailure]) -> String {
    if suppressed.is_empty() {
        return String::new();
    }
    let rest: Vec<String> = suppressed.iter().map(|f| f.to_string()).collect();
    format!(" (also failed: {})", rest.join("; "))
}

impl VersioningError {
    /// Returns true if a later attempt may succeed without operator action.
    ///
    /// Only remote outages qualify; the next poll cycle retries them from
    /// scratch. Everything else needs a configuration or repository fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VersioningError::RepositoryUnavailable { .. })
    }

    /// Failures from the remotes tried after the first one.
    pub fn suppressed(&self) -> &[RemoteFailure] {
        match self {
            VersioningError::RepositoryUnavailable { suppressed, .. } => suppressed,
            _ => &[],
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VersioningError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Classifies a git stderr string into a more specific error variant.
pub fn classify_git_error(stderr: &str) -> GitError {
    let lower = stderr.to_lowercase();

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("unable to access")
        || lower.contains("failed to connect")
        || lower.contains("couldn't connect to server")
        || lower.contains("the remote end hung up unexpectedly")
    {
        return GitError::Network(stderr.trim().to_string());
    }

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("invalid credentials")
        || lower.contains("could not read username")
        || lower.contains("could not read password")
    {
        return GitError::AuthFailed(stderr.trim().to_string());
    }

    if lower.contains("not possible to fast-forward") || lower.contains("diverging branches") {
        return GitError::Diverged(stderr.trim().to_string());
    }

    GitError::Operation(stderr.trim().to_string())
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, VersioningError>;
