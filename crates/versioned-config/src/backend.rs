//! The narrow interface the sync engine needs from a version-control checkout.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::revision::RevisionId;

/// A local checkout kept in step with one or more remotes.
///
/// Implementations own the checkout directory and the fallback across
/// remotes; callers only see the outcome of the whole remote list.
pub trait RepositoryBackend: Send + Sync {
    /// Root of the working tree.
    fn checkout_dir(&self) -> &Path;

    /// Brings the branch up to date from the first remote that answers.
    ///
    /// Returns true if the branch head moved.
    fn pull(&self) -> Result<bool>;

    /// Commit the branch currently points at.
    fn current_head(&self) -> Result<RevisionId>;

    /// Checkout-relative paths that differ between two revisions.
    fn diff_paths(&self, old: &RevisionId, new: &RevisionId) -> Result<BTreeSet<PathBuf>>;

    /// Forces the working tree onto `branch`.
    fn checkout_branch(&self, branch: &str) -> Result<()>;

    /// Every file in the working tree, relative to the root.
    fn list_files(&self) -> Result<BTreeSet<PathBuf>>;
}
