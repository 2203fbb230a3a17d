//! The value handed to consumers when configuration changes.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::revision::RevisionId;

/// Rendered in place of a revision that is not known.
pub const UNKNOWN_REVISION: &str = "<unknown>";

/// One observed transition of the configuration checkout.
///
/// Built once per detected change (or once at startup to mean "load all of
/// this") and never modified afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedConfigUpdate {
    base_path: PathBuf,
    changed_files: BTreeSet<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    all_known_files: Option<Vec<PathBuf>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    old_revision: Option<RevisionId>,
    new_revision: RevisionId,
    detected_at: DateTime<Utc>,
}

impl VersionedConfigUpdate {
    /// Creates an update describing the move from `old_revision` to `new_revision`.
    pub fn new(
        base_path: impl Into<PathBuf>,
        changed_files: impl IntoIterator<Item = PathBuf>,
        all_known_files: Option<Vec<PathBuf>>,
        old_revision: Option<RevisionId>,
        new_revision: RevisionId,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            changed_files: changed_files.into_iter().collect(),
            all_known_files,
            old_revision,
            new_revision,
            detected_at: Utc::now(),
        }
    }

    /// Snapshot of the current revision with nothing marked as changed.
    pub fn snapshot(base_path: impl Into<PathBuf>, revision: RevisionId) -> Self {
        Self::new(base_path, Vec::new(), None, None, revision)
    }

    /// Absolute path of the checkout root.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Checkout-relative paths altered by this update.
    pub fn changed_files(&self) -> &BTreeSet<PathBuf> {
        &self.changed_files
    }

    /// Changed files joined onto the checkout root.
    pub fn absolute_changed_files(&self) -> Vec<PathBuf> {
        self.changed_files
            .iter()
            .map(|p| self.base_path.join(p))
            .collect()
    }

    /// Returns true if `path` (checkout-relative) is among the changed files.
    pub fn is_changed(&self, path: impl AsRef<Path>) -> bool {
        self.changed_files.contains(path.as_ref())
    }

    /// The full monitored set at the time of the update, if one was configured.
    pub fn all_known_files(&self) -> Option<&[PathBuf]> {
        self.all_known_files.as_deref()
    }

    pub fn old_revision(&self) -> Option<&RevisionId> {
        self.old_revision.as_ref()
    }

    pub fn new_revision(&self) -> &RevisionId {
        &self.new_revision
    }

    /// Old revision id, or `<unknown>`.
    pub fn old_revision_name(&self) -> String {
        self.old_revision
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| UNKNOWN_REVISION.to_string())
    }

    /// New revision id, or `<unknown>` for the zero revision.
    pub fn new_revision_name(&self) -> String {
        if self.new_revision.is_zero() {
            UNKNOWN_REVISION.to_string()
        } else {
            self.new_revision.to_string()
        }
    }

    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }
}
