//! The set of repository paths whose changes are reported.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

/// Normalizes a repository-relative path.
///
/// Backslashes become separators, leading `/` and `./` are dropped, `.`
/// components are removed. Returns `None` for empty paths and paths that
/// climb out of the checkout with `..`.
pub fn normalize_path(raw: &str) -> Option<PathBuf> {
    let unified = raw.trim().replace('\\', "/");
    let mut normalized = PathBuf::new();

    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }

    if normalized.as_os_str().is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Paths of interest, split into a fixed part and a replaceable part.
///
/// The fixed part comes from configuration and can never be removed; the
/// dynamic part is swapped wholesale by [`MonitoredPaths::set_dynamic`].
/// An entry matches a file when it names the file itself or one of its
/// parent directories. An empty set matches every file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitoredPaths {
    fixed: Vec<PathBuf>,
    dynamic: Vec<PathBuf>,
}

impl MonitoredPaths {
    /// Creates the set from configured paths; invalid entries are skipped.
    pub fn new<I, S>(fixed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            fixed: normalize_all(fixed),
            dynamic: Vec::new(),
        }
    }

    /// Replaces the dynamic subset. Fixed paths stay monitored.
    pub fn set_dynamic<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.dynamic = normalize_all(paths);
    }

    /// Configured paths, in configuration order.
    pub fn fixed(&self) -> &[PathBuf] {
        &self.fixed
    }

    /// Effective set: fixed paths first, then dynamic ones, without repeats.
    pub fn effective(&self) -> Vec<PathBuf> {
        let mut seen = BTreeSet::new();
        self.fixed
            .iter()
            .chain(self.dynamic.iter())
            .filter(|p| seen.insert(p.as_path()))
            .cloned()
            .collect()
    }

    /// Returns true when nothing is configured, meaning every file counts.
    pub fn is_all(&self) -> bool {
        self.fixed.is_empty() && self.dynamic.is_empty()
    }

    /// Returns true if a change to `path` should be reported.
    pub fn matches(&self, path: &Path) -> bool {
        self.is_all()
            || self
                .fixed
                .iter()
                .chain(self.dynamic.iter())
                .any(|m| path.starts_with(m))
    }

    /// Keeps only the monitored entries of `affected`.
    pub fn filter(&self, affected: BTreeSet<PathBuf>) -> BTreeSet<PathBuf> {
        affected.into_iter().filter(|p| self.matches(p)).collect()
    }
}

fn normalize_all<I, S>(paths: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<PathBuf> = Vec::new();
    for raw in paths {
        let raw = raw.as_ref();
        match normalize_path(raw) {
            Some(path) if !out.contains(&path) => out.push(path),
            Some(_) => {}
            None => log::warn!("Ignoring invalid monitored path '{}'", raw),
        }
    }
    out
}
