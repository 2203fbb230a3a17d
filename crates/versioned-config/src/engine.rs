//! Change detection on top of a repository backend.
//!
//! The engine remembers the last revision it reported and, on every check,
//! pulls, compares, and narrows the difference down to the monitored paths.
//! It starts at the zero revision, so the first successful check reports
//! every monitored file present in the checkout.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tempfile::TempDir;

use crate::backend::RepositoryBackend;
use crate::config::RemoteSpec;
use crate::error::{Result, VersioningError};
use crate::git::GitBackend;
use crate::monitored::MonitoredPaths;
use crate::revision::RevisionId;
use crate::update::VersionedConfigUpdate;

/// What consumers of versioned configuration talk to.
pub trait VersioningService: Send + Sync {
    /// Pulls and reports the monitored files changed since the last report.
    ///
    /// `Ok(None)` means nothing relevant changed.
    fn check_for_update(&self) -> Result<Option<VersionedConfigUpdate>>;

    /// Snapshot of the last reported revision with no changed files.
    fn current_state(&self) -> VersionedConfigUpdate;

    /// Everything a consumer should load at startup.
    fn initial_state(&self) -> Result<VersionedConfigUpdate>;

    /// Replaces the runtime-provided monitored paths.
    fn set_monitored_paths(&self, paths: Vec<String>);

    /// Effective monitored set; empty means every file.
    fn monitored_paths(&self) -> Vec<PathBuf>;

    fn checkout_directory(&self) -> &Path;

    fn latest_revision(&self) -> RevisionId;

    fn branch(&self) -> &str;

    /// Credential-free remote URLs in priority order.
    fn remote_urls(&self) -> Vec<String>;

    /// Releases the checkout. Safe to call more than once.
    fn close(&self) -> Result<()>;
}

/// Default [`VersioningService`] implementation.
pub struct SyncEngine<B: RepositoryBackend = GitBackend> {
    backend: B,
    branch: String,
    remote_urls: Vec<String>,
    last_known: RwLock<RevisionId>,
    /// Set once a pull moved the checkout past `last_known`, cleared when
    /// `last_known` catches up.
    pending: AtomicBool,
    monitored: RwLock<MonitoredPaths>,
    /// Serializes checks so two callers never pull or advance concurrently.
    check_lock: Mutex<()>,
    ephemeral: Mutex<Option<TempDir>>,
}

impl SyncEngine<GitBackend> {
    /// Clones (or reuses) the checkout described by `spec` and verifies the
    /// branch has at least one commit.
    ///
    /// Without a configured local repository the checkout lives in a
    /// temporary directory removed by [`VersioningService::close`].
    pub fn initialize<I, S>(spec: &RemoteSpec, fixed_paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let (dir, ephemeral) = match spec.local_repository() {
            Some(path) => (path.to_path_buf(), None),
            None => {
                let tmp = tempfile::Builder::new()
                    .prefix("versioned-config-")
                    .tempdir()
                    .map_err(|e| VersioningError::io(std::env::temp_dir(), e))?;
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };

        let backend = GitBackend::open_or_clone(spec, &dir)?;
        Self::build(backend, spec.branch(), spec.urls(), fixed_paths, ephemeral)
    }
}

impl<B: RepositoryBackend> SyncEngine<B> {
    /// Wraps an already opened backend.
    pub fn with_backend<I, S>(
        backend: B,
        branch: &str,
        remote_urls: Vec<String>,
        fixed_paths: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::build(backend, branch, remote_urls, fixed_paths, None)
    }

    fn build<I, S>(
        backend: B,
        branch: &str,
        remote_urls: Vec<String>,
        fixed_paths: I,
        ephemeral: Option<TempDir>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        backend.checkout_branch(branch)?;
        let head = backend.current_head()?;
        log::info!(
            "Config checkout at {} is on {} ({})",
            backend.checkout_dir().display(),
            branch,
            head.short()
        );

        Ok(Self {
            backend,
            branch: branch.to_string(),
            remote_urls,
            last_known: RwLock::new(RevisionId::zero()),
            pending: AtomicBool::new(false),
            monitored: RwLock::new(MonitoredPaths::new(fixed_paths)),
            check_lock: Mutex::new(()),
            ephemeral: Mutex::new(ephemeral),
        })
    }

    /// Returns a reference to the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns true if the checkout is deleted on close.
    pub fn is_ephemeral(&self) -> bool {
        lock(&self.ephemeral).is_some()
    }

    fn read_revision(&self) -> RwLockReadGuard<'_, RevisionId> {
        match self.last_known.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Revision lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_revision(&self) -> RwLockWriteGuard<'_, RevisionId> {
        match self.last_known.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Revision lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn read_monitored(&self) -> RwLockReadGuard<'_, MonitoredPaths> {
        match self.monitored.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Monitored paths lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn known_files(monitored: &MonitoredPaths) -> Option<Vec<PathBuf>> {
        (!monitored.is_all()).then(|| monitored.effective())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Engine lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl<B: RepositoryBackend> VersioningService for SyncEngine<B> {
    fn check_for_update(&self) -> Result<Option<VersionedConfigUpdate>> {
        let _guard = lock(&self.check_lock);
        let span = tracing::info_span!("config_check", branch = %self.branch);
        let _enter = span.enter();

        let previous = self.latest_revision();
        if self.backend.pull()? {
            self.pending.store(true, Ordering::SeqCst);
        }
        // An earlier pull may have moved the checkout without being reported
        if !self.pending.load(Ordering::SeqCst) && !previous.is_zero() {
            log::debug!("Config repository unchanged at {}", previous.short());
            return Ok(None);
        }

        let head = self.backend.current_head()?;
        if head == previous {
            self.pending.store(false, Ordering::SeqCst);
            return Ok(None);
        }

        let affected = if previous.is_zero() {
            self.backend.list_files()?
        } else {
            self.backend.diff_paths(&previous, &head)?
        };

        let monitored = self.read_monitored().clone();
        let changed = monitored.filter(affected);
        *self.write_revision() = head.clone();
        self.pending.store(false, Ordering::SeqCst);

        if changed.is_empty() {
            log::info!(
                "Config repository moved to {} without touching monitored files",
                head.short()
            );
            return Ok(None);
        }

        log::info!(
            "Config repository moved from {} to {}: {} monitored file(s) changed",
            previous.short(),
            head.short(),
            changed.len()
        );

        Ok(Some(VersionedConfigUpdate::new(
            self.backend.checkout_dir(),
            changed,
            Self::known_files(&monitored),
            Some(previous),
            head,
        )))
    }

    fn current_state(&self) -> VersionedConfigUpdate {
        VersionedConfigUpdate::snapshot(self.backend.checkout_dir(), self.latest_revision())
    }

    fn initial_state(&self) -> Result<VersionedConfigUpdate> {
        let monitored = self.read_monitored().clone();
        let changed = if monitored.fixed().is_empty() {
            self.backend.list_files()?
        } else {
            monitored.fixed().iter().cloned().collect()
        };

        Ok(VersionedConfigUpdate::new(
            self.backend.checkout_dir(),
            changed,
            Self::known_files(&monitored),
            None,
            self.latest_revision(),
        ))
    }

    fn set_monitored_paths(&self, paths: Vec<String>) {
        let mut monitored = match self.monitored.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Monitored paths lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        monitored.set_dynamic(paths);
        log::debug!("Monitoring {} path(s)", monitored.effective().len());
    }

    fn monitored_paths(&self) -> Vec<PathBuf> {
        self.read_monitored().effective()
    }

    fn checkout_directory(&self) -> &Path {
        self.backend.checkout_dir()
    }

    fn latest_revision(&self) -> RevisionId {
        self.read_revision().clone()
    }

    fn branch(&self) -> &str {
        &self.branch
    }

    fn remote_urls(&self) -> Vec<String> {
        self.remote_urls.clone()
    }

    fn close(&self) -> Result<()> {
        // Never delete the checkout under a running check
        let _guard = lock(&self.check_lock);
        let Some(dir) = lock(&self.ephemeral).take() else {
            return Ok(());
        };

        let path = dir.path().to_path_buf();
        dir.close().map_err(|e| VersioningError::io(&path, e))?;
        log::info!("Removed ephemeral config checkout {}", path.display());
        Ok(())
    }
}
