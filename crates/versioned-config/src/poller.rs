//! Periodic update checks.
//!
//! An [`UpdatePoller`] hands the initial configuration to its callback while
//! it is being constructed, then runs [`VersioningService::check_for_update`]
//! on a fixed schedule from one background thread and forwards every update.
//! Failed cycles are logged and the schedule carries on.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::engine::VersioningService;
use crate::error::{Result, VersioningError};
use crate::update::VersionedConfigUpdate;

/// Name of the background thread.
pub const POLLER_THREAD_NAME: &str = "config-update";

type Callback = dyn Fn(&VersionedConfigUpdate) + Send + Sync;

struct Shared {
    service: Arc<dyn VersioningService>,
    callback: Box<Callback>,
    closed: AtomicBool,
    /// Keeps scheduled and manual cycles from overlapping.
    cycle_lock: Mutex<()>,
}

impl Shared {
    fn run_cycle(&self) {
        let _guard = match self.cycle_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Update cycle lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        match self.service.check_for_update() {
            Ok(Some(update)) => self.deliver(&update),
            Ok(None) => {}
            Err(e) if e.is_retryable() => {
                log::error!("Could not check for config update, will retry: {}", e);
            }
            Err(e) => {
                log::error!("Could not reconfigure service! Serious configuration error: {}", e);
            }
        }
    }

    fn deliver(&self, update: &VersionedConfigUpdate) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| (self.callback)(update)));
        if result.is_err() {
            log::error!(
                "Config update callback panicked while handling revision {}",
                update.new_revision_name()
            );
        }
    }
}

/// Drives a [`VersioningService`] on a schedule.
pub struct UpdatePoller {
    shared: Arc<Shared>,
    trigger_tx: Option<broadcast::Sender<()>>,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl UpdatePoller {
    /// Delivers `service.initial_state()` to `callback`, then starts polling
    /// every `interval`.
    ///
    /// With no interval (or a zero one) only the initial delivery happens;
    /// [`UpdatePoller::update`] can still be called by hand.
    pub fn start<F>(
        service: Arc<dyn VersioningService>,
        interval: Option<Duration>,
        callback: F,
    ) -> Result<Self>
    where
        F: Fn(&VersionedConfigUpdate) + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            service,
            callback: Box::new(callback),
            closed: AtomicBool::new(false),
            cycle_lock: Mutex::new(()),
        });

        let initial = shared.service.initial_state()?;
        shared.deliver(&initial);

        let Some(period) = interval.filter(|p| !p.is_zero()) else {
            log::warn!("Config update polling is disabled!");
            return Ok(Self {
                shared,
                trigger_tx: None,
                stop_tx: None,
                handle: Mutex::new(None),
            });
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(VersioningError::PollerStart)?;
        let (trigger_tx, trigger_rx) = broadcast::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);

        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(POLLER_THREAD_NAME.to_string())
            .spawn(move || {
                runtime.block_on(poll_loop(loop_shared, period, trigger_rx, stop_rx));
            })
            .map_err(VersioningError::PollerStart)?;

        log::info!("Polling for config updates every {}s", period.as_secs_f64());

        Ok(Self {
            shared,
            trigger_tx: Some(trigger_tx),
            stop_tx: Some(stop_tx),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Runs one check on the calling thread.
    pub fn update(&self) {
        self.shared.run_cycle();
    }

    /// Asks the background loop to check now.
    ///
    /// Returns false when no loop is running.
    pub fn trigger(&self) -> bool {
        if self.shared.closed.load(Ordering::Acquire) {
            return false;
        }
        self.trigger_tx
            .as_ref()
            .is_some_and(|tx| tx.send(()).is_ok())
    }

    /// Returns true while a background loop is running.
    pub fn is_polling(&self) -> bool {
        !self.shared.closed.load(Ordering::Acquire) && self.lock_handle().is_some()
    }

    /// Stops polling and waits for an in-flight cycle to finish.
    ///
    /// No callback runs after this returns (unless called from the callback
    /// itself, which cannot wait for its own cycle).
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(stop_tx) = &self.stop_tx {
            let _ = stop_tx.send(true);
        }

        let Some(handle) = self.lock_handle().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            log::error!("Config update thread panicked");
        }
    }

    fn lock_handle(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Poller handle lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl Drop for UpdatePoller {
    fn drop(&mut self) {
        self.close();
    }
}

async fn poll_loop(
    shared: Arc<Shared>,
    period: Duration,
    mut trigger_rx: broadcast::Receiver<()>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            received = trigger_rx.recv() => match received {
                Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                    log::info!("Manual config update triggered");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = stop_rx.changed() => break,
        }

        if shared.closed.load(Ordering::Acquire) {
            break;
        }
        shared.run_cycle();
    }

    log::debug!("Config update loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GitError, RemoteFailure};
    use crate::revision::RevisionId;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    /// Service returning scripted outcomes, one per check.
    struct ScriptedService {
        dir: PathBuf,
        script: Mutex<Vec<Result<Option<VersionedConfigUpdate>>>>,
        checks: AtomicUsize,
    }

    impl ScriptedService {
        fn new(mut script: Vec<Result<Option<VersionedConfigUpdate>>>) -> Self {
            script.reverse();
            Self {
                dir: PathBuf::from("/srv/config"),
                script: Mutex::new(script),
                checks: AtomicUsize::new(0),
            }
        }
    }

    impl VersioningService for ScriptedService {
        fn check_for_update(&self) -> Result<Option<VersionedConfigUpdate>> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            self.script.lock().unwrap().pop().unwrap_or(Ok(None))
        }

        fn current_state(&self) -> VersionedConfigUpdate {
            VersionedConfigUpdate::snapshot(&self.dir, RevisionId::zero())
        }

        fn initial_state(&self) -> Result<VersionedConfigUpdate> {
            Ok(VersionedConfigUpdate::new(
                &self.dir,
                vec![PathBuf::from("initial.yaml")],
                None,
                None,
                RevisionId::zero(),
            ))
        }

        fn set_monitored_paths(&self, _paths: Vec<String>) {}

        fn monitored_paths(&self) -> Vec<PathBuf> {
            Vec::new()
        }

        fn checkout_directory(&self) -> &Path {
            &self.dir
        }

        fn latest_revision(&self) -> RevisionId {
            RevisionId::zero()
        }

        fn branch(&self) -> &str {
            "master"
        }

        fn remote_urls(&self) -> Vec<String> {
            Vec::new()
        }

        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn changed(name: &str) -> Result<Option<VersionedConfigUpdate>> {
        Ok(Some(VersionedConfigUpdate::new(
            "/srv/config",
            vec![PathBuf::from(name)],
            None,
            Some(RevisionId::zero()),
            RevisionId::parse(&"b".repeat(40)).unwrap(),
        )))
    }

    fn outage() -> Result<Option<VersionedConfigUpdate>> {
        Err(VersioningError::RepositoryUnavailable {
            operation: "pull",
            first: Box::new(RemoteFailure {
                remote: "remote0".into(),
                url: "https://example.invalid/c.git".into(),
                error: GitError::Network("down".into()),
            }),
            suppressed: Vec::new(),
        })
    }

    fn collector() -> (
        mpsc::Receiver<Vec<PathBuf>>,
        impl Fn(&VersionedConfigUpdate) + Send + Sync + 'static,
    ) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let callback = move |u: &VersionedConfigUpdate| {
            let _ = tx
                .lock()
                .unwrap()
                .send(u.changed_files().iter().cloned().collect());
        };
        (rx, callback)
    }

    #[test]
    fn test_initial_state_delivered_synchronously() {
        let (rx, callback) = collector();
        let service = Arc::new(ScriptedService::new(vec![]));
        let poller = UpdatePoller::start(service.clone(), None, callback).unwrap();

        assert_eq!(rx.try_recv().unwrap(), vec![PathBuf::from("initial.yaml")]);
        assert!(rx.try_recv().is_err());
        assert!(!poller.is_polling());
        assert!(!poller.trigger());
        assert_eq!(service.checks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_manual_update_survives_failures() {
        let (rx, callback) = collector();
        let service = Arc::new(ScriptedService::new(vec![
            outage(),
            Err(VersioningError::Configuration("broken".into())),
            changed("a.yaml"),
        ]));
        let poller = UpdatePoller::start(service, None, callback).unwrap();
        rx.try_recv().unwrap();

        poller.update();
        poller.update();
        poller.update();
        assert_eq!(rx.try_recv().unwrap(), vec![PathBuf::from("a.yaml")]);
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let service = Arc::new(ScriptedService::new(vec![changed("a"), changed("b")]));
        let poller = UpdatePoller::start(service, None, move |_u: &VersionedConfigUpdate| {
            if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                panic!("consumer failed");
            }
        })
        .unwrap();

        poller.update();
        poller.update();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_background_loop_delivers_and_stops() {
        let (rx, callback) = collector();
        let service = Arc::new(ScriptedService::new(vec![outage(), changed("x.yaml")]));
        let poller = UpdatePoller::start(
            service.clone(),
            Some(Duration::from_millis(20)),
            callback,
        )
        .unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();

        let delivered = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(delivered, vec![PathBuf::from("x.yaml")]);
        assert!(poller.is_polling());

        poller.close();
        let checks = service.checks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(service.checks.load(Ordering::SeqCst), checks);
        assert!(!poller.is_polling());
        poller.close();
    }

    #[test]
    fn test_trigger_runs_cycle_before_first_tick() {
        let (rx, callback) = collector();
        let service = Arc::new(ScriptedService::new(vec![changed("now.yaml")]));
        let poller =
            UpdatePoller::start(service, Some(Duration::from_secs(3600)), callback).unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();

        assert!(poller.trigger());
        let delivered = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(delivered, vec![PathBuf::from("now.yaml")]);

        poller.close();
        assert!(!poller.trigger());
    }
}
