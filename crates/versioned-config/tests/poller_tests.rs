//! Update poller driving a real engine.

mod common;

use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use common::{checkout_in, paths, persistent_spec, UpstreamRepo};
use versioned_config::{
    SyncEngine, UpdatePoller, VersionedConfigUpdate, VersioningService,
};

const WAIT: Duration = Duration::from_secs(10);

fn channel_callback() -> (
    mpsc::Receiver<VersionedConfigUpdate>,
    impl Fn(&VersionedConfigUpdate) + Send + Sync + 'static,
) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    (rx, move |update: &VersionedConfigUpdate| {
        let _ = tx.lock().unwrap().send(update.clone());
    })
}

#[test]
fn test_poller_delivers_initial_state_then_changes() {
    let upstream = UpstreamRepo::with_files(&[("app.yaml", "1"), ("db.yaml", "1")]);
    let scratch = TempDir::new().unwrap();
    let engine = Arc::new(
        SyncEngine::initialize(&persistent_spec(&upstream, &checkout_in(&scratch)), ["app.yaml"])
            .unwrap(),
    );

    let (rx, callback) = channel_callback();
    let poller =
        UpdatePoller::start(engine.clone(), Some(Duration::from_millis(50)), callback).unwrap();

    // Initial state arrives before start returns
    let initial = rx.try_recv().unwrap();
    assert_eq!(initial.changed_files().iter().cloned().collect::<Vec<_>>(), paths(&["app.yaml"]));
    assert!(initial.old_revision().is_none());

    // First scheduled check observes the checkout from zero
    let first = rx.recv_timeout(WAIT).unwrap();
    assert!(first.old_revision().unwrap().is_zero());
    assert!(first.is_changed("app.yaml"));

    upstream.edit_file("db.yaml", "2");
    upstream.commit("unmonitored");
    upstream.edit_file("app.yaml", "2");
    let head = upstream.commit("monitored");

    let update = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(update.new_revision(), &head);
    assert_eq!(update.changed_files().len(), 1);
    assert!(update.is_changed("app.yaml"));

    poller.close();
    engine.close().unwrap();
}

#[test]
fn test_poller_keeps_running_after_failed_cycle() {
    let upstream = UpstreamRepo::with_files(&[("app.yaml", "1")]);
    let scratch = TempDir::new().unwrap();
    let engine = Arc::new(
        SyncEngine::initialize(
            &persistent_spec(&upstream, &checkout_in(&scratch)),
            Vec::<String>::new(),
        )
        .unwrap(),
    );
    engine.check_for_update().unwrap();

    // Break the remote, let a few cycles fail, then repair it
    let hidden = upstream.path().with_extension("hidden");
    std::fs::rename(upstream.path(), &hidden).unwrap();

    let (rx, callback) = channel_callback();
    let poller =
        UpdatePoller::start(engine.clone(), Some(Duration::from_millis(30)), callback).unwrap();
    rx.try_recv().unwrap();

    std::thread::sleep(Duration::from_millis(200));
    assert!(rx.try_recv().is_err());
    std::fs::rename(&hidden, upstream.path()).unwrap();

    upstream.edit_file("app.yaml", "2");
    let head = upstream.commit("after outage");
    let update = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(update.new_revision(), &head);

    poller.close();
}

#[test]
fn test_manual_update_without_polling() {
    let upstream = UpstreamRepo::with_files(&[("app.yaml", "1")]);
    let scratch = TempDir::new().unwrap();
    let engine = Arc::new(
        SyncEngine::initialize(
            &persistent_spec(&upstream, &checkout_in(&scratch)),
            Vec::<String>::new(),
        )
        .unwrap(),
    );

    let (rx, callback) = channel_callback();
    let poller = UpdatePoller::start(engine.clone(), None, callback).unwrap();
    let initial = rx.try_recv().unwrap();
    assert!(initial.is_changed("app.yaml"));
    assert!(!poller.is_polling());

    poller.update();
    let first = rx.try_recv().unwrap();
    assert_eq!(first.new_revision(), &upstream.head());

    poller.update();
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_trigger_and_close() {
    let upstream = UpstreamRepo::with_files(&[("app.yaml", "1")]);
    let scratch = TempDir::new().unwrap();
    let engine = Arc::new(
        SyncEngine::initialize(
            &persistent_spec(&upstream, &checkout_in(&scratch)),
            Vec::<String>::new(),
        )
        .unwrap(),
    );

    let (rx, callback) = channel_callback();
    let poller =
        UpdatePoller::start(engine.clone(), Some(Duration::from_secs(3600)), callback).unwrap();
    rx.try_recv().unwrap();

    assert!(poller.trigger());
    let update = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(
        update.changed_files().iter().cloned().collect::<Vec<PathBuf>>(),
        paths(&["app.yaml"])
    );

    poller.close();
    assert!(!poller.trigger());

    upstream.edit_file("app.yaml", "2");
    upstream.commit("after close");
    poller.update();
    assert!(rx.try_recv().is_err());
}
