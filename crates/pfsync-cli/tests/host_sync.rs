//! Two hosts syncing through one directory remote.

use pfsync_cli::{App, FileLock, StateStore, inspect_blob};
use pfsync_core::{ConflictResolution, SyncOutcome};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

struct Setup {
    remote: TempDir,
    a: TempDir,
    b: TempDir,
}

impl Setup {
    fn new() -> Self {
        Self {
            remote: TempDir::new().unwrap(),
            a: TempDir::new().unwrap(),
            b: TempDir::new().unwrap(),
        }
    }

    fn open(&self, state: &Path, passphrase: Option<&str>) -> App {
        App::open(
            state,
            Some(self.remote.path().to_path_buf()),
            passphrase.map(str::to_string),
        )
        .unwrap()
    }

    fn a(&self) -> App {
        self.open(self.a.path(), None)
    }

    fn b(&self) -> App {
        self.open(self.b.path(), None)
    }

    fn remote_file(&self) -> Vec<u8> {
        std::fs::read(self.remote.path().join("pfsync").join("main")).unwrap()
    }
}

fn title(app: &App, id: &str) -> String {
    app.state().unwrap().tasks[id].title.clone()
}

/// Both hosts share one task, fully synced.
async fn synced_task(setup: &Setup) -> String {
    let id = setup.a().add_task("Draft plan", None).unwrap();
    setup.a().sync().await.unwrap();
    setup.b().sync().await.unwrap();
    id
}

#[tokio::test]
async fn test_push_then_pull() {
    let setup = Setup::new();
    let a = setup.a();
    let id = a.add_task("Buy milk", Some("home".into())).unwrap();

    let outcome = a.sync().await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Pushed { operations: 1, .. }));
    assert!(setup.remote_file().starts_with(b"pf_C_4__"));

    let b = setup.b();
    let outcome = b.sync().await.unwrap();
    assert_eq!(outcome, SyncOutcome::Pulled { operations: 1 });

    let state = b.state().unwrap();
    assert_eq!(state.tasks[&id].title, "Buy milk");
    assert_eq!(state.tasks[&id].project_id.as_deref(), Some("home"));

    // Nothing new on either side
    assert_eq!(a.sync().await.unwrap(), SyncOutcome::UpToDate);
    assert_eq!(b.sync().await.unwrap(), SyncOutcome::UpToDate);
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let setup = Setup::new();
    let id = setup.a().add_task("Persisted", None).unwrap();
    setup.a().complete(&id[..6]).unwrap();

    let reopened = setup.a();
    let task = &reopened.state().unwrap().tasks[&id];
    assert!(task.is_done);

    let status = reopened.status().unwrap();
    assert_eq!(status.entries, 2);
    assert_eq!(status.local_changes, 2);
    assert!(status.meta.last_synced_revision.is_none());
}

#[tokio::test]
async fn test_disjoint_edits_merge() {
    let setup = Setup::new();
    let id = synced_task(&setup).await;

    setup.a().rename(&id, "Draft final plan").unwrap();
    let other = setup.b().add_task("Book venue", None).unwrap();

    setup.a().sync().await.unwrap();
    let outcome = setup.b().sync().await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Pushed { operations: 3, .. }));
    setup.a().sync().await.unwrap();

    for app in [setup.a(), setup.b()] {
        let state = app.state().unwrap();
        assert_eq!(state.tasks[&id].title, "Draft final plan");
        assert!(state.tasks.contains_key(&other));
    }
}

#[tokio::test]
async fn test_conflict_persists_until_resolved_locally() {
    let setup = Setup::new();
    let id = synced_task(&setup).await;

    setup.a().rename(&id, "From A").unwrap();
    setup.b().rename(&id, "From B").unwrap();
    setup.a().sync().await.unwrap();

    let outcome = setup.b().sync().await.unwrap();
    let SyncOutcome::Conflict(conflict) = outcome else {
        panic!("expected a conflict, got {:?}", outcome);
    };
    assert_eq!(conflict.field_diffs.len(), 1);

    // A new process sees the pending conflict and refuses a plain sync
    let b = setup.b();
    assert!(b.status().unwrap().pending.is_some());
    assert!(b.sync().await.is_err());

    let outcome = b.resolve(ConflictResolution::KeepLocal).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Pushed { .. }));
    assert!(b.status().unwrap().pending.is_none());

    setup.a().sync().await.unwrap();
    assert_eq!(title(&setup.a(), &id), "From B");
    assert_eq!(title(&setup.b(), &id), "From B");
}

#[tokio::test]
async fn test_conflict_resolved_with_remote() {
    let setup = Setup::new();
    let id = synced_task(&setup).await;

    setup.a().rename(&id, "From A").unwrap();
    setup.b().rename(&id, "From B").unwrap();
    setup.a().sync().await.unwrap();
    setup.b().sync().await.unwrap();

    setup.b().resolve(ConflictResolution::KeepRemote).await.unwrap();
    assert_eq!(title(&setup.b(), &id), "From A");
    assert!(setup.b().status().unwrap().pending.is_none());
    assert_eq!(setup.b().sync().await.unwrap(), SyncOutcome::UpToDate);
}

#[tokio::test]
async fn test_resolve_without_conflict_fails() {
    let setup = Setup::new();
    assert!(setup.a().resolve(ConflictResolution::KeepLocal).await.is_err());
}

#[tokio::test]
async fn test_encrypted_remote() {
    let setup = Setup::new();
    let a = setup.open(setup.a.path(), Some("hunter2"));
    let id = a.add_task("Secret", None).unwrap();
    a.sync().await.unwrap();

    let blob = setup.remote_file();
    assert!(blob.starts_with(b"pf_CE_4__"));

    let without = inspect_blob(&blob, None).unwrap();
    assert!(without.header.is_encrypted);
    assert!(without.file.is_none());
    assert!(without.error.is_some());

    let with = inspect_blob(&blob, Some("hunter2")).unwrap();
    assert_eq!(with.file.unwrap().ops.len(), 1);

    // No passphrase: the cycle fails and nothing is adopted
    assert!(setup.b().sync().await.is_err());
    assert!(setup.b().state().unwrap().tasks.is_empty());

    let b = setup.open(setup.b.path(), Some("hunter2"));
    b.sync().await.unwrap();
    assert_eq!(title(&b, &id), "Secret");
}

#[tokio::test]
async fn test_sync_without_remote_is_an_error() {
    let state = TempDir::new().unwrap();
    let app = App::open(state.path(), None, None).unwrap();
    app.add_task("Local only", None).unwrap();
    assert!(app.sync().await.is_err());
}

#[tokio::test]
async fn test_init_remembers_remote() {
    let setup = Setup::new();
    let mut app = App::open(setup.a.path(), None, None).unwrap();
    app.set_remote_dir(setup.remote.path().to_path_buf()).unwrap();
    app.add_task("Configured", None).unwrap();

    let reopened = App::open(setup.a.path(), None, None).unwrap();
    assert_eq!(
        reopened.config().remote_dir.as_deref(),
        Some(setup.remote.path())
    );
    assert!(matches!(
        reopened.sync().await.unwrap(),
        SyncOutcome::Pushed { .. }
    ));
}

#[test]
fn test_task_prefix_must_be_unique() {
    let state = TempDir::new().unwrap();
    let app = App::open(state.path(), None, None).unwrap();
    app.add_task("One", None).unwrap();
    app.add_task("Two", None).unwrap();

    // Every id matches the empty prefix
    assert!(app.complete("").is_err());
    assert!(app.rename("no-such-task", "x").is_err());
}

#[test]
fn test_local_write_waits_for_state_lock() {
    let state = TempDir::new().unwrap();
    let app = App::open(state.path(), None, None)
        .unwrap()
        .with_lock_timeout(Duration::from_millis(50));
    app.add_task("Before", None).unwrap();

    // Another invocation is between loading and saving the log
    let lock_path = StateStore::new(state.path()).lock_path();
    let held = FileLock::acquire(&lock_path, Duration::from_secs(1)).unwrap();
    assert!(app.add_task("Blocked", None).is_err());
    assert_eq!(app.state().unwrap().tasks.len(), 1);

    drop(held);
    app.add_task("After", None).unwrap();
    assert_eq!(app.state().unwrap().tasks.len(), 2);
}

#[test]
fn test_concurrent_invocations_keep_every_operation() {
    let state = TempDir::new().unwrap();
    App::open(state.path(), None, None).unwrap();

    let writers: Vec<_> = (0..8)
        .map(|n| {
            let dir = state.path().to_path_buf();
            std::thread::spawn(move || {
                let app = App::open(&dir, None, None).unwrap();
                for i in 0..5 {
                    app.add_task(&format!("writer {} task {}", n, i), None).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let app = App::open(state.path(), None, None).unwrap();
    assert_eq!(app.state().unwrap().tasks.len(), 40);
    assert_eq!(app.status().unwrap().entries, 40);
}

#[tokio::test]
async fn test_operation_recorded_during_sync_survives() {
    let setup = Setup::new();
    synced_task(&setup).await;
    setup.a().add_task("Pending upload", None).unwrap();

    let dir = setup.a.path().to_path_buf();
    let writer = std::thread::spawn(move || {
        let app = App::open(&dir, None, None).unwrap();
        for i in 0..10 {
            app.add_task(&format!("Recorded mid-sync {}", i), None).unwrap();
        }
    });
    setup.a().sync().await.unwrap();
    writer.join().unwrap();

    assert_eq!(setup.a().state().unwrap().tasks.len(), 12);
    setup.a().sync().await.unwrap();
    setup.b().sync().await.unwrap();
    assert_eq!(setup.b().state().unwrap().tasks.len(), 12);
}
