//! End-to-end sync cycles between clients sharing an in-memory remote.

use pfsync_core::model::{Project, Task, TaskPatch};
use pfsync_core::remote::RemoteCall;
use pfsync_core::{
    AppState, CURRENT_SCHEMA_VERSION, ClientId, ConflictResolution, ErrorKind, EventBus,
    InMemoryRemote, LocalSyncMeta, MigrationRegistry, OpId, OpKind, Operation, OperationLog,
    RawOperation, RemoteError, RemoteStore, RemoteSyncFile, StateSnapshot, SyncConfig,
    SyncContext, SyncError, SyncEvent, SyncFileCodec, SyncOrchestrator, SyncOutcome, SyncState,
    decode_prefix,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Client = SyncOrchestrator<Arc<InMemoryRemote>>;

const ARTIFACT: &str = "pfsync/main";

fn client_with(remote: &Arc<InMemoryRemote>, id: u64, config: SyncConfig) -> Client {
    SyncOrchestrator::new(
        SyncContext::default(),
        Arc::clone(remote),
        config,
        Arc::new(EventBus::new()),
        ClientId::from(id),
    )
    .unwrap()
}

fn client(remote: &Arc<InMemoryRemote>, id: u64) -> Client {
    client_with(remote, id, SyncConfig::default())
}

fn append(client: &Client, ts: u64, kind: OpKind) {
    client
        .context()
        .append(Operation::new(client.client_id(), ts, kind));
}

fn add_task(client: &Client, ts: u64, id: &str, title: &str) {
    append(
        client,
        ts,
        OpKind::TaskAdd {
            task: Task {
                id: id.into(),
                title: title.into(),
                ..Task::default()
            },
        },
    );
}

fn update_task(client: &Client, ts: u64, id: &str, changes: TaskPatch) {
    append(
        client,
        ts,
        OpKind::TaskUpdate {
            id: id.into(),
            changes,
        },
    );
}

fn rename(client: &Client, ts: u64, id: &str, title: &str) {
    update_task(
        client,
        ts,
        id,
        TaskPatch {
            title: Some(title.into()),
            ..TaskPatch::default()
        },
    );
}

fn complete(client: &Client, ts: u64, id: &str) {
    update_task(
        client,
        ts,
        id,
        TaskPatch {
            is_done: Some(true),
            ..TaskPatch::default()
        },
    );
}

fn state(client: &Client) -> AppState {
    client.materialized_state().unwrap()
}

fn remote_file(remote: &InMemoryRemote, codec: &SyncFileCodec) -> RemoteSyncFile {
    let blob = remote.peek(ARTIFACT).expect("remote file exists");
    RemoteSyncFile::decode(codec, &blob.data).unwrap().1
}

/// Two clients that both hold task t1, fully synced.
async fn synced_pair(remote: &Arc<InMemoryRemote>) -> (Client, Client) {
    let a = client(remote, 0xa);
    let b = client(remote, 0xb);
    add_task(&a, 1, "t1", "Draft");
    a.sync().await.unwrap();
    assert!(matches!(b.sync().await.unwrap(), SyncOutcome::Pulled { operations: 1 }));
    (a, b)
}

#[tokio::test]
async fn test_second_client_pulls_first_clients_work() {
    let remote = Arc::new(InMemoryRemote::new());
    let (a, b) = synced_pair(&remote).await;

    assert_eq!(state(&b), state(&a));
    assert_eq!(state(&b).tasks["t1"].title, "Draft");
    assert_eq!(b.current_state(), SyncState::UpToDate);
    assert_eq!(b.sync().await.unwrap(), SyncOutcome::UpToDate);
}

#[tokio::test]
async fn test_disjoint_edits_merge_without_conflict() {
    let remote = Arc::new(InMemoryRemote::new());
    let (a, b) = synced_pair(&remote).await;

    rename(&a, 10, "t1", "Renamed by A");
    complete(&b, 11, "t1");

    assert!(matches!(a.sync().await.unwrap(), SyncOutcome::Pushed { .. }));
    assert!(matches!(
        b.sync().await.unwrap(),
        SyncOutcome::Pushed { operations: 3, .. }
    ));
    assert!(matches!(a.sync().await.unwrap(), SyncOutcome::Pulled { operations: 1 }));

    let merged = state(&a);
    assert_eq!(merged, state(&b));
    assert_eq!(merged.tasks["t1"].title, "Renamed by A");
    assert!(merged.tasks["t1"].is_done);
}

#[tokio::test]
async fn test_same_field_edits_stop_for_resolution() {
    let remote = Arc::new(InMemoryRemote::new());
    let (a, b) = synced_pair(&remote).await;

    rename(&a, 10, "t1", "From A");
    rename(&b, 11, "t1", "From B");
    a.sync().await.unwrap();
    let remote_before = remote.peek(ARTIFACT).unwrap().revision;

    let SyncOutcome::Conflict(descriptor) = b.sync().await.unwrap() else {
        panic!("expected conflict");
    };
    assert_eq!(descriptor.ancestor_len, 1);
    assert_eq!(descriptor.field_diffs.len(), 1);
    assert_eq!(descriptor.field_diffs[0].field, "title");
    assert_eq!(descriptor.field_diffs[0].local_value, "From B");
    assert_eq!(descriptor.field_diffs[0].remote_value, "From A");

    assert!(matches!(b.current_state(), SyncState::ConflictPending(_)));
    assert_eq!(b.pending_conflict(), Some(descriptor));
    // No silent overwrite in either direction
    assert_eq!(remote.peek(ARTIFACT).unwrap().revision, remote_before);
    assert_eq!(state(&b).tasks["t1"].title, "From B");
}

#[tokio::test]
async fn test_keep_local_resolution_publishes_local_state() {
    let remote = Arc::new(InMemoryRemote::new());
    let (a, b) = synced_pair(&remote).await;
    rename(&a, 10, "t1", "From A");
    rename(&b, 11, "t1", "From B");
    a.sync().await.unwrap();
    b.sync().await.unwrap();

    let outcome = b.resolve_conflict(ConflictResolution::KeepLocal).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Pushed { .. }));
    assert_eq!(b.pending_conflict(), None);
    assert_eq!(b.current_state(), SyncState::UpToDate);

    a.sync().await.unwrap();
    assert_eq!(state(&a).tasks["t1"].title, "From B");
    assert_eq!(state(&a), state(&b));
}

#[tokio::test]
async fn test_keep_remote_resolution_adopts_remote_state() {
    let remote = Arc::new(InMemoryRemote::new());
    let (a, b) = synced_pair(&remote).await;
    rename(&a, 10, "t1", "From A");
    rename(&b, 11, "t1", "From B");
    a.sync().await.unwrap();
    b.sync().await.unwrap();

    let outcome = b.resolve_conflict(ConflictResolution::KeepRemote).await.unwrap();
    assert_eq!(outcome, SyncOutcome::UpToDate);
    assert_eq!(state(&b).tasks["t1"].title, "From A");
    assert_eq!(a.sync().await.unwrap(), SyncOutcome::UpToDate);
}

#[tokio::test]
async fn test_manual_resolution_uploads_given_state() {
    let remote = Arc::new(InMemoryRemote::new());
    let (a, b) = synced_pair(&remote).await;
    rename(&a, 10, "t1", "From A");
    rename(&b, 11, "t1", "From B");
    a.sync().await.unwrap();
    b.sync().await.unwrap();

    let mut chosen = state(&b);
    chosen.tasks.get_mut("t1").unwrap().title = "Both".into();
    b.resolve_conflict(ConflictResolution::Manual(chosen.clone()))
        .await
        .unwrap();

    a.sync().await.unwrap();
    assert_eq!(state(&a), chosen);
}

/// A schema v2 history: a list, a task in it, and a reminder change that
/// has no counterpart in later schemas.
fn legacy_v2_ops() -> Vec<RawOperation> {
    vec![
        RawOperation {
            id: OpId::from("op-1"),
            client_id: ClientId::from(0x2),
            timestamp: 1,
            schema_version: 2,
            op_type: "list_add".into(),
            payload: json!({ "list": { "id": "l1", "title": "Inbox" } }),
        },
        RawOperation {
            id: OpId::from("op-2"),
            client_id: ClientId::from(0x2),
            timestamp: 2,
            schema_version: 2,
            op_type: "task_add".into(),
            payload: json!({ "task": {
                "id": "t1", "title": "Legacy", "list_id": "l1",
                "time_estimate_ms": 60000, "done": true, "reminder_id": "r1"
            } }),
        },
        RawOperation {
            id: OpId::from("op-3"),
            client_id: ClientId::from(0x2),
            timestamp: 3,
            schema_version: 2,
            op_type: "task_set_reminder".into(),
            payload: json!({ "id": "t1", "reminder_id": "r2" }),
        },
    ]
}

#[tokio::test]
async fn test_v2_remote_file_is_migrated_and_rewritten_at_current_version() {
    let remote = Arc::new(InMemoryRemote::new());
    let v2_ops = legacy_v2_ops();
    let v2_file = RemoteSyncFile {
        snapshot: StateSnapshot {
            schema_version: 2,
            data: json!({
                "lists": { "l1": { "id": "l1", "title": "Inbox" } },
                "tasks": { "t1": {
                    "id": "t1", "title": "Legacy", "list_id": "l1",
                    "time_estimate_ms": 60000, "done": true, "reminder_id": "r2"
                } }
            }),
        },
        ops: v2_ops,
        client_id: ClientId::from(0x2),
        written_at: 0,
    };
    let blob = v2_file.encode(&SyncFileCodec::plain()).unwrap();
    assert!(blob.starts_with("pf__2__"));
    remote.put(ARTIFACT, blob.as_bytes(), None).await.unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let bus = Arc::new(EventBus::new());
    let events_clone = Arc::clone(&events);
    let _sub = bus.subscribe(move |event| events_clone.lock().unwrap().push(event));
    let c = SyncOrchestrator::new(
        SyncContext::default(),
        Arc::clone(&remote),
        SyncConfig::default(),
        bus,
        ClientId::from(0xc),
    )
    .unwrap();

    assert!(matches!(c.sync().await.unwrap(), SyncOutcome::Pushed { operations: 2, .. }));

    let local = state(&c);
    assert_eq!(
        local.projects["l1"],
        Project {
            id: "l1".into(),
            title: "Inbox".into(),
            is_archived: false
        }
    );
    let task = &local.tasks["t1"];
    assert_eq!(task.project_id.as_deref(), Some("l1"));
    assert!(task.is_done);
    assert_eq!(task.time_estimate_ms, 60_000);

    let blob = remote.peek(ARTIFACT).unwrap();
    let text = std::str::from_utf8(&blob.data).unwrap();
    assert_eq!(decode_prefix(text).unwrap().header.model_version, 4);
    let rewritten = remote_file(&remote, &SyncFileCodec::new(true, None));
    assert_eq!(rewritten.snapshot.schema_version, 4);
    assert!(rewritten.ops.iter().all(|op| op.schema_version == 4));
    assert_eq!(rewritten.ops[0].op_type, "project_add");

    assert!(events.lock().unwrap().contains(&SyncEvent::Migrated {
        artifact: ARTIFACT.into(),
        from_version: 2,
        to_version: 4,
        operations: 2
    }));
}

/// Remote file as written by a client that already upgraded `legacy_v2_ops`,
/// plus `extra` operations on top.
fn upgraded_remote_file(extra: Vec<RawOperation>) -> RemoteSyncFile {
    let registry = MigrationRegistry::builtin();
    let mut ops = registry.migrate_operations(legacy_v2_ops()).unwrap();
    ops.extend(extra);
    let mut state = AppState::default();
    for op in &ops {
        state.apply(&op.to_operation().unwrap().kind);
    }
    RemoteSyncFile {
        snapshot: state.to_snapshot(CURRENT_SCHEMA_VERSION),
        ops,
        client_id: ClientId::from(0x4),
        written_at: 0,
    }
}

fn legacy_client(remote: &Arc<InMemoryRemote>) -> Client {
    let mut log = OperationLog::new();
    log.replace_entries(legacy_v2_ops());
    SyncOrchestrator::new(
        SyncContext::new(log, LocalSyncMeta::default()),
        Arc::clone(remote),
        SyncConfig::default(),
        Arc::new(EventBus::new()),
        ClientId::from(0x2),
    )
    .unwrap()
}

#[tokio::test]
async fn test_v2_local_log_pulls_v4_remote() {
    let remote = Arc::new(InMemoryRemote::new());
    let rename = Operation::new(
        ClientId::from(0x4),
        10,
        OpKind::TaskUpdate {
            id: "t1".into(),
            changes: TaskPatch {
                title: Some("Renamed after upgrade".into()),
                ..TaskPatch::default()
            },
        },
    )
    .into_raw(CURRENT_SCHEMA_VERSION);
    let file = upgraded_remote_file(vec![rename]);
    let blob = file.encode(&SyncFileCodec::plain()).unwrap();
    remote.put(ARTIFACT, blob.as_bytes(), None).await.unwrap();

    let c = legacy_client(&remote);
    assert_eq!(c.sync().await.unwrap(), SyncOutcome::Pulled { operations: 1 });

    let log = c.context().log_snapshot();
    assert_eq!(log.len(), 3);
    assert!(log.entries().iter().all(|op| op.schema_version == CURRENT_SCHEMA_VERSION));
    assert!(log.entries().iter().all(|op| op.op_type != "task_set_reminder"));
    assert_eq!(log.op_ids(), file.ops.iter().map(|op| op.id.clone()).collect::<Vec<_>>());

    let local = state(&c);
    assert_eq!(local, AppState::from_snapshot(&file.snapshot).unwrap());
    assert_eq!(local.tasks["t1"].title, "Renamed after upgrade");
    assert_eq!(local.tasks["t1"].project_id.as_deref(), Some("l1"));

    assert_eq!(c.sync().await.unwrap(), SyncOutcome::UpToDate);
}

#[tokio::test]
async fn test_v2_local_log_matching_v4_remote_is_upgraded_in_place() {
    let remote = Arc::new(InMemoryRemote::new());
    let file = upgraded_remote_file(vec![]);
    let blob = file.encode(&SyncFileCodec::plain()).unwrap();
    let revision = remote.put(ARTIFACT, blob.as_bytes(), None).await.unwrap();

    let c = legacy_client(&remote);
    assert_eq!(c.sync().await.unwrap(), SyncOutcome::UpToDate);

    let log = c.context().log_snapshot();
    assert_eq!(log.len(), 2);
    assert!(log.entries().iter().all(|op| op.schema_version == CURRENT_SCHEMA_VERSION));
    assert_eq!(state(&c), AppState::from_snapshot(&file.snapshot).unwrap());
    // Nothing to publish: the remote file is untouched
    assert_eq!(remote.peek(ARTIFACT).unwrap().revision, revision);
    assert_eq!(c.context().meta_snapshot().last_synced_revision, Some(revision));
}

#[tokio::test]
async fn test_remote_from_newer_build_is_rejected() {
    let remote = Arc::new(InMemoryRemote::new());
    let future_file = RemoteSyncFile {
        snapshot: StateSnapshot {
            schema_version: 5,
            data: json!({}),
        },
        ops: vec![],
        client_id: ClientId::from(0x5),
        written_at: 0,
    };
    let blob = future_file.encode(&SyncFileCodec::plain()).unwrap();
    remote.put(ARTIFACT, blob.as_bytes(), None).await.unwrap();

    let c = client(&remote, 0xc);
    let err = c.sync().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Version);
    assert!(matches!(c.current_state(), SyncState::Error(_)));
}

#[tokio::test]
async fn test_corrupt_remote_file_is_reported() {
    let remote = Arc::new(InMemoryRemote::new());
    remote
        .put(ARTIFACT, b"{\"not\":\"prefixed\"}", None)
        .await
        .unwrap();

    let c = client(&remote, 0xc);
    assert_eq!(c.sync().await.unwrap_err().kind(), ErrorKind::Corrupt);
}

#[tokio::test]
async fn test_encrypted_sync_requires_passphrase() {
    let remote = Arc::new(InMemoryRemote::new());
    let secret = SyncConfig {
        passphrase: Some("correct horse".into()),
        ..SyncConfig::default()
    };
    let a = client_with(&remote, 0xa, secret.clone());
    add_task(&a, 1, "t1", "Private");
    a.sync().await.unwrap();
    assert!(remote.peek(ARTIFACT).unwrap().data.starts_with(b"pf_CE_4__"));

    let without_key = client(&remote, 0xb);
    assert!(matches!(
        without_key.sync().await,
        Err(SyncError::File(_))
    ));

    let with_key = client_with(&remote, 0xc, secret);
    with_key.sync().await.unwrap();
    assert_eq!(state(&with_key).tasks["t1"].title, "Private");
}

#[tokio::test]
async fn test_transient_operations_never_reach_the_remote() {
    let remote = Arc::new(InMemoryRemote::new());
    let a = client(&remote, 0xa);
    append(&a, 1, OpKind::ToggleSideNav);
    add_task(&a, 2, "t1", "Real");
    append(&a, 3, OpKind::SetCurrentTask { id: Some("t1".into()) });
    a.sync().await.unwrap();

    let file = remote_file(&remote, &SyncFileCodec::new(true, None));
    assert_eq!(file.ops.len(), 1);
    assert_eq!(file.ops[0].op_type, "task_add");
}

#[tokio::test]
async fn test_unknown_remote_operations_are_kept_but_skipped() {
    let remote = Arc::new(InMemoryRemote::new());
    let a = client(&remote, 0xa);
    add_task(&a, 1, "t1", "Known");
    a.sync().await.unwrap();

    // A newer build at the same schema version added an operation type
    let mut file = remote_file(&remote, &SyncFileCodec::new(true, None));
    file.ops.push(RawOperation {
        id: OpId::from("alien"),
        client_id: ClientId::from(0xf),
        timestamp: 9,
        schema_version: 4,
        op_type: "task_archive".into(),
        payload: json!({ "id": "t1" }),
    });
    let revision = remote.peek(ARTIFACT).unwrap().revision;
    let blob = file.encode(&SyncFileCodec::new(true, None)).unwrap();
    remote.put(ARTIFACT, blob.as_bytes(), Some(&revision)).await.unwrap();

    let b = client(&remote, 0xb);
    b.sync().await.unwrap();
    assert_eq!(state(&b).tasks["t1"].title, "Known");
    // The unknown entry is forwarded, not discarded
    assert_eq!(b.context().log_snapshot().len(), 2);

    // After a restart the state cache is gone and replay has to skip it
    let persisted: OperationLog =
        serde_json::from_str(&serde_json::to_string(&b.context().log_snapshot()).unwrap())
            .unwrap();
    let skipped = Arc::new(Mutex::new(Vec::new()));
    let bus = Arc::new(EventBus::new());
    let skipped_clone = Arc::clone(&skipped);
    let _sub = bus.subscribe(move |event| {
        if let SyncEvent::OperationSkipped { op_id, .. } = event {
            skipped_clone.lock().unwrap().push(op_id);
        }
    });
    let restarted = SyncOrchestrator::new(
        SyncContext::new(persisted, b.context().meta_snapshot()),
        Arc::clone(&remote),
        SyncConfig::default(),
        bus,
        ClientId::from(0xb),
    )
    .unwrap();

    assert_eq!(state(&restarted).tasks["t1"].title, "Known");
    assert_eq!(*skipped.lock().unwrap(), vec!["alien".to_string()]);
    assert_eq!(restarted.sync().await.unwrap(), SyncOutcome::UpToDate);
}

#[tokio::test]
async fn test_concurrent_sync_of_same_artifact_is_refused() {
    let remote = Arc::new(InMemoryRemote::new());
    remote.set_latency(Some(Duration::from_millis(50)));
    let a = client(&remote, 0xa);
    add_task(&a, 1, "t1", "Once");

    let (first, second) = tokio::join!(a.sync(), a.sync());
    let results = [first, second];
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(SyncError::AlreadyInProgress(_))))
            .count(),
        1
    );
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Ok(SyncOutcome::Pushed { .. })))
            .count(),
        1
    );

    // Guard released afterwards
    assert_eq!(a.sync().await.unwrap(), SyncOutcome::UpToDate);
}

#[tokio::test]
async fn test_timeout_ends_in_error_and_releases_guard() {
    let remote = Arc::new(InMemoryRemote::new());
    remote.set_latency(Some(Duration::from_millis(200)));
    let a = client_with(
        &remote,
        0xa,
        SyncConfig {
            network_timeout: Duration::from_millis(20),
            ..SyncConfig::default()
        },
    );

    let err = a.sync().await.unwrap_err();
    assert!(matches!(err, SyncError::Timeout(_)));
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert!(matches!(a.current_state(), SyncState::Error(_)));
    assert!(!a.context().in_flight.is_active(ARTIFACT));
}

#[tokio::test]
async fn test_revision_conflict_on_upload_is_retried() {
    let remote = Arc::new(InMemoryRemote::new());
    let a = client(&remote, 0xa);
    add_task(&a, 1, "t1", "Retry me");
    remote.fail_next(
        RemoteCall::Put,
        RemoteError::RevisionConflict {
            key: ARTIFACT.into(),
            expected: None,
            actual: None,
        },
    );

    assert!(matches!(a.sync().await.unwrap(), SyncOutcome::Pushed { .. }));
    assert_eq!(remote_file(&remote, &SyncFileCodec::new(true, None)).ops.len(), 1);
}

#[tokio::test]
async fn test_revision_conflict_retries_are_bounded() {
    let remote = Arc::new(InMemoryRemote::new());
    let a = client_with(
        &remote,
        0xa,
        SyncConfig {
            max_revision_retries: 1,
            ..SyncConfig::default()
        },
    );
    add_task(&a, 1, "t1", "Never lands");
    for _ in 0..2 {
        remote.fail_next(
            RemoteCall::Put,
            RemoteError::RevisionConflict {
                key: ARTIFACT.into(),
                expected: None,
                actual: None,
            },
        );
    }

    let err = a.sync().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(remote.peek(ARTIFACT).is_none());
}

#[tokio::test]
async fn test_competing_writer_between_download_and_upload() {
    let remote = Arc::new(InMemoryRemote::new());
    let (a, b) = synced_pair(&remote).await;

    // B diverges from A on a different field, then A publishes first
    complete(&b, 20, "t1");
    rename(&a, 21, "t1", "A wins the race");
    a.sync().await.unwrap();

    // B's stale-revision upload is rejected once, then B re-reads and merges
    remote.fail_next(
        RemoteCall::Put,
        RemoteError::RevisionConflict {
            key: ARTIFACT.into(),
            expected: None,
            actual: None,
        },
    );
    assert!(matches!(b.sync().await.unwrap(), SyncOutcome::Pushed { .. }));
    a.sync().await.unwrap();

    assert_eq!(state(&a), state(&b));
    assert!(state(&a).tasks["t1"].is_done);
    assert_eq!(state(&a).tasks["t1"].title, "A wins the race");
}

#[tokio::test]
async fn test_append_during_upload_is_kept_for_next_cycle() {
    let remote = Arc::new(InMemoryRemote::new());
    remote.set_latency(Some(Duration::from_millis(100)));
    let a = client(&remote, 0xa);
    add_task(&a, 1, "t1", "Before");

    // list takes 0-100ms, put takes 100-200ms; the append lands mid-upload
    let (outcome, _) = tokio::join!(a.sync(), async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        add_task(&a, 2, "t2", "During");
    });
    assert!(matches!(outcome.unwrap(), SyncOutcome::Pushed { operations: 1, .. }));
    assert_eq!(a.context().log_snapshot().len(), 2);

    remote.set_latency(None);
    assert!(matches!(
        a.sync().await.unwrap(),
        SyncOutcome::Pushed { operations: 2, .. }
    ));
    assert_eq!(remote_file(&remote, &SyncFileCodec::new(true, None)).ops.len(), 2);
}

#[tokio::test]
async fn test_state_transitions_are_published() {
    let remote = Arc::new(InMemoryRemote::new());
    let states = Arc::new(Mutex::new(Vec::new()));
    let bus = Arc::new(EventBus::new());
    let states_clone = Arc::clone(&states);
    let _sub = bus.subscribe(move |event| {
        if let SyncEvent::StateChanged { state, .. } = event {
            states_clone.lock().unwrap().push(state);
        }
    });
    let a = SyncOrchestrator::new(
        SyncContext::default(),
        Arc::clone(&remote),
        SyncConfig::default(),
        bus,
        ClientId::from(0xa),
    )
    .unwrap();
    add_task(&a, 1, "t1", "Observed");
    a.sync().await.unwrap();

    assert_eq!(
        *states.lock().unwrap(),
        vec!["checkingRemote", "uploading", "upToDate"]
    );
}

#[tokio::test]
async fn test_orchestrator_subscription_sees_only_its_artifact() {
    let remote = Arc::new(InMemoryRemote::new());
    let bus = Arc::new(EventBus::new());
    let orchestrator_for = |artifact: &str| {
        SyncOrchestrator::new(
            SyncContext::default(),
            Arc::clone(&remote),
            SyncConfig {
                artifact: artifact.into(),
                ..SyncConfig::default()
            },
            Arc::clone(&bus),
            ClientId::from(0xa),
        )
        .unwrap()
    };
    let main = orchestrator_for(ARTIFACT);
    let archive = orchestrator_for("pfsync/archive");

    let uploads = Arc::new(Mutex::new(Vec::new()));
    let uploads_clone = Arc::clone(&uploads);
    let _sub = main.subscribe(move |event| {
        if let SyncEvent::Uploaded { artifact, .. } = event {
            uploads_clone.lock().unwrap().push(artifact);
        }
    });
    let total = Arc::new(Mutex::new(0));
    let total_clone = Arc::clone(&total);
    let _all = bus.subscribe(move |_| *total_clone.lock().unwrap() += 1);

    add_task(&main, 1, "t1", "Main list");
    add_task(&archive, 1, "t2", "Archived");
    main.sync().await.unwrap();
    archive.sync().await.unwrap();

    assert_eq!(*uploads.lock().unwrap(), vec![ARTIFACT.to_string()]);
    // checkingRemote, uploading, uploaded, upToDate for each artifact
    assert_eq!(*total.lock().unwrap(), 8);
}
