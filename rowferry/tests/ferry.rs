#![cfg(feature = "test-utils")]

//! End-to-end runs of the pipeline against the in-memory source and target.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rowferry::control::ControlHandle;
use rowferry::error::{ErrorKind, FerryResult};
use rowferry::ferry::{CutoverHandle, Ferry};
use rowferry::listener::EventListener;
use rowferry::schema::SchemaCache;
use rowferry::state::OverallState;
use rowferry::target::Target;
use rowferry::test_utils::{init_test_tracing, user_row, users_schema, MemorySource, MemoryTarget};
use rowferry::types::DmlEvent;
use rowferry_config::shared::FerryConfig;
use rowferry_mysql::position::BinlogPosition;
use rowferry_mysql::types::schema::{ColumnSchema, TableName, TableSchema};
use tokio::task::JoinHandle;

fn test_config(dump_path: &Path, automatic_cutover: bool) -> FerryConfig {
    let config: FerryConfig = serde_json::from_value(serde_json::json!({
        "source": {"host": "src.internal", "username": "ferry"},
        "target": {"host": "dst.internal", "username": "ferry"},
        "automatic_cutover": automatic_cutover,
        "max_write_retries_on_target_db_error": 3,
        "batch": {"max_size": 100},
        "iterator_worker_count": 2,
        "throttler": {"poll_interval_ms": 50, "lag_high_water_ms": 60000, "lag_low_water_ms": 1000},
        "reconnection": {
            "initial_retry_delay_ms": 10,
            "max_retry_delay_ms": 20,
            "backoff_multiplier": 1.0,
            "max_attempts": 2
        },
        "cutover_poll_interval_ms": 20,
        "flush_poll_interval_ms": 20,
        "state_dump_path": dump_path.to_string_lossy(),
    }))
    .unwrap();

    config.validate().unwrap();
    config
}

fn users() -> TableName {
    users_schema().name
}

fn seeded_source() -> MemorySource {
    let source = MemorySource::new(BinlogPosition::new("mysql-bin.000003", 4));
    source.create_table(users_schema());
    source
}

/// Drives the operator side of the cutover from another task, the way a
/// deployment script would.
fn spawn_operator(mut cutover: CutoverHandle<MemorySource>) -> JoinHandle<()> {
    tokio::spawn(async move {
        cutover.wait_until_row_copy_is_complete().await;
        cutover.flush_binlog_and_stop_streaming().await.unwrap();
    })
}

async fn run_to_completion(
    source: &MemorySource,
    target: &MemoryTarget,
    config: FerryConfig,
) -> ControlHandle {
    let mut ferry = Ferry::initialize(config, source.clone(), target.clone())
        .await
        .unwrap();
    ferry.start().await.unwrap();

    let control = ferry.control_handle();
    let operator = spawn_operator(ferry.cutover_handle().unwrap());

    ferry.run().await.unwrap();
    operator.await.unwrap();

    control
}

fn assert_converged(source: &MemorySource, target: &MemoryTarget, table: &TableName) {
    assert_eq!(source.table_rows(table), target.rows(table));
}

#[tokio::test(flavor = "multi_thread")]
async fn copies_a_static_table() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let dump_path = dir.path().join("dump.json");

    let source = seeded_source();
    source.seed_row(&users(), user_row(1, "a"));
    source.seed_row(&users(), user_row(2, "b"));
    let capture_point = source.head_position();

    let target = MemoryTarget::new();
    let control = run_to_completion(&source, &target, test_config(&dump_path, true)).await;

    assert_eq!(target.rows(&users()), vec![user_row(1, "a"), user_row(2, "b")]);
    assert_converged(&source, &target, &users());
    assert_eq!(control.overall_state(), OverallState::Done);

    // The recorded streamer position has advanced at least to the capture
    // point, and the dump is keyed by producer name.
    let dump: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&dump_path).unwrap()).unwrap();
    assert_eq!(dump["overall_state"], "done");
    let streamed: BinlogPosition =
        serde_json::from_value(dump["positions"]["binlog_streamer"].clone()).unwrap();
    assert!(streamed >= capture_point);
    assert!(dump["positions"]["data_iterator"].is_object());
}

#[tokio::test(flavor = "multi_thread")]
async fn starting_position_is_captured_before_iteration() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let source = seeded_source();
    source.seed_row(&users(), user_row(1, "a"));
    let initial_head = source.head_position();

    let target = MemoryTarget::new();
    run_to_completion(
        &source,
        &target,
        test_config(&dir.path().join("dump.json"), true),
    )
    .await;

    // The streamer was opened exactly at the head observed before any row
    // was scanned.
    let opened = source.opened_from();
    assert_eq!(opened.first(), Some(&initial_head));
}

#[tokio::test(flavor = "multi_thread")]
async fn replays_a_concurrent_insert() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let source = seeded_source();
    source.seed_row(&users(), user_row(1, "a"));
    source.seed_row(&users(), user_row(2, "b"));
    source.commit_insert(&users(), user_row(3, "c"));

    let target = MemoryTarget::new();
    run_to_completion(
        &source,
        &target,
        test_config(&dir.path().join("dump.json"), true),
    )
    .await;

    assert_eq!(
        target.rows(&users()),
        vec![user_row(1, "a"), user_row(2, "b"), user_row(3, "c")]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn replays_an_update_of_an_already_copied_row() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let source = seeded_source();
    source.seed_row(&users(), user_row(1, "a"));
    source.commit_update(&users(), user_row(1, "a"), user_row(1, "z"));

    let target = MemoryTarget::new();
    run_to_completion(
        &source,
        &target,
        test_config(&dir.path().join("dump.json"), true),
    )
    .await;

    assert_eq!(target.rows(&users()), vec![user_row(1, "z")]);
}

#[tokio::test(flavor = "multi_thread")]
async fn replays_a_delete_of_a_not_yet_copied_row() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let source = seeded_source();
    source.seed_row(&users(), user_row(1, "a"));
    source.seed_row(&users(), user_row(2, "b"));
    source.commit_delete(&users(), user_row(2, "b"));

    let target = MemoryTarget::new();
    run_to_completion(
        &source,
        &target,
        test_config(&dir.path().join("dump.json"), true),
    )
    .await;

    assert_eq!(target.rows(&users()), vec![user_row(1, "a")]);
}

#[tokio::test(flavor = "multi_thread")]
async fn converges_under_writes_arriving_mid_run() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let source = seeded_source();
    source.seed_row(&users(), user_row(1, "a"));
    source.seed_row(&users(), user_row(2, "b"));

    let target = MemoryTarget::new();
    let mut ferry = Ferry::initialize(
        test_config(&dir.path().join("dump.json"), false),
        source.clone(),
        target.clone(),
    )
    .await
    .unwrap();
    ferry.start().await.unwrap();

    let control = ferry.control_handle();
    let operator = spawn_operator(ferry.cutover_handle().unwrap());
    let run = tokio::spawn(async move {
        ferry.run().await.unwrap();
        ferry
    });

    // Mutate the source while the run is in flight, then allow cutover.
    tokio::time::sleep(Duration::from_millis(50)).await;
    source.commit_insert(&users(), user_row(3, "c"));
    source.commit_update(&users(), user_row(1, "a"), user_row(1, "z"));
    source.commit_delete(&users(), user_row(2, "b"));
    source.push_untracked_insert(
        TableName::new("shop", "untracked"),
        user_row(9, "ignored"),
    );
    control.set_automatic_cutover(true);

    run.await.unwrap();
    operator.await.unwrap();

    assert_eq!(target.rows(&users()), vec![user_row(1, "z"), user_row(3, "c")]);
    assert_converged(&source, &target, &users());
    assert_eq!(target.table_row_count(&TableName::new("shop", "untracked")), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn recovers_from_transient_target_failures() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let source = seeded_source();
    source.seed_row(&users(), user_row(1, "a"));
    source.seed_row(&users(), user_row(2, "b"));

    let target = MemoryTarget::new();
    target.fail_next_writes(2);

    run_to_completion(
        &source,
        &target,
        test_config(&dir.path().join("dump.json"), true),
    )
    .await;

    assert_converged(&source, &target, &users());
}

#[tokio::test(flavor = "multi_thread")]
async fn fatal_streamer_error_fails_the_run_and_is_dumped() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let dump_path = dir.path().join("dump.json");

    let source = seeded_source();
    source.seed_row(&users(), user_row(1, "a"));
    source.push_binlog_error(rowferry::ferry_error!(
        ErrorKind::BinlogError,
        "Binlog stream read failed"
    ));
    source.fail_binlog_opens();

    let target = MemoryTarget::new();
    let mut ferry = Ferry::initialize(
        test_config(&dump_path, false),
        source.clone(),
        target.clone(),
    )
    .await
    .unwrap();
    ferry.start().await.unwrap();
    let control = ferry.control_handle();

    let err = ferry.run().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BinlogError);
    assert_ne!(control.overall_state(), OverallState::Done);

    let dump: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&dump_path).unwrap()).unwrap();
    assert_eq!(dump["failure"]["component"], "binlog_streamer");
}

/// A consumer listener recording when it observed a batch.
struct RecordingListener {
    journal: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl EventListener for RecordingListener {
    async fn handle_events(&self, _events: &[DmlEvent]) -> FerryResult<()> {
        self.journal.lock().unwrap().push("consumer");
        Ok(())
    }
}

/// A target recording when the built-in writer reached it.
#[derive(Clone)]
struct JournalingTarget {
    inner: MemoryTarget,
    journal: Arc<Mutex<Vec<&'static str>>>,
}

impl Target for JournalingTarget {
    async fn check_connectivity(&self) -> FerryResult<()> {
        self.inner.check_connectivity().await
    }

    async fn apply_batch(&self, schema_cache: &SchemaCache, events: &[DmlEvent]) -> FerryResult<()> {
        self.journal.lock().unwrap().push("target");
        self.inner.apply_batch(schema_cache, events).await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn consumer_listeners_run_before_the_built_in_writer() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let source = seeded_source();
    source.seed_row(&users(), user_row(1, "a"));
    source.seed_row(&users(), user_row(2, "b"));

    let journal = Arc::new(Mutex::new(Vec::new()));
    let target = JournalingTarget {
        inner: MemoryTarget::new(),
        journal: journal.clone(),
    };

    let mut config = test_config(&dir.path().join("dump.json"), true);
    config.iterator_worker_count = 1;

    let mut ferry = Ferry::initialize(config, source.clone(), target.clone())
        .await
        .unwrap();
    ferry
        .add_event_listener(Arc::new(RecordingListener {
            journal: journal.clone(),
        }))
        .unwrap();
    ferry.start().await.unwrap();

    let operator = spawn_operator(ferry.cutover_handle().unwrap());
    ferry.run().await.unwrap();
    operator.await.unwrap();

    // One batch: the consumer listener saw it before the writer applied it,
    // and the writer applied it exactly once.
    assert_eq!(*journal.lock().unwrap(), vec!["consumer", "target"]);
    assert_eq!(target.inner.table_row_count(&users()), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn state_progresses_monotonically_through_the_cutover_handshake() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let source = seeded_source();
    source.seed_row(&users(), user_row(1, "a"));

    let target = MemoryTarget::new();
    let mut ferry = Ferry::initialize(
        test_config(&dir.path().join("dump.json"), false),
        source.clone(),
        target.clone(),
    )
    .await
    .unwrap();
    ferry.start().await.unwrap();

    let control = ferry.control_handle();
    assert_eq!(control.overall_state(), OverallState::Starting);

    let mut state_rx = control.state_stream();
    let observer = tokio::spawn(async move {
        let mut observed = Vec::new();
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow();
            observed.push(state);
            if state == OverallState::Done {
                break;
            }
        }
        observed
    });

    let operator = spawn_operator(ferry.cutover_handle().unwrap());
    let run = tokio::spawn(async move { ferry.run().await });

    // The coordinator holds in wait-for-cutover until the operator flips the
    // automatic-cutover flag.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if control.overall_state() == OverallState::WaitForCutover {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(!control.automatic_cutover());

    control.set_automatic_cutover(true);

    run.await.unwrap().unwrap();
    operator.await.unwrap();

    // Observed values are strictly increasing: a prefix-ordered walk of
    // starting → copying → wait-for-cutover → cutover → done.
    let observed = observer.await.unwrap();
    assert!(observed.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(observed.last(), Some(&OverallState::Done));
}

#[tokio::test(flavor = "multi_thread")]
async fn operator_pause_suspends_the_row_copy() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let source = seeded_source();
    source.seed_row(&users(), user_row(1, "a"));

    let target = MemoryTarget::new();
    let mut ferry = Ferry::initialize(
        test_config(&dir.path().join("dump.json"), true),
        source.clone(),
        target.clone(),
    )
    .await
    .unwrap();
    ferry.start().await.unwrap();

    let control = ferry.control_handle();
    control.pause();

    let operator = spawn_operator(ferry.cutover_handle().unwrap());
    let run = tokio::spawn(async move { ferry.run().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(target.table_row_count(&users()), 0);

    control.unpause();
    run.await.unwrap().unwrap();
    operator.await.unwrap();

    assert_converged(&source, &target, &users());
}

#[tokio::test(flavor = "multi_thread")]
async fn rejects_tables_without_a_primary_key_at_start() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let source = seeded_source();
    source.create_table(TableSchema::new(
        TableName::new("shop", "audit_log"),
        vec![ColumnSchema::new("entry", "text", 1, true, false)],
    ));

    let target = MemoryTarget::new();
    let mut ferry = Ferry::initialize(
        test_config(&dir.path().join("dump.json"), true),
        source,
        target,
    )
    .await
    .unwrap();

    let err = ferry.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaError);
    assert!(err.to_string().contains("shop.audit_log"));
}

#[tokio::test(flavor = "multi_thread")]
async fn cutover_handle_can_only_be_taken_once() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let source = seeded_source();
    let target = MemoryTarget::new();

    let mut ferry = Ferry::initialize(
        test_config(&dir.path().join("dump.json"), true),
        source,
        target,
    )
    .await
    .unwrap();
    ferry.start().await.unwrap();

    assert!(ferry.cutover_handle().is_ok());
    let err = ferry.cutover_handle().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}
