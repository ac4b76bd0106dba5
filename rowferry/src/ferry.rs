//! The coordinator.
//!
//! A [`Ferry`] owns the whole run: it verifies both endpoints, captures the
//! starting change-log position before the row copy reads anything, loads
//! the immutable schema cache, wires the listener chains, and drives the
//! `starting → copying → wait-for-cutover → cutover → done` state machine
//! while the producers and supporting services run as tasks beside it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rowferry_config::shared::FerryConfig;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::binlog::{BinlogFlushHandle, BinlogStreamer};
use crate::concurrency::shutdown::{create_shutdown_channel, ShutdownRx, ShutdownTx};
use crate::control::ControlHandle;
use crate::dump::{write_state_dump, ProgressTracker, StateDump, DATA_ITERATOR};
use crate::error::{ErrorKind, FerryResult};
use crate::error_handler::{ErrorHandler, ErrorHandlerHandle, ErrorReport};
use crate::{bail, ferry_error};
use crate::iterator::DataIterator;
use crate::listener::{DoneListener, EventListener};
use crate::metrics::register_metrics;
use crate::schema::SchemaCache;
use crate::source::mysql::MySqlSourceClient;
use crate::source::SourceClient;
use crate::state::{OverallState, StateTracker};
use crate::target::mysql::MySqlTarget;
use crate::target::writer::BatchWriter;
use crate::target::Target;
use crate::throttler::{Throttler, ThrottlerHandle};

/// Coordinates one online copy run from a source to a target.
///
/// Generic over the source client and the target so the pipeline's behavior
/// can be exercised against in-memory doubles; production code uses
/// [`Ferry::connect`] which wires the MySQL implementations.
pub struct Ferry<S: SourceClient, T: Target> {
    config: Arc<FerryConfig>,
    source: S,
    target: T,

    state: StateTracker,
    progress: ProgressTracker,
    cutover_flag: Arc<AtomicBool>,

    cancel_tx: ShutdownTx,
    supporting_stop_tx: ShutdownTx,

    errors: ErrorHandlerHandle,
    first_error: Arc<Mutex<Option<ErrorReport>>>,
    error_handler: Option<ErrorHandler>,

    throttler: Option<Throttler<S>>,
    throttler_handle: ThrottlerHandle,

    data_iterator: Option<DataIterator<S>>,
    binlog_streamer: Option<BinlogStreamer<S>>,
    flush_handle: Option<BinlogFlushHandle<S>>,

    consumer_listeners: Vec<Arc<dyn EventListener>>,
    schema_cache: Option<SchemaCache>,

    row_copy_complete_tx: Option<oneshot::Sender<()>>,
    row_copy_complete_rx: Option<oneshot::Receiver<()>>,

    start_time: Instant,
    started: bool,
}

impl Ferry<MySqlSourceClient, MySqlTarget> {
    /// Opens both endpoints from configuration and initializes a ferry.
    pub async fn connect(config: FerryConfig) -> FerryResult<Self> {
        let source = MySqlSourceClient::connect(
            config.source.clone(),
            config.server_id,
            config.operation_timeout(),
        )
        .await?;

        let target = MySqlTarget::connect(
            config.target.clone(),
            config.conflict_strategy,
            config.operation_timeout(),
        )
        .await?;

        Ferry::initialize(config, source, target).await
    }
}

impl<S: SourceClient, T: Target> Ferry<S, T> {
    /// Constructs every component and verifies connectivity to both
    /// endpoints.
    pub async fn initialize(config: FerryConfig, source: S, target: T) -> FerryResult<Self> {
        config.validate().map_err(|err| {
            ferry_error!(ErrorKind::ConfigError, "Invalid configuration").with_source(err)
        })?;

        register_metrics();

        source.check_connectivity().await?;
        target.check_connectivity().await?;

        let (cancel_tx, cancel_rx) = create_shutdown_channel();
        let (supporting_stop_tx, supporting_stop_rx) = create_shutdown_channel();
        let progress = ProgressTracker::default();

        let (error_handler, errors) = ErrorHandler::new(
            cancel_tx.clone(),
            supporting_stop_rx.clone(),
            progress.clone(),
            PathBuf::from(&config.state_dump_path),
        );
        let first_error = error_handler.first_error();

        let throttler = Throttler::new(
            source.clone(),
            config.throttler.clone(),
            supporting_stop_rx,
            errors.clone(),
        );
        let throttler_handle = throttler.handle();

        let data_iterator = DataIterator::new(
            source.clone(),
            config.batch.max_size,
            config.iterator_worker_count,
            throttler.subscribe(),
            cancel_rx.clone(),
            errors.clone(),
        );

        let binlog_streamer = BinlogStreamer::new(
            source.clone(),
            config.reconnection.clone(),
            config.flush_poll_interval(),
            throttler.subscribe(),
            cancel_rx,
            errors.clone(),
            progress.clone(),
        );
        let flush_handle = binlog_streamer.flush_handle();

        let (row_copy_complete_tx, row_copy_complete_rx) = oneshot::channel();
        let cutover_flag = Arc::new(AtomicBool::new(config.automatic_cutover));

        info!("ferry initialized");

        Ok(Self {
            config: Arc::new(config),
            source,
            target,
            state: StateTracker::new(),
            progress,
            cutover_flag,
            cancel_tx,
            supporting_stop_tx,
            errors,
            first_error,
            error_handler: Some(error_handler),
            throttler: Some(throttler),
            throttler_handle,
            data_iterator: Some(data_iterator),
            binlog_streamer: Some(binlog_streamer),
            flush_handle: Some(flush_handle),
            consumer_listeners: Vec::new(),
            schema_cache: None,
            row_copy_complete_tx: Some(row_copy_complete_tx),
            row_copy_complete_rx: Some(row_copy_complete_rx),
            start_time: Instant::now(),
            started: false,
        })
    }

    /// Registers a consumer listener on both producers.
    ///
    /// Listeners are invoked in registration order, and the built-in write
    /// listener is appended after all consumer listeners during
    /// [`Ferry::start`], so consumers observe every batch before it reaches
    /// the target.
    pub fn add_event_listener(&mut self, listener: Arc<dyn EventListener>) -> FerryResult<()> {
        if self.started {
            bail!(ErrorKind::InvalidState, "Listeners must be registered before start");
        }

        self.consumer_listeners.push(listener);
        Ok(())
    }

    /// Captures the starting position, loads the schema cache and installs
    /// the listener chains.
    pub async fn start(&mut self) -> FerryResult<()> {
        if self.started {
            bail!(ErrorKind::InvalidState, "Ferry was already started");
        }

        let (Some(streamer), Some(iterator)) =
            (self.binlog_streamer.as_mut(), self.data_iterator.as_mut())
        else {
            bail!(ErrorKind::InvalidState, "Ferry was already run");
        };

        // The starting position must be captured before the iterator reads
        // any row; a row committed between the copy's reads and a later
        // capture would be missed by both producers.
        let starting_position = streamer.connect().await?;
        self.progress.record(DATA_ITERATOR, starting_position);

        let schema_cache = SchemaCache::load(
            &self.source,
            &self.config.applicable_databases,
            &self.config.applicable_tables,
        )
        .await?;

        if schema_cache.is_empty() {
            warn!("no applicable tables were found");
        }

        for listener in &self.consumer_listeners {
            iterator.add_event_listener(listener.clone());
            streamer.add_event_listener(listener.clone());
        }

        let writer = Arc::new(BatchWriter::new(
            self.target.clone(),
            schema_cache.clone(),
            self.config.max_write_retries_on_target_db_error,
        ));
        iterator.add_event_listener(writer.clone());
        streamer.add_event_listener(writer);

        iterator.set_tables(schema_cache.tables().cloned().collect());
        streamer.set_schema_cache(schema_cache.clone());

        iterator.add_done_listener(Arc::new(CutoverCoordinator {
            state: self.state.clone(),
            cutover_flag: self.cutover_flag.clone(),
            poll_interval: self.config.cutover_poll_interval(),
            signal: Mutex::new(self.row_copy_complete_tx.take()),
            cancel_rx: self.cancel_tx.subscribe(),
        }));

        self.schema_cache = Some(schema_cache);
        self.started = true;

        Ok(())
    }

    /// Hands out the operator-side cutover handle.
    ///
    /// Must be taken before [`Ferry::run`] is awaited; the handle lets
    /// another task wait for the row-copy-complete signal and then trigger
    /// the binlog flush once source writes are quiesced.
    pub fn cutover_handle(&mut self) -> FerryResult<CutoverHandle<S>> {
        let (Some(rx), Some(flush)) =
            (self.row_copy_complete_rx.take(), self.flush_handle.take())
        else {
            bail!(ErrorKind::InvalidState, "The cutover handle was already taken");
        };

        Ok(CutoverHandle {
            row_copy_complete: rx,
            flush,
        })
    }

    /// Returns the fixed interface the control collaborator drives the run
    /// through.
    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle::new(
            self.state.subscribe(),
            self.throttler_handle.clone(),
            self.cutover_flag.clone(),
            self.cancel_tx.clone(),
        )
    }

    /// Returns the schema cache once [`Ferry::start`] has loaded it.
    pub fn schema_cache(&self) -> Option<&SchemaCache> {
        self.schema_cache.as_ref()
    }

    /// Runs the copy to completion.
    ///
    /// Spawns the supporting services and both producers, waits for the two
    /// producers to return, and only then stops and joins the supporting
    /// services; stopping them last guarantees an error raised near the end
    /// of the run is still reported. Returns the primary error if any
    /// component failed.
    pub async fn run(&mut self) -> FerryResult<()> {
        if !self.started {
            bail!(ErrorKind::InvalidState, "Ferry must be started before run");
        }

        let (Some(error_handler), Some(throttler), Some(iterator), Some(streamer)) = (
            self.error_handler.take(),
            self.throttler.take(),
            self.data_iterator.take(),
            self.binlog_streamer.take(),
        ) else {
            bail!(ErrorKind::InvalidState, "Ferry was already run");
        };

        info!("starting ferry run");
        self.state.advance(OverallState::Copying);

        let error_handler_task =
            tokio::spawn(error_handler.run().instrument(tracing::info_span!("error_handler")));
        let throttler_task =
            tokio::spawn(throttler.run().instrument(tracing::info_span!("throttler")));

        let streamer_task =
            tokio::spawn(streamer.run().instrument(tracing::info_span!("binlog_streamer")));
        let iterator_task =
            tokio::spawn(iterator.run().instrument(tracing::info_span!("data_iterator")));

        self.join_producer("binlog_streamer", streamer_task).await;
        self.join_producer("data_iterator", iterator_task).await;

        // Supporting services stop only after the producers have joined, and
        // the error handler drains its ingress before returning, so the
        // primary-error slot is final once these tasks are joined.
        self.supporting_stop_tx.shutdown();
        join_supporting("error_handler", error_handler_task).await;
        join_supporting("throttler", throttler_task).await;

        let primary = self
            .first_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        match primary {
            None => {
                self.state.advance(OverallState::Done);

                let dump = StateDump {
                    overall_state: OverallState::Done.to_string(),
                    positions: self.progress.snapshot(),
                    failure: None,
                };
                if let Err(err) =
                    write_state_dump(&PathBuf::from(&self.config.state_dump_path), &dump)
                {
                    warn!(error = %err, "failed to write the final state dump");
                }

                info!(
                    elapsed_secs = self.start_time.elapsed().as_secs(),
                    "ferry run complete"
                );
                Ok(())
            }
            Some(report) => {
                error!(
                    component = %report.component,
                    error = %report.error,
                    "ferry run failed"
                );
                Err(report.error)
            }
        }
    }

    async fn join_producer(&self, name: &'static str, task: JoinHandle<()>) {
        if let Err(join_err) = task.await {
            if join_err.is_panic() {
                self.errors.report(
                    name,
                    ferry_error!(ErrorKind::WorkerPanic, "A producer task panicked", name)
                        .with_source(join_err),
                );
            }
        }
    }

}

async fn join_supporting(name: &'static str, task: JoinHandle<()>) {
    if let Err(join_err) = task.await {
        if join_err.is_panic() {
            error!(task = name, error = %join_err, "a supporting task panicked");
        }
    }
}

/// The operator-side handle for the cutover handshake.
///
/// Obtained from [`Ferry::cutover_handle`] before the run is awaited. The
/// operator waits for the row-copy-complete signal, quiesces writes on the
/// source, then triggers the flush; the run returns once the streamer has
/// caught up to the recorded flush position.
pub struct CutoverHandle<S: SourceClient> {
    row_copy_complete: oneshot::Receiver<()>,
    flush: BinlogFlushHandle<S>,
}

impl<S: SourceClient> std::fmt::Debug for CutoverHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CutoverHandle").finish_non_exhaustive()
    }
}

impl<S: SourceClient> CutoverHandle<S> {
    /// Blocks until the coordinator has entered the cutover phase.
    pub async fn wait_until_row_copy_is_complete(&mut self) {
        // An error elsewhere drops the sender; the run's result reports it.
        let _ = (&mut self.row_copy_complete).await;
    }

    /// Records the current end of the change log and asks the streamer to
    /// stop once it has caught up to it. Idempotent.
    pub async fn flush_binlog_and_stop_streaming(&self) -> FerryResult<()> {
        self.flush.flush_and_stop().await
    }
}

/// The done listener the coordinator installs on the iterator.
///
/// Runs the cutover handshake: waits for the operator's automatic-cutover
/// flag, advances the state machine and fires the one-shot signal.
struct CutoverCoordinator {
    state: StateTracker,
    cutover_flag: Arc<AtomicBool>,
    poll_interval: Duration,
    signal: Mutex<Option<oneshot::Sender<()>>>,
    cancel_rx: ShutdownRx,
}

#[async_trait]
impl DoneListener for CutoverCoordinator {
    async fn on_done(&self) -> FerryResult<()> {
        info!("row copy complete, waiting for cutover");
        self.state.advance(OverallState::WaitForCutover);

        while !self.cutover_flag.load(Ordering::SeqCst) {
            if self.cancel_rx.is_shutdown() {
                debug!("cutover wait interrupted by cancellation");
                return Ok(());
            }

            debug!("waiting for the automatic cutover flag");
            tokio::time::sleep(self.poll_interval).await;
        }

        info!("entering cutover phase");
        self.state.advance(OverallState::Cutover);

        let sender = self
            .signal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(sender) = sender {
            // The operator may have dropped the handle; the state machine
            // still records that cutover was reached.
            let _ = sender.send(());
        }

        Ok(())
    }
}
