//! The bulk copier.
//!
//! Each applicable table is scanned by ascending primary key in batches; a
//! fixed pool of workers pulls tables from a shared queue, so at most one
//! worker owns a table at a time. Every scanned batch is emitted as insert
//! events through the listener chain, and the registered done listeners run
//! once the queue drains.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use metrics::counter;
use rowferry_mysql::types::schema::TableSchema;
use tokio::task::JoinSet;
use tracing::{debug, error, info, Instrument};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, FerryResult};
use crate::error_handler::ErrorHandlerHandle;
use crate::ferry_error;
use crate::listener::{dispatch, DoneListener, EventListener};
use crate::metrics::ROWS_COPIED_TOTAL;
use crate::source::SourceClient;
use crate::throttler::{wait_until_unthrottled, ThrottleRx};
use crate::types::DmlEvent;

/// Producer name the iterator reports failures under.
const COMPONENT: &str = "data_iterator";

/// Result of copying one table.
#[derive(Debug, PartialEq, Eq)]
enum TableCopyOutcome {
    /// All rows were copied.
    Completed { total_rows: u64 },
    /// The copy observed the cancellation signal and stopped early.
    Cancelled,
}

/// Copies the applicable tables from source to target via primary-key range
/// scans.
pub struct DataIterator<S: SourceClient> {
    source: S,
    tables: Vec<Arc<TableSchema>>,
    batch_size: usize,
    worker_count: u16,
    listeners: Vec<Arc<dyn EventListener>>,
    done_listeners: Vec<Arc<dyn DoneListener>>,
    throttle_rx: ThrottleRx,
    cancel_rx: ShutdownRx,
    errors: ErrorHandlerHandle,
}

impl<S: SourceClient> DataIterator<S> {
    pub fn new(
        source: S,
        batch_size: usize,
        worker_count: u16,
        throttle_rx: ThrottleRx,
        cancel_rx: ShutdownRx,
        errors: ErrorHandlerHandle,
    ) -> Self {
        Self {
            source,
            tables: Vec::new(),
            batch_size,
            worker_count,
            listeners: Vec::new(),
            done_listeners: Vec::new(),
            throttle_rx,
            cancel_rx,
            errors,
        }
    }

    /// Sets the tables to copy. Called by the coordinator once the schema
    /// cache is loaded.
    pub fn set_tables(&mut self, tables: Vec<Arc<TableSchema>>) {
        self.tables = tables;
    }

    /// Registers a batch listener. Listeners run in registration order.
    pub fn add_event_listener(&mut self, listener: Arc<dyn EventListener>) {
        self.listeners.push(listener);
    }

    /// Registers a listener invoked once the row copy completes.
    pub fn add_done_listener(&mut self, listener: Arc<dyn DoneListener>) {
        self.done_listeners.push(listener);
    }

    /// Runs the copy to completion, reporting failures to the error handler.
    pub async fn run(self) {
        info!(
            tables = self.tables.len(),
            workers = self.worker_count,
            "starting row copy"
        );

        let queue: Arc<Mutex<VecDeque<Arc<TableSchema>>>> =
            Arc::new(Mutex::new(self.tables.iter().cloned().collect()));
        let listeners: Arc<[Arc<dyn EventListener>]> = self.listeners.into();

        let mut workers = JoinSet::new();
        for worker_id in 0..self.worker_count {
            let worker = TableCopyWorker {
                source: self.source.clone(),
                queue: queue.clone(),
                listeners: listeners.clone(),
                batch_size: self.batch_size,
                throttle_rx: self.throttle_rx.clone(),
                cancel_rx: self.cancel_rx.clone(),
                errors: self.errors.clone(),
            };

            let span = tracing::info_span!("table_copy_worker", worker_id);
            workers.spawn(worker.run().instrument(span));
        }

        let mut failed = false;
        let mut cancelled = false;
        while let Some(result) = workers.join_next().await {
            match result {
                Ok(WorkerOutcome::Completed) => {}
                Ok(WorkerOutcome::Cancelled) => cancelled = true,
                Ok(WorkerOutcome::Failed) => failed = true,
                Err(join_err) => {
                    failed = true;
                    self.errors.report(
                        COMPONENT,
                        ferry_error!(ErrorKind::WorkerPanic, "A table copy worker panicked")
                            .with_source(join_err),
                    );
                }
            }
        }

        if failed || cancelled || self.cancel_rx.is_shutdown() {
            info!(failed, cancelled, "row copy stopped early");
            return;
        }

        info!("finished row copy");

        for listener in &self.done_listeners {
            if let Err(err) = listener.on_done().await {
                self.errors.report(COMPONENT, err);
                return;
            }
        }
    }
}

#[derive(Debug)]
enum WorkerOutcome {
    Completed,
    Cancelled,
    Failed,
}

struct TableCopyWorker<S: SourceClient> {
    source: S,
    queue: Arc<Mutex<VecDeque<Arc<TableSchema>>>>,
    listeners: Arc<[Arc<dyn EventListener>]>,
    batch_size: usize,
    throttle_rx: ThrottleRx,
    cancel_rx: ShutdownRx,
    errors: ErrorHandlerHandle,
}

impl<S: SourceClient> TableCopyWorker<S> {
    async fn run(mut self) -> WorkerOutcome {
        loop {
            let table = {
                let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
                queue.pop_front()
            };

            let Some(table) = table else {
                return WorkerOutcome::Completed;
            };

            match self.copy_table(&table).await {
                Ok(TableCopyOutcome::Completed { total_rows }) => {
                    info!(table = %table.name, total_rows, "completed table copy");
                }
                Ok(TableCopyOutcome::Cancelled) => {
                    debug!(table = %table.name, "table copy cancelled");
                    return WorkerOutcome::Cancelled;
                }
                Err(err) => {
                    error!(table = %table.name, error = %err, "table copy failed");
                    self.errors.report(COMPONENT, err);
                    return WorkerOutcome::Failed;
                }
            }
        }
    }

    async fn copy_table(&mut self, table: &TableSchema) -> FerryResult<TableCopyOutcome> {
        debug!(table = %table.name, "starting table copy");

        let mut cursor = None;
        let mut total_rows: u64 = 0;

        loop {
            if self.cancel_rx.is_shutdown() {
                return Ok(TableCopyOutcome::Cancelled);
            }

            // Suspend while throttled, without holding any source resources.
            tokio::select! {
                _ = self.cancel_rx.signaled() => return Ok(TableCopyOutcome::Cancelled),
                _ = wait_until_unthrottled(&mut self.throttle_rx) => {}
            }

            let rows = self
                .source
                .scan_rows(table, cursor.as_ref(), self.batch_size)
                .await
                .map_err(|err| match err.kind() {
                    // Listener and schema failures propagate as-is; plain
                    // read failures are classified for the error handler.
                    ErrorKind::SourceReadError | ErrorKind::Timeout | ErrorKind::SchemaError => err,
                    _ => ferry_error!(
                        ErrorKind::SourceReadError,
                        "Range scan against the source failed",
                        table.name.to_string()
                    )
                    .with_source(err),
                })?;

            if rows.is_empty() {
                return Ok(TableCopyOutcome::Completed { total_rows });
            }

            let scanned = rows.len();
            cursor = rows.last().cloned();
            total_rows += scanned as u64;

            let events: Vec<DmlEvent> = rows
                .into_iter()
                .map(|row| DmlEvent::copy_insert(table.name.clone(), row))
                .collect();

            dispatch(&self.listeners, &events).await?;
            counter!(ROWS_COPIED_TOTAL).increment(scanned as u64);

            if scanned < self.batch_size {
                return Ok(TableCopyOutcome::Completed { total_rows });
            }
        }
    }
}
