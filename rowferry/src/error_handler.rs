//! The failure aggregator.
//!
//! Every component reports fatal conditions here. The first error becomes
//! the primary one: it marks the run as failing, fires the cancellation
//! signal and writes the post-mortem state dump. Later errors are logged
//! but do not retrigger shutdown. The handler is stopped only after the
//! producers have joined and it drains its ingress before returning, so no
//! error can be lost.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx};
use crate::dump::{write_state_dump, FailureDump, ProgressTracker, StateDump};
use crate::error::FerryError;

/// One fatal condition reported by a component.
#[derive(Debug)]
pub struct ErrorReport {
    pub component: String,
    pub error: FerryError,
}

/// The ingress every component reports through.
#[derive(Debug, Clone)]
pub struct ErrorHandlerHandle {
    tx: mpsc::UnboundedSender<ErrorReport>,
}

impl ErrorHandlerHandle {
    /// Reports a fatal condition.
    ///
    /// Reporting after the handler has stopped is a no-op; by then the run
    /// has already concluded.
    pub fn report(&self, component: impl Into<String>, error: FerryError) {
        let report = ErrorReport {
            component: component.into(),
            error,
        };

        if self.tx.send(report).is_err() {
            debug!("error reported after the error handler stopped");
        }
    }
}

/// Collects fatal errors and coordinates the single shutdown they cause.
pub struct ErrorHandler {
    rx: mpsc::UnboundedReceiver<ErrorReport>,
    cancel: ShutdownTx,
    stop_rx: ShutdownRx,
    progress: ProgressTracker,
    dump_path: PathBuf,
    first: Arc<Mutex<Option<ErrorReport>>>,
}

impl ErrorHandler {
    pub fn new(
        cancel: ShutdownTx,
        stop_rx: ShutdownRx,
        progress: ProgressTracker,
        dump_path: PathBuf,
    ) -> (Self, ErrorHandlerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();

        let handler = Self {
            rx,
            cancel,
            stop_rx,
            progress,
            dump_path,
            first: Arc::new(Mutex::new(None)),
        };
        let handle = ErrorHandlerHandle { tx };

        (handler, handle)
    }

    /// Shared slot the coordinator reads the primary error from after the
    /// handler has been joined.
    pub fn first_error(&self) -> Arc<Mutex<Option<ErrorReport>>> {
        self.first.clone()
    }

    /// Runs until stopped, then drains the ingress and returns.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                report = self.rx.recv() => {
                    match report {
                        Some(report) => self.handle(report),
                        // Every sender dropped; nothing more can arrive.
                        None => return,
                    }
                }
                _ = self.stop_rx.signaled() => {
                    while let Ok(report) = self.rx.try_recv() {
                        self.handle(report);
                    }
                    debug!("error handler stopping");
                    return;
                }
            }
        }
    }

    fn handle(&self, report: ErrorReport) {
        let mut first = self.first.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(primary) = first.as_ref() {
            warn!(
                component = %report.component,
                error = %report.error,
                primary_component = %primary.component,
                "additional error after the primary one"
            );
            return;
        }

        error!(
            component = %report.component,
            error = %report.error,
            "fatal error, shutting the run down"
        );

        let dump = StateDump {
            overall_state: "failing".to_string(),
            positions: self.progress.snapshot(),
            failure: Some(FailureDump {
                component: report.component.clone(),
                error: report.error.to_string(),
            }),
        };

        if let Err(err) = write_state_dump(&self.dump_path, &dump) {
            warn!(error = %err, "failed to write the post-mortem state dump");
        }

        self.cancel.shutdown();
        *first = Some(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;
    use crate::error::ErrorKind;
    use crate::ferry_error;

    #[tokio::test]
    async fn first_error_wins_and_triggers_cancellation() {
        let (cancel_tx, mut cancel_rx) = create_shutdown_channel();
        let (stop_tx, stop_rx) = create_shutdown_channel();
        let dir = tempfile::tempdir().unwrap();
        let dump_path = dir.path().join("dump.json");

        let (handler, handle) =
            ErrorHandler::new(cancel_tx, stop_rx, ProgressTracker::default(), dump_path.clone());
        let first = handler.first_error();
        let task = tokio::spawn(handler.run());

        handle.report(
            "binlog_streamer",
            ferry_error!(ErrorKind::BinlogError, "Stream failed"),
        );
        handle.report(
            "data_iterator",
            ferry_error!(ErrorKind::SourceReadError, "Scan failed"),
        );

        cancel_rx.signaled().await;
        stop_tx.shutdown();
        task.await.unwrap();

        let primary = first.lock().unwrap().take().unwrap();
        assert_eq!(primary.component, "binlog_streamer");
        assert_eq!(primary.error.kind(), ErrorKind::BinlogError);

        let dump: StateDump =
            serde_json::from_str(&std::fs::read_to_string(&dump_path).unwrap()).unwrap();
        let failure = dump.failure.unwrap();
        assert_eq!(failure.component, "binlog_streamer");
        assert!(failure.error.contains("Stream failed"));
    }

    #[tokio::test]
    async fn stop_drains_pending_reports() {
        let (cancel_tx, _cancel_rx) = create_shutdown_channel();
        let (stop_tx, stop_rx) = create_shutdown_channel();
        let dir = tempfile::tempdir().unwrap();

        let (handler, handle) = ErrorHandler::new(
            cancel_tx,
            stop_rx,
            ProgressTracker::default(),
            dir.path().join("dump.json"),
        );
        let first = handler.first_error();

        // Report before the handler even runs, then stop it immediately: the
        // drain pass must still pick the report up.
        handle.report(
            "data_iterator",
            ferry_error!(ErrorKind::SourceReadError, "Scan failed"),
        );
        stop_tx.shutdown();

        handler.run().await;

        assert!(first.lock().unwrap().is_some());
    }
}
