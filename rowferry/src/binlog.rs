//! The change-stream follower.
//!
//! The streamer starts at the position captured before the row copy read
//! anything, decodes row frames against the immutable schema cache and
//! delivers them to the listener chain in strict change-log order. One
//! decoded frame is one listener batch, so ordering is structural: batches
//! can never reorder within or across transactions.
//!
//! The only graceful exit is flush-and-stop: the flush handle records the
//! current end of the change log as the target position, and the streamer
//! returns once its last streamed position reaches it.

use std::sync::{Arc, Mutex};

use metrics::counter;
use rowferry_config::shared::ReconnectionConfig;
use rowferry_mysql::position::BinlogPosition;
use rowferry_mysql::types::schema::TableSchema;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::dump::{ProgressTracker, BINLOG_STREAMER};
use crate::error::{ErrorKind, FerryResult};
use crate::error_handler::ErrorHandlerHandle;
use crate::{bail, ferry_error};
use crate::listener::{dispatch, EventListener};
use crate::metrics::{EVENTS_STREAMED_TOTAL, EVENT_TYPE_LABEL};
use crate::schema::SchemaCache;
use crate::source::{BinlogEvents, RowChange, SourceClient, SourceEvent};
use crate::throttler::{wait_until_unthrottled, ThrottleRx};
use crate::types::{DmlEvent, Row};

/// Producer name the streamer reports failures under.
const COMPONENT: &str = "binlog_streamer";

/// The flush target shared between the streamer and its flush handle.
#[derive(Debug, Default)]
pub(crate) struct FlushState {
    target: Mutex<Option<BinlogPosition>>,
}

impl FlushState {
    /// Records the stop position. The first recorded position wins, which
    /// makes flush-and-stop idempotent.
    fn request(&self, position: BinlogPosition) -> bool {
        let mut target = self.target.lock().unwrap_or_else(|e| e.into_inner());
        if target.is_some() {
            return false;
        }

        *target = Some(position);
        true
    }

    fn target(&self) -> Option<BinlogPosition> {
        self.target.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Requests a graceful stop of the streamer.
///
/// Obtained from the coordinator before the run starts, so the operator can
/// drive the cutover from another task while the run blocks.
pub struct BinlogFlushHandle<S: SourceClient> {
    source: S,
    flush: Arc<FlushState>,
}

impl<S: SourceClient> BinlogFlushHandle<S> {
    /// Records the current end of the change log as the stop position.
    ///
    /// The streamer keeps running until it has delivered everything up to
    /// that position; the caller knows it has stopped when the run returns.
    /// Calling this more than once is harmless.
    pub async fn flush_and_stop(&self) -> FerryResult<()> {
        let position = self.source.current_position().await?;

        if self.flush.request(position.clone()) {
            info!(target_position = %position, "binlog flush requested");
        } else {
            debug!("binlog flush already requested");
        }

        Ok(())
    }
}

/// Follows the source's change log from the captured starting position.
pub struct BinlogStreamer<S: SourceClient> {
    source: S,
    schema_cache: SchemaCache,
    listeners: Vec<Arc<dyn EventListener>>,
    events: Option<S::Binlog>,
    last_position: Option<watch::Sender<BinlogPosition>>,
    flush: Arc<FlushState>,
    reconnection: ReconnectionConfig,
    flush_poll_interval: std::time::Duration,
    throttle_rx: ThrottleRx,
    cancel_rx: ShutdownRx,
    errors: ErrorHandlerHandle,
    progress: ProgressTracker,
}

impl<S: SourceClient> BinlogStreamer<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: S,
        reconnection: ReconnectionConfig,
        flush_poll_interval: std::time::Duration,
        throttle_rx: ThrottleRx,
        cancel_rx: ShutdownRx,
        errors: ErrorHandlerHandle,
        progress: ProgressTracker,
    ) -> Self {
        Self {
            source,
            schema_cache: SchemaCache::default(),
            listeners: Vec::new(),
            events: None,
            last_position: None,
            flush: Arc::new(FlushState::default()),
            reconnection,
            flush_poll_interval,
            throttle_rx,
            cancel_rx,
            errors,
            progress,
        }
    }

    /// Registers a batch listener. Listeners run in registration order.
    pub fn add_event_listener(&mut self, listener: Arc<dyn EventListener>) {
        self.listeners.push(listener);
    }

    /// Installs the loaded schema cache. Events for tables outside it are
    /// silently dropped.
    pub fn set_schema_cache(&mut self, schema_cache: SchemaCache) {
        self.schema_cache = schema_cache;
    }

    /// Captures the starting position and opens the change-log stream.
    ///
    /// This must happen before the row copy reads anything: rows inserted
    /// between the copy's snapshot reads and a later position capture would
    /// be lost.
    pub async fn connect(&mut self) -> FerryResult<BinlogPosition> {
        let position = self.source.current_position().await?;
        let events = self.source.open_binlog(&position).await?;

        info!(starting_position = %position, "binlog streamer connected");

        self.progress.record(BINLOG_STREAMER, position.clone());
        let (tx, _) = watch::channel(position.clone());
        self.last_position = Some(tx);
        self.events = Some(events);

        Ok(position)
    }

    /// Returns a handle that can request the graceful flush-and-stop.
    pub fn flush_handle(&self) -> BinlogFlushHandle<S> {
        BinlogFlushHandle {
            source: self.source.clone(),
            flush: self.flush.clone(),
        }
    }

    /// Returns a subscription to the last streamed position.
    pub fn position_stream(&self) -> Option<watch::Receiver<BinlogPosition>> {
        self.last_position.as_ref().map(|tx| tx.subscribe())
    }

    /// Streams until flushed-and-stopped or cancelled, reporting failures to
    /// the error handler.
    pub async fn run(mut self) {
        let (Some(mut events), Some(position_tx)) = (self.events.take(), self.last_position.take())
        else {
            self.errors.report(
                COMPONENT,
                ferry_error!(
                    ErrorKind::InvalidState,
                    "Binlog streamer was run before being connected"
                ),
            );
            return;
        };

        let mut ticker = tokio::time::interval(self.flush_poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut reconnect_attempts: u32 = 0;
        let mut throttle_rx = self.throttle_rx.clone();
        let mut cancel_rx = self.cancel_rx.clone();

        loop {
            let last = position_tx.borrow().clone();
            if let Some(target) = self.flush.target() {
                if last >= target {
                    info!(position = %last, "binlog streamer caught up to the flush position");
                    return;
                }
            }

            tokio::select! {
                _ = cancel_rx.signaled() => {
                    debug!("binlog streamer cancelled");
                    return;
                }
                // Re-checks the flush target even when the stream is idle.
                _ = ticker.tick() => {}
                next = events.next_event() => {
                    match next {
                        Ok(Some(event)) => {
                            reconnect_attempts = 0;

                            // Row work respects the throttle gate; position
                            // bookkeeping does not.
                            if matches!(event, SourceEvent::Rows { .. }) {
                                tokio::select! {
                                    _ = cancel_rx.signaled() => {
                                        debug!("binlog streamer cancelled");
                                        return;
                                    }
                                    _ = wait_until_unthrottled(&mut throttle_rx) => {}
                                }
                            }

                            match self.handle_event(event, &position_tx).await {
                                Ok(()) => {}
                                Err(err) => {
                                    self.errors.report(COMPONENT, err);
                                    return;
                                }
                            }
                        }
                        Ok(None) => {
                            warn!("binlog stream closed by the server");
                            match self.reconnect(&mut reconnect_attempts, &last).await {
                                Ok(stream) => events = stream,
                                Err(err) => {
                                    self.errors.report(COMPONENT, err);
                                    return;
                                }
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "binlog stream read failed");
                            match self.reconnect(&mut reconnect_attempts, &last).await {
                                Ok(stream) => events = stream,
                                Err(err) => {
                                    self.errors.report(COMPONENT, err);
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    async fn handle_event(
        &self,
        event: SourceEvent,
        position_tx: &watch::Sender<BinlogPosition>,
    ) -> FerryResult<()> {
        let position = event.position().clone();

        if let SourceEvent::Rows { change, .. } = event {
            if let Some(schema) = self.schema_cache.get(change.table()).cloned() {
                let events = decode_change(change, &schema, &position)?;
                // All events of one frame share a kind, so the frame's first
                // event classifies the whole batch.
                if let Some(event_type) = events.first().map(|e| e.event_type()) {
                    dispatch(&self.listeners, &events).await?;
                    counter!(EVENTS_STREAMED_TOTAL, EVENT_TYPE_LABEL => event_type.to_string())
                        .increment(events.len() as u64);
                }
            } else {
                trace!(table = %change.table(), "dropping event for table outside the schema cache");
            }
        }

        // The position is recorded only after the batch is delivered, so the
        // dump never claims progress the target has not seen.
        position_tx.send_replace(position.clone());
        self.progress.record(BINLOG_STREAMER, position);

        Ok(())
    }

    async fn reconnect(&self, attempts: &mut u32, from: &BinlogPosition) -> FerryResult<S::Binlog> {
        if !self.reconnection.enabled {
            bail!(
                ErrorKind::BinlogError,
                "Binlog connection lost and reconnection is disabled"
            );
        }

        let mut delay = self.reconnection.initial_retry_delay();
        for _ in *attempts..self.reconnection.max_attempts {
            *attempts += 1;
            info!(attempt = *attempts, position = %from, "reconnecting binlog stream");

            tokio::time::sleep(delay).await;

            match self.source.open_binlog(from).await {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    warn!(attempt = *attempts, error = %err, "binlog reconnect failed");
                    let scaled = delay.as_millis() as f64 * self.reconnection.backoff_multiplier;
                    delay = std::time::Duration::from_millis(scaled as u64)
                        .min(self.reconnection.max_retry_delay());
                }
            }
        }

        Err(ferry_error!(
            ErrorKind::BinlogError,
            "Binlog connection lost and could not be re-established",
            format!("{} attempts", *attempts)
        ))
    }
}

/// Decodes one rows frame into DML events against the cached schema.
///
/// A row whose arity disagrees with the cached schema is fatal: the cache is
/// authoritative and mid-run schema changes are unsupported.
fn decode_change(
    change: RowChange,
    schema: &TableSchema,
    position: &BinlogPosition,
) -> FerryResult<Vec<DmlEvent>> {
    let check = |row: &Row| -> FerryResult<()> {
        if row.len() != schema.num_columns() {
            bail!(
                ErrorKind::SchemaError,
                "Binlog row shape is inconsistent with the cached schema",
                format!(
                    "{}: row has {} values, schema has {} columns",
                    schema.name,
                    row.len(),
                    schema.num_columns()
                )
            );
        }
        Ok(())
    };

    let events = match change {
        RowChange::Insert { table, rows } => {
            let mut events = Vec::with_capacity(rows.len());
            for row in rows {
                check(&row)?;
                events.push(DmlEvent::Insert {
                    table: table.clone(),
                    row,
                    position: Some(position.clone()),
                });
            }
            events
        }
        RowChange::Update { table, rows } => {
            let mut events = Vec::with_capacity(rows.len());
            for (before, after) in rows {
                check(&before)?;
                check(&after)?;
                events.push(DmlEvent::Update {
                    table: table.clone(),
                    before,
                    after,
                    position: Some(position.clone()),
                });
            }
            events
        }
        RowChange::Delete { table, rows } => {
            let mut events = Vec::with_capacity(rows.len());
            for row in rows {
                check(&row)?;
                events.push(DmlEvent::Delete {
                    table: table.clone(),
                    row,
                    position: Some(position.clone()),
                });
            }
            events
        }
    };

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowferry_mysql::types::schema::{ColumnSchema, TableName};
    use rowferry_mysql::types::value::ColumnValue;

    fn users_schema() -> TableSchema {
        TableSchema::new(
            TableName::new("shop", "users"),
            vec![
                ColumnSchema::new("id", "bigint", 1, false, true),
                ColumnSchema::new("name", "varchar", 2, true, false),
            ],
        )
    }

    #[test]
    fn decoded_events_carry_the_frame_position() {
        let position = BinlogPosition::new("mysql-bin.000001", 240);
        let change = RowChange::Insert {
            table: users_schema().name,
            rows: vec![Row::new(vec![
                ColumnValue::SignedInt(1),
                ColumnValue::Text("a".into()),
            ])],
        };

        let events = decode_change(change, &users_schema(), &position).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].position(), Some(&position));
    }

    #[test]
    fn arity_mismatch_is_fatal() {
        let position = BinlogPosition::new("mysql-bin.000001", 240);
        let change = RowChange::Insert {
            table: users_schema().name,
            rows: vec![Row::new(vec![ColumnValue::SignedInt(1)])],
        };

        let err = decode_change(change, &users_schema(), &position).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaError);
    }

    #[test]
    fn flush_state_is_idempotent() {
        let flush = FlushState::default();
        assert!(flush.request(BinlogPosition::new("mysql-bin.000001", 100)));
        assert!(!flush.request(BinlogPosition::new("mysql-bin.000001", 200)));
        assert_eq!(
            flush.target(),
            Some(BinlogPosition::new("mysql-bin.000001", 100))
        );
    }
}
