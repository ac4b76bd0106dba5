//! The seam between the pipeline and the source database.
//!
//! Everything the pipeline needs from the source flows through
//! [`SourceClient`]: connectivity checks, the binlog head position, schema
//! discovery, keyset range scans and the replication event stream. The
//! production implementation in [`mysql`] talks to a real server; the test
//! utilities provide an in-memory implementation so the pipeline's behavior
//! can be exercised without one.

pub mod mysql;

use std::future::Future;
use std::time::Duration;

use rowferry_mysql::position::BinlogPosition;
use rowferry_mysql::types::schema::{TableName, TableSchema};

use crate::error::FerryResult;
use crate::types::Row;

/// One unit of progress observed on the source's change log.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// A decoded rows frame: every row mutated by one binlog event.
    Rows {
        change: RowChange,
        position: BinlogPosition,
    },
    /// A frame that carries no row data but still advances the position
    /// (heartbeats, rotations, transaction markers).
    Heartbeat { position: BinlogPosition },
}

impl SourceEvent {
    pub fn position(&self) -> &BinlogPosition {
        match self {
            SourceEvent::Rows { position, .. } | SourceEvent::Heartbeat { position } => position,
        }
    }
}

/// The row images carried by one change-log frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    Insert { table: TableName, rows: Vec<Row> },
    Update { table: TableName, rows: Vec<(Row, Row)> },
    Delete { table: TableName, rows: Vec<Row> },
}

impl RowChange {
    pub fn table(&self) -> &TableName {
        match self {
            RowChange::Insert { table, .. }
            | RowChange::Update { table, .. }
            | RowChange::Delete { table, .. } => table,
        }
    }
}

/// A pull stream of decoded change-log events.
///
/// `next_event` resolving to `Ok(None)` means the server closed the stream;
/// the streamer treats that as a connection loss and reconnects.
pub trait BinlogEvents: Send + Sync + 'static {
    fn next_event(&mut self) -> impl Future<Output = FerryResult<Option<SourceEvent>>> + Send;
}

/// A client of the source database.
///
/// Implementations are cheap to clone; every task in the pipeline holds its
/// own handle.
pub trait SourceClient: Clone + Send + Sync + 'static {
    type Binlog: BinlogEvents;

    /// Verifies connectivity with a cheap status query.
    fn check_connectivity(&self) -> impl Future<Output = FerryResult<()>> + Send;

    /// Reads the current head position of the change log.
    fn current_position(&self) -> impl Future<Output = FerryResult<BinlogPosition>> + Send;

    /// Discovers the schemas of the applicable tables.
    ///
    /// `databases` and `tables` are the configured filters; an empty filter
    /// selects everything (excluding system databases).
    fn load_table_schemas(
        &self,
        databases: &[String],
        tables: &[String],
    ) -> impl Future<Output = FerryResult<Vec<TableSchema>>> + Send;

    /// Fetches the next batch of rows of `schema` whose primary key is
    /// greater than the key of `after`, in ascending key order.
    fn scan_rows(
        &self,
        schema: &TableSchema,
        after: Option<&Row>,
        limit: usize,
    ) -> impl Future<Output = FerryResult<Vec<Row>>> + Send;

    /// Reads the replication lag the source reports, when it is a replica.
    fn replication_lag(&self) -> impl Future<Output = FerryResult<Option<Duration>>> + Send;

    /// Registers as a replication follower and opens the change-log stream
    /// at `from`.
    fn open_binlog(
        &self,
        from: &BinlogPosition,
    ) -> impl Future<Output = FerryResult<Self::Binlog>> + Send;
}
