use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rowferry_mysql::position::BinlogPosition;
use rowferry_mysql::types::schema::{TableName, TableSchema};
use tokio::sync::mpsc;

use crate::error::{ErrorKind, FerryError, FerryResult};
use crate::ferry_error;
use crate::source::{BinlogEvents, RowChange, SourceClient, SourceEvent};
use crate::types::{Row, RowKey};

struct MemoryTable {
    schema: TableSchema,
    rows: BTreeMap<RowKey, Row>,
}

struct Inner {
    tables: Mutex<BTreeMap<TableName, MemoryTable>>,
    position: Mutex<BinlogPosition>,
    lag: Mutex<Option<Duration>>,
    pending: Mutex<VecDeque<FerryResult<SourceEvent>>>,
    live: Mutex<Option<mpsc::UnboundedSender<FerryResult<SourceEvent>>>>,
    opened_from: Mutex<Vec<BinlogPosition>>,
    fail_opens: Mutex<bool>,
}

/// An in-memory source: a mutable table store plus a scripted change log.
///
/// Mutation helpers model one committed source transaction: they update the
/// table store, advance the reported head position and emit the matching
/// change-log event, so the head position always equals the position of the
/// last scripted event and a flush-and-stop terminates deterministically.
#[derive(Clone)]
pub struct MemorySource {
    inner: Arc<Inner>,
}

impl MemorySource {
    pub fn new(position: BinlogPosition) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(BTreeMap::new()),
                position: Mutex::new(position),
                lag: Mutex::new(None),
                pending: Mutex::new(VecDeque::new()),
                live: Mutex::new(None),
                opened_from: Mutex::new(Vec::new()),
                fail_opens: Mutex::new(false),
            }),
        }
    }

    /// Creates an empty table.
    pub fn create_table(&self, schema: TableSchema) {
        let mut tables = self.inner.tables.lock().unwrap();
        tables.insert(
            schema.name.clone(),
            MemoryTable {
                schema,
                rows: BTreeMap::new(),
            },
        );
    }

    /// Inserts a row directly, without producing a change-log event. Models
    /// data that existed before the capture point.
    pub fn seed_row(&self, table: &TableName, row: Row) {
        let mut tables = self.inner.tables.lock().unwrap();
        let table = tables.get_mut(table).expect("table not created");
        let key = RowKey::for_row(&row, &table.schema).expect("seed row has no valid key");
        table.rows.insert(key, row);
    }

    /// Commits an insert: mutates the table store and scripts the matching
    /// change-log event.
    pub fn commit_insert(&self, table: &TableName, row: Row) {
        self.seed_row(table, row.clone());
        let position = self.advance_position();
        self.push_event(Ok(SourceEvent::Rows {
            change: RowChange::Insert {
                table: table.clone(),
                rows: vec![row],
            },
            position,
        }));
    }

    /// Commits an update of `before` into `after`.
    pub fn commit_update(&self, table: &TableName, before: Row, after: Row) {
        {
            let mut tables = self.inner.tables.lock().unwrap();
            let table = tables.get_mut(table).expect("table not created");
            let before_key =
                RowKey::for_row(&before, &table.schema).expect("row has no valid key");
            let after_key = RowKey::for_row(&after, &table.schema).expect("row has no valid key");
            table.rows.remove(&before_key);
            table.rows.insert(after_key, after.clone());
        }

        let position = self.advance_position();
        self.push_event(Ok(SourceEvent::Rows {
            change: RowChange::Update {
                table: table.clone(),
                rows: vec![(before, after)],
            },
            position,
        }));
    }

    /// Commits a delete of `row`.
    pub fn commit_delete(&self, table: &TableName, row: Row) {
        {
            let mut tables = self.inner.tables.lock().unwrap();
            let table = tables.get_mut(table).expect("table not created");
            let key = RowKey::for_row(&row, &table.schema).expect("row has no valid key");
            table.rows.remove(&key);
        }

        let position = self.advance_position();
        self.push_event(Ok(SourceEvent::Rows {
            change: RowChange::Delete {
                table: table.clone(),
                rows: vec![row],
            },
            position,
        }));
    }

    /// Scripts a change-log event for a table the source store does not
    /// track (used to exercise the streamer's drop path).
    pub fn push_untracked_insert(&self, table: TableName, row: Row) {
        let position = self.advance_position();
        self.push_event(Ok(SourceEvent::Rows {
            change: RowChange::Insert {
                table,
                rows: vec![row],
            },
            position,
        }));
    }

    /// Scripts a fatal stream error.
    pub fn push_binlog_error(&self, error: FerryError) {
        self.push_event(Err(error));
    }

    /// Makes every `open_binlog` after the first one fail, simulating a
    /// permanently lost replication connection: the initial connect works,
    /// reconnect attempts do not.
    pub fn fail_binlog_opens(&self) {
        *self.inner.fail_opens.lock().unwrap() = true;
    }

    pub fn set_replication_lag(&self, lag: Option<Duration>) {
        *self.inner.lag.lock().unwrap() = lag;
    }

    /// The positions `open_binlog` was asked to start from.
    pub fn opened_from(&self) -> Vec<BinlogPosition> {
        self.inner.opened_from.lock().unwrap().clone()
    }

    /// The current head position of the scripted change log.
    pub fn head_position(&self) -> BinlogPosition {
        self.inner.position.lock().unwrap().clone()
    }

    /// The current contents of a source table, in key order.
    pub fn table_rows(&self, table: &TableName) -> Vec<Row> {
        let tables = self.inner.tables.lock().unwrap();
        tables
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    fn advance_position(&self) -> BinlogPosition {
        let mut position = self.inner.position.lock().unwrap();
        position.offset += 1;
        position.clone()
    }

    fn push_event(&self, event: FerryResult<SourceEvent>) {
        let live = self.inner.live.lock().unwrap();
        match live.as_ref() {
            Some(tx) => {
                let _ = tx.send(event);
            }
            None => {
                self.inner.pending.lock().unwrap().push_back(event);
            }
        }
    }
}

impl SourceClient for MemorySource {
    type Binlog = MemoryBinlogEvents;

    async fn check_connectivity(&self) -> FerryResult<()> {
        Ok(())
    }

    async fn current_position(&self) -> FerryResult<BinlogPosition> {
        Ok(self.head_position())
    }

    async fn load_table_schemas(
        &self,
        databases: &[String],
        tables: &[String],
    ) -> FerryResult<Vec<TableSchema>> {
        let all = self.inner.tables.lock().unwrap();
        Ok(all
            .values()
            .filter(|t| {
                let name = &t.schema.name;
                (databases.is_empty() || databases.contains(&name.schema))
                    && (tables.is_empty() || tables.iter().any(|s| *s == name.to_string()))
            })
            .map(|t| t.schema.clone())
            .collect())
    }

    async fn scan_rows(
        &self,
        schema: &TableSchema,
        after: Option<&Row>,
        limit: usize,
    ) -> FerryResult<Vec<Row>> {
        let tables = self.inner.tables.lock().unwrap();
        let table = tables.get(&schema.name).ok_or_else(|| {
            ferry_error!(
                ErrorKind::SourceReadError,
                "Scanned table does not exist",
                schema.name.to_string()
            )
        })?;

        let cursor = match after {
            Some(row) => Some(RowKey::for_row(row, &table.schema)?),
            None => None,
        };

        Ok(table
            .rows
            .iter()
            .filter(|(key, _)| cursor.as_ref().map_or(true, |cursor| *key > cursor))
            .take(limit)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn replication_lag(&self) -> FerryResult<Option<Duration>> {
        Ok(*self.inner.lag.lock().unwrap())
    }

    async fn open_binlog(&self, from: &BinlogPosition) -> FerryResult<MemoryBinlogEvents> {
        let first_open = {
            let mut opened = self.inner.opened_from.lock().unwrap();
            opened.push(from.clone());
            opened.len() == 1
        };

        if !first_open && *self.inner.fail_opens.lock().unwrap() {
            return Err(ferry_error!(
                ErrorKind::BinlogError,
                "Replication connection refused"
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for event in self.inner.pending.lock().unwrap().drain(..) {
            let _ = tx.send(event);
        }
        *self.inner.live.lock().unwrap() = Some(tx);

        Ok(MemoryBinlogEvents { rx })
    }
}

/// The change-log stream of a [`MemorySource`].
pub struct MemoryBinlogEvents {
    rx: mpsc::UnboundedReceiver<FerryResult<SourceEvent>>,
}

impl BinlogEvents for MemoryBinlogEvents {
    async fn next_event(&mut self) -> FerryResult<Option<SourceEvent>> {
        match self.rx.recv().await {
            Some(event) => event.map(Some),
            // The source replaced this stream; report a closed connection.
            None => Ok(None),
        }
    }
}
