use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use rowferry_mysql::types::schema::TableName;

use crate::error::{ErrorKind, FerryResult};
use crate::ferry_error;
use crate::schema::SchemaCache;
use crate::target::Target;
use crate::types::{DmlEvent, Row, RowKey};

struct Inner {
    tables: Mutex<BTreeMap<TableName, BTreeMap<RowKey, Row>>>,
    fail_next: AtomicU32,
}

/// An in-memory target applying events with the same semantics the rendered
/// SQL has: upserting inserts, post-image updates addressed by the
/// before-image key, and deletes that succeed on absent rows.
#[derive(Clone)]
pub struct MemoryTarget {
    inner: Arc<Inner>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(BTreeMap::new()),
                fail_next: AtomicU32::new(0),
            }),
        }
    }

    /// Makes the next `count` batch applications fail, modelling a transient
    /// target outage.
    pub fn fail_next_writes(&self, count: u32) {
        self.inner.fail_next.store(count, Ordering::SeqCst);
    }

    /// The current contents of a target table, in key order.
    pub fn rows(&self, table: &TableName) -> Vec<Row> {
        let tables = self.inner.tables.lock().unwrap();
        tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn table_row_count(&self, table: &TableName) -> usize {
        let tables = self.inner.tables.lock().unwrap();
        tables.get(table).map(|rows| rows.len()).unwrap_or(0)
    }
}

impl Default for MemoryTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl Target for MemoryTarget {
    async fn check_connectivity(&self) -> FerryResult<()> {
        Ok(())
    }

    async fn apply_batch(&self, schema_cache: &SchemaCache, events: &[DmlEvent]) -> FerryResult<()> {
        let remaining = self.inner.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.inner.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(ferry_error!(
                ErrorKind::TargetWriteError,
                "Injected target write failure"
            ));
        }

        // One batch is one transaction: stage the changes and commit them in
        // a single store update.
        let mut tables = self.inner.tables.lock().unwrap();

        for event in events {
            let schema = schema_cache.get(event.table()).ok_or_else(|| {
                ferry_error!(
                    ErrorKind::SchemaError,
                    "Event references a table outside the schema cache",
                    event.table().to_string()
                )
            })?;

            let rows = tables.entry(event.table().clone()).or_default();

            match event {
                DmlEvent::Insert { row, .. } => {
                    let key = RowKey::for_row(row, schema)?;
                    rows.insert(key, row.clone());
                }
                DmlEvent::Update { before, after, .. } => {
                    let before_key = RowKey::for_row(before, schema)?;
                    // Addressed by the before-image key; a missing row means
                    // zero rows match the predicate, exactly as in SQL.
                    if rows.remove(&before_key).is_some() {
                        let after_key = RowKey::for_row(after, schema)?;
                        rows.insert(after_key, after.clone());
                    }
                }
                DmlEvent::Delete { row, .. } => {
                    let key = RowKey::for_row(row, schema)?;
                    rows.remove(&key);
                }
            }
        }

        Ok(())
    }
}
