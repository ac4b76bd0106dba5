//! In-memory doubles and fixtures for exercising the pipeline without a
//! database.

mod memory_source;
mod memory_target;

pub use memory_source::{MemoryBinlogEvents, MemorySource};
pub use memory_target::MemoryTarget;

use rowferry_mysql::types::schema::{ColumnSchema, TableName, TableSchema};
use rowferry_mysql::types::value::ColumnValue;

use crate::types::Row;

/// Initializes a compact tracing subscriber for tests. Safe to call from
/// every test; only the first call installs the subscriber.
pub fn init_test_tracing() {
    #[cfg(feature = "test-utils")]
    {
        use tracing_subscriber::EnvFilter;

        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    }
}

/// The `users(id pk, name)` fixture most scenarios run against.
pub fn users_schema() -> TableSchema {
    TableSchema::new(
        TableName::new("shop", "users"),
        vec![
            ColumnSchema::new("id", "bigint", 1, false, true),
            ColumnSchema::new("name", "varchar", 2, true, false),
        ],
    )
}

/// Builds a `users` row.
pub fn user_row(id: i64, name: &str) -> Row {
    Row::new(vec![
        ColumnValue::SignedInt(id),
        ColumnValue::Text(name.to_string()),
    ])
}
