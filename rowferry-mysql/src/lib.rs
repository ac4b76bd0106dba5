//! MySQL-level vocabulary shared across the rowferry crates.
//!
//! This crate holds the types and probes that are about MySQL itself rather
//! than about the copy pipeline: table and column schemas, the column value
//! representation, binlog coordinates, replication status probes and
//! connection-option builders.

pub mod connect;
pub mod lag;
pub mod position;
pub mod types;

pub use position::BinlogPosition;
pub use types::schema::{ColumnSchema, TableName, TableSchema};
pub use types::value::ColumnValue;
