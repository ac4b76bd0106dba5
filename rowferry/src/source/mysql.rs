//! The production source client.
//!
//! Pooled metadata and range-scan queries go through sqlx; the replication
//! stream goes through mysql_async's binlog support, which is the only part
//! of the ecosystem that speaks the binlog dump command. The stream keeps a
//! TABLE_MAP cache internally, so decoding a rows frame only needs the
//! frame and the stream it arrived on.

use std::sync::Arc;
use std::time::Duration;

use mysql_async::binlog::events::{EventData, RowsEventData, TableMapEvent};
use mysql_async::binlog::row::BinlogRow;
use mysql_async::binlog::value::BinlogValue;
use mysql_async::{BinlogStream, BinlogStreamRequest, Conn};
use rowferry_config::shared::MySqlConnectionConfig;
use rowferry_mysql::connect::{binlog_connect_opts, connect_pool};
use rowferry_mysql::position::BinlogPosition;
use rowferry_mysql::types::schema::{quote_identifier, TableName, TableSchema};
use rowferry_mysql::types::value::ColumnValue;
use rowferry_mysql::{lag, ColumnSchema};
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row as SqlxRow, TypeInfo, ValueRef};
use tokio_stream::StreamExt as _;
use tracing::{debug, info};

use crate::error::{ErrorKind, FerryResult};
use crate::source::{BinlogEvents, RowChange, SourceClient, SourceEvent};
use crate::{bail, ferry_error};
use crate::types::Row;

/// Databases never considered applicable.
const SYSTEM_DATABASES: &[&str] = &["information_schema", "mysql", "performance_schema", "sys"];

/// Connections kept in the metadata/scan pool.
const POOL_MAX_CONNECTIONS: u32 = 8;

/// A client of a real MySQL source.
#[derive(Debug, Clone)]
pub struct MySqlSourceClient {
    pool: MySqlPool,
    config: Arc<MySqlConnectionConfig>,
    server_id: u32,
    operation_timeout: Duration,
}

impl MySqlSourceClient {
    /// Opens the scan pool against the source.
    pub async fn connect(
        config: MySqlConnectionConfig,
        server_id: u32,
        operation_timeout: Duration,
    ) -> FerryResult<Self> {
        let pool = connect_pool(&config, POOL_MAX_CONNECTIONS).await.map_err(|err| {
            ferry_error!(
                ErrorKind::ConfigError,
                "Failed to connect to the source database",
                format!("{}:{}", config.host, config.port)
            )
            .with_source(err)
        })?;

        Ok(Self {
            pool,
            config: Arc::new(config),
            server_id,
            operation_timeout,
        })
    }

    async fn with_deadline<T>(
        &self,
        operation: &'static str,
        fut: impl std::future::Future<Output = FerryResult<T>>,
    ) -> FerryResult<T> {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ferry_error!(
                ErrorKind::Timeout,
                "Source database operation exceeded its deadline",
                operation
            )),
        }
    }
}

impl SourceClient for MySqlSourceClient {
    type Binlog = MySqlBinlogEvents;

    async fn check_connectivity(&self) -> FerryResult<()> {
        let info = lag::check_connection(&self.pool).await.map_err(|err| {
            ferry_error!(ErrorKind::ConfigError, "Source connectivity check failed")
                .with_source(err)
        })?;

        info!(
            host = %self.config.host,
            has_ssl = info.has_ssl(),
            "connected to the source database"
        );

        if self.config.tls.enabled && !info.has_ssl() {
            bail!(
                ErrorKind::ConfigError,
                "Source requires TLS but the session is not encrypted"
            );
        }

        Ok(())
    }

    async fn current_position(&self) -> FerryResult<BinlogPosition> {
        lag::current_binlog_position(&self.pool).await.map_err(|err| {
            ferry_error!(ErrorKind::SourceReadError, "Failed to read the binlog head position")
                .with_source(err)
        })
    }

    async fn load_table_schemas(
        &self,
        databases: &[String],
        tables: &[String],
    ) -> FerryResult<Vec<TableSchema>> {
        self.with_deadline("load_table_schemas", load_schemas(&self.pool, databases, tables))
            .await
    }

    async fn scan_rows(
        &self,
        schema: &TableSchema,
        after: Option<&Row>,
        limit: usize,
    ) -> FerryResult<Vec<Row>> {
        self.with_deadline("scan_rows", scan_rows(&self.pool, schema, after, limit))
            .await
    }

    async fn replication_lag(&self) -> FerryResult<Option<Duration>> {
        lag::replication_lag(&self.pool).await.map_err(|err| {
            ferry_error!(ErrorKind::SourceReadError, "Failed to read replication lag")
                .with_source(err)
        })
    }

    async fn open_binlog(&self, from: &BinlogPosition) -> FerryResult<MySqlBinlogEvents> {
        info!(position = %from, server_id = self.server_id, "opening binlog stream");

        let conn = Conn::new(binlog_connect_opts(&self.config)).await.map_err(|err| {
            ferry_error!(ErrorKind::BinlogError, "Failed to open the replication connection")
                .with_source(err)
        })?;

        let request = BinlogStreamRequest::new(self.server_id)
            .with_filename(from.file.as_bytes())
            .with_pos(from.offset);

        let stream = conn.get_binlog_stream(request).await.map_err(|err| {
            ferry_error!(ErrorKind::BinlogError, "Failed to start the binlog stream")
                .with_source(err)
        })?;

        Ok(MySqlBinlogEvents {
            stream,
            current_file: from.file.clone(),
        })
    }
}

/// The production change-log stream.
///
/// Rotate frames update the file name; every frame's header advances the
/// offset, so the emitted positions stay totally ordered even across file
/// boundaries.
pub struct MySqlBinlogEvents {
    stream: BinlogStream,
    current_file: String,
}

impl BinlogEvents for MySqlBinlogEvents {
    async fn next_event(&mut self) -> FerryResult<Option<SourceEvent>> {
        loop {
            let Some(event) = self.stream.next().await else {
                return Ok(None);
            };

            let event = event.map_err(|err| {
                ferry_error!(ErrorKind::BinlogError, "Binlog stream read failed").with_source(err)
            })?;

            let log_pos = u64::from(event.header().log_pos());

            let data = event.read_data().map_err(|err| {
                ferry_error!(ErrorKind::BinlogError, "Failed to parse a binlog frame")
                    .with_source(err)
            })?;

            let Some(data) = data else {
                continue;
            };

            match data {
                EventData::RotateEvent(rotate) => {
                    let next_file = rotate.name().into_owned();
                    let position = BinlogPosition::new(next_file.clone(), rotate.position());
                    debug!(file = %next_file, "binlog rotated");
                    self.current_file = next_file;

                    return Ok(Some(SourceEvent::Heartbeat { position }));
                }

                EventData::RowsEvent(rows_event) => {
                    let table_id = rows_event.table_id();
                    let tme = self.stream.get_tme(table_id).ok_or_else(|| {
                        ferry_error!(
                            ErrorKind::BinlogError,
                            "Rows frame references an unknown TABLE_MAP entry",
                            table_id
                        )
                    })?;

                    let table =
                        TableName::new(tme.database_name().into_owned(), tme.table_name().into_owned());
                    let position = BinlogPosition::new(self.current_file.clone(), log_pos);
                    let change = decode_rows(&rows_event, tme, table)?;

                    return Ok(Some(SourceEvent::Rows { change, position }));
                }

                // Frames that carry no row data still advance the position;
                // the streamer needs to see that progress to satisfy a
                // flush-and-stop on an otherwise idle server.
                EventData::XidEvent(_)
                | EventData::QueryEvent(_)
                | EventData::GtidEvent(_)
                | EventData::AnonymousGtidEvent(_)
                | EventData::HeartbeatEvent => {
                    let position = BinlogPosition::new(self.current_file.clone(), log_pos);
                    return Ok(Some(SourceEvent::Heartbeat { position }));
                }

                _ => continue,
            }
        }
    }
}

/// Decodes every row image of one rows frame.
fn decode_rows(
    rows_event: &RowsEventData<'_>,
    tme: &TableMapEvent<'_>,
    table: TableName,
) -> FerryResult<RowChange> {
    match rows_event {
        RowsEventData::WriteRowsEvent(_) | RowsEventData::WriteRowsEventV1(_) => {
            let mut rows = Vec::new();
            for row in rows_event.rows(tme) {
                let (_, after) = decode_row_pair(row, &table)?;
                if let Some(after) = after {
                    rows.push(after);
                }
            }
            Ok(RowChange::Insert { table, rows })
        }

        RowsEventData::UpdateRowsEvent(_)
        | RowsEventData::UpdateRowsEventV1(_)
        | RowsEventData::PartialUpdateRowsEvent(_) => {
            let mut rows = Vec::new();
            for row in rows_event.rows(tme) {
                let (before, after) = decode_row_pair(row, &table)?;
                let (Some(before), Some(after)) = (before, after) else {
                    bail!(
                        ErrorKind::SchemaError,
                        "Update frame is missing a row image; full row image logging is required",
                        table.to_string()
                    );
                };
                rows.push((before, after));
            }
            Ok(RowChange::Update { table, rows })
        }

        RowsEventData::DeleteRowsEvent(_) | RowsEventData::DeleteRowsEventV1(_) => {
            let mut rows = Vec::new();
            for row in rows_event.rows(tme) {
                let (before, _) = decode_row_pair(row, &table)?;
                if let Some(before) = before {
                    rows.push(before);
                }
            }
            Ok(RowChange::Delete { table, rows })
        }
    }
}

fn decode_row_pair<E>(
    pair: Result<(Option<BinlogRow>, Option<BinlogRow>), E>,
    table: &TableName,
) -> FerryResult<(Option<Row>, Option<Row>)>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let (before, after) = pair.map_err(|err| {
        ferry_error!(ErrorKind::BinlogError, "Failed to decode a binlog row", table.to_string())
            .with_source(err)
    })?;

    Ok((before.as_ref().map(binlog_row_to_row), after.as_ref().map(binlog_row_to_row)))
}

fn binlog_row_to_row(row: &BinlogRow) -> Row {
    let values = (0..row.len())
        .map(|i| row.as_ref(i).map_or(ColumnValue::Null, binlog_value_to_column_value))
        .collect();

    Row::new(values)
}

/// Converts a binlog value into the pipeline's column representation.
///
/// Temporal values are formatted into the same canonical text the range
/// scans produce, so the two producers agree on row images.
fn binlog_value_to_column_value(value: &BinlogValue<'_>) -> ColumnValue {
    match value {
        BinlogValue::Value(v) => mysql_value_to_column_value(v),
        BinlogValue::Jsonb(v) => ColumnValue::Text(format!("{v:?}")),
        BinlogValue::JsonDiff(_) => ColumnValue::Text("{}".to_string()),
    }
}

fn mysql_value_to_column_value(value: &mysql_async::Value) -> ColumnValue {
    match value {
        mysql_async::Value::NULL => ColumnValue::Null,
        mysql_async::Value::Int(v) => ColumnValue::SignedInt(*v),
        mysql_async::Value::UInt(v) => ColumnValue::UnsignedInt(*v),
        mysql_async::Value::Float(v) => ColumnValue::Double(f64::from(*v)),
        mysql_async::Value::Double(v) => ColumnValue::Double(*v),
        mysql_async::Value::Bytes(bytes) => match String::from_utf8(bytes.clone()) {
            Ok(text) => ColumnValue::Text(text),
            Err(_) => ColumnValue::Bytes(bytes.clone()),
        },
        mysql_async::Value::Date(year, month, day, hour, minute, second, micros) => {
            ColumnValue::from_date_parts(*year, *month, *day, *hour, *minute, *second, *micros)
        }
        mysql_async::Value::Time(negative, days, hours, minutes, seconds, micros) => {
            ColumnValue::from_time_parts(*negative, *days, *hours, *minutes, *seconds, *micros)
        }
    }
}

/// Loads the applicable table schemas from `information_schema`.
async fn load_schemas(
    pool: &MySqlPool,
    databases: &[String],
    tables: &[String],
) -> FerryResult<Vec<TableSchema>> {
    let query = r#"
        SELECT
            CAST(TABLE_SCHEMA AS CHAR(255)) AS TABLE_SCHEMA,
            CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME,
            CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
            CAST(DATA_TYPE AS CHAR(255)) AS DATA_TYPE,
            ORDINAL_POSITION,
            CAST(IS_NULLABLE AS CHAR(3)) AS IS_NULLABLE,
            CAST(COLUMN_KEY AS CHAR(3)) AS COLUMN_KEY
        FROM information_schema.COLUMNS
        WHERE TABLE_SCHEMA NOT IN ('information_schema', 'mysql', 'performance_schema', 'sys')
        ORDER BY TABLE_SCHEMA, TABLE_NAME, ORDINAL_POSITION
    "#;

    let rows = sqlx::query(query).fetch_all(pool).await.map_err(|err| {
        ferry_error!(ErrorKind::SourceReadError, "Failed to read table schemas")
            .with_source(err)
    })?;

    let mut schemas: Vec<TableSchema> = Vec::new();

    for row in rows {
        let database: String = get_column(&row, 0)?;
        let table: String = get_column(&row, 1)?;
        let column: String = get_column(&row, 2)?;
        let data_type: String = get_column(&row, 3)?;
        let ordinal: u64 = get_column(&row, 4)?;
        let is_nullable: String = get_column(&row, 5)?;
        let column_key: String = get_column(&row, 6)?;

        let name = TableName::new(database, table);
        if !table_is_applicable(&name, databases, tables) {
            continue;
        }

        let column = ColumnSchema::new(
            column,
            data_type,
            ordinal as u32,
            is_nullable.eq_ignore_ascii_case("YES"),
            column_key.eq_ignore_ascii_case("PRI"),
        );

        match schemas.last_mut() {
            Some(schema) if schema.name == name => schema.column_schemas.push(column),
            _ => schemas.push(TableSchema::new(name, vec![column])),
        }
    }

    Ok(schemas)
}

fn get_column<'r, T>(row: &'r MySqlRow, index: usize) -> FerryResult<T>
where
    T: sqlx::Decode<'r, sqlx::MySql> + sqlx::Type<sqlx::MySql>,
{
    row.try_get(index).map_err(|err| {
        ferry_error!(ErrorKind::SourceReadError, "Failed to decode a schema column")
            .with_source(err)
    })
}

/// Returns whether a table passes the configured (database, table) filter.
fn table_is_applicable(name: &TableName, databases: &[String], tables: &[String]) -> bool {
    if SYSTEM_DATABASES.iter().any(|db| name.schema.eq_ignore_ascii_case(db)) {
        return false;
    }

    if !databases.is_empty() && !databases.contains(&name.schema) {
        return false;
    }

    if !tables.is_empty() && !tables.iter().any(|t| *t == name.to_string()) {
        return false;
    }

    true
}

/// Data types scanned through `CAST(col AS CHAR)` so their images match what
/// the binlog decoder produces.
fn scanned_as_text(data_type: &str) -> bool {
    matches!(
        data_type,
        "decimal" | "numeric" | "date" | "datetime" | "timestamp" | "time" | "year" | "json"
            | "enum" | "set"
    )
}

/// Builds the select list for a range scan.
fn select_list(schema: &TableSchema) -> String {
    schema
        .column_schemas
        .iter()
        .map(|column| {
            let quoted = quote_identifier(&column.name);
            if scanned_as_text(column.data_type.as_str()) {
                format!("CAST({quoted} AS CHAR) AS {quoted}")
            } else {
                quoted
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Fetches one keyset-paginated batch of rows.
async fn scan_rows(
    pool: &MySqlPool,
    schema: &TableSchema,
    after: Option<&Row>,
    limit: usize,
) -> FerryResult<Vec<Row>> {
    let key_columns: Vec<String> = schema
        .primary_key_columns()
        .map(|c| quote_identifier(&c.name))
        .collect();

    let mut query = format!(
        "SELECT {} FROM {}",
        select_list(schema),
        schema.name.as_quoted_identifier()
    );

    let cursor = after.map(|row| row.key_values(schema));
    if cursor.is_some() {
        let placeholders = vec!["?"; key_columns.len()].join(", ");
        query.push_str(&format!(
            " WHERE ({}) > ({})",
            key_columns.join(", "),
            placeholders
        ));
    }

    query.push_str(&format!(" ORDER BY {} ASC LIMIT ?", key_columns.join(" ASC, ")));

    let mut prepared = sqlx::query(&query);
    if let Some(cursor) = &cursor {
        for value in cursor {
            prepared = bind_value(prepared, value);
        }
    }
    prepared = prepared.bind(limit as u64);

    let rows = prepared.fetch_all(pool).await.map_err(|err| {
        ferry_error!(
            ErrorKind::SourceReadError,
            "Range scan against the source failed",
            schema.name.to_string()
        )
        .with_source(err)
    })?;

    rows.iter().map(|row| decode_scanned_row(row, schema)).collect()
}

type MySqlQuery<'q> = sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>;

fn bind_value<'q>(query: MySqlQuery<'q>, value: &'q ColumnValue) -> MySqlQuery<'q> {
    match value {
        ColumnValue::Null => query.bind(None::<String>),
        ColumnValue::SignedInt(v) => query.bind(*v),
        ColumnValue::UnsignedInt(v) => query.bind(*v),
        ColumnValue::Double(v) => query.bind(*v),
        ColumnValue::Text(v) => query.bind(v.as_str()),
        ColumnValue::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Decodes one scanned row into the pipeline's column representation,
/// driven by the runtime type sqlx reports for each column.
fn decode_scanned_row(row: &MySqlRow, schema: &TableSchema) -> FerryResult<Row> {
    let mut values = Vec::with_capacity(schema.num_columns());

    for index in 0..schema.num_columns() {
        let raw = row.try_get_raw(index).map_err(|err| {
            ferry_error!(
                ErrorKind::SourceReadError,
                "Scanned row is narrower than its table schema",
                schema.name.to_string()
            )
            .with_source(err)
        })?;

        if raw.is_null() {
            values.push(ColumnValue::Null);
            continue;
        }

        let type_name = raw.type_info().name().to_uppercase();
        let value = decode_scanned_value(row, index, &type_name, schema)?;
        values.push(value);
    }

    Ok(Row::new(values))
}

fn decode_scanned_value(
    row: &MySqlRow,
    index: usize,
    type_name: &str,
    schema: &TableSchema,
) -> FerryResult<ColumnValue> {
    let decode_error = |err: sqlx::Error| {
        ferry_error!(
            ErrorKind::SourceReadError,
            "Failed to decode a scanned column",
            format!("{} column {}", schema.name, index)
        )
        .with_source(err)
    };

    let value = if type_name.contains("UNSIGNED") {
        ColumnValue::UnsignedInt(row.try_get::<u64, _>(index).map_err(decode_error)?)
    } else {
        match type_name {
            "BOOLEAN" => ColumnValue::SignedInt(i64::from(
                row.try_get::<bool, _>(index).map_err(decode_error)?,
            )),
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
                ColumnValue::SignedInt(row.try_get::<i64, _>(index).map_err(decode_error)?)
            }
            "FLOAT" => ColumnValue::Double(f64::from(
                row.try_get::<f32, _>(index).map_err(decode_error)?,
            )),
            "DOUBLE" => ColumnValue::Double(row.try_get::<f64, _>(index).map_err(decode_error)?),
            "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" => {
                ColumnValue::Bytes(row.try_get::<Vec<u8>, _>(index).map_err(decode_error)?)
            }
            _ => ColumnValue::Text(row.try_get::<String, _>(index).map_err(decode_error)?),
        }
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_schema() -> TableSchema {
        TableSchema::new(
            TableName::new("shop", "users"),
            vec![
                ColumnSchema::new("id", "bigint", 1, false, true),
                ColumnSchema::new("created_at", "datetime", 2, true, false),
                ColumnSchema::new("name", "varchar", 3, true, false),
            ],
        )
    }

    #[test]
    fn select_list_casts_temporal_columns() {
        assert_eq!(
            select_list(&users_schema()),
            "`id`, CAST(`created_at` AS CHAR) AS `created_at`, `name`"
        );
    }

    #[test]
    fn filter_excludes_system_databases() {
        assert!(!table_is_applicable(
            &TableName::new("mysql", "user"),
            &[],
            &[]
        ));
    }

    #[test]
    fn filter_matches_configured_names() {
        let databases = vec!["shop".to_string()];
        let tables = vec!["shop.users".to_string()];

        assert!(table_is_applicable(
            &TableName::new("shop", "users"),
            &databases,
            &tables
        ));
        assert!(!table_is_applicable(
            &TableName::new("shop", "orders"),
            &databases,
            &tables
        ));
        assert!(!table_is_applicable(
            &TableName::new("billing", "users"),
            &databases,
            &tables
        ));
    }

    #[test]
    fn binlog_values_match_scan_canonical_form() {
        assert_eq!(
            mysql_value_to_column_value(&mysql_async::Value::Date(2024, 6, 15, 0, 0, 0, 0)),
            ColumnValue::Text("2024-06-15".to_string())
        );
        assert_eq!(
            mysql_value_to_column_value(&mysql_async::Value::Date(2024, 6, 15, 14, 30, 45, 0)),
            ColumnValue::Text("2024-06-15 14:30:45".to_string())
        );
        assert_eq!(
            mysql_value_to_column_value(&mysql_async::Value::Bytes(b"hello".to_vec())),
            ColumnValue::Text("hello".to_string())
        );
        assert_eq!(
            mysql_value_to_column_value(&mysql_async::Value::Bytes(vec![0xFF, 0xFE])),
            ColumnValue::Bytes(vec![0xFF, 0xFE])
        );
    }
}
