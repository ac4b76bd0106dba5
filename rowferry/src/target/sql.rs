//! Rendering of row events into parameterised MySQL statements.
//!
//! Every rendered statement is idempotent under replay: inserts resolve
//! primary-key conflicts by overwriting (or keeping, when configured) the
//! existing row, updates write the full post-image addressed by the
//! before-image primary key, and deletes of absent rows affect zero rows.

use rowferry_config::shared::ConflictStrategy;
use rowferry_mysql::types::schema::{quote_identifier, TableSchema};
use rowferry_mysql::types::value::ColumnValue;

use crate::error::{ErrorKind, FerryResult};
use crate::ferry_error;
use crate::schema::SchemaCache;
use crate::types::{DmlEvent, Row};

/// The session setup every write transaction starts with.
///
/// UTC and STRICT_ALL_TABLES are required for bit-exact replay of timestamp
/// and truncation semantics on the target.
pub const SESSION_SETUP_STATEMENT: &str = "SET SESSION time_zone = '+00:00', \
     sql_mode = CONCAT(@@session.sql_mode, ',STRICT_ALL_TABLES')";

/// One parameterised statement ready to execute against the target.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedStatement {
    pub sql: String,
    pub params: Vec<ColumnValue>,
}

/// Renders one event against the cached schema of its table.
pub fn render_event(
    event: &DmlEvent,
    schema_cache: &SchemaCache,
    strategy: ConflictStrategy,
) -> FerryResult<RenderedStatement> {
    let schema = schema_cache.get(event.table()).ok_or_else(|| {
        ferry_error!(
            ErrorKind::SchemaError,
            "Event references a table outside the schema cache",
            event.table().to_string()
        )
    })?;

    match event {
        DmlEvent::Insert { row, .. } => render_insert(schema, row, strategy),
        DmlEvent::Update { before, after, .. } => render_update(schema, before, after),
        DmlEvent::Delete { row, .. } => render_delete(schema, row),
    }
}

fn check_arity(schema: &TableSchema, row: &Row) -> FerryResult<()> {
    if row.len() != schema.num_columns() {
        return Err(ferry_error!(
            ErrorKind::SchemaError,
            "Row shape is inconsistent with the cached schema",
            format!(
                "{}: row has {} values, schema has {} columns",
                schema.name,
                row.len(),
                schema.num_columns()
            )
        ));
    }

    Ok(())
}

fn render_insert(
    schema: &TableSchema,
    row: &Row,
    strategy: ConflictStrategy,
) -> FerryResult<RenderedStatement> {
    check_arity(schema, row)?;

    let columns: Vec<String> = schema
        .column_schemas
        .iter()
        .map(|c| quote_identifier(&c.name))
        .collect();
    let placeholders = vec!["?"; columns.len()].join(", ");

    let sql = match strategy {
        ConflictStrategy::InsertIgnore => format!(
            "INSERT IGNORE INTO {} ({}) VALUES ({})",
            schema.name.as_quoted_identifier(),
            columns.join(", "),
            placeholders
        ),
        ConflictStrategy::Upsert => {
            // Overwrite the existing row with the new post-image. When every
            // column belongs to the key there is nothing to overwrite and the
            // assignment degenerates to a no-op.
            let assignments: Vec<String> = schema
                .non_key_columns()
                .map(|c| {
                    let quoted = quote_identifier(&c.name);
                    format!("{quoted} = VALUES({quoted})")
                })
                .collect();

            let assignments = if assignments.is_empty() {
                let first_key = quote_identifier(
                    &schema
                        .column_schemas
                        .first()
                        .map(|c| c.name.clone())
                        .unwrap_or_default(),
                );
                format!("{first_key} = {first_key}")
            } else {
                assignments.join(", ")
            };

            format!(
                "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
                schema.name.as_quoted_identifier(),
                columns.join(", "),
                placeholders,
                assignments
            )
        }
    };

    Ok(RenderedStatement {
        sql,
        params: row.values().to_vec(),
    })
}

fn render_update(schema: &TableSchema, before: &Row, after: &Row) -> FerryResult<RenderedStatement> {
    check_arity(schema, before)?;
    check_arity(schema, after)?;

    let assignments: Vec<String> = schema
        .column_schemas
        .iter()
        .map(|c| format!("{} = ?", quote_identifier(&c.name)))
        .collect();

    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        schema.name.as_quoted_identifier(),
        assignments.join(", "),
        key_predicate(schema)
    );

    let mut params = after.values().to_vec();
    params.extend(before.key_values(schema));

    Ok(RenderedStatement { sql, params })
}

fn render_delete(schema: &TableSchema, row: &Row) -> FerryResult<RenderedStatement> {
    check_arity(schema, row)?;

    let sql = format!(
        "DELETE FROM {} WHERE {}",
        schema.name.as_quoted_identifier(),
        key_predicate(schema)
    );

    Ok(RenderedStatement {
        sql,
        params: row.key_values(schema),
    })
}

fn key_predicate(schema: &TableSchema) -> String {
    schema
        .primary_key_columns()
        .map(|c| format!("{} = ?", quote_identifier(&c.name)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowferry_mysql::types::schema::{ColumnSchema, TableName};

    fn cache() -> SchemaCache {
        SchemaCache::from_schemas(vec![
            TableSchema::new(
                TableName::new("shop", "users"),
                vec![
                    ColumnSchema::new("id", "bigint", 1, false, true),
                    ColumnSchema::new("name", "varchar", 2, true, false),
                ],
            ),
            TableSchema::new(
                TableName::new("shop", "order_lines"),
                vec![
                    ColumnSchema::new("order_id", "bigint", 1, false, true),
                    ColumnSchema::new("line_no", "int", 2, false, true),
                ],
            ),
        ])
        .unwrap()
    }

    fn users() -> TableName {
        TableName::new("shop", "users")
    }

    #[test]
    fn session_setup_pins_timezone_and_strict_mode() {
        // Bit-exact replay depends on this exact session contract.
        assert!(SESSION_SETUP_STATEMENT.starts_with("SET SESSION "));
        assert!(SESSION_SETUP_STATEMENT.contains("time_zone = '+00:00'"));
        assert!(SESSION_SETUP_STATEMENT
            .contains("sql_mode = CONCAT(@@session.sql_mode, ',STRICT_ALL_TABLES')"));
    }

    #[test]
    fn insert_renders_as_upsert() {
        let event = DmlEvent::copy_insert(
            users(),
            Row::new(vec![
                ColumnValue::SignedInt(1),
                ColumnValue::Text("a".into()),
            ]),
        );

        let statement = render_event(&event, &cache(), ConflictStrategy::Upsert).unwrap();
        assert_eq!(
            statement.sql,
            "INSERT INTO `shop`.`users` (`id`, `name`) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE `name` = VALUES(`name`)"
        );
        assert_eq!(statement.params.len(), 2);
    }

    #[test]
    fn insert_ignore_is_available_by_configuration() {
        let event = DmlEvent::copy_insert(
            users(),
            Row::new(vec![
                ColumnValue::SignedInt(1),
                ColumnValue::Text("a".into()),
            ]),
        );

        let statement = render_event(&event, &cache(), ConflictStrategy::InsertIgnore).unwrap();
        assert_eq!(
            statement.sql,
            "INSERT IGNORE INTO `shop`.`users` (`id`, `name`) VALUES (?, ?)"
        );
    }

    #[test]
    fn upsert_on_key_only_table_degenerates_to_noop_assignment() {
        let event = DmlEvent::copy_insert(
            TableName::new("shop", "order_lines"),
            Row::new(vec![ColumnValue::SignedInt(1), ColumnValue::SignedInt(2)]),
        );

        let statement = render_event(&event, &cache(), ConflictStrategy::Upsert).unwrap();
        assert!(statement.sql.ends_with("ON DUPLICATE KEY UPDATE `order_id` = `order_id`"));
    }

    #[test]
    fn update_writes_post_image_keyed_by_before_image() {
        let event = DmlEvent::Update {
            table: users(),
            before: Row::new(vec![
                ColumnValue::SignedInt(1),
                ColumnValue::Text("a".into()),
            ]),
            after: Row::new(vec![
                ColumnValue::SignedInt(1),
                ColumnValue::Text("z".into()),
            ]),
            position: None,
        };

        let statement = render_event(&event, &cache(), ConflictStrategy::Upsert).unwrap();
        assert_eq!(
            statement.sql,
            "UPDATE `shop`.`users` SET `id` = ?, `name` = ? WHERE `id` = ?"
        );
        assert_eq!(
            statement.params,
            vec![
                ColumnValue::SignedInt(1),
                ColumnValue::Text("z".into()),
                ColumnValue::SignedInt(1),
            ]
        );
    }

    #[test]
    fn delete_is_keyed_by_the_full_primary_key() {
        let event = DmlEvent::Delete {
            table: TableName::new("shop", "order_lines"),
            row: Row::new(vec![ColumnValue::SignedInt(7), ColumnValue::SignedInt(3)]),
            position: None,
        };

        let statement = render_event(&event, &cache(), ConflictStrategy::Upsert).unwrap();
        assert_eq!(
            statement.sql,
            "DELETE FROM `shop`.`order_lines` WHERE `order_id` = ? AND `line_no` = ?"
        );
        assert_eq!(
            statement.params,
            vec![ColumnValue::SignedInt(7), ColumnValue::SignedInt(3)]
        );
    }

    #[test]
    fn mismatched_row_arity_is_a_schema_error() {
        let event = DmlEvent::copy_insert(users(), Row::new(vec![ColumnValue::SignedInt(1)]));
        let err = render_event(&event, &cache(), ConflictStrategy::Upsert).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaError);
    }

    #[test]
    fn unknown_table_is_a_schema_error() {
        let event = DmlEvent::copy_insert(
            TableName::new("shop", "missing"),
            Row::new(vec![ColumnValue::SignedInt(1)]),
        );
        let err = render_event(&event, &cache(), ConflictStrategy::Upsert).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaError);
    }
}
