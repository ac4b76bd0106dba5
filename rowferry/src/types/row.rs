use rowferry_mysql::types::schema::TableSchema;
use rowferry_mysql::types::value::ColumnValue;

use crate::error::{ErrorKind, FerryResult};
use crate::ferry_error;

/// One row image, ordered by column ordinal.
///
/// Both producers emit rows in the table's declared column order, so a row
/// is positionally aligned with its [`TableSchema`].
#[derive(Debug, Clone, PartialEq)]
pub struct Row(pub Vec<ColumnValue>);

impl Row {
    pub fn new(values: Vec<ColumnValue>) -> Self {
        Row(values)
    }

    pub fn values(&self) -> &[ColumnValue] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the primary-key values of this row in key declaration order.
    pub fn key_values(&self, schema: &TableSchema) -> Vec<ColumnValue> {
        schema
            .primary_key_ordinals()
            .into_iter()
            .filter_map(|i| self.0.get(i).cloned())
            .collect()
    }
}

impl From<Vec<ColumnValue>> for Row {
    fn from(values: Vec<ColumnValue>) -> Self {
        Row(values)
    }
}

/// A single primary-key component.
///
/// Primary keys must be integers or lexicographically comparable values;
/// anything else is rejected when the key is extracted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyValue {
    SignedInt(i64),
    UnsignedInt(u64),
    Text(String),
    Bytes(Vec<u8>),
}

impl TryFrom<&ColumnValue> for KeyValue {
    type Error = crate::error::FerryError;

    fn try_from(value: &ColumnValue) -> FerryResult<Self> {
        match value {
            ColumnValue::SignedInt(v) => Ok(KeyValue::SignedInt(*v)),
            ColumnValue::UnsignedInt(v) => Ok(KeyValue::UnsignedInt(*v)),
            ColumnValue::Text(v) => Ok(KeyValue::Text(v.clone())),
            ColumnValue::Bytes(v) => Ok(KeyValue::Bytes(v.clone())),
            ColumnValue::Null => Err(ferry_error!(
                ErrorKind::SchemaError,
                "Primary key component is NULL"
            )),
            ColumnValue::Double(_) => Err(ferry_error!(
                ErrorKind::SchemaError,
                "Primary key component is not an ordered type",
                "floating point columns cannot be used as a copy cursor"
            )),
        }
    }
}

/// The totally ordered primary-key image of one row.
///
/// Composite keys compare lexicographically in key declaration order, which
/// matches the `ORDER BY pk1, pk2, ...` the iterator scans with.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey(pub Vec<KeyValue>);

impl RowKey {
    /// Extracts the primary-key image of `row` according to `schema`.
    pub fn for_row(row: &Row, schema: &TableSchema) -> FerryResult<RowKey> {
        let ordinals = schema.primary_key_ordinals();
        let mut components = Vec::with_capacity(ordinals.len());

        for ordinal in ordinals {
            let value = row.0.get(ordinal).ok_or_else(|| {
                ferry_error!(
                    ErrorKind::SchemaError,
                    "Row is narrower than its table schema",
                    schema.name.to_string()
                )
            })?;
            components.push(KeyValue::try_from(value)?);
        }

        Ok(RowKey(components))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowferry_mysql::types::schema::{ColumnSchema, TableName};

    fn composite_schema() -> TableSchema {
        TableSchema::new(
            TableName::new("shop", "order_lines"),
            vec![
                ColumnSchema::new("order_id", "bigint", 1, false, true),
                ColumnSchema::new("line_no", "int", 2, false, true),
                ColumnSchema::new("sku", "varchar", 3, true, false),
            ],
        )
    }

    #[test]
    fn composite_keys_compare_lexicographically() {
        let schema = composite_schema();
        let a = Row::new(vec![
            ColumnValue::SignedInt(1),
            ColumnValue::SignedInt(9),
            ColumnValue::Text("a".into()),
        ]);
        let b = Row::new(vec![
            ColumnValue::SignedInt(2),
            ColumnValue::SignedInt(1),
            ColumnValue::Text("b".into()),
        ]);

        let key_a = RowKey::for_row(&a, &schema).unwrap();
        let key_b = RowKey::for_row(&b, &schema).unwrap();
        assert!(key_a < key_b);
    }

    #[test]
    fn null_key_component_is_rejected() {
        let schema = composite_schema();
        let row = Row::new(vec![
            ColumnValue::Null,
            ColumnValue::SignedInt(1),
            ColumnValue::Text("a".into()),
        ]);
        let err = RowKey::for_row(&row, &schema).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaError);
    }

    #[test]
    fn key_values_follow_declaration_order() {
        let schema = composite_schema();
        let row = Row::new(vec![
            ColumnValue::SignedInt(7),
            ColumnValue::SignedInt(3),
            ColumnValue::Text("widget".into()),
        ]);
        assert_eq!(
            row.key_values(&schema),
            vec![ColumnValue::SignedInt(7), ColumnValue::SignedInt(3)]
        );
    }
}
