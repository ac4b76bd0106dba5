use std::fmt;

/// A fully qualified MySQL table name consisting of a schema (database) and
/// table name.
///
/// Binlog row frames identify tables by this pair, so it is the key every
/// schema lookup in the pipeline uses.
#[derive(Debug, Clone, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct TableName {
    /// The schema (database) name containing the table.
    pub schema: String,
    /// The name of the table within the schema.
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> TableName {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Returns the table name as a properly quoted MySQL identifier.
    pub fn as_quoted_identifier(&self) -> String {
        format!("{}.{}", quote_identifier(&self.schema), quote_identifier(&self.name))
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{0}.{1}", self.schema, self.name))
    }
}

/// Quotes a single identifier with backticks, doubling embedded backticks.
pub fn quote_identifier(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Represents the schema of a single column in a MySQL table.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ColumnSchema {
    /// The name of the column.
    pub name: String,
    /// The MySQL data type of the column as reported by
    /// `information_schema.COLUMNS.DATA_TYPE` (e.g. `bigint`, `varchar`).
    pub data_type: String,
    /// The 1-based ordinal position of the column.
    pub ordinal: u32,
    /// Whether the column can contain NULL values.
    pub nullable: bool,
    /// Whether the column is part of the table's primary key.
    pub primary: bool,
}

impl ColumnSchema {
    pub fn new(
        name: impl Into<String>,
        data_type: impl Into<String>,
        ordinal: u32,
        nullable: bool,
        primary: bool,
    ) -> ColumnSchema {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            ordinal,
            nullable,
            primary,
        }
    }
}

/// Represents the complete schema of a MySQL table.
///
/// Column schemas are ordered by ordinal position; row images produced by
/// both the range scans and the binlog decoder follow the same order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TableSchema {
    /// The fully qualified name of the table.
    pub name: TableName,
    /// The schemas of all columns in the table, in ordinal order.
    pub column_schemas: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(name: TableName, column_schemas: Vec<ColumnSchema>) -> Self {
        Self {
            name,
            column_schemas,
        }
    }

    /// Returns the number of columns in the table.
    pub fn num_columns(&self) -> usize {
        self.column_schemas.len()
    }

    /// Returns `true` if at least one column belongs to the primary key.
    pub fn has_primary_key(&self) -> bool {
        self.column_schemas.iter().any(|c| c.primary)
    }

    /// Returns the primary-key columns in declaration order.
    pub fn primary_key_columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.column_schemas.iter().filter(|c| c.primary)
    }

    /// Returns the zero-based positions of the primary-key columns.
    pub fn primary_key_ordinals(&self) -> Vec<usize> {
        self.column_schemas
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary)
            .map(|(i, _)| i)
            .collect()
    }

    /// Returns the non-primary-key columns in declaration order.
    pub fn non_key_columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.column_schemas.iter().filter(|c| !c.primary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn quoted_identifier_escapes_backticks() {
        let table = TableName::new("shop", "odd`name");
        assert_eq!(table.as_quoted_identifier(), "`shop`.`odd``name`");
    }

    #[test]
    fn primary_key_accessors() {
        let schema = users_schema();
        assert!(schema.has_primary_key());
        assert_eq!(schema.primary_key_ordinals(), vec![0]);
        let pk_names: Vec<_> = schema.primary_key_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(pk_names, vec!["id"]);
    }

    #[test]
    fn table_without_primary_key_is_detectable() {
        let schema = TableSchema::new(
            TableName::new("shop", "audit_log"),
            vec![ColumnSchema::new("entry", "text", 1, true, false)],
        );
        assert!(!schema.has_primary_key());
    }
}
