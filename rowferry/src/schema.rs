use std::collections::HashMap;
use std::sync::Arc;

use rowferry_mysql::types::schema::{TableName, TableSchema};
use tracing::info;

use crate::bail;
use crate::error::{ErrorKind, FerryResult};
use crate::source::SourceClient;

/// The immutable schema cache for one run.
///
/// Populated once before either producer starts and read-only thereafter,
/// so lookups need no locking. The cache is authoritative: a binlog row
/// whose shape disagrees with it is a fatal error, and schema changes during
/// a run are not supported.
#[derive(Debug, Clone, Default)]
pub struct SchemaCache {
    tables: Arc<HashMap<TableName, Arc<TableSchema>>>,
}

impl SchemaCache {
    /// Builds a cache from already-discovered schemas.
    ///
    /// Rejects tables without a primary key: the iterator cannot paginate
    /// them and replayed events could not address their rows.
    pub fn from_schemas(schemas: Vec<TableSchema>) -> FerryResult<Self> {
        let mut tables = HashMap::with_capacity(schemas.len());

        for schema in schemas {
            if !schema.has_primary_key() {
                bail!(
                    ErrorKind::SchemaError,
                    "Applicable table has no primary key",
                    schema.name.to_string()
                );
            }

            tables.insert(schema.name.clone(), Arc::new(schema));
        }

        Ok(Self {
            tables: Arc::new(tables),
        })
    }

    /// Discovers the applicable tables on the source and builds the cache.
    pub async fn load<S: SourceClient>(
        source: &S,
        databases: &[String],
        tables: &[String],
    ) -> FerryResult<Self> {
        let schemas = source.load_table_schemas(databases, tables).await?;
        let cache = Self::from_schemas(schemas)?;

        info!(tables = cache.len(), "loaded table schemas");

        Ok(cache)
    }

    pub fn get(&self, table: &TableName) -> Option<&Arc<TableSchema>> {
        self.tables.get(table)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<TableSchema>> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowferry_mysql::types::schema::ColumnSchema;

    #[test]
    fn rejects_table_without_primary_key() {
        let schemas = vec![TableSchema::new(
            TableName::new("shop", "audit_log"),
            vec![ColumnSchema::new("entry", "text", 1, true, false)],
        )];

        let err = SchemaCache::from_schemas(schemas).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaError);
        assert!(err.to_string().contains("shop.audit_log"));
    }

    #[test]
    fn caches_tables_by_name() {
        let schemas = vec![TableSchema::new(
            TableName::new("shop", "users"),
            vec![
                ColumnSchema::new("id", "bigint", 1, false, true),
                ColumnSchema::new("name", "varchar", 2, true, false),
            ],
        )];

        let cache = SchemaCache::from_schemas(schemas).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&TableName::new("shop", "users")).is_some());
        assert!(cache.get(&TableName::new("shop", "orders")).is_none());
    }
}
