//! The production target: transactional batch apply over a sqlx pool.

use std::sync::Arc;
use std::time::Duration;

use rowferry_config::shared::{ConflictStrategy, MySqlConnectionConfig};
use rowferry_mysql::connect::connect_pool;
use rowferry_mysql::lag;
use rowferry_mysql::types::value::ColumnValue;
use sqlx::MySqlPool;
use tracing::info;

use crate::error::{ErrorKind, FerryResult};
use crate::schema::SchemaCache;
use crate::{bail, ferry_error};
use crate::target::sql::{render_event, SESSION_SETUP_STATEMENT};
use crate::target::Target;
use crate::types::DmlEvent;

/// Connections kept in the write pool.
const POOL_MAX_CONNECTIONS: u32 = 8;

/// A writer against a real MySQL target.
#[derive(Debug, Clone)]
pub struct MySqlTarget {
    pool: MySqlPool,
    config: Arc<MySqlConnectionConfig>,
    conflict_strategy: ConflictStrategy,
    operation_timeout: Duration,
}

impl MySqlTarget {
    /// Opens the write pool against the target.
    pub async fn connect(
        config: MySqlConnectionConfig,
        conflict_strategy: ConflictStrategy,
        operation_timeout: Duration,
    ) -> FerryResult<Self> {
        let pool = connect_pool(&config, POOL_MAX_CONNECTIONS).await.map_err(|err| {
            ferry_error!(
                ErrorKind::ConfigError,
                "Failed to connect to the target database",
                format!("{}:{}", config.host, config.port)
            )
            .with_source(err)
        })?;

        Ok(Self {
            pool,
            config: Arc::new(config),
            conflict_strategy,
            operation_timeout,
        })
    }

    async fn apply_transaction(
        &self,
        schema_cache: &SchemaCache,
        events: &[DmlEvent],
    ) -> FerryResult<()> {
        let write_error = |err: sqlx::Error, description: &'static str| {
            ferry_error!(ErrorKind::TargetWriteError, "Batch write failed", description)
                .with_source(err)
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| write_error(err, "while beginning the transaction"))?;

        sqlx::query(SESSION_SETUP_STATEMENT)
            .execute(&mut *tx)
            .await
            .map_err(|err| write_error(err, "while setting the session"))?;

        for event in events {
            let statement = render_event(event, schema_cache, self.conflict_strategy)?;

            let mut prepared = sqlx::query(&statement.sql);
            for value in &statement.params {
                prepared = bind_value(prepared, value);
            }

            prepared
                .execute(&mut *tx)
                .await
                .map_err(|err| write_error(err, "while executing a statement"))?;
        }

        tx.commit()
            .await
            .map_err(|err| write_error(err, "while committing the transaction"))
    }
}

impl Target for MySqlTarget {
    async fn check_connectivity(&self) -> FerryResult<()> {
        let info = lag::check_connection(&self.pool).await.map_err(|err| {
            ferry_error!(ErrorKind::ConfigError, "Target connectivity check failed")
                .with_source(err)
        })?;

        info!(
            host = %self.config.host,
            has_ssl = info.has_ssl(),
            "connected to the target database"
        );

        if self.config.tls.enabled && !info.has_ssl() {
            bail!(
                ErrorKind::ConfigError,
                "Target requires TLS but the session is not encrypted"
            );
        }

        Ok(())
    }

    async fn apply_batch(&self, schema_cache: &SchemaCache, events: &[DmlEvent]) -> FerryResult<()> {
        // Dropping the transaction on the timeout path rolls it back, so a
        // timed-out batch leaves no partial writes behind.
        match tokio::time::timeout(
            self.operation_timeout,
            self.apply_transaction(schema_cache, events),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ferry_error!(
                ErrorKind::Timeout,
                "Batch write exceeded its deadline"
            )),
        }
    }
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
