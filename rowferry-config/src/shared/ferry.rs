use std::time::Duration;

use serde::Deserialize;

use crate::shared::{
    BatchConfig, MySqlConnectionConfig, ReconnectionConfig, ThrottlerConfig, ValidationError,
};

/// How an insert resolves a primary-key conflict on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Overwrite the existing row with the new post-image
    /// (`INSERT ... ON DUPLICATE KEY UPDATE`).
    Upsert,
    /// Keep the existing row (`INSERT IGNORE`).
    InsertIgnore,
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        Self::Upsert
    }
}

/// Configuration for one ferry run.
///
/// Contains everything the coordinator needs: both endpoints, the table
/// filter, copy parallelism, throttling thresholds, retry budgets and the
/// operator-facing knobs.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid
/// accidentally leaking connection secrets in serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct FerryConfig {
    /// Connection settings for the source database.
    pub source: MySqlConnectionConfig,
    /// Connection settings for the target database.
    pub target: MySqlConnectionConfig,

    /// Databases whose tables participate in the run. Empty means all
    /// non-system databases.
    #[serde(default)]
    pub applicable_databases: Vec<String>,
    /// Tables participating in the run, as `database.table` names. Empty
    /// means every table of the applicable databases.
    #[serde(default)]
    pub applicable_tables: Vec<String>,

    /// When true the coordinator proceeds to cutover as soon as the row copy
    /// completes, without waiting for the operator to set the flag.
    #[serde(default)]
    pub automatic_cutover: bool,

    /// Whole-batch retry budget for writes against the target.
    #[serde(default = "default_max_write_retries")]
    pub max_write_retries_on_target_db_error: u32,

    /// Batch sizing for range scans.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Number of concurrent table-copy workers.
    #[serde(default = "default_iterator_worker_count")]
    pub iterator_worker_count: u16,

    /// Replication-lag throttling thresholds.
    #[serde(default)]
    pub throttler: ThrottlerConfig,
    /// Binlog reconnection behavior.
    #[serde(default)]
    pub reconnection: ReconnectionConfig,

    /// Conflict resolution for replayed inserts.
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,

    /// Server id this process registers with when it joins the source as a
    /// replication follower. Must be unique among the source's replicas.
    #[serde(default = "default_server_id")]
    pub server_id: u32,

    /// Interval at which the coordinator polls the automatic-cutover flag
    /// while waiting for cutover, in milliseconds.
    #[serde(default = "default_cutover_poll_interval_ms")]
    pub cutover_poll_interval_ms: u64,
    /// Interval at which the binlog streamer re-checks its flush target when
    /// no events arrive, in milliseconds.
    #[serde(default = "default_flush_poll_interval_ms")]
    pub flush_poll_interval_ms: u64,
    /// Deadline applied to individual database operations, in milliseconds.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// Path the state dump document is written to on graceful stop or after
    /// a fatal error.
    #[serde(default = "default_state_dump_path")]
    pub state_dump_path: String,
}

impl FerryConfig {
    pub const DEFAULT_MAX_WRITE_RETRIES: u32 = 5;
    pub const DEFAULT_ITERATOR_WORKER_COUNT: u16 = 4;

    pub fn cutover_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cutover_poll_interval_ms)
    }

    pub fn flush_poll_interval(&self) -> Duration {
        Duration::from_millis(self.flush_poll_interval_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Validates the whole configuration tree.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.batch.validate()?;
        self.throttler.validate()?;
        self.reconnection.validate()?;

        if self.iterator_worker_count == 0 {
            return Err(ValidationError::invalid(
                "iterator_worker_count",
                "must be greater than 0",
            ));
        }

        if self.max_write_retries_on_target_db_error == 0 {
            return Err(ValidationError::invalid(
                "max_write_retries_on_target_db_error",
                "must be greater than 0",
            ));
        }

        if self.cutover_poll_interval_ms == 0 {
            return Err(ValidationError::invalid(
                "cutover_poll_interval_ms",
                "must be greater than 0",
            ));
        }

        if self.flush_poll_interval_ms == 0 {
            return Err(ValidationError::invalid(
                "flush_poll_interval_ms",
                "must be greater than 0",
            ));
        }

        if self.operation_timeout_ms == 0 {
            return Err(ValidationError::invalid(
                "operation_timeout_ms",
                "must be greater than 0",
            ));
        }

        if self.state_dump_path.is_empty() {
            return Err(ValidationError::invalid(
                "state_dump_path",
                "must not be empty",
            ));
        }

        Ok(())
    }
}

fn default_max_write_retries() -> u32 {
    FerryConfig::DEFAULT_MAX_WRITE_RETRIES
}

fn default_iterator_worker_count() -> u16 {
    FerryConfig::DEFAULT_ITERATOR_WORKER_COUNT
}

fn default_server_id() -> u32 {
    99399
}

fn default_cutover_poll_interval_ms() -> u64 {
    1000
}

fn default_flush_poll_interval_ms() -> u64 {
    500
}

fn default_operation_timeout_ms() -> u64 {
    60_000
}

fn default_state_dump_path() -> String {
    "rowferry-state-dump.json".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> FerryConfig {
        serde_json::from_str(
            r#"{
                "source": {"host": "src.internal", "username": "ferry"},
                "target": {"host": "dst.internal", "username": "ferry"}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn minimal_config_is_valid() {
        let config = minimal_config();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.max_write_retries_on_target_db_error,
            FerryConfig::DEFAULT_MAX_WRITE_RETRIES
        );
        assert_eq!(config.conflict_strategy, ConflictStrategy::Upsert);
        assert!(!config.automatic_cutover);
    }

    #[test]
    fn rejects_zero_worker_count() {
        let mut config = minimal_config();
        config.iterator_worker_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_write_retries() {
        let mut config = minimal_config();
        config.max_write_retries_on_target_db_error = 0;
        assert!(config.validate().is_err());
    }
}
