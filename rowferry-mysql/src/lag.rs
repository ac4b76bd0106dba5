//! Replication status probes against a MySQL server.
//!
//! The throttler and the coordinator both observe the source through these
//! queries: the current head of the binary log, the replication lag reported
//! by a replica, and the cheap status query used to verify connectivity.

use std::time::Duration;

use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};
use thiserror::Error;

use crate::position::BinlogPosition;

/// Errors that can occur while probing replication status.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("binary logging appears to be disabled: {0}")]
    BinaryLogDisabled(String),
}

/// Details reported by the connectivity check.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// The negotiated TLS cipher, empty when the session is not encrypted.
    pub ssl_cipher: String,
}

impl ConnectionInfo {
    pub fn has_ssl(&self) -> bool {
        !self.ssl_cipher.is_empty()
    }
}

/// Verifies connectivity with a cheap status query and reports whether the
/// session is TLS-protected.
pub async fn check_connection(pool: &MySqlPool) -> Result<ConnectionInfo, ProbeError> {
    let row: MySqlRow = sqlx::query("SHOW STATUS LIKE 'Ssl_cipher'")
        .fetch_one(pool)
        .await?;
    let ssl_cipher: String = row.try_get(1)?;

    Ok(ConnectionInfo { ssl_cipher })
}

/// Reads the current head position of the server's binary log.
///
/// Tries `SHOW BINARY LOG STATUS` first (MySQL 8.2+), falling back to
/// `SHOW MASTER STATUS` for older servers.
pub async fn current_binlog_position(pool: &MySqlPool) -> Result<BinlogPosition, ProbeError> {
    let row = match sqlx::query("SHOW BINARY LOG STATUS").fetch_optional(pool).await {
        Ok(row) => row,
        Err(_) => sqlx::query("SHOW MASTER STATUS").fetch_optional(pool).await?,
    };

    let Some(row) = row else {
        return Err(ProbeError::BinaryLogDisabled(
            "the status query returned no rows".to_string(),
        ));
    };

    let file: String = row.try_get(0)?;
    let offset: u64 = row.try_get(1)?;

    if file.is_empty() {
        return Err(ProbeError::BinaryLogDisabled(
            "the status query returned an empty file name".to_string(),
        ));
    }

    let gtid_set = row
        .try_get::<String, _>("Executed_Gtid_Set")
        .ok()
        .filter(|s| !s.is_empty());

    let mut position = BinlogPosition::new(file, offset);
    if let Some(gtid_set) = gtid_set {
        position = position.with_gtid_set(gtid_set);
    }

    Ok(position)
}

/// Reads the replication lag this server reports as a replica.
///
/// Returns `None` when the server is not configured as a replica or when the
/// replica threads are stopped and no lag figure is available. Tries
/// `SHOW REPLICA STATUS` first, falling back to `SHOW SLAVE STATUS` for
/// pre-8.0.22 servers.
pub async fn replication_lag(pool: &MySqlPool) -> Result<Option<Duration>, ProbeError> {
    let (row, column) = match sqlx::query("SHOW REPLICA STATUS").fetch_optional(pool).await {
        Ok(row) => (row, "Seconds_Behind_Source"),
        Err(_) => (
            sqlx::query("SHOW SLAVE STATUS").fetch_optional(pool).await?,
            "Seconds_Behind_Master",
        ),
    };

    let Some(row) = row else {
        return Ok(None);
    };

    let seconds: Option<i64> = row.try_get(column)?;

    Ok(seconds.map(|s| Duration::from_secs(s.max(0) as u64)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_info_detects_ssl() {
        let with_tls = ConnectionInfo {
            ssl_cipher: "TLS_AES_256_GCM_SHA384".to_string(),
        };
        assert!(with_tls.has_ssl());

        let without_tls = ConnectionInfo {
            ssl_cipher: String::new(),
        };
        assert!(!without_tls.has_ssl());
    }
}
