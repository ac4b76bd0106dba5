//! The state dump document.
//!
//! On graceful stop and after a fatal error, the last observed change-log
//! positions are written to a durable location, keyed by producer name, so
//! external tooling can resume or post-mortem the run. The format is
//! human-readable JSON.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rowferry_mysql::position::BinlogPosition;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, FerryResult};
use crate::ferry_error;

/// Producer name the binlog streamer records its position under.
pub const BINLOG_STREAMER: &str = "binlog_streamer";
/// Producer name the data iterator's snapshot basis is recorded under.
pub const DATA_ITERATOR: &str = "data_iterator";

/// The last position each producer reached.
///
/// The streamer records the position of the last event it delivered; the
/// iterator records the captured starting position its snapshot is based on.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    positions: Arc<Mutex<BTreeMap<String, BinlogPosition>>>,
}

impl ProgressTracker {
    pub fn record(&self, producer: &str, position: BinlogPosition) {
        let mut positions = self.positions.lock().unwrap_or_else(|e| e.into_inner());
        positions.insert(producer.to_string(), position);
    }

    pub fn snapshot(&self) -> BTreeMap<String, BinlogPosition> {
        self.positions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// The failure section of a dump written after a fatal error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureDump {
    /// The component that reported the primary error.
    pub component: String,
    /// The primary error, rendered as text.
    pub error: String,
}

/// The document written to the state dump path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDump {
    /// The coordinator state at the time of the dump.
    pub overall_state: String,
    /// Last observed change-log positions, keyed by producer name.
    pub positions: BTreeMap<String, BinlogPosition>,
    /// Present when the dump was triggered by a fatal error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDump>,
}

/// Writes the dump document as pretty-printed JSON.
pub fn write_state_dump(path: &Path, dump: &StateDump) -> FerryResult<()> {
    let rendered = serde_json::to_string_pretty(dump).map_err(|err| {
        ferry_error!(ErrorKind::InvalidState, "Failed to serialize the state dump")
            .with_source(err)
    })?;

    std::fs::write(path, rendered).map_err(|err| {
        ferry_error!(
            ErrorKind::InvalidState,
            "Failed to write the state dump",
            path.display().to_string()
        )
        .with_source(err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_round_trips_and_is_keyed_by_producer() {
        let progress = ProgressTracker::default();
        progress.record(BINLOG_STREAMER, BinlogPosition::new("mysql-bin.000002", 120));
        progress.record(DATA_ITERATOR, BinlogPosition::new("mysql-bin.000002", 4));

        let dump = StateDump {
            overall_state: "done".to_string(),
            positions: progress.snapshot(),
            failure: None,
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        write_state_dump(&path, &dump).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let decoded: StateDump = serde_json::from_str(&raw).unwrap();

        assert_eq!(decoded.positions.len(), 2);
        assert_eq!(
            decoded.positions[BINLOG_STREAMER],
            BinlogPosition::new("mysql-bin.000002", 120)
        );
        assert!(decoded.failure.is_none());
    }
}
