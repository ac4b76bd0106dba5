use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A coordinate into the source's binary log.
///
/// Positions are totally ordered: first by the numeric suffix of the binlog
/// file name, then by the byte offset within the file. File names that do
/// not carry a numeric suffix fall back to length-then-lexicographic
/// comparison, which still orders fixed-width rotated names correctly across
/// a width rollover (`.999999` to `.1000000`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinlogPosition {
    /// The binlog file name, e.g. `mysql-bin.000123`.
    pub file: String,
    /// The byte offset within the file.
    pub offset: u64,
    /// The executed GTID set at this position, when the server runs with
    /// GTIDs enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gtid_set: Option<String>,
}

impl BinlogPosition {
    pub fn new(file: impl Into<String>, offset: u64) -> Self {
        Self {
            file: file.into(),
            offset,
            gtid_set: None,
        }
    }

    pub fn with_gtid_set(mut self, gtid_set: impl Into<String>) -> Self {
        self.gtid_set = Some(gtid_set.into());
        self
    }

    /// Returns the numeric suffix of the binlog file name, if it has one.
    ///
    /// Binlog files are typically named like `mysql-bin.000123` or
    /// `binlog.000456`.
    pub fn file_index(&self) -> Option<u64> {
        self.file.rsplit_once('.')?.1.parse().ok()
    }
}

impl Ord for BinlogPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        let file_order = match (self.file_index(), other.file_index()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => (self.file.len(), &self.file).cmp(&(other.file.len(), &other.file)),
        };

        file_order.then(self.offset.cmp(&other.offset))
    }
}

impl PartialOrd for BinlogPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.offset)
    }
}
