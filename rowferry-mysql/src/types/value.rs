use std::fmt;

/// A single MySQL column value as it travels through the pipeline.
///
/// Temporal and decimal columns are carried as canonical MySQL text: range
/// scans `CAST` them to `CHAR` and the binlog decoder formats them the same
/// way, so the two producers emit byte-identical images of the same row.
/// That shared canonical form is what makes replaying an event over an
/// already-copied row a no-op.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    SignedInt(i64),
    UnsignedInt(u64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    /// Formats a MySQL DATE / DATETIME value into its canonical text form.
    ///
    /// A value with no time component renders as a plain date, matching what
    /// `CAST(col AS CHAR)` produces for a DATE column.
    #[allow(clippy::too_many_arguments)]
    pub fn from_date_parts(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        micros: u32,
    ) -> ColumnValue {
        let text = if hour == 0 && minute == 0 && second == 0 && micros == 0 {
            format!("{year:04}-{month:02}-{day:02}")
        } else if micros == 0 {
            format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}")
        } else {
            format!(
                "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
            )
        };

        ColumnValue::Text(text)
    }

    /// Formats a MySQL TIME value into its canonical text form.
    pub fn from_time_parts(
        negative: bool,
        days: u32,
        hours: u8,
        minutes: u8,
        seconds: u8,
        micros: u32,
    ) -> ColumnValue {
        let sign = if negative { "-" } else { "" };
        let total_hours = u64::from(days) * 24 + u64::from(hours);
        let text = if micros == 0 {
            format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}")
        } else {
            format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
        };

        ColumnValue::Text(text)
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Null => write!(f, "NULL"),
            ColumnValue::SignedInt(v) => write!(f, "{v}"),
            ColumnValue::UnsignedInt(v) => write!(f, "{v}"),
            ColumnValue::Double(v) => write!(f, "{v}"),
            ColumnValue::Text(v) => write!(f, "{v}"),
            ColumnValue::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}
