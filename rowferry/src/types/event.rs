use std::fmt;

use rowferry_mysql::position::BinlogPosition;
use rowferry_mysql::types::schema::TableName;

use crate::types::row::Row;

/// One row-level mutation flowing towards the target.
///
/// Events produced by the bulk copy carry no position; events decoded from
/// the change log carry the position at which they were observed. Every
/// event renders into a parameterised statement whose replay is idempotent:
/// applying the same event twice leaves the target row in the same state.
#[derive(Debug, Clone, PartialEq)]
pub enum DmlEvent {
    /// A new row, or the bulk copy's image of an existing row.
    Insert {
        table: TableName,
        row: Row,
        position: Option<BinlogPosition>,
    },
    /// A row changed from `before` to `after`. The before image carries the
    /// primary key the update is addressed by.
    Update {
        table: TableName,
        before: Row,
        after: Row,
        position: Option<BinlogPosition>,
    },
    /// A row was removed; `row` is the pre-image.
    Delete {
        table: TableName,
        row: Row,
        position: Option<BinlogPosition>,
    },
}

impl DmlEvent {
    /// Creates an insert event as emitted by the bulk copy.
    pub fn copy_insert(table: TableName, row: Row) -> Self {
        DmlEvent::Insert {
            table,
            row,
            position: None,
        }
    }

    /// Returns the table this event mutates.
    pub fn table(&self) -> &TableName {
        match self {
            DmlEvent::Insert { table, .. }
            | DmlEvent::Update { table, .. }
            | DmlEvent::Delete { table, .. } => table,
        }
    }

    /// Returns the change-log position the event was observed at, if it came
    /// from the binlog streamer.
    pub fn position(&self) -> Option<&BinlogPosition> {
        match self {
            DmlEvent::Insert { position, .. }
            | DmlEvent::Update { position, .. }
            | DmlEvent::Delete { position, .. } => position.as_ref(),
        }
    }

    pub fn event_type(&self) -> DmlEventType {
        self.into()
    }
}

/// Lightweight classification of [`DmlEvent`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmlEventType {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for DmlEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

impl From<&DmlEvent> for DmlEventType {
    fn from(event: &DmlEvent) -> Self {
        match event {
            DmlEvent::Insert { .. } => DmlEventType::Insert,
            DmlEvent::Update { .. } => DmlEventType::Update,
            DmlEvent::Delete { .. } => DmlEventType::Delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use rowferry_mysql::types::value::ColumnValue;

    use super::*;

    fn users() -> TableName {
        TableName::new("shop", "users")
    }

    fn row(id: i64) -> Row {
        Row::new(vec![ColumnValue::SignedInt(id)])
    }

    #[test]
    fn classifies_events_by_kind() {
        let insert = DmlEvent::copy_insert(users(), row(1));
        assert_eq!(insert.event_type(), DmlEventType::Insert);

        let update = DmlEvent::Update {
            table: users(),
            before: row(1),
            after: row(1),
            position: None,
        };
        assert_eq!(update.event_type(), DmlEventType::Update);

        let delete = DmlEvent::Delete {
            table: users(),
            row: row(1),
            position: None,
        };
        assert_eq!(delete.event_type(), DmlEventType::Delete);
    }

    #[test]
    fn event_types_render_as_metric_label_values() {
        assert_eq!(DmlEventType::Insert.to_string(), "insert");
        assert_eq!(DmlEventType::Update.to_string(), "update");
        assert_eq!(DmlEventType::Delete.to_string(), "delete");
    }
}
