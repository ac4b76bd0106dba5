pub mod event;
pub mod row;

pub use event::{DmlEvent, DmlEventType};
pub use row::{KeyValue, Row, RowKey};
