//! Online, minimally-disruptive copying of MySQL tables between servers.
//!
//! rowferry copies selected tables from a *source* database to a *target*
//! database while the source keeps accepting writes. A bulk row copy (the
//! [`iterator::DataIterator`]) runs concurrently with a binlog follower (the
//! [`binlog::BinlogStreamer`]); both feed batches of row events through an
//! ordered listener chain whose built-in tail applies them idempotently to
//! the target, so the two databases converge and the operator can redirect
//! write traffic at a cutover instant of their choosing.
//!
//! The [`ferry::Ferry`] coordinator owns the lifecycle: it verifies
//! connectivity, captures the starting binlog position *before* any row is
//! read, loads the immutable schema cache, runs both producers alongside the
//! [`throttler::Throttler`] and the [`error_handler::ErrorHandler`], and
//! drives the `starting → copying → wait-for-cutover → cutover → done`
//! state machine.

pub mod binlog;
pub mod concurrency;
pub mod control;
pub mod dump;
pub mod error;
pub mod error_handler;
pub mod ferry;
pub mod iterator;
pub mod listener;
mod macros;
pub mod metrics;
pub mod schema;
pub mod source;
pub mod state;
pub mod target;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod throttler;
pub mod types;

pub use error::{ErrorKind, FerryError, FerryResult};
pub use ferry::{CutoverHandle, Ferry};
