//! The write path into the target database.
//!
//! [`sql`] renders row events into parameterised statements, [`mysql`]
//! applies a batch of them in one transaction under the sentinel session
//! settings, and [`writer`] is the built-in listener that retries whole
//! batches against transient target failures.

pub mod mysql;
pub mod sql;
pub mod writer;

use std::future::Future;

use crate::error::FerryResult;
use crate::schema::SchemaCache;
use crate::types::DmlEvent;

/// A sink for row-event batches.
///
/// One call to [`Target::apply_batch`] is one transactional attempt: either
/// every statement of the batch takes effect or none does. Implementations
/// must apply events idempotently, because retries and overlapping
/// copy/stream events can deliver the same post-image more than once.
pub trait Target: Clone + Send + Sync + 'static {
    /// Verifies connectivity with a cheap status query.
    fn check_connectivity(&self) -> impl Future<Output = FerryResult<()>> + Send;

    /// Applies one batch of events atomically.
    fn apply_batch(
        &self,
        schema_cache: &SchemaCache,
        events: &[DmlEvent],
    ) -> impl Future<Output = FerryResult<()>> + Send;
}
