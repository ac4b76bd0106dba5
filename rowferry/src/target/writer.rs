//! The built-in listener that writes batches to the target.

use async_trait::async_trait;
use metrics::counter;
use tracing::{error, warn};

use crate::error::FerryResult;
use crate::listener::EventListener;
use crate::metrics::{BATCHES_WRITTEN_TOTAL, WRITE_RETRIES_TOTAL};
use crate::schema::SchemaCache;
use crate::target::Target;
use crate::types::DmlEvent;

/// Applies each batch to the target, retrying whole batches on failure.
///
/// Retries always replay the original event list; a batch is never split.
/// Replaying is safe because every statement the batch renders to is
/// idempotent.
pub struct BatchWriter<T: Target> {
    target: T,
    schema_cache: SchemaCache,
    max_retries: u32,
}

impl<T: Target> BatchWriter<T> {
    pub fn new(target: T, schema_cache: SchemaCache, max_retries: u32) -> Self {
        Self {
            target,
            schema_cache,
            max_retries,
        }
    }
}

#[async_trait]
impl<T: Target> EventListener for BatchWriter<T> {
    async fn handle_events(&self, events: &[DmlEvent]) -> FerryResult<()> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.target.apply_batch(&self.schema_cache, events).await {
                Ok(()) => {
                    counter!(BATCHES_WRITTEN_TOTAL).increment(1);
                    return Ok(());
                }
                Err(err) if attempt < self.max_retries => {
                    counter!(WRITE_RETRIES_TOTAL).increment(1);
                    warn!(attempt, error = %err, "failed to write batch to target, retrying");
                }
                Err(err) => {
                    error!(
                        attempts = attempt,
                        error = %err,
                        "failed to write batch to target even after retries"
                    );
                    return Err(err);
                }
            }
        }
    }
}
