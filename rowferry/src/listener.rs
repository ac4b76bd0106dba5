use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FerryResult;
use crate::types::DmlEvent;

/// A consumer of row-event batches.
///
/// Listeners registered on a producer are invoked in registration order for
/// every batch; the first failure aborts the batch and no later listener
/// sees it. The coordinator appends its built-in write listener after all
/// consumer-registered listeners, so consumers observe events before they
/// are written to the target.
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn handle_events(&self, events: &[DmlEvent]) -> FerryResult<()>;
}

/// A consumer notified when the bulk row copy completes.
///
/// A failure from a done listener is fatal to the run.
#[async_trait]
pub trait DoneListener: Send + Sync {
    async fn on_done(&self) -> FerryResult<()>;
}

/// Invokes each listener in registration order, stopping at the first error.
pub(crate) async fn dispatch(
    listeners: &[Arc<dyn EventListener>],
    events: &[DmlEvent],
) -> FerryResult<()> {
    for listener in listeners {
        listener.handle_events(events).await?;
    }

    Ok(())
}
