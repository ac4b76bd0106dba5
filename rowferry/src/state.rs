use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;

/// The coordinator's overall state.
///
/// States form a strict progression; a run only ever moves forward through
/// them and [`StateTracker::advance`] refuses to move backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OverallState {
    Starting,
    Copying,
    WaitForCutover,
    Cutover,
    Done,
}

impl fmt::Display for OverallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OverallState::Starting => "starting",
            OverallState::Copying => "copying",
            OverallState::WaitForCutover => "wait-for-cutover",
            OverallState::Cutover => "cutover",
            OverallState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Receiver side of the overall-state channel.
///
/// Readers may observe a stale value but never an invalid transition.
pub type StateRx = watch::Receiver<OverallState>;

/// The writer side of the coordinator's state machine.
///
/// Only the coordinator and the cutover path hold a tracker; everything else
/// observes through a [`StateRx`] handed out by the control handle.
#[derive(Debug, Clone)]
pub struct StateTracker {
    tx: Arc<watch::Sender<OverallState>>,
}

impl StateTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(OverallState::Starting);
        Self { tx: Arc::new(tx) }
    }

    /// Advances the state machine to `to`.
    ///
    /// Transitions are monotonic; an attempt to move backwards is refused
    /// and logged.
    pub fn advance(&self, to: OverallState) {
        self.tx.send_if_modified(|current| {
            if to > *current {
                *current = to;
                true
            } else {
                if to < *current {
                    warn!(from = %current, %to, "refusing backwards state transition");
                }
                false
            }
        });
    }

    /// Returns the current state.
    pub fn current(&self) -> OverallState {
        *self.tx.borrow()
    }

    /// Creates a new observer subscription.
    pub fn subscribe(&self) -> StateRx {
        self.tx.subscribe()
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}
