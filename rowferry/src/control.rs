//! The narrow capability handed to the control collaborator.
//!
//! The HTTP control server itself lives outside this crate; this is the
//! fixed interface it drives the run through. The handle can observe the
//! overall state, toggle the throttler, flip the automatic-cutover flag and
//! request a shutdown — and nothing else, so the collaborator cannot
//! corrupt the coordinator's state machine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::concurrency::shutdown::ShutdownTx;
use crate::state::{OverallState, StateRx};
use crate::throttler::ThrottlerHandle;

#[derive(Clone)]
pub struct ControlHandle {
    state: StateRx,
    throttler: ThrottlerHandle,
    cutover_flag: Arc<AtomicBool>,
    shutdown: ShutdownTx,
}

impl ControlHandle {
    pub(crate) fn new(
        state: StateRx,
        throttler: ThrottlerHandle,
        cutover_flag: Arc<AtomicBool>,
        shutdown: ShutdownTx,
    ) -> Self {
        Self {
            state,
            throttler,
            cutover_flag,
            shutdown,
        }
    }

    /// Returns the current overall state.
    ///
    /// The value may be momentarily stale but always reflects a valid point
    /// in the state progression.
    pub fn overall_state(&self) -> OverallState {
        *self.state.borrow()
    }

    /// Returns a subscription to state transitions.
    pub fn state_stream(&self) -> StateRx {
        self.state.clone()
    }

    /// Pauses producers, regardless of replication lag.
    pub fn pause(&self) {
        self.throttler.pause();
    }

    /// Lifts the operator pause.
    pub fn unpause(&self) {
        self.throttler.resume();
    }

    /// Sets the automatic-cutover flag the coordinator polls while waiting
    /// for cutover.
    pub fn set_automatic_cutover(&self, enabled: bool) {
        self.cutover_flag.store(enabled, Ordering::SeqCst);
    }

    pub fn automatic_cutover(&self) -> bool {
        self.cutover_flag.load(Ordering::SeqCst)
    }

    /// Requests a clean shutdown of the run.
    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }
}
