//! The load governor producers consult before each unit of work.
//!
//! The throttler watches the source's replication lag and the operator's
//! pause command, and publishes a single boolean through a watch channel.
//! Producers await the not-throttled edge before each batch; they hold no
//! database resources while suspended.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use metrics::gauge;
use rowferry_config::shared::ThrottlerConfig;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, FerryError};
use crate::error_handler::ErrorHandlerHandle;
use crate::ferry_error;
use crate::metrics::THROTTLED;
use crate::source::SourceClient;

/// Producer name the throttler reports failures under.
const COMPONENT: &str = "throttler";

/// Receiver side of the throttle state channel. `true` means throttled.
pub type ThrottleRx = watch::Receiver<bool>;

/// Waits until the throttle state is false.
///
/// Resolves immediately when not throttled, and also when the throttler has
/// gone away, so producers can never deadlock on a stopped run.
pub async fn wait_until_unthrottled(rx: &mut ThrottleRx) {
    if !*rx.borrow_and_update() {
        return;
    }

    while rx.changed().await.is_ok() {
        if !*rx.borrow() {
            return;
        }
    }
}

struct ThrottleShared {
    paused: AtomicBool,
    lag_throttled: AtomicBool,
    tx: watch::Sender<bool>,
}

impl ThrottleShared {
    fn recompute(&self) {
        let throttled =
            self.paused.load(Ordering::SeqCst) || self.lag_throttled.load(Ordering::SeqCst);
        let changed = self.tx.send_if_modified(|current| {
            if *current != throttled {
                *current = throttled;
                true
            } else {
                false
            }
        });

        if changed {
            gauge!(THROTTLED).set(if throttled { 1.0 } else { 0.0 });
            info!(throttled, "throttle state changed");
        }
    }
}

/// Operator-facing pause control and state observation.
#[derive(Clone)]
pub struct ThrottlerHandle {
    shared: Arc<ThrottleShared>,
}

impl ThrottlerHandle {
    /// Pauses producers regardless of replication lag.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
        self.shared.recompute();
    }

    /// Lifts the operator pause.
    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.recompute();
    }

    pub fn is_throttled(&self) -> bool {
        *self.shared.tx.borrow()
    }

    pub fn subscribe(&self) -> ThrottleRx {
        self.shared.tx.subscribe()
    }
}

/// Periodically probes replication lag and gates producers.
pub struct Throttler<S: SourceClient> {
    source: S,
    config: ThrottlerConfig,
    shared: Arc<ThrottleShared>,
    stop_rx: ShutdownRx,
    errors: ErrorHandlerHandle,
}

impl<S: SourceClient> Throttler<S> {
    pub fn new(
        source: S,
        config: ThrottlerConfig,
        stop_rx: ShutdownRx,
        errors: ErrorHandlerHandle,
    ) -> Self {
        let (tx, _) = watch::channel(false);
        let shared = Arc::new(ThrottleShared {
            paused: AtomicBool::new(false),
            lag_throttled: AtomicBool::new(false),
            tx,
        });

        Self {
            source,
            config,
            shared,
            stop_rx,
            errors,
        }
    }

    pub fn handle(&self) -> ThrottlerHandle {
        ThrottlerHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn subscribe(&self) -> ThrottleRx {
        self.shared.tx.subscribe()
    }

    /// Runs the probe loop until stopped.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.stop_rx.signaled() => {
                    debug!("throttler stopping");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(err) = self.observe_lag().await {
                        self.errors.report(COMPONENT, err);
                        return;
                    }
                }
            }
        }
    }

    async fn observe_lag(&self) -> Result<(), FerryError> {
        let lag = self.source.replication_lag().await.map_err(|err| {
            ferry_error!(ErrorKind::SourceReadError, "Replication lag probe failed")
                .with_source(err)
        })?;

        // Hysteresis: engage at the high water mark, release only at the low
        // water mark; in between the previous state holds.
        match lag {
            Some(lag) if lag >= self.config.lag_high_water() => {
                self.shared.lag_throttled.store(true, Ordering::SeqCst);
            }
            Some(lag) if lag <= self.config.lag_low_water() => {
                self.shared.lag_throttled.store(false, Ordering::SeqCst);
            }
            Some(_) => {}
            None => {
                self.shared.lag_throttled.store(false, Ordering::SeqCst);
            }
        }

        self.shared.recompute();
        Ok(())
    }
}
