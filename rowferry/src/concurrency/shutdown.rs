use tokio::sync::watch;

/// Transmitter side of the cancellation signal.
///
/// A single [`ShutdownTx`] fans out to every task in the pipeline; firing it
/// asks each task to finish its current batch and return. Firing it more
/// than once is harmless.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Requests shutdown of every subscriber.
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    /// Creates a new receiver subscription.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiver side of the cancellation signal.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Returns true once shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Waits until shutdown is requested.
    ///
    /// Also resolves when every transmitter has been dropped, so a task can
    /// never outlive the pipeline that spawned it.
    pub async fn signaled(&mut self) {
        if *self.0.borrow_and_update() {
            return;
        }

        while self.0.changed().await.is_ok() {
            if *self.0.borrow() {
                return;
            }
        }
    }
}

/// Creates a new cancellation signal channel.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signaled_resolves_after_shutdown() {
        let (tx, mut rx) = create_shutdown_channel();
        assert!(!rx.is_shutdown());

        tx.shutdown();
        rx.signaled().await;
        assert!(rx.is_shutdown());
    }

    #[tokio::test]
    async fn signaled_resolves_when_sender_dropped() {
        let (tx, mut rx) = create_shutdown_channel();
        drop(tx);
        // Must not hang.
        rx.signaled().await;
    }
}
