//! Exponential backoff for transient I/O errors

use std::time::Duration;

use tokio::sync::watch;

/// Doubling delay with a cap; reset after any success
pub(super) struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Sleep for the current delay, doubling it for next time
    ///
    /// Returns false when the close signal fired during the wait.
    pub async fn wait(&mut self, close_rx: &mut watch::Receiver<bool>) -> bool {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);

        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = close_rx.wait_for(|closed| *closed) => false,
        }
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}
