//! Shutdown trigger shared between the signal handler and the server.

use std::sync::Arc;
use tokio::sync::Notify;

/// Cloneable handle that fires once a termination signal arrives.
///
/// `trigger` may be called from any thread, including the `ctrlc` handler
/// thread. A trigger that lands before anyone waits is not lost.
#[derive(Clone, Default)]
pub struct Shutdown {
    notify: Arc<Notify>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the process signal handler (Ctrl+C and SIGTERM).
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let shutdown = self.clone();
        ctrlc::set_handler(move || {
            log::info!("Termination signal received");
            shutdown.trigger();
        })
    }

    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    /// Resolve once `trigger` has been called.
    pub async fn wait(self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_before_wait_is_kept() {
        let shutdown = Shutdown::new();
        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .expect("stored trigger should resolve wait");
    }

    #[tokio::test]
    async fn test_trigger_from_other_thread_wakes_waiter() {
        let shutdown = Shutdown::new();
        let waiter = tokio::spawn(shutdown.clone().wait());

        let remote = shutdown.clone();
        std::thread::spawn(move || remote.trigger()).join().unwrap();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_trigger_keeps_waiting() {
        let shutdown = Shutdown::new();
        let result = tokio::time::timeout(Duration::from_millis(20), shutdown.wait()).await;
        assert!(result.is_err());
    }
}
