//! Operator interrupt plumbing
//!
//! A [`Shutdown`] handle is cloned into every long wait. The OS signal
//! listener is a task owned by the run; dropping the [`SignalListener`] aborts
//! it, so later signals are no longer forwarded to the run. tokio keeps its
//! process-wide handler registered once installed.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Sending half; triggering is idempotent
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half, cheap to clone
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// A trigger/handle pair
    pub fn channel() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, Shutdown { rx })
    }

    /// A handle that never fires
    pub fn never() -> Shutdown {
        let (_, shutdown) = Self::channel();
        shutdown
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been requested
    pub async fn wait(&mut self) {
        if self.rx.wait_for(|triggered| *triggered).await.is_err() {
            // sender dropped without triggering: never resolve
            std::future::pending::<()>().await;
        }
    }
}

/// Listens for SIGINT/SIGTERM while alive
pub struct SignalListener {
    handle: JoinHandle<()>,
}

impl SignalListener {
    pub fn install(trigger: ShutdownTrigger) -> Self {
        let handle = tokio::spawn(async move {
            await_shutdown_signal().await;
            trigger.trigger();
        });
        Self { handle }
    }
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (Ok(mut sigterm), Ok(mut sigint)) = (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) else {
            let _ = tokio::signal::ctrl_c().await;
            info!("Ctrl+C received, shutting down...");
            return;
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_waiters() {
        let (trigger, shutdown) = Shutdown::channel();
        let mut waiter = shutdown.clone();
        let task = tokio::spawn(async move { waiter.wait().await });

        assert!(!shutdown.is_triggered());
        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_does_not_fire() {
        let mut shutdown = Shutdown::never();
        let fired = tokio::time::timeout(Duration::from_secs(3600), shutdown.wait()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_listener_stops_forwarding() {
        let (trigger, mut shutdown) = Shutdown::channel();
        let listener = SignalListener::install(trigger);
        drop(listener);
        tokio::task::yield_now().await;

        // the aborted task released the trigger without firing it
        let fired = tokio::time::timeout(Duration::from_secs(3600), shutdown.wait()).await;
        assert!(fired.is_err());
        assert!(!shutdown.is_triggered());
    }
}
