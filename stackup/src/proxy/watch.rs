//! Long-lived regeneration worker

use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::app::shutdown::Shutdown;
use crate::proxy::control::ApplyOutcome;
use crate::proxy::generator::ProxyGenerator;

/// Watch worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between regenerations
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

/// Regenerate immediately, then on every interval until shutdown.
/// Returns the number of regenerations that changed the active configuration.
pub async fn run<S, F>(
    options: &Options,
    generator: &ProxyGenerator,
    sleep_fn: S,
    mut shutdown: Shutdown,
) -> usize
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Proxy watch starting (interval {:?})", options.interval);
    let mut changes = 0;

    loop {
        match generator.regenerate().await {
            Ok(regeneration) if regeneration.outcome == ApplyOutcome::Unchanged => {
                debug!("Proxy configuration unchanged");
            }
            Ok(regeneration) => {
                changes += 1;
                if !regeneration.unresolved.is_empty() {
                    info!("Unresolved services: {:?}", regeneration.unresolved);
                }
            }
            Err(e) => {
                error!("Proxy regeneration failed: {}", e);
            }
        }

        tokio::select! {
            _ = shutdown.wait() => {
                info!("Proxy watch shutting down...");
                return changes;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}
