//! Bounded polling with progress reporting
//!
//! [`poll_until`] drives a probe at a fixed interval until it reports ready or
//! fatal, the horizon elapses, or the operator interrupts.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::app::shutdown::Shutdown;
use crate::errors::LaunchError;

/// Interval, horizon and progress cadence of a polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Time between probes
    pub interval: Duration,
    /// Maximum wall-clock time for the whole wait
    pub horizon: Duration,
    /// Minimum time between progress reports
    pub progress_every: Duration,
}

impl RetryPolicy {
    pub const fn new(interval: Duration, horizon: Duration, progress_every: Duration) -> Self {
        Self {
            interval,
            horizon,
            progress_every,
        }
    }

    /// Platform pods after a release install
    pub const fn platform() -> Self {
        Self::new(
            Duration::from_secs(10),
            Duration::from_secs(30 * 60),
            Duration::from_secs(30),
        )
    }

    /// Dependent workload after submission
    pub const fn workload() -> Self {
        Self::new(
            Duration::from_secs(15),
            Duration::from_secs(45 * 60),
            Duration::from_secs(60),
        )
    }

    /// Cluster API server after a start
    pub const fn api_server() -> Self {
        Self::new(
            Duration::from_secs(5),
            Duration::from_secs(5 * 60),
            Duration::from_secs(30),
        )
    }
}

/// Result of a single probe
#[derive(Debug)]
pub enum PollOutcome<T> {
    /// Condition met
    Ready(T),
    /// Not yet; the string describes progress
    Pending(String),
    /// Condition can never be met; stop now
    Fatal(LaunchError),
}

/// Why a wait ended without the condition being met
#[derive(Debug)]
pub enum PollFailure {
    TimedOut {
        elapsed: Duration,
        last_progress: Option<String>,
    },
    Fatal(LaunchError),
    Interrupted,
}

impl PollFailure {
    /// Map to a launch error, naming what was being waited for
    pub fn into_error(self, waiting_for: &str) -> LaunchError {
        match self {
            PollFailure::TimedOut { elapsed, .. } => {
                LaunchError::ReadinessTimeout(elapsed, waiting_for.to_string())
            }
            PollFailure::Fatal(e) => e,
            PollFailure::Interrupted => LaunchError::Interrupted(format!("waiting for {}", waiting_for)),
        }
    }
}

/// Poll `probe` under `policy` until ready.
///
/// `on_progress` is called with the latest pending description on the first
/// pending probe and then at most once per `progress_every`. Interrupts are
/// observed both while probing and while sleeping.
pub async fn poll_until<T, P, Fut, R>(
    policy: &RetryPolicy,
    shutdown: &mut Shutdown,
    mut probe: P,
    mut on_progress: R,
) -> Result<T, PollFailure>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = PollOutcome<T>>,
    R: FnMut(&str, Duration),
{
    let start = Instant::now();
    let mut last_report: Option<Instant> = None;
    let mut last_progress: Option<String> = None;

    loop {
        let outcome = tokio::select! {
            biased;
            _ = shutdown.wait() => return Err(PollFailure::Interrupted),
            outcome = probe() => outcome,
        };

        match outcome {
            PollOutcome::Ready(value) => return Ok(value),
            PollOutcome::Fatal(e) => return Err(PollFailure::Fatal(e)),
            PollOutcome::Pending(progress) => {
                debug!("Still waiting: {}", progress);
                let due = last_report
                    .map(|at| at.elapsed() >= policy.progress_every)
                    .unwrap_or(true);
                if due {
                    on_progress(&progress, start.elapsed());
                    last_report = Some(Instant::now());
                }
                last_progress = Some(progress);
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= policy.horizon {
            return Err(PollFailure::TimedOut {
                elapsed,
                last_progress,
            });
        }

        let nap = policy.interval.min(policy.horizon - elapsed);
        tokio::select! {
            biased;
            _ = shutdown.wait() => return Err(PollFailure::Interrupted),
            _ = tokio::time::sleep(nap) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(10),
            Duration::from_secs(60),
            Duration::from_secs(30),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_some_polls() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut shutdown = Shutdown::never();

        let probe_calls = calls.clone();
        let value = poll_until(
            &fast(),
            &mut shutdown,
            || {
                let n = probe_calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        PollOutcome::Pending(format!("attempt {}", n))
                    } else {
                        PollOutcome::Ready(n)
                    }
                }
            },
            |_, _| {},
        )
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_at_horizon() {
        let mut shutdown = Shutdown::never();
        let start = Instant::now();

        let result: Result<(), _> = poll_until(
            &fast(),
            &mut shutdown,
            || async { PollOutcome::Pending("waiting".to_string()) },
            |_, _| {},
        )
        .await;

        match result {
            Err(PollFailure::TimedOut { last_progress, .. }) => {
                assert_eq!(last_progress.as_deref(), Some("waiting"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_throttled() {
        let mut shutdown = Shutdown::never();
        let mut reports = Vec::new();

        let _: Result<(), _> = poll_until(
            &fast(),
            &mut shutdown,
            || async { PollOutcome::Pending("pods 0/3".to_string()) },
            |_, elapsed| reports.push(elapsed),
        )
        .await;

        // polls at 0,10,...,60; reports at 0, 30 and 60
        assert_eq!(
            reports,
            vec![
                Duration::from_secs(0),
                Duration::from_secs(30),
                Duration::from_secs(60)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_stops_immediately() {
        let mut shutdown = Shutdown::never();
        let result: Result<(), _> = poll_until(
            &fast(),
            &mut shutdown,
            || async {
                PollOutcome::Fatal(LaunchError::ImagePullFailure {
                    pods: vec!["p".to_string()],
                })
            },
            |_, _| {},
        )
        .await;
        assert!(matches!(result, Err(PollFailure::Fatal(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_cancels_wait() {
        let (trigger, mut shutdown) = Shutdown::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            trigger.trigger();
        });

        let start = Instant::now();
        let result: Result<(), _> = poll_until(
            &fast(),
            &mut shutdown,
            || async { PollOutcome::Pending("waiting".to_string()) },
            |_, _| {},
        )
        .await;

        assert!(matches!(result, Err(PollFailure::Interrupted)));
        assert!(start.elapsed() < Duration::from_secs(30));
        assert_eq!(
            PollFailure::Interrupted.into_error("platform").exit_code(),
            130
        );
    }
}
