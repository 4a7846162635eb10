//! Platform pod readiness

use std::collections::BTreeMap;
use std::fmt;

use tracing::{info, warn};

use crate::app::shutdown::Shutdown;
use crate::errors::LaunchError;
use crate::exec::kubectl::Kubectl;
use crate::models::pod::PodStatusSnapshot;
use crate::readiness::diagnostics::DiagnosticsCollector;
use crate::readiness::policy::{poll_until, PollFailure, PollOutcome, RetryPolicy};

/// Condition of one pod for readiness purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PodCondition {
    Healthy,
    /// Job pod that ran to completion
    Completed,
    Pending,
    Crashing,
    ImagePullFailure,
}

impl fmt::Display for PodCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PodCondition::Healthy => "healthy",
            PodCondition::Completed => "completed",
            PodCondition::Pending => "pending",
            PodCondition::Crashing => "crashing",
            PodCondition::ImagePullFailure => "image-pull-failure",
        };
        f.write_str(label)
    }
}

/// Classify a snapshot; image retrieval failures take precedence
pub fn classify(pod: &PodStatusSnapshot) -> PodCondition {
    if pod.has_image_pull_failure() {
        return PodCondition::ImagePullFailure;
    }
    if pod.phase == "Succeeded" {
        return PodCondition::Completed;
    }
    if pod.is_crash_looping() || pod.phase == "Failed" {
        return PodCondition::Crashing;
    }
    if pod.phase == "Running" && pod.total > 0 && pod.ready == pod.total {
        return PodCondition::Healthy;
    }
    PodCondition::Pending
}

/// Aggregate view of one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessSummary {
    pub total: usize,
    /// Pod count by phase, as reported by the cluster
    pub by_phase: BTreeMap<String, usize>,
    pub not_ready: Vec<String>,
    pub image_pull_failures: Vec<String>,
}

impl ReadinessSummary {
    pub fn from_pods(pods: &[PodStatusSnapshot]) -> Self {
        let mut summary = ReadinessSummary {
            total: pods.len(),
            ..Default::default()
        };
        for pod in pods {
            *summary.by_phase.entry(pod.phase.clone()).or_default() += 1;
            match classify(pod) {
                PodCondition::Healthy | PodCondition::Completed => {}
                PodCondition::ImagePullFailure => {
                    summary.image_pull_failures.push(pod.name.clone());
                    summary.not_ready.push(pod.name.clone());
                }
                PodCondition::Pending | PodCondition::Crashing => {
                    summary.not_ready.push(pod.name.clone());
                }
            }
        }
        summary
    }

    /// Every pod healthy or completed, and at least one pod exists
    pub fn all_healthy(&self) -> bool {
        self.total > 0 && self.not_ready.is_empty()
    }

    /// e.g. `12/15 ready (Pending: 3, Running: 12)`
    pub fn progress_line(&self) -> String {
        let phases = self
            .by_phase
            .iter()
            .map(|(phase, count)| format!("{}: {}", phase, count))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{}/{} ready ({})",
            self.total - self.not_ready.len(),
            self.total,
            if phases.is_empty() { "no pods yet".to_string() } else { phases }
        )
    }
}

/// One readiness probe against the namespace
pub async fn probe_platform(kubectl: &Kubectl, namespace: &str) -> PollOutcome<ReadinessSummary> {
    let pods = match kubectl.get_pods(namespace, None).await {
        Ok(pods) => pods,
        // transient: the API server may be briefly unavailable during install
        Err(e) => return PollOutcome::Pending(format!("pod listing failed: {}", e)),
    };

    let summary = ReadinessSummary::from_pods(&pods);
    if !summary.image_pull_failures.is_empty() {
        return PollOutcome::Fatal(LaunchError::ImagePullFailure {
            pods: summary.image_pull_failures.clone(),
        });
    }
    if summary.all_healthy() {
        return PollOutcome::Ready(summary);
    }
    PollOutcome::Pending(summary.progress_line())
}

/// Wait for every platform pod to become healthy.
///
/// On image pull failure or timeout a diagnostics bundle is collected for the
/// offending pods before the error is returned.
pub async fn wait_for_platform(
    kubectl: &Kubectl,
    namespace: &str,
    policy: &RetryPolicy,
    shutdown: &mut Shutdown,
    diagnostics: &DiagnosticsCollector,
) -> Result<ReadinessSummary, LaunchError> {
    info!(
        "Waiting for platform pods in '{}' (horizon {:?})",
        namespace, policy.horizon
    );

    let result = poll_until(
        policy,
        shutdown,
        || probe_platform(kubectl, namespace),
        |progress, elapsed| info!("[{:>4}s] {}", elapsed.as_secs(), progress),
    )
    .await;

    match result {
        Ok(summary) => {
            info!("All {} platform pods are ready", summary.total);
            Ok(summary)
        }
        Err(PollFailure::Fatal(LaunchError::ImagePullFailure { pods })) => {
            warn!("Image pull failure detected in {:?}", pods);
            diagnostics.collect(namespace, &pods).await;
            Err(LaunchError::ImagePullFailure { pods })
        }
        Err(failure @ PollFailure::TimedOut { .. }) => {
            let stuck = match kubectl.get_pods(namespace, None).await {
                Ok(pods) => ReadinessSummary::from_pods(&pods).not_ready,
                Err(_) => Vec::new(),
            };
            warn!("Platform readiness timed out; not ready: {:?}", stuck);
            diagnostics.collect(namespace, &stuck).await;
            Err(failure.into_error("platform pods to become ready"))
        }
        Err(failure) => Err(failure.into_error("platform pods to become ready")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(name: &str, phase: &str, ready: usize, total: usize, waiting: &[&str]) -> PodStatusSnapshot {
        PodStatusSnapshot {
            name: name.to_string(),
            phase: phase.to_string(),
            ready,
            total,
            restarts: 0,
            waiting_reasons: waiting.iter().map(|w| w.to_string()).collect(),
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&pod("a", "Running", 1, 1, &[])), PodCondition::Healthy);
        assert_eq!(classify(&pod("a", "Running", 0, 1, &[])), PodCondition::Pending);
        assert_eq!(classify(&pod("a", "Succeeded", 0, 1, &[])), PodCondition::Completed);
        assert_eq!(
            classify(&pod("a", "Running", 0, 1, &["CrashLoopBackOff"])),
            PodCondition::Crashing
        );
        assert_eq!(
            classify(&pod("a", "Pending", 0, 1, &["ErrImagePull"])),
            PodCondition::ImagePullFailure
        );
        assert_eq!(classify(&pod("a", "Running", 0, 0, &[])), PodCondition::Pending);
    }

    #[test]
    fn test_summary_requires_at_least_one_pod() {
        assert!(!ReadinessSummary::from_pods(&[]).all_healthy());
        let summary = ReadinessSummary::from_pods(&[
            pod("a", "Running", 1, 1, &[]),
            pod("job", "Succeeded", 0, 1, &[]),
        ]);
        assert!(summary.all_healthy());
    }

    #[test]
    fn test_progress_line_counts_phases() {
        let summary = ReadinessSummary::from_pods(&[
            pod("a", "Running", 1, 1, &[]),
            pod("b", "Pending", 0, 1, &[]),
            pod("c", "Pending", 0, 1, &[]),
        ]);
        assert_eq!(summary.progress_line(), "1/3 ready (Pending: 2, Running: 1)");
        assert_eq!(summary.not_ready, vec!["b".to_string(), "c".to_string()]);
    }
}
