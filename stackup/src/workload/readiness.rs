//! Dependent workload readiness

use std::fmt;

use tracing::{debug, info, warn};

use crate::app::shutdown::Shutdown;
use crate::errors::LaunchError;
use crate::exec::kubectl::Kubectl;
use crate::models::pod::PodStatusSnapshot;
use crate::readiness::diagnostics::DiagnosticsCollector;
use crate::readiness::policy::{poll_until, PollFailure, PollOutcome, RetryPolicy};
use crate::workload::client::{PlatformClient, WorkloadSpec};

/// Label carried by inference pods created by the platform
pub const INFERENCE_POD_SELECTOR: &str = "app.nvidia.com/nim-type=inference";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadPhase {
    /// No pod, or a pod that has not produced any output yet
    NotScheduled,
    /// Pod is running and downloading or loading the model
    Loading,
    Ready,
    Failed(String),
}

impl fmt::Display for WorkloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadPhase::NotScheduled => f.write_str("waiting to be scheduled"),
            WorkloadPhase::Loading => f.write_str("downloading/loading model"),
            WorkloadPhase::Ready => f.write_str("ready"),
            WorkloadPhase::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Decide the phase from the platform status, the workload's pods and whether
/// those pods have written any logs
pub fn classify(status: Option<&str>, pods: &[PodStatusSnapshot], has_logs: bool) -> WorkloadPhase {
    match status.map(str::to_ascii_lowercase).as_deref() {
        Some(platform_api::STATUS_READY) => return WorkloadPhase::Ready,
        Some(s @ ("failed" | "error")) => return WorkloadPhase::Failed(format!("platform reports '{}'", s)),
        _ => {}
    }

    if let Some(pod) = pods.iter().find(|p| p.has_image_pull_failure()) {
        return WorkloadPhase::Failed(format!("image pull failure in {}", pod.name));
    }
    if pods.is_empty() {
        return WorkloadPhase::NotScheduled;
    }
    if pods.iter().all(|p| p.ready == 0) && !has_logs {
        return WorkloadPhase::NotScheduled;
    }
    WorkloadPhase::Loading
}

/// Pods belonging to `spec`, by name; inference pods of other models never count
fn pods_for<'a>(pods: &'a [PodStatusSnapshot], spec: &WorkloadSpec) -> Vec<&'a PodStatusSnapshot> {
    let needle = spec.name.replace('.', "-");
    pods.iter().filter(|p| p.name.contains(&needle)).collect()
}

/// Watches one model deployment until it serves
pub struct WorkloadWatcher<'a> {
    pub client: &'a PlatformClient,
    pub kubectl: &'a Kubectl,
    /// Namespace the inference pods run in
    pub pod_namespace: &'a str,
    pub spec: &'a WorkloadSpec,
}

impl WorkloadWatcher<'_> {
    async fn phase(&self) -> WorkloadPhase {
        let status = match self.client.get_deployment(&self.spec.namespace, &self.spec.name).await {
            Ok(Some(deployment)) => deployment.status().map(str::to_string),
            Ok(None) => None,
            Err(e) => {
                // transient while the gateway warms up
                debug!("Deployment status unavailable: {}", e);
                None
            }
        };

        let pods = self
            .kubectl
            .get_pods(self.pod_namespace, Some(INFERENCE_POD_SELECTOR))
            .await
            .unwrap_or_default();
        let pods: Vec<PodStatusSnapshot> = pods_for(&pods, self.spec).into_iter().cloned().collect();

        let has_logs = match pods.first() {
            Some(pod) if pods.iter().all(|p| p.ready == 0) => self
                .kubectl
                .logs(self.pod_namespace, &pod.name, false, Some(20))
                .await
                .map(|logs| !logs.trim().is_empty())
                .unwrap_or(false),
            _ => false,
        };

        classify(status.as_deref(), &pods, has_logs)
    }

    async fn probe(&self) -> PollOutcome<()> {
        match self.phase().await {
            WorkloadPhase::Ready => PollOutcome::Ready(()),
            WorkloadPhase::Failed(reason) => PollOutcome::Fatal(LaunchError::WorkloadError(format!(
                "{}/{} {}",
                self.spec.namespace, self.spec.name, reason
            ))),
            phase => PollOutcome::Pending(format!("{}: {}", self.spec.model, phase)),
        }
    }

    /// Poll until the platform reports the deployment ready
    pub async fn wait(
        &self,
        policy: &RetryPolicy,
        shutdown: &mut Shutdown,
        diagnostics: &DiagnosticsCollector,
    ) -> Result<(), LaunchError> {
        info!(
            "Waiting for {} to become ready (horizon {:?})",
            self.spec.model, policy.horizon
        );

        let result = poll_until(
            policy,
            shutdown,
            || self.probe(),
            |progress, elapsed| info!("[{:>4}s] {}", elapsed.as_secs(), progress),
        )
        .await;

        match result {
            Ok(()) => {
                info!("{} is ready", self.spec.model);
                Ok(())
            }
            Err(PollFailure::Interrupted) => Err(PollFailure::Interrupted.into_error("the model deployment")),
            Err(failure) => {
                warn!("Model deployment did not become ready; collecting diagnostics");
                let pods = self
                    .kubectl
                    .get_pods(self.pod_namespace, Some(INFERENCE_POD_SELECTOR))
                    .await
                    .unwrap_or_default();
                let names: Vec<String> = pods_for(&pods, self.spec).iter().map(|p| p.name.clone()).collect();
                diagnostics.collect(self.pod_namespace, &names).await;
                Err(failure.into_error("the model deployment to become ready"))
            }
        }
    }
}
