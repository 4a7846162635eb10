//! Pod status models
//!
//! Only the slice of the Kubernetes pod schema that readiness decisions need.

use serde::{Deserialize, Serialize};

/// Waiting reasons that indicate the image can never be fetched as configured
pub const IMAGE_PULL_FAILURE_REASONS: &[&str] = &[
    "ErrImagePull",
    "ImagePullBackOff",
    "InvalidImageName",
    "ErrImageNeverPull",
];

/// Waiting reasons that indicate a restart loop
pub const CRASH_REASONS: &[&str] = &["CrashLoopBackOff", "RunContainerError", "Error"];

/// Point-in-time status of one pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodStatusSnapshot {
    pub name: String,
    pub phase: String,
    /// Ready containers
    pub ready: usize,
    /// Total containers
    pub total: usize,
    pub restarts: u32,
    /// Waiting reasons across init and app containers
    pub waiting_reasons: Vec<String>,
}

impl PodStatusSnapshot {
    /// `ready/total`, as kubectl prints it
    pub fn readiness(&self) -> String {
        format!("{}/{}", self.ready, self.total)
    }

    pub fn has_image_pull_failure(&self) -> bool {
        self.waiting_reasons
            .iter()
            .any(|r| IMAGE_PULL_FAILURE_REASONS.contains(&r.as_str()))
    }

    pub fn is_crash_looping(&self) -> bool {
        self.waiting_reasons
            .iter()
            .any(|r| CRASH_REASONS.contains(&r.as_str()))
    }
}

/// `kubectl get pods -o json`
#[derive(Debug, Clone, Deserialize)]
pub struct PodList {
    #[serde(default)]
    pub items: Vec<Pod>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
    #[serde(default)]
    pub init_container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub restart_count: u32,
    #[serde(default)]
    pub state: ContainerState,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerState {
    #[serde(default)]
    pub waiting: Option<StateReason>,
    #[serde(default)]
    pub terminated: Option<StateReason>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateReason {
    #[serde(default)]
    pub reason: Option<String>,
}

impl From<&Pod> for PodStatusSnapshot {
    fn from(pod: &Pod) -> Self {
        let status = &pod.status;
        let waiting_reasons = status
            .init_container_statuses
            .iter()
            .chain(status.container_statuses.iter())
            .filter_map(|c| c.state.waiting.as_ref().and_then(|w| w.reason.clone()))
            .collect();

        Self {
            name: pod.metadata.name.clone(),
            phase: status.phase.clone().unwrap_or_else(|| "Unknown".to_string()),
            ready: status.container_statuses.iter().filter(|c| c.ready).count(),
            total: status.container_statuses.len(),
            restarts: status
                .container_statuses
                .iter()
                .map(|c| c.restart_count)
                .sum(),
            waiting_reasons,
        }
    }
}

impl PodList {
    pub fn snapshots(&self) -> Vec<PodStatusSnapshot> {
        self.items.iter().map(PodStatusSnapshot::from).collect()
    }
}
