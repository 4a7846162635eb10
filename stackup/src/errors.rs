//! Error types for the launcher

use std::time::Duration;

use thiserror::Error;

/// Broad classes of failure, each with its own exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Conflicting flags or missing required input; nothing was mutated
    FatalConfig,
    /// Host is missing a tool or capability; nothing was mutated
    FatalEnvironment,
    /// The cluster, package tool or platform rejected an operation
    FatalExternal,
    /// Operator cancelled a wait
    Interrupted,
    /// Local I/O or programming error
    Internal,
}

impl ErrorClass {
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorClass::FatalConfig => 2,
            ErrorClass::FatalEnvironment => 3,
            ErrorClass::FatalExternal => 4,
            ErrorClass::Interrupted => 130,
            ErrorClass::Internal => 1,
        }
    }
}

/// Main error type for the launcher
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Preflight failed: {0}")]
    PreflightFailed(String),

    #[error("Prerequisite not found: {tool} - {hint}")]
    PrerequisiteNotFound { tool: String, hint: String },

    #[error("Command failed: {command} - {message}")]
    CommandFailed { command: String, message: String },

    #[error("Command timed out after {timeout:?}: {command}")]
    CommandTimeout { command: String, timeout: Duration },

    #[error("Cluster error: {0}")]
    ClusterError(String),

    #[error("Release error: {0}")]
    ReleaseError(String),

    #[error("Image pull failure in {pods:?}")]
    ImagePullFailure { pods: Vec<String> },

    #[error("Timed out after {0:?} waiting for {1}")]
    ReadinessTimeout(Duration, String),

    #[error("Workload error: {0}")]
    WorkloadError(String),

    #[error("Platform API error: {0}")]
    PlatformApiError(String),

    #[error("Proxy error: {0}")]
    ProxyError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Operation declined: {0}")]
    Declined(String),

    #[error("Interrupted while {0}")]
    Interrupted(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LaunchError {
    /// Classify the error for exit status and reporting
    pub fn class(&self) -> ErrorClass {
        match self {
            LaunchError::ConfigError(_) | LaunchError::Declined(_) => ErrorClass::FatalConfig,
            LaunchError::PreflightFailed(_) | LaunchError::PrerequisiteNotFound { .. } => {
                ErrorClass::FatalEnvironment
            }
            LaunchError::CommandFailed { .. }
            | LaunchError::CommandTimeout { .. }
            | LaunchError::ClusterError(_)
            | LaunchError::ReleaseError(_)
            | LaunchError::ImagePullFailure { .. }
            | LaunchError::ReadinessTimeout(..)
            | LaunchError::WorkloadError(_)
            | LaunchError::PlatformApiError(_)
            | LaunchError::HttpError(_)
            | LaunchError::ProxyError(_) => ErrorClass::FatalExternal,
            LaunchError::Interrupted(_) => ErrorClass::Interrupted,
            LaunchError::IoError(_)
            | LaunchError::JsonError(_)
            | LaunchError::StorageError(_)
            | LaunchError::ServerError(_)
            | LaunchError::Internal(_) => ErrorClass::Internal,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.class().exit_code()
    }

    /// Actionable remediation hint printed after a fatal error
    pub fn hint(&self) -> Option<String> {
        match self {
            LaunchError::PrerequisiteNotFound { hint, .. } => Some(hint.clone()),
            LaunchError::PreflightFailed(_) => {
                Some("Fix the failed checks above, or re-run with --install-deps for missing tools".to_string())
            }
            LaunchError::ImagePullFailure { .. } => Some(
                "Verify the registry API key has access to the images and that the node can reach the registry"
                    .to_string(),
            ),
            LaunchError::ReadinessTimeout(..) => Some(
                "Inspect the diagnostics bundle; pods stuck Pending usually mean insufficient GPUs or storage"
                    .to_string(),
            ),
            LaunchError::ReleaseError(_) => {
                Some("Check chart access with `helm repo update` and the registry API key".to_string())
            }
            LaunchError::Declined(_) => Some("Re-run with --force to skip confirmation".to_string()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for LaunchError {
    fn from(err: anyhow::Error) -> Self {
        LaunchError::Internal(err.to_string())
    }
}
