//! Applying configuration to the running proxy

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::errors::LaunchError;
use crate::exec::command::{CommandRunner, CommandSpec};
use crate::filesys::file::File;
use crate::proxy::render::{validate_syntax, ProxyConfig};
use crate::utils::sha256_hash;

/// What happened to a configuration handed to [`ProxyControl::apply`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyOutcome {
    /// Active and the running proxy reloaded it
    Applied,
    /// Active on disk; no running proxy could be signaled
    Staged,
    /// Identical to the active configuration; nothing done
    Unchanged,
}

/// A proxy backend
#[async_trait]
pub trait ProxyControl: Send + Sync {
    /// Validate and activate `config`. On any validation failure the active
    /// configuration is left untouched.
    async fn apply(&self, config: &ProxyConfig) -> Result<ApplyOutcome, LaunchError>;
}

/// nginx backend: `nginx -t`, rename, `nginx -s reload`
pub struct NginxControl {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    active: File,
}

impl NginxControl {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: impl Into<String>, active: File) -> Self {
        Self {
            runner,
            binary: binary.into(),
            active,
        }
    }

    async fn active_hash(&self) -> Option<String> {
        if !self.active.exists().await {
            return None;
        }
        self.active
            .read_string()
            .await
            .ok()
            .map(|text| sha256_hash(text.as_bytes()))
    }

    /// Backend validation of a staged file. `Ok(false)` when the binary is
    /// not installed and only the internal check applies.
    async fn backend_validate(&self, staged: &File) -> Result<bool, LaunchError> {
        let staged_path = staged.path().to_string_lossy().to_string();
        let spec = CommandSpec::new(&self.binary).args(["-t", "-q", "-c", staged_path.as_str()]);
        match self.runner.run(&spec).await {
            Ok(output) if output.success() => Ok(true),
            Ok(output) => Err(LaunchError::ProxyError(format!(
                "configuration rejected by {}: {}",
                self.binary,
                output.stderr.trim()
            ))),
            Err(LaunchError::PrerequisiteNotFound { .. }) => {
                warn!("{} not found; relying on internal validation only", self.binary);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn reload(&self) -> bool {
        let spec = CommandSpec::new(&self.binary).args(["-s", "reload"]);
        match self.runner.run(&spec).await {
            Ok(output) if output.success() => true,
            Ok(output) => {
                debug!("Reload failed: {}", output.stderr.trim());
                false
            }
            Err(e) => {
                debug!("Reload failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl ProxyControl for NginxControl {
    async fn apply(&self, config: &ProxyConfig) -> Result<ApplyOutcome, LaunchError> {
        validate_syntax(&config.text)?;

        if self.active_hash().await.as_deref() == Some(config.sha256.as_str()) {
            debug!("Proxy configuration unchanged ({})", config.sha256);
            return Ok(ApplyOutcome::Unchanged);
        }

        let staged = File::new(self.active.staging_path());
        staged.write_string(&config.text).await?;

        let validated = match self.backend_validate(&staged).await {
            Ok(validated) => validated,
            Err(e) => {
                let _ = staged.delete().await;
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(staged.path(), self.active.path()).await {
            let _ = staged.delete().await;
            return Err(e.into());
        }
        info!("Proxy configuration written to {:?}", self.active.path());

        if validated && self.reload().await {
            info!("Proxy reloaded");
            Ok(ApplyOutcome::Applied)
        } else {
            warn!("No running proxy to reload; configuration staged for next start");
            Ok(ApplyOutcome::Staged)
        }
    }
}

/// In-memory backend that records every applied configuration
#[derive(Default)]
pub struct MemoryControl {
    applied: Mutex<Vec<ProxyConfig>>,
}

impl MemoryControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> Vec<ProxyConfig> {
        self.applied.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<ProxyConfig> {
        self.applied().pop()
    }
}

#[async_trait]
impl ProxyControl for MemoryControl {
    async fn apply(&self, config: &ProxyConfig) -> Result<ApplyOutcome, LaunchError> {
        validate_syntax(&config.text)?;
        let mut applied = self
            .applied
            .lock()
            .map_err(|_| LaunchError::Internal("memory proxy poisoned".to_string()))?;
        if applied.last().map(|c| c.sha256 == config.sha256).unwrap_or(false) {
            return Ok(ApplyOutcome::Unchanged);
        }
        applied.push(config.clone());
        Ok(ApplyOutcome::Applied)
    }
}
