//! Deployment state record
//!
//! A single JSON record that decides which proxy topology is active. Writes go
//! through a temp file and rename, so an interrupted writer never leaves a
//! partial record behind.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::errors::LaunchError;
use crate::filesys::file::File;

/// Persisted deployment state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentState {
    /// Whether the platform is fully installed and healthy
    #[serde(default)]
    pub deployed: bool,

    /// Time of the last transition
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    /// Release identifier
    #[serde(default)]
    pub release: Option<String>,

    /// Namespace the release lives in
    #[serde(default)]
    pub namespace: Option<String>,

    /// Chart version that was installed
    #[serde(default)]
    pub chart_version: Option<String>,
}

impl DeploymentState {
    /// State recorded after a successful install
    pub fn deployed(release: &str, namespace: &str, chart_version: &str) -> Self {
        Self {
            deployed: true,
            timestamp: Some(Utc::now()),
            release: Some(release.to_string()),
            namespace: Some(namespace.to_string()),
            chart_version: Some(chart_version.to_string()),
        }
    }

    /// State recorded after uninstall
    pub fn not_deployed() -> Self {
        Self {
            deployed: false,
            timestamp: Some(Utc::now()),
            ..Default::default()
        }
    }
}

/// Durable single-record store
///
/// Cloning shares the transition lock, so every handle in a process observes
/// transitions in order.
#[derive(Debug, Clone)]
pub struct DeploymentStateStore {
    file: File,
    transition: Arc<Mutex<()>>,
}

/// Held while a transition (write plus dependent work) is in flight
pub struct TransitionGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl DeploymentStateStore {
    pub fn new(file: File) -> Self {
        Self {
            file,
            transition: Arc::new(Mutex::new(())),
        }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Read the current record without coordinating with writers.
    ///
    /// A missing file is "not deployed". An unreadable file is also treated as
    /// "not deployed" so the proxy falls back to the safe topology.
    pub async fn load(&self) -> DeploymentState {
        if !self.file.exists().await {
            return DeploymentState::default();
        }
        match self.file.read_json::<DeploymentState>().await {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    "Unreadable deployment state at {:?}, assuming not deployed: {}",
                    self.file.path(),
                    e
                );
                DeploymentState::default()
            }
        }
    }

    /// Wait for any in-flight transition, then read
    pub async fn read_committed(&self) -> DeploymentState {
        let _guard = self.transition.lock().await;
        self.load().await
    }

    /// Start a transition; readers using [`read_committed`] block until the
    /// guard is dropped.
    ///
    /// [`read_committed`]: DeploymentStateStore::read_committed
    pub async fn begin_transition(&self) -> TransitionGuard<'_> {
        TransitionGuard {
            _guard: self.transition.lock().await,
        }
    }

    /// Persist a record; caller must hold a transition guard
    pub async fn commit(
        &self,
        _guard: &TransitionGuard<'_>,
        state: &DeploymentState,
    ) -> Result<(), LaunchError> {
        self.file
            .write_json_atomic(state)
            .await
            .map_err(|e| LaunchError::StorageError(format!("writing deployment state: {}", e)))?;
        info!(deployed = state.deployed, "Deployment state committed");
        Ok(())
    }

    /// Convenience: record a successful deployment in its own transition
    pub async fn mark_deployed(
        &self,
        release: &str,
        namespace: &str,
        chart_version: &str,
    ) -> Result<DeploymentState, LaunchError> {
        let guard = self.begin_transition().await;
        let state = DeploymentState::deployed(release, namespace, chart_version);
        self.commit(&guard, &state).await?;
        Ok(state)
    }

    /// Convenience: reset to not deployed in its own transition
    pub async fn mark_uninstalled(&self) -> Result<DeploymentState, LaunchError> {
        let guard = self.begin_transition().await;
        let state = DeploymentState::not_deployed();
        self.commit(&guard, &state).await?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn store_in(dir: &tempfile::TempDir) -> DeploymentStateStore {
        DeploymentStateStore::new(File::new(dir.path().join("deployment.json")))
    }

    #[tokio::test]
    async fn test_missing_file_is_not_deployed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(!store.load().await.deployed);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_not_deployed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.file().write_string("{\"deployed\": tr").await.unwrap();
        assert!(!store.load().await.deployed);
    }

    #[tokio::test]
    async fn test_mark_deployed_then_uninstalled() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.mark_deployed("nemo", "default", "25.6.0").await.unwrap();
        let state = store.load().await;
        assert!(state.deployed);
        assert_eq!(state.release.as_deref(), Some("nemo"));
        assert_eq!(state.namespace.as_deref(), Some("default"));

        store.mark_uninstalled().await.unwrap();
        let state = store.load().await;
        assert!(!state.deployed);
        assert!(state.release.is_none());
    }

    #[tokio::test]
    async fn test_read_committed_waits_for_transition() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let reader = store.clone();

        let guard = store.begin_transition().await;
        let handle = tokio::spawn(async move { reader.read_committed().await });

        // The reader cannot finish while the guard is held
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        store
            .commit(&guard, &DeploymentState::deployed("nemo", "default", "latest"))
            .await
            .unwrap();
        drop(guard);

        let observed = handle.await.unwrap();
        assert!(observed.deployed);
    }
}
