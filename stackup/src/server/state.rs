//! Server state

use crate::storage::deployment::DeploymentStateStore;

/// Server state shared across handlers
pub struct ServerState {
    pub store: DeploymentStateStore,
    pub release: String,
    pub namespace: String,
}

impl ServerState {
    pub fn new(store: DeploymentStateStore, release: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            release: release.into(),
            namespace: namespace.into(),
        }
    }
}
