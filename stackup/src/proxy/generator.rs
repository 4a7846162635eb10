//! State-driven regeneration

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::errors::LaunchError;
use crate::proxy::control::{ApplyOutcome, ProxyControl};
use crate::proxy::discovery::Discovery;
use crate::proxy::render::{render, ProxyConfig};
use crate::proxy::topology::{ServiceEndpoint, ServiceKind, Topology, TopologyBuilder, TopologyMode};
use crate::storage::deployment::{DeploymentState, DeploymentStateStore};

/// Summary of one regeneration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Regeneration {
    pub mode: TopologyMode,
    pub outcome: ApplyOutcome,
    pub sha256: String,
    /// Services routed to the sentinel
    pub unresolved: Vec<ServiceKind>,
}

pub struct ProxyGenerator {
    store: DeploymentStateStore,
    discovery: Discovery,
    builder: TopologyBuilder,
    control: Arc<dyn ProxyControl>,
    include_notebook: bool,
}

impl ProxyGenerator {
    pub fn new(
        store: DeploymentStateStore,
        discovery: Discovery,
        builder: TopologyBuilder,
        control: Arc<dyn ProxyControl>,
        include_notebook: bool,
    ) -> Self {
        Self {
            store,
            discovery,
            builder,
            control,
            include_notebook,
        }
    }

    /// Topology matching `state`, plus the services routed to the sentinel.
    /// The notebook route is kept when it was requested or when the cluster
    /// already serves it.
    pub async fn topology_for(&self, state: &DeploymentState) -> (Topology, Vec<ServiceKind>) {
        if !state.deployed {
            return (self.builder.pre_deployment(), Vec::new());
        }
        let endpoints: Vec<ServiceEndpoint> = self
            .discovery
            .discover(&ServiceKind::for_release(true))
            .await
            .into_iter()
            .filter(|e| {
                e.service != ServiceKind::Notebook || self.include_notebook || !e.upstream.is_sentinel()
            })
            .collect();
        let unresolved = endpoints
            .iter()
            .filter(|e| e.upstream.is_sentinel())
            .map(|e| e.service)
            .collect();
        (self.builder.post_deployment(&endpoints), unresolved)
    }

    /// Render the configuration for the committed state without applying it
    pub async fn plan(&self) -> (Topology, ProxyConfig, Vec<ServiceKind>) {
        let state = self.store.read_committed().await;
        let (topology, unresolved) = self.topology_for(&state).await;
        let config = render(&topology);
        (topology, config, unresolved)
    }

    /// Render and apply the configuration for the committed state
    pub async fn regenerate(&self) -> Result<Regeneration, LaunchError> {
        let (topology, config, unresolved) = self.plan().await;
        let outcome = self.control.apply(&config).await?;

        let regeneration = Regeneration {
            mode: topology.mode,
            outcome,
            sha256: config.sha256,
            unresolved,
        };
        if regeneration.outcome != ApplyOutcome::Unchanged {
            info!(
                "Proxy regenerated: {} topology ({:?})",
                regeneration.mode, regeneration.outcome
            );
        }
        Ok(regeneration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::scripted::ScriptedRunner;
    use crate::filesys::file::File;
    use crate::proxy::control::MemoryControl;
    use crate::proxy::discovery::Addressing;
    use crate::proxy::topology::Listen;

    fn generator(
        dir: &tempfile::TempDir,
        runner: Arc<ScriptedRunner>,
        control: Arc<MemoryControl>,
    ) -> (ProxyGenerator, DeploymentStateStore) {
        let store = DeploymentStateStore::new(File::new(dir.path().join("deployment.json")));
        let listen = Listen {
            server_name: "nemo.test".to_string(),
            http_port: 80,
            https_port: 443,
            tls_cert: "/c.crt".to_string(),
            tls_key: "/c.key".to_string(),
        };
        let generator = ProxyGenerator::new(
            store.clone(),
            Discovery::new(runner, "default", "nemo", Addressing::ClusterIp),
            TopologyBuilder::new(listen, "127.0.0.1:8080", "nemo"),
            control,
            false,
        );
        (generator, store)
    }

    #[tokio::test]
    async fn test_topology_follows_deployment_state() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok(
            "kubectl get svc",
            r#"{"items":[{"metadata":{"name":"nemo-data-store"},"spec":{"clusterIP":"10.0.0.9","ports":[{"port":3000}]}}]}"#,
        );
        let control = Arc::new(MemoryControl::new());
        let (generator, store) = generator(&tmp, runner, control.clone());

        let first = generator.regenerate().await.unwrap();
        assert_eq!(first.mode, TopologyMode::PreDeployment);
        assert!(first.unresolved.is_empty());

        store.mark_deployed("nemo", "default", "25.6.0").await.unwrap();
        let second = generator.regenerate().await.unwrap();
        assert_eq!(second.mode, TopologyMode::PostDeployment);
        assert_eq!(second.outcome, ApplyOutcome::Applied);
        assert_eq!(second.unresolved.len(), 7);
        assert!(!second.unresolved.contains(&ServiceKind::DataStore));
        assert!(control.last().unwrap().text.contains("server 10.0.0.9:3000;"));

        let third = generator.regenerate().await.unwrap();
        assert_eq!(third.outcome, ApplyOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_regeneration_waits_for_transition() {
        let tmp = tempfile::tempdir().unwrap();
        let control = Arc::new(MemoryControl::new());
        let (generator, store) = generator(&tmp, Arc::new(ScriptedRunner::new()), control);

        let guard = store.begin_transition().await;
        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.read_committed().await }
        });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        store
            .commit(&guard, &DeploymentState::deployed("nemo", "default", "latest"))
            .await
            .unwrap();
        drop(guard);

        assert!(pending.await.unwrap().deployed);
        assert_eq!(
            generator.regenerate().await.unwrap().mode,
            TopologyMode::PostDeployment
        );
    }
}
