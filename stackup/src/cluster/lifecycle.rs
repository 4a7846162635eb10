//! Local cluster bring-up and prior-release cleanup

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::app::shutdown::Shutdown;
use crate::errors::LaunchError;
use crate::exec::command::{CommandRunner, CommandSpec};
use crate::exec::helm::Helm;
use crate::exec::kubectl::Kubectl;
use crate::prompt::Prompter;
use crate::readiness::policy::{poll_until, PollOutcome, RetryPolicy};

/// Custom resources the platform's operators create in the release namespace
pub const ORPHAN_RESOURCE_KINDS: &[&str] = &[
    "nemotrainingjobs",
    "nemoentityhandlers",
    "nemodatastores",
    "nimcaches",
    "nimpipelines",
    "nimservices",
    "jobs.batch.volcano.sh",
    "podgroups.scheduling.volcano.sh",
];

/// CRDs installed by the chart that are not always labeled
pub const KNOWN_CRDS: &[&str] = &[
    "nemotrainingjobs.apps.nvidia.com",
    "nemoentityhandlers.apps.nvidia.com",
    "nemodatastores.apps.nvidia.com",
    "nimcaches.apps.nvidia.com",
    "nimpipelines.apps.nvidia.com",
    "nimservices.apps.nvidia.com",
];

pub const VOLCANO_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/volcano-sh/volcano/v1.9.0/installer/volcano-development.yaml";
const VOLCANO_NAMESPACE: &str = "volcano-system";
const VOLCANO_SCHEDULER: &str = "volcano-scheduler";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    NotRunning,
    /// The host is up but the kubelet or API server is not yet
    Starting,
    Running,
}

#[derive(Debug, Deserialize)]
struct MinikubeStatus {
    #[serde(rename = "Host", default)]
    host: String,
    #[serde(rename = "Kubelet", default)]
    kubelet: String,
    #[serde(rename = "APIServer", default)]
    api_server: String,
}

/// Interpret `minikube status -o json`
pub fn parse_status(stdout: &str) -> ClusterState {
    let Ok(status) = serde_json::from_str::<MinikubeStatus>(stdout.trim()) else {
        return ClusterState::NotRunning;
    };
    let running = |s: &str| s == "Running";
    if running(&status.host) && running(&status.kubelet) && running(&status.api_server) {
        ClusterState::Running
    } else if running(&status.host) {
        ClusterState::Starting
    } else {
        ClusterState::NotRunning
    }
}

/// Resource limits for `minikube start`
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub cpus: String,
    pub memory: String,
    pub volcano_manifest: String,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            cpus: "no-limit".to_string(),
            memory: "no-limit".to_string(),
            volcano_manifest: VOLCANO_MANIFEST_URL.to_string(),
        }
    }
}

pub struct ClusterManager {
    runner: Arc<dyn CommandRunner>,
    kubectl: Kubectl,
    helm: Helm,
    options: ClusterOptions,
}

impl ClusterManager {
    pub fn new(runner: Arc<dyn CommandRunner>, options: ClusterOptions) -> Self {
        Self {
            kubectl: Kubectl::new(runner.clone()),
            helm: Helm::new(runner.clone()),
            runner,
            options,
        }
    }

    pub async fn status(&self) -> ClusterState {
        let spec = CommandSpec::new("minikube")
            .args(["status", "-o", "json"])
            .timeout(Duration::from_secs(60));
        // exits non-zero whenever a component is stopped; the JSON is still printed
        match self.runner.run(&spec).await {
            Ok(output) => parse_status(&output.stdout),
            Err(e) => {
                debug!("minikube status failed: {}", e);
                ClusterState::NotRunning
            }
        }
    }

    /// `minikube start` command line
    pub fn start_spec(&self) -> CommandSpec {
        CommandSpec::new("minikube")
            .args([
                "start",
                "--driver=docker",
                "--container-runtime=docker",
                "--gpus",
                "all",
            ])
            .arg(format!("--cpus={}", self.options.cpus))
            .arg(format!("--memory={}", self.options.memory))
            .timeout(Duration::from_secs(20 * 60))
    }

    /// Start the cluster if needed and wait for the API server
    pub async fn ensure_running(&self, shutdown: &mut Shutdown) -> Result<ClusterState, LaunchError> {
        let state = self.status().await;
        match state {
            ClusterState::Running if self.kubectl.api_ready().await => {
                info!("Cluster already running");
                return Ok(state);
            }
            ClusterState::NotRunning => {
                info!("Starting cluster");
                self.runner
                    .run_checked(&self.start_spec())
                    .await
                    .map_err(|e| LaunchError::ClusterError(format!("cluster start failed: {}", e)))?;
            }
            _ => info!("Cluster is starting; waiting for the API server"),
        }

        let kubectl = &self.kubectl;
        poll_until(
            &RetryPolicy::api_server(),
            shutdown,
            || async move {
                if kubectl.api_ready().await {
                    PollOutcome::Ready(())
                } else {
                    PollOutcome::Pending("API server not ready".to_string())
                }
            },
            |progress, elapsed| info!("{} ({}s)", progress, elapsed.as_secs()),
        )
        .await
        .map_err(|f| f.into_error("the cluster API server"))?;

        info!("Cluster API server ready");
        Ok(ClusterState::Running)
    }

    /// Install the batch scheduler unless it is already serving
    pub async fn ensure_volcano(&self) -> Result<(), LaunchError> {
        if self
            .kubectl
            .deployment_available(VOLCANO_NAMESPACE, VOLCANO_SCHEDULER)
            .await
        {
            info!("Volcano scheduler already available");
            return Ok(());
        }
        info!("Installing Volcano scheduler");
        self.kubectl.apply_url(&self.options.volcano_manifest).await
    }

    /// Remove a prior installation of `release` after confirmation.
    /// Returns whether anything was removed.
    pub async fn clear_prior_release(
        &self,
        namespace: &str,
        release: &str,
        purge_volumes: bool,
        prompter: &dyn Prompter,
    ) -> Result<bool, LaunchError> {
        if !self.helm.release_exists(namespace, release).await? {
            debug!("No prior release {} in {}", release, namespace);
            return Ok(false);
        }

        let question = format!(
            "Release {} already exists in namespace {}. Remove it before installing?",
            release, namespace
        );
        if !prompter.confirm(&question).await {
            return Err(LaunchError::Declined(format!(
                "removal of existing release {}",
                release
            )));
        }

        self.remove_release(namespace, release, purge_volumes).await?;
        Ok(true)
    }

    /// Uninstall the release and sweep what the package tool leaves behind.
    /// Only the uninstall itself is fatal; the sweep is best effort.
    pub async fn remove_release(&self, namespace: &str, release: &str, purge_volumes: bool) -> Result<(), LaunchError> {
        info!("Uninstalling release {} from {}", release, namespace);
        self.helm.uninstall(namespace, release).await?;

        for kind in ORPHAN_RESOURCE_KINDS {
            if let Err(e) = self.kubectl.delete_all(namespace, kind).await {
                warn!("Could not delete {} in {}: {}", kind, namespace, e);
            }
        }

        let instance = format!("app.kubernetes.io/instance={}", release);
        if let Err(e) = self
            .kubectl
            .delete_labeled(Some(namespace), "configmap,secret", &instance)
            .await
        {
            warn!("Could not delete labeled config objects: {}", e);
        }

        let part_of = format!("app.kubernetes.io/part-of={}", release);
        let mut crds = match self.kubectl.names_labeled(None, "crd", &part_of).await {
            Ok(names) => names
                .into_iter()
                .map(|n| n.trim_start_matches("customresourcedefinition.apiextensions.k8s.io/").to_string())
                .collect(),
            Err(e) => {
                warn!("Could not list labeled CRDs: {}", e);
                Vec::new()
            }
        };
        for known in KNOWN_CRDS {
            if !crds.iter().any(|c| c == known) {
                crds.push(known.to_string());
            }
        }
        let crd_refs: Vec<&str> = crds.iter().map(String::as_str).collect();
        if let Err(e) = self.kubectl.delete_named(None, "crd", &crd_refs).await {
            warn!("Could not delete CRDs: {}", e);
        }

        if purge_volumes {
            info!("Deleting persistent volume claims in {}", namespace);
            if let Err(e) = self.kubectl.delete_all(namespace, "pvc").await {
                warn!("Could not delete PVCs in {}: {}", namespace, e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::scripted::ScriptedRunner;
    use crate::prompt::FixedAnswer;

    const RUNNING: &str = r#"{"Name":"minikube","Host":"Running","Kubelet":"Running","APIServer":"Running","Kubeconfig":"Configured"}"#;
    const STOPPED: &str = r#"{"Name":"minikube","Host":"Stopped","Kubelet":"Stopped","APIServer":"Stopped"}"#;

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status(RUNNING), ClusterState::Running);
        assert_eq!(parse_status(STOPPED), ClusterState::NotRunning);
        assert_eq!(
            parse_status(r#"{"Host":"Running","Kubelet":"Stopped","APIServer":"Stopped"}"#),
            ClusterState::Starting
        );
        assert_eq!(parse_status("🤷 Profile \"minikube\" not found."), ClusterState::NotRunning);
    }

    #[tokio::test]
    async fn test_running_cluster_is_not_restarted() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok("minikube status", RUNNING);
        let manager = ClusterManager::new(runner.clone(), ClusterOptions::default());

        let state = manager.ensure_running(&mut Shutdown::never()).await.unwrap();
        assert_eq!(state, ClusterState::Running);
        assert_eq!(runner.count("minikube start"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_cluster_is_started_then_awaited() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("minikube status", 7, "");
        runner.fail("kubectl get --raw /readyz", 1, "connection refused");
        let manager = ClusterManager::new(runner.clone(), ClusterOptions::default());

        let flip = {
            let runner = runner.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(12)).await;
                runner.ok("kubectl get --raw /readyz", "ok");
            })
        };

        let state = manager.ensure_running(&mut Shutdown::never()).await.unwrap();
        flip.await.unwrap();
        assert_eq!(state, ClusterState::Running);
        let calls = runner.calls();
        assert!(calls.iter().any(|c| c.starts_with(
            "minikube start --driver=docker --container-runtime=docker --gpus all --cpus=no-limit --memory=no-limit"
        )));
        assert!(runner.count("kubectl get --raw /readyz") >= 3);
    }

    #[tokio::test]
    async fn test_volcano_skipped_when_scheduler_available() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok("kubectl get deployment volcano-scheduler", "1");
        let manager = ClusterManager::new(runner.clone(), ClusterOptions::default());
        manager.ensure_volcano().await.unwrap();
        assert_eq!(runner.count("kubectl apply"), 0);

        let runner = Arc::new(ScriptedRunner::new());
        let manager = ClusterManager::new(runner.clone(), ClusterOptions::default());
        manager.ensure_volcano().await.unwrap();
        assert_eq!(runner.count(&format!("kubectl apply -f {}", VOLCANO_MANIFEST_URL)), 1);
    }

    #[tokio::test]
    async fn test_declined_removal_is_fatal_and_mutates_nothing() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok("helm list -n default", r#"[{"name":"nemo","namespace":"default","status":"deployed"}]"#);
        let manager = ClusterManager::new(runner.clone(), ClusterOptions::default());

        let err = manager
            .clear_prior_release("default", "nemo", false, &FixedAnswer(false))
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Declined(_)));
        assert_eq!(runner.count("helm uninstall"), 0);
        assert_eq!(runner.count("kubectl delete"), 0);
    }

    #[tokio::test]
    async fn test_removal_sweeps_leftovers() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok("helm list -n default", r#"[{"name":"nemo"}]"#);
        runner.ok(
            "kubectl get crd -l app.kubernetes.io/part-of=nemo",
            "customresourcedefinition.apiextensions.k8s.io/customizationconfigs.apps.nvidia.com\n",
        );
        runner.fail("kubectl delete nimcaches", 1, "the server doesn't have a resource type");
        let manager = ClusterManager::new(runner.clone(), ClusterOptions::default());

        let removed = manager
            .clear_prior_release("default", "nemo", true, &FixedAnswer(true))
            .await
            .unwrap();
        assert!(removed);

        let calls = runner.calls();
        assert!(calls.contains(&"helm uninstall nemo -n default --wait --timeout 10m".to_string()));
        // a failing kind does not stop the sweep
        assert!(calls.iter().any(|c| c.starts_with("kubectl delete podgroups.scheduling.volcano.sh --all")));
        assert!(calls
            .iter()
            .any(|c| c.starts_with("kubectl delete configmap,secret -l app.kubernetes.io/instance=nemo")));
        let crd_delete = calls.iter().find(|c| c.starts_with("kubectl delete crd")).unwrap();
        assert!(crd_delete.contains("customizationconfigs.apps.nvidia.com"));
        assert!(crd_delete.contains("nimservices.apps.nvidia.com"));
        assert!(calls.iter().any(|c| c.starts_with("kubectl delete pvc --all -n default")));
    }

    #[tokio::test]
    async fn test_no_prior_release() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok("helm list", "[]");
        let manager = ClusterManager::new(runner.clone(), ClusterOptions::default());
        let removed = manager
            .clear_prior_release("default", "nemo", false, &FixedAnswer(false))
            .await
            .unwrap();
        assert!(!removed);
    }
}
