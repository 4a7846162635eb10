//! kubectl wrapper

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::errors::LaunchError;
use crate::exec::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::models::pod::{PodList, PodStatusSnapshot};
use crate::models::service::ServiceList;

const KUBECTL_TIMEOUT: Duration = Duration::from_secs(60);

/// Typed access to the cluster control plane through `kubectl`
#[derive(Clone)]
pub struct Kubectl {
    runner: Arc<dyn CommandRunner>,
}

impl Kubectl {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn spec<I, S>(args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new("kubectl").args(args).timeout(KUBECTL_TIMEOUT)
    }

    async fn checked(&self, spec: CommandSpec) -> Result<CommandOutput, LaunchError> {
        self.runner.run_checked(&spec).await
    }

    /// Whether the API server answers its readiness endpoint
    pub async fn api_ready(&self) -> bool {
        self.runner
            .run(&Self::spec(["get", "--raw", "/readyz"]))
            .await
            .map(|o| o.success())
            .unwrap_or(false)
    }

    /// Pod snapshots in a namespace, optionally filtered by label selector
    pub async fn get_pods(
        &self,
        namespace: &str,
        selector: Option<&str>,
    ) -> Result<Vec<PodStatusSnapshot>, LaunchError> {
        let mut spec = Self::spec(["get", "pods", "-n", namespace, "-o", "json"]);
        if let Some(selector) = selector {
            spec = spec.args(["-l", selector]);
        }
        let output = self.checked(spec).await?;
        let list: PodList = serde_json::from_str(&output.stdout)?;
        Ok(list.snapshots())
    }

    pub async fn get_services(&self, namespace: &str) -> Result<ServiceList, LaunchError> {
        let output = self
            .checked(Self::spec(["get", "svc", "-n", namespace, "-o", "json"]))
            .await?;
        Ok(serde_json::from_str(&output.stdout)?)
    }

    pub async fn logs(
        &self,
        namespace: &str,
        pod: &str,
        previous: bool,
        tail: Option<u32>,
    ) -> Result<String, LaunchError> {
        let mut spec = Self::spec(["logs", pod, "-n", namespace, "--all-containers=true"]);
        if previous {
            spec = spec.arg("--previous");
        }
        if let Some(lines) = tail {
            spec = spec.arg(format!("--tail={}", lines));
        }
        Ok(self.checked(spec).await?.stdout)
    }

    pub async fn describe(&self, namespace: &str, kind: &str, name: &str) -> Result<String, LaunchError> {
        Ok(self
            .checked(Self::spec(["describe", kind, name, "-n", namespace]))
            .await?
            .stdout)
    }

    /// Raw object JSON
    pub async fn get_json(&self, namespace: &str, kind: &str, name: &str) -> Result<String, LaunchError> {
        Ok(self
            .checked(Self::spec(["get", kind, name, "-n", namespace, "-o", "json"]))
            .await?
            .stdout)
    }

    /// Namespace events, oldest first
    pub async fn events(&self, namespace: &str, field_selector: Option<&str>) -> Result<String, LaunchError> {
        let mut spec = Self::spec([
            "get",
            "events",
            "-n",
            namespace,
            "--sort-by=.lastTimestamp",
        ]);
        if let Some(selector) = field_selector {
            spec = spec.arg(format!("--field-selector={}", selector));
        }
        Ok(self.checked(spec).await?.stdout)
    }

    pub async fn namespace_exists(&self, namespace: &str) -> Result<bool, LaunchError> {
        let output = self
            .runner
            .run(&Self::spec(["get", "namespace", namespace, "-o", "name"]))
            .await?;
        Ok(output.success())
    }

    pub async fn ensure_namespace(&self, namespace: &str) -> Result<(), LaunchError> {
        if self.namespace_exists(namespace).await? {
            return Ok(());
        }
        debug!("Creating namespace {}", namespace);
        self.checked(Self::spec(["create", "namespace", namespace]))
            .await
            .map(|_| ())
    }

    /// Apply a manifest passed on stdin, so its content never shows up in
    /// process listings
    pub async fn apply_stdin(&self, namespace: Option<&str>, manifest: &str) -> Result<(), LaunchError> {
        let mut spec = Self::spec(["apply", "-f", "-"]).stdin(manifest);
        if let Some(ns) = namespace {
            spec = spec.args(["-n", ns]);
        }
        self.checked(spec).await.map(|_| ())
    }

    /// Apply a remote manifest
    pub async fn apply_url(&self, url: &str) -> Result<(), LaunchError> {
        self.checked(Self::spec(["apply", "-f", url]).timeout(Duration::from_secs(180)))
            .await
            .map(|_| ())
    }

    /// Delete named objects; missing objects are not an error
    pub async fn delete_named(&self, namespace: Option<&str>, kind: &str, names: &[&str]) -> Result<(), LaunchError> {
        if names.is_empty() {
            return Ok(());
        }
        let mut spec = Self::spec(["delete", kind])
            .args(names.iter().copied())
            .args(["--ignore-not-found=true", "--wait=false"]);
        if let Some(ns) = namespace {
            spec = spec.args(["-n", ns]);
        }
        self.checked(spec).await.map(|_| ())
    }

    /// Delete every object of `kind` in the namespace
    pub async fn delete_all(&self, namespace: &str, kind: &str) -> Result<(), LaunchError> {
        self.checked(Self::spec([
            "delete",
            kind,
            "--all",
            "-n",
            namespace,
            "--ignore-not-found=true",
            "--wait=false",
        ]))
        .await
        .map(|_| ())
    }

    /// Delete objects matching a label selector
    pub async fn delete_labeled(&self, namespace: Option<&str>, kinds: &str, selector: &str) -> Result<(), LaunchError> {
        let mut spec = Self::spec(["delete", kinds, "-l", selector, "--ignore-not-found=true"]);
        if let Some(ns) = namespace {
            spec = spec.args(["-n", ns]);
        }
        self.checked(spec).await.map(|_| ())
    }

    /// Names of objects of `kind` matching a label selector (`kind/name` form)
    pub async fn names_labeled(&self, namespace: Option<&str>, kind: &str, selector: &str) -> Result<Vec<String>, LaunchError> {
        let mut spec = Self::spec(["get", kind, "-l", selector, "-o", "name"]);
        if let Some(ns) = namespace {
            spec = spec.args(["-n", ns]);
        }
        let output = self.checked(spec).await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Whether a deployment in the namespace reports all replicas available
    pub async fn deployment_available(&self, namespace: &str, name: &str) -> bool {
        let spec = Self::spec([
            "get",
            "deployment",
            name,
            "-n",
            namespace,
            "-o",
            "jsonpath={.status.availableReplicas}",
        ]);
        match self.runner.run(&spec).await {
            Ok(output) if output.success() => output
                .stdout
                .trim()
                .parse::<u32>()
                .map(|n| n > 0)
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::scripted::ScriptedRunner;

    #[tokio::test]
    async fn test_get_pods_with_selector() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok(
            "kubectl get pods -n meta -o json -l app=nim",
            r#"{"items":[{"metadata":{"name":"nim-0"},"status":{"phase":"Running"}}]}"#,
        );
        let kubectl = Kubectl::new(runner.clone());

        let pods = kubectl.get_pods("meta", Some("app=nim")).await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].name, "nim-0");
    }

    #[tokio::test]
    async fn test_apply_stdin_keeps_manifest_out_of_args() {
        let runner = Arc::new(ScriptedRunner::new());
        let kubectl = Kubectl::new(runner.clone());

        kubectl
            .apply_stdin(Some("default"), "{\"secret\":\"value\"}")
            .await
            .unwrap();

        let specs = runner.specs();
        assert_eq!(specs.len(), 1);
        assert!(!specs[0].display().contains("value"));
        assert_eq!(specs[0].stdin.as_deref(), Some("{\"secret\":\"value\"}"));
    }

    #[tokio::test]
    async fn test_deployment_available_parses_replicas() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok("kubectl get deployment volcano-scheduler", "1");
        let kubectl = Kubectl::new(runner.clone());
        assert!(kubectl.deployment_available("volcano-system", "volcano-scheduler").await);

        let runner = Arc::new(ScriptedRunner::new());
        runner.ok("kubectl get deployment volcano-scheduler", "");
        let kubectl = Kubectl::new(runner);
        assert!(!kubectl.deployment_available("volcano-system", "volcano-scheduler").await);
    }
}
