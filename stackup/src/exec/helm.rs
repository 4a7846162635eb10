//! helm wrapper

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::errors::LaunchError;
use crate::exec::command::{CommandOutput, CommandRunner, CommandSpec};

/// Lines helm prints that are noise rather than failure causes
const BENIGN_WARNING_MARKERS: &[&str] = &[
    "WARNING: Kubernetes configuration file is group-readable",
    "WARNING: Kubernetes configuration file is world-readable",
    "walk.go:",
    "coalesce.go:",
    "skipping loading invalid entry",
];

/// Drop benign warning lines from helm output
pub fn filter_benign_warnings(text: &str) -> String {
    text.lines()
        .filter(|line| !BENIGN_WARNING_MARKERS.iter().any(|m| line.contains(m)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Entry of `helm list -o json`
#[derive(Debug, Clone, Deserialize)]
pub struct HelmRelease {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub chart: String,
    #[serde(default)]
    pub app_version: String,
}

/// Arguments for `helm upgrade --install`
#[derive(Debug, Clone)]
pub struct InstallArgs<'a> {
    pub release: &'a str,
    pub chart: &'a str,
    pub namespace: &'a str,
    pub version: Option<&'a str>,
    pub values_files: &'a [String],
    pub set_values: &'a [(String, String)],
    pub timeout: Duration,
}

/// Typed access to the package tool
#[derive(Clone)]
pub struct Helm {
    runner: Arc<dyn CommandRunner>,
}

impl Helm {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Add (or refresh) an authenticated repository; the password goes over stdin
    pub async fn repo_add(&self, name: &str, url: &str, username: &str, password: &str) -> Result<(), LaunchError> {
        let spec = CommandSpec::new("helm")
            .args([
                "repo",
                "add",
                name,
                url,
                "--force-update",
                "--username",
                username,
                "--password-stdin",
            ])
            .stdin(password)
            .timeout(Duration::from_secs(120));
        self.runner.run_checked(&spec).await.map(|_| ())
    }

    pub async fn repo_update(&self, name: &str) -> Result<(), LaunchError> {
        let spec = CommandSpec::new("helm")
            .args(["repo", "update", name])
            .timeout(Duration::from_secs(180));
        self.runner.run_checked(&spec).await.map(|_| ())
    }

    /// Download a chart archive into `dest`; returns the archive path
    pub async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        username: &str,
        password: &str,
    ) -> Result<String, LaunchError> {
        let dest_str = dest.to_string_lossy().to_string();
        let spec = CommandSpec::new("helm")
            .args(["fetch", url, "--destination", &dest_str, "--username", username, "--password"])
            .secret_arg(password)
            .timeout(Duration::from_secs(300));
        self.runner.run_checked(&spec).await.map_err(|e| match e {
            LaunchError::CommandFailed { command, message } => LaunchError::CommandFailed {
                command,
                message: message.replace(password, "***"),
            },
            other => other,
        })?;

        let file_name = url
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| LaunchError::ConfigError(format!("chart URL has no file name: {}", url)))?;
        Ok(dest.join(file_name).to_string_lossy().to_string())
    }

    /// Releases in a namespace
    pub async fn list(&self, namespace: &str) -> Result<Vec<HelmRelease>, LaunchError> {
        let spec = CommandSpec::new("helm")
            .args(["list", "-n", namespace, "-a", "-o", "json"])
            .timeout(Duration::from_secs(60));
        let output = self.runner.run_checked(&spec).await?;
        let trimmed = output.stdout.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(trimmed)?)
    }

    pub async fn release_exists(&self, namespace: &str, release: &str) -> Result<bool, LaunchError> {
        Ok(self.list(namespace).await?.iter().any(|r| r.name == release))
    }

    /// `helm uninstall`; a release that is already gone is not an error
    pub async fn uninstall(&self, namespace: &str, release: &str) -> Result<(), LaunchError> {
        let spec = CommandSpec::new("helm")
            .args(["uninstall", release, "-n", namespace, "--wait", "--timeout", "10m"])
            .timeout(Duration::from_secs(660));
        let output = self.runner.run(&spec).await?;
        if output.success() || output.stderr.contains("not found") {
            return Ok(());
        }
        output.into_result(&spec).map(|_| ())
    }

    /// Build the install command line
    pub fn install_spec(args: &InstallArgs<'_>) -> CommandSpec {
        let timeout_arg = format!("{}m", args.timeout.as_secs() / 60);
        let mut spec = CommandSpec::new("helm").args([
            "upgrade",
            "--install",
            args.release,
            args.chart,
            "-n",
            args.namespace,
            "--create-namespace",
            "--timeout",
            timeout_arg.as_str(),
        ]);
        if let Some(version) = args.version {
            spec = spec.args(["--version", version]);
        }
        for file in args.values_files {
            spec = spec.args(["-f", file.as_str()]);
        }
        for (key, value) in args.set_values {
            spec = spec.args(["--set".to_string(), format!("{}={}", key, value)]);
        }
        spec
    }

    /// `helm upgrade --install` bounded by a hard wall-clock timeout
    pub async fn upgrade_install(&self, args: &InstallArgs<'_>) -> Result<CommandOutput, LaunchError> {
        let spec = Self::install_spec(args).timeout(args.timeout + Duration::from_secs(60));
        let output = self.runner.run(&spec).await?;

        for line in output.stderr.lines() {
            debug!(target: "helm", "{}", line);
        }

        if output.success() {
            return Ok(output);
        }
        let filtered = filter_benign_warnings(&output.stderr);
        Err(LaunchError::ReleaseError(format!(
            "{} failed: {}",
            spec.display(),
            if filtered.trim().is_empty() {
                output.stdout.trim().to_string()
            } else {
                filtered.trim().to_string()
            }
        )))
    }
}
