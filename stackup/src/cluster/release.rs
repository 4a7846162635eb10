//! Chart acquisition and release install

use std::time::Duration;

use tracing::info;

use crate::cluster::credentials::{Credentials, REGISTRY_USER};
use crate::errors::LaunchError;
use crate::exec::command::CommandSpec;
use crate::exec::helm::{Helm, InstallArgs};
use crate::filesys::dir::Dir;

/// Chart version that means "whatever the repository serves as newest"
pub const LATEST: &str = "latest";
/// Bound on a single release install
pub const INSTALL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Where the chart comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChartSource {
    Repository {
        name: String,
        url: String,
        chart: String,
        version: String,
    },
    Archive {
        url: String,
    },
}

impl ChartSource {
    /// Version to pass to the package tool; `latest` passes none
    pub fn pinned_version(&self) -> Option<&str> {
        match self {
            ChartSource::Repository { version, .. } if version != LATEST => Some(version.as_str()),
            _ => None,
        }
    }

    /// Version recorded in the deployment state
    pub fn version_label(&self) -> String {
        match self {
            ChartSource::Repository { version, .. } => version.clone(),
            ChartSource::Archive { url } => url
                .rsplit('/')
                .next()
                .unwrap_or(url)
                .trim_end_matches(".tgz")
                .to_string(),
        }
    }
}

/// Everything that shapes the install command
#[derive(Debug, Clone)]
pub struct ReleasePlan {
    pub release: String,
    pub namespace: String,
    pub source: ChartSource,
    pub values_files: Vec<String>,
    pub set_values: Vec<(String, String)>,
}

impl ReleasePlan {
    /// Feature toggles passed with `--set`
    pub fn feature_toggles(enable_notebook: bool) -> Vec<(String, String)> {
        let mut toggles = Vec::new();
        if enable_notebook {
            toggles.push(("tags.jupyter".to_string(), "true".to_string()));
        }
        toggles
    }

    fn install_args<'a>(&'a self, chart: &'a str) -> InstallArgs<'a> {
        InstallArgs {
            release: &self.release,
            chart,
            namespace: &self.namespace,
            version: self.source.pinned_version(),
            values_files: &self.values_files,
            set_values: &self.set_values,
            timeout: INSTALL_TIMEOUT,
        }
    }

    /// Chart reference before any archive has been fetched
    pub fn chart_reference(&self, work_dir: &Dir) -> String {
        match &self.source {
            ChartSource::Repository { name, chart, .. } => format!("{}/{}", name, chart),
            ChartSource::Archive { url } => work_dir
                .path()
                .join(url.rsplit('/').next().unwrap_or(url))
                .to_string_lossy()
                .to_string(),
        }
    }

    /// Commands the install would run, for dry runs
    pub fn planned_commands(&self, work_dir: &Dir) -> Vec<CommandSpec> {
        let mut commands = Vec::new();
        match &self.source {
            ChartSource::Repository { name, url, .. } => {
                commands.push(CommandSpec::new("helm").args([
                    "repo",
                    "add",
                    name.as_str(),
                    url.as_str(),
                    "--force-update",
                    "--username",
                    REGISTRY_USER,
                    "--password-stdin",
                ]));
                commands.push(CommandSpec::new("helm").args(["repo", "update", name.as_str()]));
            }
            ChartSource::Archive { url } => {
                let destination = work_dir.path().to_string_lossy().to_string();
                commands.push(
                    CommandSpec::new("helm")
                        .args([
                            "fetch",
                            url.as_str(),
                            "--destination",
                            destination.as_str(),
                            "--username",
                            REGISTRY_USER,
                            "--password",
                        ])
                        .secret_arg("<registry key>"),
                );
            }
        }
        let chart = self.chart_reference(work_dir);
        commands.push(Helm::install_spec(&self.install_args(&chart)));
        commands
    }
}

pub struct ReleaseInstaller {
    helm: Helm,
    work_dir: Dir,
}

impl ReleaseInstaller {
    pub fn new(helm: Helm, work_dir: Dir) -> Self {
        Self { helm, work_dir }
    }

    /// Make the chart available locally; returns the chart reference to install
    pub async fn prepare_chart(&self, plan: &ReleasePlan, credentials: &Credentials) -> Result<String, LaunchError> {
        match &plan.source {
            ChartSource::Repository { name, url, .. } => {
                info!("Adding chart repository {}", url);
                self.helm
                    .repo_add(name, url, REGISTRY_USER, credentials.registry_token())
                    .await
                    .map_err(|e| LaunchError::ReleaseError(format!("chart repository add failed: {}", e)))?;
                self.helm
                    .repo_update(name)
                    .await
                    .map_err(|e| LaunchError::ReleaseError(format!("chart repository update failed: {}", e)))?;
                Ok(plan.chart_reference(&self.work_dir))
            }
            ChartSource::Archive { url } => {
                info!("Fetching chart archive {}", url);
                self.work_dir.create().await?;
                self.helm
                    .fetch(url, self.work_dir.path(), REGISTRY_USER, credentials.registry_token())
                    .await
                    .map_err(|e| LaunchError::ReleaseError(format!("chart fetch failed: {}", e)))
            }
        }
    }

    /// Fetch the chart and run `helm upgrade --install`, bounded by
    /// [`INSTALL_TIMEOUT`]
    pub async fn install(&self, plan: &ReleasePlan, credentials: &Credentials) -> Result<(), LaunchError> {
        let chart = self.prepare_chart(plan, credentials).await?;
        info!(
            "Installing release {} ({}) into {}",
            plan.release,
            plan.source.version_label(),
            plan.namespace
        );

        let args = plan.install_args(&chart);
        tokio::time::timeout(INSTALL_TIMEOUT, self.helm.upgrade_install(&args))
            .await
            .map_err(|_| LaunchError::ReleaseError(format!("install exceeded {:?}", INSTALL_TIMEOUT)))??;

        info!("Release {} installed", plan.release);
        Ok(())
    }
}
