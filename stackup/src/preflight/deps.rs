//! Installs missing cluster tooling into the launcher's bin directory

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::errors::LaunchError;
use crate::exec::command::{CommandRunner, CommandSpec};
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::preflight::checks::{CheckResult, Preflight, ToolRequirement};
use crate::prompt::Prompter;

/// How a downloaded artifact becomes an executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// The download is the binary
    Binary,
    /// Gzipped tarball; `member` is the binary's path inside it
    TarGz { member: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDownload {
    pub name: String,
    pub url: String,
    pub artifact: Artifact,
}

/// URL templates for installable tools; `{arch}` is replaced by the host
/// architecture (`amd64`, `arm64`)
#[derive(Debug, Clone)]
pub struct DownloadSources {
    pub kubectl: String,
    pub helm: String,
    pub minikube: String,
}

impl Default for DownloadSources {
    fn default() -> Self {
        Self {
            kubectl: "https://dl.k8s.io/release/v1.31.2/bin/linux/{arch}/kubectl".to_string(),
            helm: "https://get.helm.sh/helm-v3.16.2-linux-{arch}.tar.gz".to_string(),
            minikube: "https://storage.googleapis.com/minikube/releases/v1.34.0/minikube-linux-{arch}"
                .to_string(),
        }
    }
}

impl DownloadSources {
    /// Download for `tool`, or `None` when the tool cannot be installed here
    pub fn plan(&self, tool: &str, arch: &str) -> Option<ToolDownload> {
        let (template, artifact) = match tool {
            "kubectl" => (&self.kubectl, Artifact::Binary),
            "minikube" => (&self.minikube, Artifact::Binary),
            "helm" => (
                &self.helm,
                Artifact::TarGz {
                    member: format!("linux-{}/helm", arch),
                },
            ),
            _ => return None,
        };
        Some(ToolDownload {
            name: tool.to_string(),
            url: template.replace("{arch}", arch),
            artifact,
        })
    }
}

/// Architecture name used in release URLs
pub fn host_arch() -> Result<&'static str, LaunchError> {
    match std::env::consts::ARCH {
        "x86_64" => Ok("amd64"),
        "aarch64" => Ok("arm64"),
        other => Err(LaunchError::PreflightFailed(format!(
            "no tool downloads for architecture {}",
            other
        ))),
    }
}

pub struct DependencyInstaller {
    runner: Arc<dyn CommandRunner>,
    client: reqwest::Client,
    bin_dir: Dir,
    sources: DownloadSources,
    prompter: Arc<dyn Prompter>,
}

impl DependencyInstaller {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        bin_dir: Dir,
        sources: DownloadSources,
        prompter: Arc<dyn Prompter>,
    ) -> Result<Self, LaunchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self {
            runner,
            client,
            bin_dir,
            sources,
            prompter,
        })
    }

    /// Tools that fail their check, with the failing results
    pub async fn missing(&self, tools: &[ToolRequirement]) -> Vec<(ToolRequirement, CheckResult)> {
        let preflight = Preflight::new(self.runner.clone());
        let mut missing = Vec::new();
        for tool in tools {
            let (result, _) = preflight.check_tool(tool).await;
            if result.failed() {
                missing.push((tool.clone(), result));
            }
        }
        missing
    }

    /// Install every failing tool that has a known download, then re-check.
    /// Returns the checks that still fail afterwards.
    pub async fn install_missing(&self, tools: &[ToolRequirement]) -> Result<Vec<CheckResult>, LaunchError> {
        let missing = self.missing(tools).await;
        if missing.is_empty() {
            info!("All required tools are present");
            return Ok(Vec::new());
        }

        let arch = host_arch()?;
        let downloads: Vec<ToolDownload> = missing
            .iter()
            .filter_map(|(tool, _)| {
                let plan = self.sources.plan(&tool.name, arch);
                if plan.is_none() {
                    warn!("{} cannot be installed automatically: {}", tool.name, tool.install_hint);
                }
                plan
            })
            .collect();

        if !downloads.is_empty() {
            let names: Vec<&str> = downloads.iter().map(|d| d.name.as_str()).collect();
            let question = format!(
                "Install {} into {}?",
                names.join(", "),
                self.bin_dir.path().display()
            );
            if !self.prompter.confirm(&question).await {
                return Err(LaunchError::PreflightFailed(format!(
                    "installation of {} declined",
                    names.join(", ")
                )));
            }

            self.bin_dir.create().await?;
            for download in &downloads {
                let path = self.install(download).await?;
                info!("Installed {} to {:?}", download.name, path);
            }
        }

        let remaining = self
            .missing(tools)
            .await
            .into_iter()
            .map(|(_, result)| result)
            .collect();
        Ok(remaining)
    }

    /// Download one tool and place its executable in the bin directory
    pub async fn install(&self, download: &ToolDownload) -> Result<PathBuf, LaunchError> {
        let target = self.bin_dir.file(&download.name);
        match &download.artifact {
            Artifact::Binary => {
                self.fetch(&download.url, target.path()).await?;
            }
            Artifact::TarGz { member } => {
                let archive = self.bin_dir.path().join(format!("{}.tar.gz", download.name));
                self.fetch(&download.url, &archive).await?;
                let extracted = self.extract(&archive, member).await;
                File::new(&archive).delete().await?;
                extracted?;
            }
        }
        target.set_executable().await?;
        Ok(target.path().to_path_buf())
    }

    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), LaunchError> {
        debug!("Downloading {} to {:?}", url, dest);
        let response = self.client.get(url).send().await?.error_for_status()?;

        let partial = dest.with_extension("part");
        let mut out = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            out.write_all(&chunk?).await?;
        }
        out.flush().await?;
        out.sync_all().await?;
        drop(out);

        tokio::fs::rename(&partial, dest).await?;
        Ok(())
    }

    async fn extract(&self, archive: &Path, member: &str) -> Result<(), LaunchError> {
        let strip = member.matches('/').count();
        let spec = CommandSpec::new("tar")
            .arg("-xzf")
            .arg(archive.to_string_lossy())
            .arg("-C")
            .arg(self.bin_dir.path().to_string_lossy())
            .arg(format!("--strip-components={}", strip))
            .arg(member)
            .timeout(Duration::from_secs(120));
        self.runner.run_checked(&spec).await?;
        Ok(())
    }
}
