//! Host validation
//!
//! Every check is read-only. Hard failures stop the pipeline before anything
//! is mutated; soft failures are reported as warnings.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sysinfo::Disks;
use tracing::debug;

use crate::errors::LaunchError;
use crate::exec::command::{CommandRunner, CommandSpec};

/// Filesystems known to work for container storage
pub const SUPPORTED_FILESYSTEMS: &[&str] = &["ext4", "xfs", "btrfs"];

/// `major.minor.patch`, parsed leniently from tool output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ToolVersion(pub u32, pub u32, pub u32);

impl ToolVersion {
    /// First `x.y` or `x.y.z` found in `text`, ignoring prefixes like `v`
    /// and suffixes like `+g13654a5`
    pub fn parse(text: &str) -> Option<ToolVersion> {
        let bytes = text.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i].is_ascii_digit() && (i == 0 || !bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'v') {
                let end = text[i..]
                    .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                    .map(|n| i + n)
                    .unwrap_or(text.len());
                let parts: Vec<u32> = text[i..end]
                    .split('.')
                    .filter(|p| !p.is_empty())
                    .map_while(|p| p.parse().ok())
                    .collect();
                if parts.len() >= 2 {
                    return Some(ToolVersion(parts[0], parts[1], parts.get(2).copied().unwrap_or(0)));
                }
                i = end;
            }
            i += 1;
        }
        None
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Hard,
    Soft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum CheckOutcome {
    Pass(String),
    Fail(String),
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub severity: Severity,
    pub outcome: CheckOutcome,
}

impl CheckResult {
    fn pass(name: &str, severity: Severity, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            severity,
            outcome: CheckOutcome::Pass(detail.into()),
        }
    }

    fn fail(name: &str, severity: Severity, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            severity,
            outcome: CheckOutcome::Fail(detail.into()),
        }
    }

    fn skipped(name: &str, severity: Severity, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            severity,
            outcome: CheckOutcome::Skipped(detail.into()),
        }
    }

    pub fn failed(&self) -> bool {
        matches!(self.outcome, CheckOutcome::Fail(_))
    }
}

/// Results of a preflight run
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreflightReport {
    pub results: Vec<CheckResult>,
}

impl PreflightReport {
    pub fn has_hard_failures(&self) -> bool {
        self.hard_failures().next().is_some()
    }

    pub fn hard_failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.results
            .iter()
            .filter(|r| r.severity == Severity::Hard && r.failed())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &CheckResult> {
        self.results
            .iter()
            .filter(|r| r.severity == Severity::Soft && r.failed())
    }

    pub fn result(&self, name: &str) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Hard failure as an error, listing every failed check
    pub fn into_result(self) -> Result<PreflightReport, LaunchError> {
        if !self.has_hard_failures() {
            return Ok(self);
        }
        let failures = self
            .hard_failures()
            .map(|r| match &r.outcome {
                CheckOutcome::Fail(msg) => format!("{}: {}", r.name, msg),
                _ => r.name.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        Err(LaunchError::PreflightFailed(failures))
    }
}

/// A command-line tool the launcher depends on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequirement {
    pub name: String,
    pub version_args: Vec<String>,
    pub min_version: Option<ToolVersion>,
    pub install_hint: String,
    pub required: bool,
}

impl ToolRequirement {
    pub fn new(name: &str, version_args: &[&str], min_version: Option<ToolVersion>, install_hint: &str) -> Self {
        Self {
            name: name.to_string(),
            version_args: version_args.iter().map(|a| a.to_string()).collect(),
            min_version,
            install_hint: install_hint.to_string(),
            required: true,
        }
    }

    /// Tools the pipeline drives
    pub fn defaults() -> Vec<ToolRequirement> {
        vec![
            ToolRequirement::new(
                "docker",
                &["--version"],
                Some(ToolVersion(24, 0, 0)),
                "Install Docker Engine: https://docs.docker.com/engine/install/",
            ),
            ToolRequirement::new(
                "minikube",
                &["version"],
                Some(ToolVersion(1, 33, 0)),
                "Run `stackup deploy --install-deps` or see https://minikube.sigs.k8s.io/docs/start/",
            ),
            ToolRequirement::new(
                "kubectl",
                &["version", "--client"],
                Some(ToolVersion(1, 28, 0)),
                "Run `stackup deploy --install-deps` or see https://kubernetes.io/docs/tasks/tools/",
            ),
            ToolRequirement::new(
                "helm",
                &["version", "--short"],
                Some(ToolVersion(3, 14, 0)),
                "Run `stackup deploy --install-deps` or see https://helm.sh/docs/intro/install/",
            ),
        ]
    }
}

/// Thresholds for the host
#[derive(Debug, Clone)]
pub struct PreflightRequirements {
    pub min_gpus: usize,
    pub supported_gpu_models: Vec<String>,
    pub min_driver: ToolVersion,
    pub min_free_disk_gb: u64,
    /// Path whose filesystem is checked for space and type
    pub disk_path: PathBuf,
    pub tools: Vec<ToolRequirement>,
}

/// One GPU as reported by `nvidia-smi`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuInfo {
    pub name: String,
    pub driver: String,
}

/// Parse `nvidia-smi --query-gpu=name,driver_version --format=csv,noheader`
pub fn parse_gpu_csv(text: &str) -> Vec<GpuInfo> {
    text.lines()
        .filter_map(|line| {
            let (name, driver) = line.rsplit_once(',')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some(GpuInfo {
                name: name.to_string(),
                driver: driver.trim().to_string(),
            })
        })
        .collect()
}

/// GPU count (hard), model (soft) and driver (hard) checks
pub fn check_gpus(gpus: &[GpuInfo], req: &PreflightRequirements) -> Vec<CheckResult> {
    let mut results = Vec::new();

    if gpus.len() < req.min_gpus {
        results.push(CheckResult::fail(
            "gpu-count",
            Severity::Hard,
            format!("found {} GPU(s), need at least {}", gpus.len(), req.min_gpus),
        ));
    } else {
        results.push(CheckResult::pass("gpu-count", Severity::Hard, format!("{} GPU(s)", gpus.len())));
    }

    let unsupported: Vec<&str> = gpus
        .iter()
        .filter(|g| {
            !req.supported_gpu_models
                .iter()
                .any(|m| g.name.to_ascii_uppercase().contains(&m.to_ascii_uppercase()))
        })
        .map(|g| g.name.as_str())
        .collect();
    if gpus.is_empty() {
        results.push(CheckResult::skipped("gpu-model", Severity::Soft, "no GPUs"));
    } else if unsupported.is_empty() {
        results.push(CheckResult::pass("gpu-model", Severity::Soft, gpus[0].name.clone()));
    } else {
        results.push(CheckResult::fail(
            "gpu-model",
            Severity::Soft,
            format!("untested GPU model(s): {}", unsupported.join(", ")),
        ));
    }

    match gpus.first().map(|g| (g, ToolVersion::parse(&g.driver))) {
        None => results.push(CheckResult::skipped("gpu-driver", Severity::Hard, "no GPUs")),
        Some((gpu, Some(version))) if version >= req.min_driver => {
            results.push(CheckResult::pass("gpu-driver", Severity::Hard, gpu.driver.clone()))
        }
        Some((gpu, _)) => results.push(CheckResult::fail(
            "gpu-driver",
            Severity::Hard,
            format!("driver {} is older than {}", gpu.driver, req.min_driver),
        )),
    }

    results
}

/// Space and type of the filesystem backing a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInfo {
    pub mount_point: PathBuf,
    pub file_system: String,
    pub available_bytes: u64,
}

/// The mounted filesystem containing `path` (longest mount point prefix)
pub fn disk_for(path: &Path) -> Option<DiskInfo> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| DiskInfo {
            mount_point: d.mount_point().to_path_buf(),
            file_system: d.file_system().to_string_lossy().to_string(),
            available_bytes: d.available_space(),
        })
}

/// Free space and filesystem type checks, both soft
pub fn check_disk(disk: Option<&DiskInfo>, req: &PreflightRequirements) -> Vec<CheckResult> {
    let Some(disk) = disk else {
        return vec![
            CheckResult::skipped("disk-space", Severity::Soft, "filesystem not found"),
            CheckResult::skipped("filesystem", Severity::Soft, "filesystem not found"),
        ];
    };

    let free_gb = disk.available_bytes / 1_000_000_000;
    let space = if free_gb < req.min_free_disk_gb {
        CheckResult::fail(
            "disk-space",
            Severity::Soft,
            format!(
                "{} GB free on {:?}, recommended {} GB",
                free_gb, disk.mount_point, req.min_free_disk_gb
            ),
        )
    } else {
        CheckResult::pass("disk-space", Severity::Soft, format!("{} GB free", free_gb))
    };

    let fs = if SUPPORTED_FILESYSTEMS.contains(&disk.file_system.as_str()) {
        CheckResult::pass("filesystem", Severity::Soft, disk.file_system.clone())
    } else {
        CheckResult::fail(
            "filesystem",
            Severity::Soft,
            format!("{} is untested; prefer one of {:?}", disk.file_system, SUPPORTED_FILESYSTEMS),
        )
    };

    vec![space, fs]
}

/// Runs every check against the host
pub struct Preflight {
    runner: Arc<dyn CommandRunner>,
}

impl Preflight {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Presence and version of one tool
    pub async fn check_tool(&self, tool: &ToolRequirement) -> (CheckResult, Option<ToolVersion>) {
        let severity = if tool.required { Severity::Hard } else { Severity::Soft };
        let spec = CommandSpec::new(&tool.name)
            .args(tool.version_args.iter().cloned())
            .timeout(Duration::from_secs(30));

        let output = match self.runner.run(&spec).await {
            Ok(output) => output,
            Err(LaunchError::PrerequisiteNotFound { .. }) => {
                return (
                    CheckResult::fail(&tool.name, severity, format!("not installed. {}", tool.install_hint)),
                    None,
                );
            }
            Err(e) => return (CheckResult::fail(&tool.name, severity, e.to_string()), None),
        };

        let version = ToolVersion::parse(&output.stdout).or_else(|| ToolVersion::parse(&output.stderr));
        debug!("{} version: {:?}", tool.name, version);
        let result = match (version, tool.min_version) {
            (Some(found), Some(min)) if found < min => CheckResult::fail(
                &tool.name,
                severity,
                format!("version {} is older than {}. {}", found, min, tool.install_hint),
            ),
            (Some(found), _) => CheckResult::pass(&tool.name, severity, found.to_string()),
            (None, Some(_)) if !output.success() => CheckResult::fail(
                &tool.name,
                severity,
                format!("`{}` failed: {}", spec.display(), output.stderr.trim()),
            ),
            (None, _) => CheckResult::pass(&tool.name, severity, "version unknown"),
        };
        (result, version)
    }

    async fn gpus(&self) -> Result<Vec<GpuInfo>, LaunchError> {
        let spec = CommandSpec::new("nvidia-smi")
            .args(["--query-gpu=name,driver_version", "--format=csv,noheader"])
            .timeout(Duration::from_secs(30));
        let output = self.runner.run_checked(&spec).await?;
        Ok(parse_gpu_csv(&output.stdout))
    }

    pub async fn run(&self, req: &PreflightRequirements) -> PreflightReport {
        let mut report = PreflightReport::default();

        match self.gpus().await {
            Ok(gpus) => report.results.extend(check_gpus(&gpus, req)),
            Err(e) => report.results.push(CheckResult::fail(
                "gpu-count",
                Severity::Hard,
                format!("nvidia-smi unavailable: {}", e),
            )),
        }

        for tool in &req.tools {
            let (result, _) = self.check_tool(tool).await;
            report.results.push(result);
        }

        report
            .results
            .extend(check_disk(disk_for(&req.disk_path).as_ref(), req));
        report
    }
}
