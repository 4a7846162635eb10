//! Launch configuration
//!
//! Built once from the command line and the optional settings file, then
//! passed by reference. Nothing below this layer reads the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::cli::{DeployArgs, GlobalArgs};
use crate::cluster::credentials::Credentials;
use crate::cluster::lifecycle::ClusterOptions;
use crate::cluster::release::{ChartSource, ReleasePlan, LATEST};
use crate::errors::LaunchError;
use crate::logs::{LogLevel, LogOptions};
use crate::preflight::checks::{PreflightRequirements, ToolRequirement, ToolVersion};
use crate::proxy::discovery::Addressing;
use crate::proxy::topology::{Listen, TopologyBuilder};
use crate::proxy::watch;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workload::client::WorkloadSpec;

/// Proxy options
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    pub config_path: PathBuf,
    pub binary: String,
    pub ui_backend: String,
    pub listen: Listen,
    pub addressing: Addressing,
    pub watch: watch::Options,
}

impl ProxyOptions {
    pub fn from_settings(settings: &Settings, public_host: &str) -> Self {
        let proxy = &settings.proxy;
        Self {
            config_path: PathBuf::from(&proxy.config_path),
            binary: proxy.binary.clone(),
            ui_backend: proxy.ui_backend.clone(),
            listen: Listen {
                server_name: public_host.to_string(),
                http_port: proxy.http_port,
                https_port: proxy.https_port,
                tls_cert: proxy.tls_cert.clone(),
                tls_key: proxy.tls_key.clone(),
            },
            addressing: if proxy.host_network {
                Addressing::ClusterIp
            } else {
                Addressing::NodePort
            },
            watch: watch::Options {
                interval: Duration::from_secs(proxy.watch_interval_secs.max(1)),
            },
        }
    }

    pub fn topology_builder(&self, release: &str) -> TopologyBuilder {
        TopologyBuilder::new(self.listen.clone(), self.ui_backend.clone(), release)
    }
}

/// Options shared by every command
#[derive(Debug, Clone)]
pub struct BaseConfig {
    pub layout: StorageLayout,
    pub log: LogOptions,
    pub namespace: String,
    pub release: String,
    pub proxy: ProxyOptions,
    pub preflight: PreflightRequirements,
    pub include_notebook: bool,
}

/// Full configuration of a `deploy` run
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub base: BaseConfig,
    pub plan: ReleasePlan,
    pub credentials: Option<Credentials>,
    pub cluster: ClusterOptions,
    pub workload: Option<WorkloadSpec>,
    pub platform_url: String,
    pub force: bool,
    pub dry_run: bool,
    pub check_deps: bool,
    pub install_deps: bool,
    pub purge_volumes: bool,
}

/// State directory from the flag, or the platform default
pub fn layout_for(global: &GlobalArgs) -> StorageLayout {
    match &global.state_dir {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    }
}

/// Read `settings.json` from the state directory; absent means defaults
pub async fn load_settings(layout: &StorageLayout) -> Result<Settings, LaunchError> {
    let file = layout.settings_file();
    if !file.exists().await {
        return Ok(Settings::default());
    }
    file.read_json::<Settings>()
        .await
        .map_err(|e| LaunchError::ConfigError(format!("{:?}: {}", file.path(), e)))
}

fn resolve_against(base: &Path, path: &str) -> String {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        path.to_string()
    } else {
        base.join(candidate).to_string_lossy().to_string()
    }
}

impl BaseConfig {
    pub fn new(global: &GlobalArgs, settings: &Settings, layout: StorageLayout) -> Result<Self, LaunchError> {
        let min_driver = ToolVersion::parse(&settings.preflight.min_driver).ok_or_else(|| {
            LaunchError::ConfigError(format!(
                "invalid minimum driver version: {}",
                settings.preflight.min_driver
            ))
        })?;

        let log = LogOptions {
            log_level: if global.verbose {
                LogLevel::Debug
            } else {
                settings.log_level
            },
            stdout: true,
            log_dir: Some(layout.logs_dir().path().to_path_buf()),
            json_format: global.json_logs || settings.json_logs,
        };

        let preflight = PreflightRequirements {
            min_gpus: settings.preflight.min_gpus,
            supported_gpu_models: settings.preflight.supported_gpu_models.clone(),
            min_driver,
            min_free_disk_gb: settings.preflight.min_free_disk_gb,
            disk_path: layout.base_dir.clone(),
            tools: ToolRequirement::defaults(),
        };

        Ok(Self {
            proxy: ProxyOptions::from_settings(settings, &settings.release.public_host),
            namespace: settings.release.namespace.clone(),
            release: settings.release.release_name.clone(),
            include_notebook: false,
            layout,
            log,
            preflight,
        })
    }
}

impl LaunchConfig {
    pub fn new(
        global: &GlobalArgs,
        args: &DeployArgs,
        settings: &Settings,
        layout: StorageLayout,
        cwd: &Path,
    ) -> Result<Self, LaunchError> {
        if args.version.is_some() && args.chart_url.is_some() {
            return Err(LaunchError::ConfigError(
                "--version and --chart-url are mutually exclusive".to_string(),
            ));
        }

        let mut base = BaseConfig::new(global, settings, layout)?;
        base.include_notebook = args.enable_notebook;

        let source = match &args.chart_url {
            Some(url) => {
                Url::parse(url).map_err(|e| LaunchError::ConfigError(format!("invalid chart URL {}: {}", url, e)))?;
                ChartSource::Archive { url: url.clone() }
            }
            None => ChartSource::Repository {
                name: settings.release.repo_name.clone(),
                url: settings.release.repo_url.clone(),
                chart: settings.release.chart_name.clone(),
                version: args.version.clone().unwrap_or_else(|| LATEST.to_string()),
            },
        };

        let plan = ReleasePlan {
            release: base.release.clone(),
            namespace: base.namespace.clone(),
            source,
            values_files: args.values.iter().map(|v| resolve_against(cwd, v)).collect(),
            set_values: ReleasePlan::feature_toggles(args.enable_notebook),
        };

        // tokens are only needed when something will be installed
        let needs_credentials = !args.check_deps;
        let credentials = if needs_credentials {
            Some(Credentials::new(
                SecretString::from(args.ngc_api_key.clone().unwrap_or_default()),
                SecretString::from(args.hf_token.clone().unwrap_or_default()),
            )?)
        } else {
            None
        };

        let platform_url = settings.workload.platform_url.clone();
        Url::parse(&platform_url)
            .map_err(|e| LaunchError::ConfigError(format!("invalid platform URL {}: {}", platform_url, e)))?;

        let workload = if args.skip_workload {
            None
        } else {
            let workload = &settings.workload;
            let model = args.model.clone().unwrap_or_else(|| workload.model.clone());
            Some(WorkloadSpec::from_model(
                &model,
                &workload.image_name,
                &workload.image_tag,
                &workload.pvc_size,
                workload.gpu,
            )?)
        };

        Ok(Self {
            base,
            plan,
            credentials,
            cluster: ClusterOptions::default(),
            workload,
            platform_url,
            force: args.force,
            dry_run: args.dry_run,
            check_deps: args.check_deps,
            install_deps: args.install_deps,
            purge_volumes: args.purge_volumes,
        })
    }

    /// Credentials, required for any mutating run
    pub fn credentials(&self) -> Result<&Credentials, LaunchError> {
        self.credentials
            .as_ref()
            .ok_or_else(|| LaunchError::ConfigError("registry API key and model hub token are required".to_string()))
    }
}
