//! Command implementations
//!
//! Every command receives its collaborators (command runner, proxy backend,
//! prompter) from the caller, so the same code runs against real tools and
//! scripted ones.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::app::options::{BaseConfig, LaunchConfig};
use crate::app::shutdown::Shutdown;
use crate::cluster::credentials::{
    CredentialProvisioner, Credentials, IMAGE_PULL_SECRET, INFERENCE_SECRET, MODEL_HUB_SECRET,
    REGISTRY_API_SECRET,
};
use crate::cluster::lifecycle::{ClusterManager, ClusterOptions};
use crate::cluster::release::ReleaseInstaller;
use crate::deploy::fsm::{Phase, PipelineEvent, PipelineFsm};
use crate::errors::LaunchError;
use crate::exec::command::{CommandRunner, CommandSpec};
use crate::exec::helm::Helm;
use crate::exec::kubectl::Kubectl;
use crate::preflight::checks::{CheckResult, Preflight, PreflightReport};
use crate::preflight::deps::{DependencyInstaller, DownloadSources};
use crate::prompt::Prompter;
use crate::proxy::control::ProxyControl;
use crate::proxy::discovery::Discovery;
use crate::proxy::generator::{ProxyGenerator, Regeneration};
use crate::proxy::render::ProxyConfig;
use crate::proxy::watch;
use crate::readiness::diagnostics::DiagnosticsCollector;
use crate::readiness::pods::wait_for_platform;
use crate::readiness::policy::RetryPolicy;
use crate::storage::deployment::{DeploymentState, DeploymentStateStore};
use crate::utils::mask_secrets;
use crate::workload::client::PlatformClient;
use crate::workload::readiness::WorkloadWatcher;

/// External collaborators of a command
#[derive(Clone)]
pub struct Toolchain {
    pub runner: Arc<dyn CommandRunner>,
    pub proxy: Arc<dyn ProxyControl>,
    pub prompter: Arc<dyn Prompter>,
}

/// What a successful deploy produced
#[derive(Debug, Clone, Serialize)]
pub struct DeploySummary {
    pub release: String,
    pub namespace: String,
    pub chart_version: String,
    /// `None` when the proxy could not be regenerated
    pub proxy: Option<Regeneration>,
    /// Model served, unless the workload was skipped
    pub model: Option<String>,
    pub phases: Vec<Phase>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeployOutcome {
    /// `--check-deps`: tools that fail their check
    DependencyReport { missing: Vec<CheckResult> },
    /// `--dry-run`: commands that would run, secrets masked
    DryRun { commands: Vec<String> },
    Deployed(DeploySummary),
}

pub fn state_store(base: &BaseConfig) -> DeploymentStateStore {
    DeploymentStateStore::new(base.layout.deployment_file())
}

pub fn proxy_generator(base: &BaseConfig, tools: &Toolchain, store: DeploymentStateStore) -> ProxyGenerator {
    ProxyGenerator::new(
        store,
        Discovery::new(
            tools.runner.clone(),
            base.namespace.clone(),
            base.release.clone(),
            base.proxy.addressing,
        ),
        base.proxy.topology_builder(&base.release),
        tools.proxy.clone(),
        base.include_notebook,
    )
}

/// The deployment pipeline
pub struct Pipeline<'a> {
    config: &'a LaunchConfig,
    tools: Toolchain,
    store: DeploymentStateStore,
    fsm: PipelineFsm,
    platform_policy: RetryPolicy,
    workload_policy: RetryPolicy,
    download_sources: DownloadSources,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a LaunchConfig, tools: Toolchain) -> Self {
        Self {
            store: state_store(&config.base),
            config,
            tools,
            fsm: PipelineFsm::new(),
            platform_policy: RetryPolicy::platform(),
            workload_policy: RetryPolicy::workload(),
            download_sources: DownloadSources::default(),
        }
    }

    /// Override the readiness policies
    pub fn with_policies(mut self, platform: RetryPolicy, workload: RetryPolicy) -> Self {
        self.platform_policy = platform;
        self.workload_policy = workload;
        self
    }

    pub fn phase(&self) -> &Phase {
        self.fsm.phase()
    }

    fn transition(&mut self, event: PipelineEvent) -> Result<(), LaunchError> {
        self.fsm.process(event).map_err(LaunchError::Internal)?;
        info!("Pipeline phase: {}", self.fsm.phase());
        Ok(())
    }

    fn enter(&mut self, phase: Phase) -> Result<(), LaunchError> {
        self.transition(PipelineEvent::Enter(phase))
    }

    fn skip_to(&mut self, phase: Phase) -> Result<(), LaunchError> {
        self.transition(PipelineEvent::SkipTo(phase))
    }

    fn kubectl(&self) -> Kubectl {
        Kubectl::new(self.tools.runner.clone())
    }

    fn diagnostics(&self) -> DiagnosticsCollector {
        DiagnosticsCollector::new(self.kubectl(), self.config.base.layout.diagnostics_dir())
    }

    fn installer(&self) -> Result<DependencyInstaller, LaunchError> {
        DependencyInstaller::new(
            self.tools.runner.clone(),
            self.config.base.layout.bin_dir(),
            self.download_sources.clone(),
            self.tools.prompter.clone(),
        )
    }

    /// Run to a terminal phase
    pub async fn run(&mut self, shutdown: &mut Shutdown) -> Result<DeployOutcome, LaunchError> {
        match self.run_phases(shutdown).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("Pipeline failed during {}: {}", self.fsm.phase(), e);
                if !self.fsm.phase().is_terminal() {
                    self.fsm
                        .process(PipelineEvent::Fail(e.class(), e.to_string()))
                        .map_err(LaunchError::Internal)?;
                }
                Err(e)
            }
        }
    }

    async fn run_phases(&mut self, shutdown: &mut Shutdown) -> Result<DeployOutcome, LaunchError> {
        let config = self.config;

        if config.check_deps {
            let missing = self
                .installer()?
                .missing(&config.base.preflight.tools)
                .await
                .into_iter()
                .map(|(_, result)| result)
                .collect();
            return Ok(DeployOutcome::DependencyReport { missing });
        }

        // checked before anything on the host or cluster changes
        let credentials = config.credentials()?.clone();

        self.enter(Phase::Preflight)?;
        self.preflight().await?;

        if config.dry_run {
            return Ok(DeployOutcome::DryRun {
                commands: self.planned_commands(&credentials),
            });
        }

        if config.install_deps {
            self.enter(Phase::Dependencies)?;
            let remaining = self.installer()?.install_missing(&config.base.preflight.tools).await?;
            PreflightReport { results: remaining }.into_result()?;
            self.enter(Phase::Cluster)?;
        } else {
            self.skip_to(Phase::Cluster)?;
        }

        let cluster = ClusterManager::new(self.tools.runner.clone(), config.cluster.clone());
        cluster.ensure_running(shutdown).await?;
        cluster
            .clear_prior_release(
                &config.base.namespace,
                &config.base.release,
                config.purge_volumes,
                self.tools.prompter.as_ref(),
            )
            .await?;
        cluster.ensure_volcano().await?;

        self.enter(Phase::Credentials)?;
        CredentialProvisioner::new(self.kubectl())
            .provision(&config.base.namespace, &credentials)
            .await?;

        self.enter(Phase::Release)?;
        let helm = Helm::new(self.tools.runner.clone());
        ReleaseInstaller::new(helm, config.base.layout.work_dir())
            .install(&config.plan, &credentials)
            .await?;

        self.enter(Phase::Readiness)?;
        let diagnostics = self.diagnostics();
        wait_for_platform(
            &self.kubectl(),
            &config.base.namespace,
            &self.platform_policy,
            shutdown,
            &diagnostics,
        )
        .await?;

        self.enter(Phase::Exposing)?;
        let chart_version = config.plan.source.version_label();
        self.store
            .mark_deployed(&config.base.release, &config.base.namespace, &chart_version)
            .await?;
        let proxy = match proxy_generator(&config.base, &self.tools, self.store.clone())
            .regenerate()
            .await
        {
            Ok(regeneration) => Some(regeneration),
            Err(e) => {
                // the platform is up; the proxy can be fixed and re-applied later
                warn!("Proxy regeneration failed, run `stackup proxy apply` once fixed: {}", e);
                None
            }
        };

        let model = match &config.workload {
            None => {
                info!("Skipping dependent workload");
                self.skip_to(Phase::Complete)?;
                None
            }
            Some(spec) => {
                self.enter(Phase::Workload)?;
                let client = PlatformClient::new(&config.platform_url)?;
                client.ensure_deployment(spec).await?;

                self.enter(Phase::WorkloadReadiness)?;
                let kubectl = self.kubectl();
                let watcher = WorkloadWatcher {
                    client: &client,
                    kubectl: &kubectl,
                    pod_namespace: &config.base.namespace,
                    spec,
                };
                watcher.wait(&self.workload_policy, shutdown, &diagnostics).await?;

                self.enter(Phase::Verifying)?;
                client.verify_model_served(&spec.model).await?;
                self.enter(Phase::Complete)?;
                Some(spec.model.clone())
            }
        };

        Ok(DeployOutcome::Deployed(DeploySummary {
            release: config.base.release.clone(),
            namespace: config.base.namespace.clone(),
            chart_version,
            proxy,
            model,
            phases: self.fsm.history().to_vec(),
        }))
    }

    async fn preflight(&self) -> Result<PreflightReport, LaunchError> {
        let config = self.config;
        let report = Preflight::new(self.tools.runner.clone())
            .run(&config.base.preflight)
            .await;
        for warning in report.warnings() {
            warn!("Preflight warning: {} {:?}", warning.name, warning.outcome);
        }

        // missing tools are fixed in the dependency phase when asked to
        let deferred: Vec<&str> = if config.install_deps {
            config.base.preflight.tools.iter().map(|t| t.name.as_str()).collect()
        } else {
            Vec::new()
        };
        let blocking: Vec<CheckResult> = report
            .hard_failures()
            .filter(|r| !deferred.contains(&r.name.as_str()))
            .cloned()
            .collect();
        PreflightReport { results: blocking }.into_result()?;
        Ok(report)
    }

    /// Every mutating command the pipeline would run, with secrets masked
    pub fn planned_commands(&self, credentials: &Credentials) -> Vec<String> {
        let config = self.config;
        let cluster = ClusterManager::new(self.tools.runner.clone(), config.cluster.clone());
        let namespace = &config.base.namespace;

        let mut lines = vec![
            cluster.start_spec().display(),
            CommandSpec::new("kubectl")
                .args(["apply", "-f", config.cluster.volcano_manifest.as_str()])
                .display(),
        ];
        for secret in [IMAGE_PULL_SECRET, REGISTRY_API_SECRET, INFERENCE_SECRET, MODEL_HUB_SECRET] {
            lines.push(format!("kubectl apply -f - -n {}  (secret {} on stdin)", namespace, secret));
        }
        lines.extend(
            config
                .plan
                .planned_commands(&config.base.layout.work_dir())
                .iter()
                .map(CommandSpec::display),
        );
        if let Some(spec) = &config.workload {
            lines.push(format!(
                "POST {}/v1/deployment/model-deployments ({}/{})",
                config.platform_url, spec.namespace, spec.name
            ));
        }

        let secrets = [credentials.registry_token(), credentials.model_hub_token()];
        lines.iter().map(|line| mask_secrets(line, &secrets)).collect()
    }
}

/// Remove the release, reset the state and switch the proxy back
pub async fn uninstall(
    base: &BaseConfig,
    tools: &Toolchain,
    purge_volumes: bool,
) -> Result<Option<Regeneration>, LaunchError> {
    let question = format!(
        "Uninstall release {} from namespace {}?",
        base.release, base.namespace
    );
    if !tools.prompter.confirm(&question).await {
        return Err(LaunchError::Declined(format!("uninstall of {}", base.release)));
    }

    let cluster = ClusterManager::new(tools.runner.clone(), ClusterOptions::default());
    cluster
        .remove_release(&base.namespace, &base.release, purge_volumes)
        .await?;

    let store = state_store(base);
    store.mark_uninstalled().await?;

    match proxy_generator(base, tools, store).regenerate().await {
        Ok(regeneration) => Ok(Some(regeneration)),
        Err(e) => {
            warn!("Proxy regeneration failed after uninstall: {}", e);
            Ok(None)
        }
    }
}

/// Host validation only
pub async fn preflight(base: &BaseConfig, tools: &Toolchain) -> PreflightReport {
    Preflight::new(tools.runner.clone()).run(&base.preflight).await
}

/// Configuration for the committed state, not applied
pub async fn proxy_render(base: &BaseConfig, tools: &Toolchain) -> ProxyConfig {
    let (_, config, unresolved) = proxy_generator(base, tools, state_store(base)).plan().await;
    if !unresolved.is_empty() {
        warn!("Routed to the sentinel: {:?}", unresolved);
    }
    config
}

pub async fn proxy_apply(base: &BaseConfig, tools: &Toolchain) -> Result<Regeneration, LaunchError> {
    proxy_generator(base, tools, state_store(base)).regenerate().await
}

/// Regenerate on an interval until shutdown; returns the number of changes
pub async fn proxy_watch(base: &BaseConfig, tools: &Toolchain, options: &watch::Options, shutdown: Shutdown) -> usize {
    let generator = proxy_generator(base, tools, state_store(base));
    watch::run(options, &generator, tokio::time::sleep, shutdown).await
}

pub async fn deployment_state(base: &BaseConfig) -> DeploymentState {
    state_store(base).load().await
}
