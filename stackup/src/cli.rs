//! Command-line interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// stackup - launch the platform on a local GPU cluster and expose it
#[derive(Parser, Debug)]
#[command(name = "stackup")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// State directory (deployment record, settings, logs, diagnostics)
    #[arg(long, global = true, env = "STACKUP_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON logs on stdout
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full deployment pipeline
    Deploy(DeployArgs),

    /// Remove the release and switch the proxy back to the launcher
    Uninstall(UninstallArgs),

    /// Validate the host without changing anything
    Preflight,

    /// Reverse proxy configuration
    #[command(subcommand)]
    Proxy(ProxyCommand),

    /// Serve health, version and deployment state over HTTP
    Serve(ServeArgs),

    /// Print the recorded deployment state
    State,

    /// Print version information
    Version,
}

#[derive(Args, Debug, Clone, Default)]
pub struct DeployArgs {
    /// Chart version from the repository ("latest" omits the pin)
    #[arg(long, conflicts_with = "chart_url")]
    pub version: Option<String>,

    /// Install from a chart archive instead of the repository
    #[arg(long)]
    pub chart_url: Option<String>,

    /// Values file passed to the install; repeatable
    #[arg(short = 'f', long = "values")]
    pub values: Vec<String>,

    /// Install and route the notebook service
    #[arg(long)]
    pub enable_notebook: bool,

    /// Report missing tools and exit
    #[arg(long)]
    pub check_deps: bool,

    /// Download missing tools before deploying
    #[arg(long)]
    pub install_deps: bool,

    /// Skip confirmation prompts
    #[arg(long)]
    pub force: bool,

    /// Print the planned commands with secrets masked and exit
    #[arg(long)]
    pub dry_run: bool,

    /// Stop after the platform is ready and exposed
    #[arg(long)]
    pub skip_workload: bool,

    /// Model to deploy on the platform
    #[arg(long)]
    pub model: Option<String>,

    /// Delete leftover volume claims when removing a prior release
    #[arg(long)]
    pub purge_volumes: bool,

    /// Registry API key
    #[arg(long, env = "NGC_API_KEY", hide_env_values = true)]
    pub ngc_api_key: Option<String>,

    /// Model hub token
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct UninstallArgs {
    /// Skip the confirmation prompt
    #[arg(long)]
    pub force: bool,

    /// Delete the namespace's volume claims as well
    #[arg(long)]
    pub purge_volumes: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ProxyCommand {
    /// Print the configuration for the current state
    Render,

    /// Render, validate and activate the configuration once
    Apply,

    /// Keep the configuration in step with the deployment state
    Watch {
        /// Seconds between regenerations
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub bind: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_conflicts_with_chart_url() {
        let err = Cli::try_parse_from([
            "stackup",
            "deploy",
            "--version",
            "25.6.0",
            "--chart-url",
            "https://example.com/c.tgz",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_deploy_flags() {
        let cli = Cli::try_parse_from([
            "stackup",
            "--verbose",
            "deploy",
            "-f",
            "a.yaml",
            "--values",
            "b.yaml",
            "--enable-notebook",
            "--skip-workload",
            "--ngc-api-key",
            "nvapi-x",
        ])
        .unwrap();
        assert!(cli.global.verbose);
        let Commands::Deploy(args) = cli.command else {
            panic!("expected deploy");
        };
        assert_eq!(args.values, vec!["a.yaml", "b.yaml"]);
        assert!(args.enable_notebook && args.skip_workload);
        assert_eq!(args.ngc_api_key.as_deref(), Some("nvapi-x"));
    }

    #[test]
    fn test_proxy_watch_interval() {
        let cli = Cli::try_parse_from(["stackup", "proxy", "watch", "--interval", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Proxy(ProxyCommand::Watch { interval: Some(5) })
        ));
    }
}
