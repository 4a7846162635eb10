//! stackup - Entry Point
//!
//! Brings the platform up on a local GPU cluster, keeps the reverse proxy in
//! step with the deployment state, and serves the launcher's status API.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use tracing::{error, info};

use stackup::app::options::{layout_for, load_settings, BaseConfig, LaunchConfig};
use stackup::app::run::{self, DeployOutcome, Pipeline, Toolchain};
use stackup::app::shutdown::{Shutdown, SignalListener};
use stackup::cli::{Cli, Commands, GlobalArgs, ProxyCommand};
use stackup::errors::LaunchError;
use stackup::exec::command::SystemRunner;
use stackup::filesys::file::File;
use stackup::logs::{init_logging, LogGuard};
use stackup::preflight::checks::{CheckOutcome, PreflightReport, Severity};
use stackup::prompt::{FixedAnswer, Prompter, StdinPrompter};
use stackup::proxy::control::NginxControl;
use stackup::server::serve::serve;
use stackup::server::state::ServerState;
use stackup::storage::layout::StorageLayout;
use stackup::storage::settings::Settings;
use stackup::utils::version_info;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = dispatch(cli).await {
        let code = match e.downcast_ref::<LaunchError>() {
            Some(launch) => {
                eprintln!("{} {}", "error:".red().bold(), launch);
                if let Some(hint) = launch.hint() {
                    eprintln!("{} {}", "hint:".yellow().bold(), hint);
                }
                launch.exit_code()
            }
            None => {
                eprintln!("{} {:#}", "error:".red().bold(), e);
                1
            }
        };
        std::process::exit(code);
    }
}

fn toolchain(base: &BaseConfig, force: bool) -> Toolchain {
    let runner = Arc::new(SystemRunner::with_extra_path(base.layout.bin_dir().path()));
    let proxy = Arc::new(NginxControl::new(
        runner.clone(),
        base.proxy.binary.clone(),
        File::new(&base.proxy.config_path),
    ));
    let prompter: Arc<dyn Prompter> = if force {
        Arc::new(FixedAnswer(true))
    } else {
        Arc::new(StdinPrompter)
    };
    Toolchain {
        runner,
        proxy,
        prompter,
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_report(report: &PreflightReport) {
    for result in &report.results {
        let (mark, detail) = match &result.outcome {
            CheckOutcome::Pass(d) => ("ok".green().bold(), d),
            CheckOutcome::Skipped(d) => ("skip".dimmed(), d),
            CheckOutcome::Fail(d) => match result.severity {
                Severity::Hard => ("FAIL".red().bold(), d),
                Severity::Soft => ("warn".yellow().bold(), d),
            },
        };
        println!("  {:>5}  {:<14} {}", mark, result.name, detail);
    }
}

/// State directory and settings for commands that touch the host
async fn prepare(global: &GlobalArgs) -> Result<(StorageLayout, Settings), LaunchError> {
    let layout = layout_for(global);
    layout.setup().await?;
    let settings = load_settings(&layout).await?;
    Ok((layout, settings))
}

async fn base_config(global: &GlobalArgs) -> Result<BaseConfig, LaunchError> {
    let (layout, settings) = prepare(global).await?;
    BaseConfig::new(global, &settings, layout)
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Version => print_json(&version_info()),

        Commands::Deploy(args) => {
            let (layout, settings) = prepare(&cli.global).await?;
            let cwd = std::env::current_dir()?;
            let config = LaunchConfig::new(&cli.global, &args, &settings, layout, &cwd)?;
            let _log = start_logging(&config.base)?;
            let tools = toolchain(&config.base, config.force);

            let (trigger, mut shutdown) = Shutdown::channel();
            let listener = SignalListener::install(trigger);
            let result = Pipeline::new(&config, tools).run(&mut shutdown).await;
            drop(listener);

            match result? {
                DeployOutcome::DependencyReport { missing } if missing.is_empty() => {
                    println!("{}", "All required tools are installed".green().bold());
                }
                DeployOutcome::DependencyReport { missing } => {
                    println!("{}", "Missing or outdated tools:".yellow().bold());
                    print_report(&PreflightReport { results: missing });
                }
                DeployOutcome::DryRun { commands } => {
                    println!("{}", "Planned commands:".bold());
                    for command in commands {
                        println!("  {}", command);
                    }
                }
                DeployOutcome::Deployed(summary) => {
                    println!(
                        "{} {} {} in namespace {}",
                        "Deployed".green().bold(),
                        summary.release,
                        summary.chart_version,
                        summary.namespace
                    );
                    if let Some(model) = &summary.model {
                        println!("Serving {}", model.cyan());
                    }
                    if summary.proxy.is_none() {
                        println!("{}", "Proxy not updated; run `stackup proxy apply`".yellow());
                    }
                }
            }
            Ok(())
        }

        Commands::Uninstall(args) => {
            let base = base_config(&cli.global).await?;
            let _log = start_logging(&base)?;
            let tools = toolchain(&base, args.force);
            run::uninstall(&base, &tools, args.purge_volumes).await?;
            println!("{} {}", "Uninstalled".green().bold(), base.release);
            Ok(())
        }

        Commands::Preflight => {
            let base = base_config(&cli.global).await?;
            let _log = start_logging(&base)?;
            let tools = toolchain(&base, false);
            let report = run::preflight(&base, &tools).await;
            print_report(&report);
            report.into_result()?;
            println!("{}", "Host is ready".green().bold());
            Ok(())
        }

        Commands::Proxy(command) => {
            let base = base_config(&cli.global).await?;
            let _log = start_logging(&base)?;
            let tools = toolchain(&base, false);
            match command {
                ProxyCommand::Render => {
                    print!("{}", run::proxy_render(&base, &tools).await.text);
                }
                ProxyCommand::Apply => {
                    print_json(&run::proxy_apply(&base, &tools).await?)?;
                }
                ProxyCommand::Watch { interval } => {
                    let mut options = base.proxy.watch.clone();
                    if let Some(secs) = interval {
                        options.interval = Duration::from_secs(secs.max(1));
                    }
                    let (trigger, shutdown) = Shutdown::channel();
                    let _listener = SignalListener::install(trigger);
                    let changes = run::proxy_watch(&base, &tools, &options, shutdown).await;
                    info!("Proxy watch stopped after {} changes", changes);
                }
            }
            Ok(())
        }

        Commands::Serve(args) => {
            let base = base_config(&cli.global).await?;
            let _log = start_logging(&base)?;
            let state = Arc::new(ServerState::new(
                run::state_store(&base),
                base.release.clone(),
                base.namespace.clone(),
            ));

            let (trigger, mut shutdown) = Shutdown::channel();
            let _listener = SignalListener::install(trigger);
            let handle = serve(&args.bind, state, async move { shutdown.wait().await }).await?;
            if let Err(e) = handle.await? {
                error!("Status server stopped: {}", e);
                return Err(e.into());
            }
            Ok(())
        }

        Commands::State => {
            let base = base_config(&cli.global).await?;
            print_json(&run::deployment_state(&base).await)
        }
    }
}

fn start_logging(base: &BaseConfig) -> Result<LogGuard, LaunchError> {
    let guard = init_logging(base.log.clone())?;
    info!("stackup {} (state directory {:?})", version_info().version, base.layout.base_dir);
    Ok(guard)
}
