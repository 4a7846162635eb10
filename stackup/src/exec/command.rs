//! External command execution
//!
//! Every interaction with cluster tooling goes through [`CommandRunner`] so the
//! orchestration logic can be exercised against scripted outputs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::errors::LaunchError;

/// A command to run
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Written to the child's stdin, then closed; never logged
    pub stdin: Option<String>,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    /// Positions in `args` shown as `***` by [`CommandSpec::display`]
    pub secret_args: BTreeSet<usize>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// An argument that must never appear in logs or error messages
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret_args.insert(self.args.len());
        self.args.push(arg.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Human-readable command line; stdin and secret arguments are never included
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for (i, arg) in self.args.iter().enumerate() {
            line.push(' ');
            if self.secret_args.contains(&i) {
                line.push_str("***");
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Convert a non-zero exit into [`LaunchError::CommandFailed`]
    pub fn into_result(self, spec: &CommandSpec) -> Result<CommandOutput, LaunchError> {
        if self.success() {
            Ok(self)
        } else {
            let message = if self.stderr.trim().is_empty() {
                self.stdout.trim().to_string()
            } else {
                self.stderr.trim().to_string()
            };
            Err(LaunchError::CommandFailed {
                command: spec.display(),
                message,
            })
        }
    }
}

/// Runs external programs
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion. A missing program is an error; a non-zero exit is
    /// reported through [`CommandOutput::status`].
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, LaunchError>;

    /// Run and require a zero exit status
    async fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput, LaunchError> {
        self.run(spec).await?.into_result(spec)
    }

    /// Whether a program can be found
    async fn which(&self, program: &str) -> bool {
        match self.run(&CommandSpec::new("which").arg(program)).await {
            Ok(output) => output.success(),
            Err(_) => false,
        }
    }
}

/// Runs real processes with tokio
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    /// Prepended to PATH so freshly installed tools resolve first
    extra_path: Option<PathBuf>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extra_path(path: impl Into<PathBuf>) -> Self {
        Self {
            extra_path: Some(path.into()),
        }
    }

    fn build(&self, spec: &CommandSpec) -> Command {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(extra) = &self.extra_path {
            let current = std::env::var_os("PATH").unwrap_or_default();
            let mut paths = vec![extra.clone()];
            paths.extend(std::env::split_paths(&current));
            if let Ok(joined) = std::env::join_paths(paths) {
                command.env("PATH", joined);
            }
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        command
    }

    async fn run_inner(&self, spec: &CommandSpec) -> Result<CommandOutput, LaunchError> {
        let mut child = self.build(spec).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LaunchError::PrerequisiteNotFound {
                    tool: spec.program.clone(),
                    hint: format!("`{}` must be installed and on PATH", spec.program),
                }
            } else {
                LaunchError::IoError(e)
            }
        })?;

        if let (Some(input), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
            stdin.write_all(input.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, LaunchError> {
        debug!("Executing: {}", spec.display());
        match spec.timeout {
            Some(limit) => tokio::time::timeout(limit, self.run_inner(spec))
                .await
                .map_err(|_| LaunchError::CommandTimeout {
                    command: spec.display(),
                    timeout: limit,
                })?,
            None => self.run_inner(spec).await,
        }
    }
}
