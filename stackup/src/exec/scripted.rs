//! Scripted command runner used as a test double for cluster tooling

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::LaunchError;
use crate::exec::command::{CommandOutput, CommandRunner, CommandSpec};

struct Rule {
    prefix: String,
    /// Played in order; the last response repeats
    responses: VecDeque<Result<CommandOutput, String>>,
}

/// Matches command lines by prefix and replays canned outputs.
///
/// Rules are checked most-recent first, so a later, more specific rule shadows
/// an earlier broad one. Unmatched commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to commands starting with `prefix` with a successful output
    pub fn ok(&self, prefix: &str, stdout: &str) -> &Self {
        self.respond(prefix, vec![Ok(CommandOutput {
            status: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        })])
    }

    /// Respond with a non-zero exit
    pub fn fail(&self, prefix: &str, status: i32, stderr: &str) -> &Self {
        self.respond(prefix, vec![Ok(CommandOutput {
            status,
            stdout: String::new(),
            stderr: stderr.to_string(),
        })])
    }

    /// Respond as if the program does not exist
    pub fn missing(&self, prefix: &str) -> &Self {
        self.respond(prefix, vec![Err(prefix.split_whitespace().next().unwrap_or(prefix).to_string())])
    }

    /// Respond with a sequence of successful stdouts, repeating the last
    pub fn sequence(&self, prefix: &str, stdouts: &[&str]) -> &Self {
        self.respond(
            prefix,
            stdouts
                .iter()
                .map(|s| {
                    Ok(CommandOutput {
                        status: 0,
                        stdout: s.to_string(),
                        stderr: String::new(),
                    })
                })
                .collect(),
        )
    }

    fn respond(&self, prefix: &str, responses: Vec<Result<CommandOutput, String>>) -> &Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                prefix: prefix.to_string(),
                responses: responses.into(),
            });
        }
        self
    }

    /// Every command line run so far
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.iter().map(|c| c.display()).collect())
            .unwrap_or_default()
    }

    /// Every spec run so far, including stdin
    pub fn specs(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of calls whose command line starts with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, LaunchError> {
        let line = spec.display();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }

        let mut rules = self
            .rules
            .lock()
            .map_err(|_| LaunchError::Internal("scripted runner poisoned".to_string()))?;
        let Some(rule) = rules.iter_mut().rev().find(|r| line.starts_with(&r.prefix)) else {
            return Ok(CommandOutput::default());
        };

        let response = if rule.responses.len() > 1 {
            rule.responses.pop_front()
        } else {
            rule.responses.front().cloned()
        };

        match response {
            Some(Ok(output)) => Ok(output),
            Some(Err(tool)) => Err(LaunchError::PrerequisiteNotFound {
                hint: format!("`{}` must be installed and on PATH", tool),
                tool,
            }),
            None => Ok(CommandOutput::default()),
        }
    }

    async fn which(&self, program: &str) -> bool {
        match self.run(&CommandSpec::new("which").arg(program)).await {
            Ok(output) => output.success(),
            Err(_) => false,
        }
    }
}
