//! Finite state machine for the deployment pipeline

use std::fmt;

use serde::Serialize;

use crate::errors::ErrorClass;

/// Pipeline phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Nothing has run
    Idle,

    /// Host validation
    Preflight,

    /// Installing missing tools
    Dependencies,

    /// Cluster bring-up, prior release removal, batch scheduler
    Cluster,

    /// Registry and model-hub secrets
    Credentials,

    /// Package install
    Release,

    /// Waiting for platform pods
    Readiness,

    /// State commit and proxy switch
    Exposing,

    /// Dependent workload submission
    Workload,

    /// Waiting for the workload to serve
    WorkloadReadiness,

    /// Endpoint check through the gateway
    Verifying,

    /// Finished successfully
    Complete,

    /// Stopped on a fatal error
    Failed(FailureClass, String),

    /// Cancelled by the operator
    Interrupted,
}

/// Serializable mirror of [`ErrorClass`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Config,
    Environment,
    External,
    Internal,
}

impl From<ErrorClass> for FailureClass {
    fn from(class: ErrorClass) -> Self {
        match class {
            ErrorClass::FatalConfig => FailureClass::Config,
            ErrorClass::FatalEnvironment => FailureClass::Environment,
            ErrorClass::FatalExternal => FailureClass::External,
            ErrorClass::Interrupted | ErrorClass::Internal => FailureClass::Internal,
        }
    }
}

impl Phase {
    /// Forward order of the non-terminal phases
    pub const ORDER: [Phase; 12] = [
        Phase::Idle,
        Phase::Preflight,
        Phase::Dependencies,
        Phase::Cluster,
        Phase::Credentials,
        Phase::Release,
        Phase::Readiness,
        Phase::Exposing,
        Phase::Workload,
        Phase::WorkloadReadiness,
        Phase::Verifying,
        Phase::Complete,
    ];

    fn position(&self) -> Option<usize> {
        Self::ORDER.iter().position(|p| p == self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed(..) | Phase::Interrupted)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Preflight => write!(f, "preflight"),
            Phase::Dependencies => write!(f, "dependencies"),
            Phase::Cluster => write!(f, "cluster"),
            Phase::Credentials => write!(f, "credentials"),
            Phase::Release => write!(f, "release"),
            Phase::Readiness => write!(f, "readiness"),
            Phase::Exposing => write!(f, "exposing"),
            Phase::Workload => write!(f, "workload"),
            Phase::WorkloadReadiness => write!(f, "workload readiness"),
            Phase::Verifying => write!(f, "verifying"),
            Phase::Complete => write!(f, "complete"),
            Phase::Failed(class, msg) => write!(f, "failed ({:?}): {}", class, msg),
            Phase::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Pipeline event
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Move to the given phase
    Enter(Phase),

    /// Skip phases up to the given one (dependency install, workload)
    SkipTo(Phase),

    /// A phase failed
    Fail(ErrorClass, String),

    /// Operator cancelled
    Interrupt,
}

/// Pipeline FSM
#[derive(Debug, Clone)]
pub struct PipelineFsm {
    phase: Phase,
    history: Vec<Phase>,
}

impl PipelineFsm {
    /// Create a new FSM in the idle phase
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            history: vec![Phase::Idle],
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Every phase entered, in order
    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    /// Process an event and transition
    pub fn process(&mut self, event: PipelineEvent) -> Result<(), String> {
        let new_phase = match (&self.phase, &event) {
            (current, _) if current.is_terminal() => {
                return Err(format!("Invalid transition: {} is terminal ({:?})", current, event));
            }

            (_, PipelineEvent::Fail(ErrorClass::Interrupted, _)) | (_, PipelineEvent::Interrupt) => {
                Phase::Interrupted
            }
            (_, PipelineEvent::Fail(class, msg)) => Phase::Failed((*class).into(), msg.clone()),

            // strictly the next phase
            (current, PipelineEvent::Enter(next)) => match (current.position(), next.position()) {
                (Some(from), Some(to)) if to == from + 1 => next.clone(),
                _ => return Err(format!("Invalid transition: {} -> {}", current, next)),
            },

            // forward, over at least one phase
            (current, PipelineEvent::SkipTo(next)) => match (current.position(), next.position()) {
                (Some(from), Some(to)) if to > from + 1 => next.clone(),
                _ => return Err(format!("Invalid skip: {} -> {}", current, next)),
            },
        };

        self.phase = new_phase.clone();
        self.history.push(new_phase);
        Ok(())
    }
}

impl Default for PipelineFsm {
    fn default() -> Self {
        Self::new()
    }
}
