//! FSM unit tests

use stackup::deploy::fsm::{FailureClass, Phase, PipelineEvent, PipelineFsm};
use stackup::errors::ErrorClass;
use tokio_test::{assert_err, assert_ok};

#[test]
fn test_fsm_initial_phase() {
    let fsm = PipelineFsm::new();
    assert_eq!(fsm.phase(), &Phase::Idle);
    assert_eq!(fsm.history(), &[Phase::Idle]);
    assert!(!fsm.phase().is_terminal());
}

#[test]
fn test_fsm_skips_optional_phases() {
    let mut fsm = PipelineFsm::new();

    assert_ok!(fsm.process(PipelineEvent::Enter(Phase::Preflight)));
    // no dependency install requested
    assert_ok!(fsm.process(PipelineEvent::SkipTo(Phase::Cluster)));
    assert_ok!(fsm.process(PipelineEvent::Enter(Phase::Credentials)));
    assert_ok!(fsm.process(PipelineEvent::Enter(Phase::Release)));
    assert_ok!(fsm.process(PipelineEvent::Enter(Phase::Readiness)));
    assert_ok!(fsm.process(PipelineEvent::Enter(Phase::Exposing)));
    // workload skipped
    assert_ok!(fsm.process(PipelineEvent::SkipTo(Phase::Complete)));

    assert_eq!(fsm.phase(), &Phase::Complete);
    assert!(!fsm.history().contains(&Phase::Dependencies));
    assert!(!fsm.history().contains(&Phase::Workload));
}

#[test]
fn test_fsm_enter_cannot_jump() {
    let mut fsm = PipelineFsm::new();
    assert_err!(fsm.process(PipelineEvent::Enter(Phase::Release)));
    // a rejected event leaves the phase alone
    assert_eq!(fsm.phase(), &Phase::Idle);
    assert_eq!(fsm.history().len(), 1);
}

#[test]
fn test_fsm_failure_flow() {
    let mut fsm = PipelineFsm::new();

    fsm.process(PipelineEvent::Enter(Phase::Preflight)).unwrap();
    fsm.process(PipelineEvent::SkipTo(Phase::Cluster)).unwrap();
    fsm.process(PipelineEvent::Fail(ErrorClass::FatalExternal, "cluster start failed".to_string()))
        .unwrap();

    assert_eq!(
        fsm.phase(),
        &Phase::Failed(FailureClass::External, "cluster start failed".to_string())
    );
    assert!(fsm.phase().is_terminal());
    assert_err!(fsm.process(PipelineEvent::Enter(Phase::Credentials)));
}

#[test]
fn test_fsm_interrupt_from_any_phase() {
    for stop in 1..Phase::ORDER.len() - 1 {
        let mut fsm = PipelineFsm::new();
        for phase in &Phase::ORDER[1..=stop] {
            fsm.process(PipelineEvent::Enter(phase.clone())).unwrap();
        }
        fsm.process(PipelineEvent::Interrupt).unwrap();
        assert_eq!(fsm.phase(), &Phase::Interrupted);
    }
}

#[test]
fn test_phase_serializes_snake_case() {
    assert_eq!(
        serde_json::to_value(Phase::WorkloadReadiness).unwrap(),
        serde_json::json!("workload_readiness")
    );
}
