//! End-to-end pipeline runs against a scripted cluster

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use stackup::app::run::{state_store, DeployOutcome, Pipeline};
use stackup::app::shutdown::Shutdown;
use stackup::cli::DeployArgs;
use stackup::deploy::fsm::{FailureClass, Phase};
use stackup::errors::{ErrorClass, LaunchError};
use stackup::proxy::control::MemoryControl;
use stackup::storage::settings::Settings;

use crate::common::*;

async fn deploy(
    args: &DeployArgs,
    settings: &Settings,
    runner: &Arc<stackup::exec::scripted::ScriptedRunner>,
    proxy: &Arc<MemoryControl>,
    answer: bool,
) -> (tempfile::TempDir, Result<DeployOutcome, LaunchError>, Phase) {
    let tmp = tempfile::tempdir().unwrap();
    let config = launch_config(tmp.path(), args, settings);
    config.base.layout.setup().await.unwrap();

    let mut pipeline = Pipeline::new(&config, tools(runner, proxy, answer)).with_policies(fast_policy(), fast_policy());
    let result = pipeline.run(&mut Shutdown::never()).await;
    let phase = pipeline.phase().clone();
    (tmp, result, phase)
}

#[tokio::test]
async fn test_deploy_without_workload() {
    let runner = healthy_runner();
    let proxy = Arc::new(MemoryControl::new());
    let args = DeployArgs {
        enable_notebook: true,
        ..deploy_args()
    };

    let (tmp, result, phase) = deploy(&args, &Settings::default(), &runner, &proxy, true).await;
    let DeployOutcome::Deployed(summary) = result.unwrap() else {
        panic!("expected a deployment");
    };
    assert_eq!(phase, Phase::Complete);
    assert_eq!(summary.release, "nemo");
    assert_eq!(summary.chart_version, "latest");
    assert!(summary.model.is_none());
    assert_eq!(
        summary.phases,
        vec![
            Phase::Idle,
            Phase::Preflight,
            Phase::Cluster,
            Phase::Credentials,
            Phase::Release,
            Phase::Readiness,
            Phase::Exposing,
            Phase::Complete,
        ]
    );

    // the cluster was already up; nothing was removed
    assert_eq!(runner.count("minikube start"), 0);
    assert_eq!(runner.count("helm uninstall"), 0);
    let install = runner
        .calls()
        .into_iter()
        .find(|c| c.starts_with("helm upgrade --install"))
        .unwrap();
    assert!(install.contains("tags.jupyter=true"));
    assert!(!install.contains(REGISTRY_KEY));

    // committed, and the proxy now routes to the discovered service
    let config = launch_config(tmp.path(), &args, &Settings::default());
    let state = state_store(&config.base).load().await;
    assert!(state.deployed);
    assert_eq!(state.release.as_deref(), Some("nemo"));
    assert!(proxy.last().unwrap().text.contains("server 10.96.1.1:3000;"));
    assert!(summary.proxy.is_some());
}

#[tokio::test]
async fn test_cluster_is_started_when_stopped() {
    let runner = healthy_runner();
    runner.ok("minikube status", r#"{"Host":"Stopped","Kubelet":"Stopped","APIServer":"Stopped"}"#);
    let proxy = Arc::new(MemoryControl::new());

    let (_tmp, result, _) = deploy(&deploy_args(), &Settings::default(), &runner, &proxy, true).await;
    result.unwrap();
    assert_eq!(runner.count("minikube start"), 1);
}

#[tokio::test]
async fn test_missing_gpu_tooling_stops_in_preflight() {
    let runner = healthy_runner();
    runner.missing("nvidia-smi");
    let proxy = Arc::new(MemoryControl::new());

    let (_tmp, result, phase) = deploy(&deploy_args(), &Settings::default(), &runner, &proxy, true).await;
    let err = result.unwrap_err();
    assert_eq!(err.class(), ErrorClass::FatalEnvironment);
    assert_eq!(err.exit_code(), 3);
    assert!(matches!(phase, Phase::Failed(FailureClass::Environment, _)));

    // nothing on the host or cluster changed
    assert_eq!(runner.count("minikube start"), 0);
    assert_eq!(runner.count("kubectl apply"), 0);
    assert_eq!(runner.count("helm upgrade"), 0);
    assert!(proxy.applied().is_empty());
}

#[tokio::test]
async fn test_dry_run_masks_secrets_and_changes_nothing() {
    let runner = healthy_runner();
    let proxy = Arc::new(MemoryControl::new());
    let args = DeployArgs {
        dry_run: true,
        version: Some("25.6.0".to_string()),
        ..deploy_args()
    };

    let (_tmp, result, _) = deploy(&args, &Settings::default(), &runner, &proxy, true).await;
    let DeployOutcome::DryRun { commands } = result.unwrap() else {
        panic!("expected a dry run");
    };
    assert!(commands.iter().any(|c| c.starts_with("minikube start")));
    assert!(commands.iter().any(|c| c.contains("--version 25.6.0")));
    assert!(commands.iter().all(|c| !c.contains(REGISTRY_KEY) && !c.contains(HUB_TOKEN)));

    assert_eq!(runner.count("minikube start"), 0);
    assert_eq!(runner.count("kubectl apply"), 0);
    assert_eq!(runner.count("helm repo"), 0);
    assert_eq!(runner.count("helm upgrade"), 0);
}

#[tokio::test]
async fn test_check_deps_reports_missing_tools_without_tokens() {
    let runner = healthy_runner();
    runner.missing("kubectl");
    let proxy = Arc::new(MemoryControl::new());
    let args = DeployArgs {
        check_deps: true,
        ..Default::default()
    };

    let (_tmp, result, phase) = deploy(&args, &Settings::default(), &runner, &proxy, true).await;
    let DeployOutcome::DependencyReport { missing } = result.unwrap() else {
        panic!("expected a dependency report");
    };
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].name, "kubectl");
    assert_eq!(phase, Phase::Idle);
}

#[tokio::test]
async fn test_declined_removal_of_prior_release() {
    let runner = healthy_runner();
    runner.ok("helm list", r#"[{"name":"nemo","namespace":"default","status":"deployed"}]"#);
    let proxy = Arc::new(MemoryControl::new());

    let (_tmp, result, phase) = deploy(&deploy_args(), &Settings::default(), &runner, &proxy, false).await;
    let err = result.unwrap_err();
    assert!(matches!(err, LaunchError::Declined(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(matches!(phase, Phase::Failed(FailureClass::Config, _)));
    assert_eq!(runner.count("helm uninstall"), 0);
    assert_eq!(runner.count("helm upgrade"), 0);
}

#[tokio::test]
async fn test_prior_release_is_removed_when_confirmed() {
    let runner = healthy_runner();
    runner.ok("helm list", r#"[{"name":"nemo","namespace":"default","status":"failed"}]"#);
    let proxy = Arc::new(MemoryControl::new());

    let (_tmp, result, _) = deploy(&deploy_args(), &Settings::default(), &runner, &proxy, true).await;
    result.unwrap();
    let calls = runner.calls();
    let uninstall = calls.iter().position(|c| c.starts_with("helm uninstall nemo")).unwrap();
    let install = calls.iter().position(|c| c.starts_with("helm upgrade --install")).unwrap();
    assert!(uninstall < install);
}

#[tokio::test]
async fn test_image_pull_failure_is_fatal_and_leaves_state_untouched() {
    let runner = healthy_runner();
    runner
        .ok("kubectl get pods", PODS_PULL_FAILURE)
        .ok("kubectl logs nemo-evaluator-1", "pulling image nvcr.io/nvidia/nemo-evaluator")
        .ok("kubectl describe pod nemo-evaluator-1", "Failed to pull image: unauthorized")
        .ok("kubectl get events", "Warning   Failed   pod/nemo-evaluator-1   ErrImagePull");
    let proxy = Arc::new(MemoryControl::new());

    let (tmp, result, phase) = deploy(&deploy_args(), &Settings::default(), &runner, &proxy, true).await;
    let err = result.unwrap_err();
    assert!(matches!(err, LaunchError::ImagePullFailure { ref pods } if pods == &vec!["nemo-evaluator-1".to_string()]));
    assert_eq!(err.class(), ErrorClass::FatalExternal);
    assert!(err.hint().is_some());
    assert!(matches!(phase, Phase::Failed(FailureClass::External, _)));

    // one bundle, covering the failing pod only
    let config = launch_config(tmp.path(), &deploy_args(), &Settings::default());
    let bundles: Vec<_> = std::fs::read_dir(config.base.layout.diagnostics_dir().path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.is_dir())
        .collect();
    assert_eq!(bundles.len(), 1);
    let read = |name: &str| std::fs::read_to_string(bundles[0].join(name)).unwrap();
    assert!(read("nemo-evaluator-1.log").contains("pulling image"));
    assert!(read("nemo-evaluator-1.describe.txt").contains("unauthorized"));
    assert!(read("events.txt").contains("ErrImagePull"));
    assert!(!bundles[0].join("nemo-data-store-0.log").exists());
    assert!(!bundles[0].join("nemo-data-store-0.describe.txt").exists());
    assert_eq!(runner.count("kubectl describe pod nemo-data-store-0"), 0);
    assert_eq!(runner.count("kubectl logs nemo-data-store-0"), 0);

    assert!(!state_store(&config.base).load().await.deployed);
    assert!(proxy.applied().is_empty());
}

#[tokio::test]
async fn test_interrupt_during_readiness() {
    let runner = healthy_runner();
    runner.ok("kubectl get pods", PODS_PENDING);
    let proxy = Arc::new(MemoryControl::new());

    let tmp = tempfile::tempdir().unwrap();
    let config = launch_config(tmp.path(), &deploy_args(), &Settings::default());
    config.base.layout.setup().await.unwrap();

    let (trigger, mut shutdown) = Shutdown::channel();
    trigger.trigger();
    let mut pipeline =
        Pipeline::new(&config, tools(&runner, &proxy, true)).with_policies(fast_policy(), fast_policy());
    let err = pipeline.run(&mut shutdown).await.unwrap_err();

    assert_eq!(err.class(), ErrorClass::Interrupted);
    assert_eq!(err.exit_code(), 130);
    assert_eq!(pipeline.phase(), &Phase::Interrupted);
    assert!(!state_store(&config.base).load().await.deployed);
}

#[derive(Default)]
struct Platform {
    created: AtomicBool,
}

async fn get_deployment(
    State(platform): State<Arc<Platform>>,
    Path((ns, name)): Path<(String, String)>,
) -> Result<Json<Value>, StatusCode> {
    if !platform.created.load(Ordering::SeqCst) {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(json!({
        "name": name,
        "namespace": ns,
        "status_details": {"status": "ready", "description": null}
    })))
}

async fn create_deployment(State(platform): State<Arc<Platform>>, Json(body): Json<Value>) -> StatusCode {
    assert_eq!(body["config"]["model"], "meta/llama-3.2-1b-instruct");
    platform.created.store(true, Ordering::SeqCst);
    StatusCode::CREATED
}

async fn list_models() -> Json<Value> {
    Json(json!({"object": "list", "data": [{"id": "meta/llama-3.2-1b-instruct"}]}))
}

async fn serve_platform(platform: Arc<Platform>) -> String {
    let app = Router::new()
        .route("/v1/deployment/model-deployments/{ns}/{name}", get(get_deployment))
        .route("/v1/deployment/model-deployments", post(create_deployment))
        .route("/v1/models", get(list_models))
        .with_state(platform);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_deploy_with_workload() {
    let runner = healthy_runner();
    let proxy = Arc::new(MemoryControl::new());
    let platform = Arc::new(Platform::default());

    let mut settings = Settings::default();
    settings.workload.platform_url = serve_platform(platform.clone()).await;
    let args = DeployArgs {
        skip_workload: false,
        ..deploy_args()
    };

    let (_tmp, result, phase) = deploy(&args, &settings, &runner, &proxy, true).await;
    let DeployOutcome::Deployed(summary) = result.unwrap() else {
        panic!("expected a deployment");
    };
    assert_eq!(phase, Phase::Complete);
    assert_eq!(summary.model.as_deref(), Some("meta/llama-3.2-1b-instruct"));
    assert_eq!(&summary.phases[summary.phases.len() - 4..], &[
        Phase::Workload,
        Phase::WorkloadReadiness,
        Phase::Verifying,
        Phase::Complete,
    ]);
    assert!(platform.created.load(Ordering::SeqCst));
}
