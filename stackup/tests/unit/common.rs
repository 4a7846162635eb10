//! Shared fixtures: a healthy scripted cluster and a launch configuration

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use stackup::app::options::{layout_for, LaunchConfig};
use stackup::app::run::Toolchain;
use stackup::cli::{DeployArgs, GlobalArgs};
use stackup::exec::scripted::ScriptedRunner;
use stackup::prompt::FixedAnswer;
use stackup::proxy::control::MemoryControl;
use stackup::readiness::policy::RetryPolicy;
use stackup::storage::settings::Settings;

pub const GPUS: &str = "NVIDIA H100 80GB HBM3, 570.86.15\nNVIDIA H100 80GB HBM3, 570.86.15\n";

pub const MINIKUBE_RUNNING: &str = r#"{"Name":"minikube","Host":"Running","Kubelet":"Running","APIServer":"Running"}"#;

pub const PODS_READY: &str = r#"{"items":[
  {"metadata":{"name":"nemo-data-store-0"},
   "status":{"phase":"Running","containerStatuses":[{"name":"app","ready":true,"restartCount":0,"state":{"running":{}}}]}},
  {"metadata":{"name":"nemo-customizer-5d9c"},
   "status":{"phase":"Running","containerStatuses":[{"name":"app","ready":true,"restartCount":1,"state":{"running":{}}}]}}
]}"#;

pub const PODS_PENDING: &str = r#"{"items":[
  {"metadata":{"name":"nemo-data-store-0"},
   "status":{"phase":"Pending","containerStatuses":[{"name":"app","ready":false,"restartCount":0,"state":{"waiting":{"reason":"ContainerCreating"}}}]}}
]}"#;

pub const PODS_PULL_FAILURE: &str = r#"{"items":[
  {"metadata":{"name":"nemo-data-store-0"},
   "status":{"phase":"Running","containerStatuses":[{"name":"app","ready":true,"restartCount":0,"state":{"running":{}}}]}},
  {"metadata":{"name":"nemo-evaluator-1"},
   "status":{"phase":"Pending","containerStatuses":[{"name":"app","ready":false,"restartCount":0,"state":{"waiting":{"reason":"ImagePullBackOff"}}}]}}
]}"#;

pub const SERVICES: &str = r#"{"items":[
  {"metadata":{"name":"nemo-data-store"},"spec":{"clusterIP":"10.96.1.1","ports":[{"name":"http","port":3000,"nodePort":30300}]}}
]}"#;

pub const REGISTRY_KEY: &str = "nvapi-secret-key";
pub const HUB_TOKEN: &str = "hf_secret_token";

/// A cluster that is running, has no prior release, and whose pods are ready
pub fn healthy_runner() -> Arc<ScriptedRunner> {
    let runner = ScriptedRunner::new();
    runner
        .ok("nvidia-smi", GPUS)
        .ok("minikube status", MINIKUBE_RUNNING)
        .ok("helm list", "[]")
        .ok("kubectl get pods", PODS_READY)
        .ok("kubectl get svc", SERVICES);
    Arc::new(runner)
}

pub fn deploy_args() -> DeployArgs {
    DeployArgs {
        ngc_api_key: Some(REGISTRY_KEY.to_string()),
        hf_token: Some(HUB_TOKEN.to_string()),
        skip_workload: true,
        ..Default::default()
    }
}

pub fn global(state_dir: &Path) -> GlobalArgs {
    GlobalArgs {
        state_dir: Some(PathBuf::from(state_dir)),
        verbose: false,
        json_logs: false,
    }
}

pub fn launch_config(state_dir: &Path, args: &DeployArgs, settings: &Settings) -> LaunchConfig {
    let global = global(state_dir);
    LaunchConfig::new(&global, args, settings, layout_for(&global), state_dir).unwrap()
}

pub fn tools(runner: &Arc<ScriptedRunner>, proxy: &Arc<MemoryControl>, answer: bool) -> Toolchain {
    Toolchain {
        runner: runner.clone(),
        proxy: proxy.clone(),
        prompter: Arc::new(FixedAnswer(answer)),
    }
}

/// Short intervals so waits finish quickly on real time
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(
        Duration::from_millis(10),
        Duration::from_secs(5),
        Duration::from_secs(1),
    )
}
