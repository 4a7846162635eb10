//! Proxy regeneration through the command layer

use std::sync::Arc;

use stackup::app::options::{layout_for, BaseConfig};
use stackup::app::run::{proxy_apply, proxy_render, state_store};
use stackup::exec::scripted::ScriptedRunner;
use stackup::proxy::control::{ApplyOutcome, MemoryControl};
use stackup::proxy::topology::TopologyMode;
use stackup::storage::settings::Settings;

use crate::common::*;

fn base(tmp: &tempfile::TempDir, settings: &Settings) -> BaseConfig {
    let global = global(tmp.path());
    BaseConfig::new(&global, settings, layout_for(&global)).unwrap()
}

async fn deployed(base: &BaseConfig) {
    state_store(base)
        .mark_deployed(&base.release, &base.namespace, "25.6.0")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_pre_deployment_routes_to_launcher() {
    let tmp = tempfile::tempdir().unwrap();
    let base = base(&tmp, &Settings::default());
    let runner = healthy_runner();
    let proxy = Arc::new(MemoryControl::new());

    let config = proxy_render(&base, &tools(&runner, &proxy, true)).await;
    assert!(config.text.contains("server 127.0.0.1:8080;"));
    assert!(!config.text.contains("10.96.1.1"));
    // nothing is discovered before deployment
    assert_eq!(runner.count("kubectl get svc"), 0);
    // rendering does not apply
    assert!(proxy.applied().is_empty());
}

#[tokio::test]
async fn test_post_deployment_routes_discovered_and_sentinel() {
    let tmp = tempfile::tempdir().unwrap();
    let base = base(&tmp, &Settings::default());
    deployed(&base).await;
    let runner = healthy_runner();
    let proxy = Arc::new(MemoryControl::new());
    let tools = tools(&runner, &proxy, true);

    let regeneration = proxy_apply(&base, &tools).await.unwrap();
    assert_eq!(regeneration.mode, TopologyMode::PostDeployment);
    assert_eq!(regeneration.outcome, ApplyOutcome::Applied);
    assert!(!regeneration.unresolved.is_empty());

    let text = proxy.last().unwrap().text;
    assert!(text.contains("server 10.96.1.1:3000;"));
    // everything else falls back to the sentinel with a JSON 503
    assert!(text.contains("server 127.0.0.1:1;"));
    assert!(text.contains("service_not_ready"));

    // same state, same text
    let again = proxy_apply(&base, &tools).await.unwrap();
    assert_eq!(again.outcome, ApplyOutcome::Unchanged);
    assert_eq!(again.sha256, regeneration.sha256);
    assert_eq!(proxy.applied().len(), 1);
}

#[tokio::test]
async fn test_node_port_addressing() {
    let tmp = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.proxy.host_network = false;
    let base = base(&tmp, &settings);
    deployed(&base).await;

    let runner = healthy_runner();
    runner.ok("minikube ip", "192.168.49.2\n");
    let proxy = Arc::new(MemoryControl::new());

    proxy_apply(&base, &tools(&runner, &proxy, true)).await.unwrap();
    let text = proxy.last().unwrap().text;
    assert!(text.contains("server 192.168.49.2:30300;"));
    assert!(!text.contains("10.96.1.1"));
}

#[tokio::test]
async fn test_discovery_failure_degrades_to_sentinel() {
    let tmp = tempfile::tempdir().unwrap();
    let base = base(&tmp, &Settings::default());
    deployed(&base).await;

    let runner = Arc::new(ScriptedRunner::new());
    runner.fail("kubectl get svc", 1, "The connection to the server was refused");
    let proxy = Arc::new(MemoryControl::new());

    let regeneration = proxy_apply(&base, &tools(&runner, &proxy, true)).await.unwrap();
    assert_eq!(regeneration.mode, TopologyMode::PostDeployment);
    let text = proxy.last().unwrap().text;
    assert!(!text.contains("10.96.1.1"));
    assert!(text.contains("server 127.0.0.1:1;"));
}
