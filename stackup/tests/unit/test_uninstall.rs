//! Uninstall flow

use std::sync::Arc;

use stackup::app::options::{layout_for, BaseConfig};
use stackup::app::run::{state_store, uninstall};
use stackup::errors::LaunchError;
use stackup::proxy::control::MemoryControl;
use stackup::proxy::topology::TopologyMode;
use stackup::storage::settings::Settings;

use crate::common::*;

async fn deployed_base(tmp: &tempfile::TempDir) -> BaseConfig {
    let global = global(tmp.path());
    let base = BaseConfig::new(&global, &Settings::default(), layout_for(&global)).unwrap();
    base.layout.setup().await.unwrap();
    state_store(&base)
        .mark_deployed(&base.release, &base.namespace, "25.6.0")
        .await
        .unwrap();
    base
}

#[tokio::test]
async fn test_uninstall_resets_state_and_proxy() {
    let tmp = tempfile::tempdir().unwrap();
    let base = deployed_base(&tmp).await;
    let runner = healthy_runner();
    let proxy = Arc::new(MemoryControl::new());

    let regeneration = uninstall(&base, &tools(&runner, &proxy, true), false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(regeneration.mode, TopologyMode::PreDeployment);
    assert!(proxy.last().unwrap().text.contains("server 127.0.0.1:8080;"));

    assert_eq!(runner.count("helm uninstall nemo"), 1);
    // volume claims are kept unless asked
    assert_eq!(runner.count("kubectl delete pvc"), 0);

    let state = state_store(&base).load().await;
    assert!(!state.deployed);
    assert!(state.timestamp.is_some());
}

#[tokio::test]
async fn test_uninstall_purges_volumes_when_asked() {
    let tmp = tempfile::tempdir().unwrap();
    let base = deployed_base(&tmp).await;
    let runner = healthy_runner();
    let proxy = Arc::new(MemoryControl::new());

    uninstall(&base, &tools(&runner, &proxy, true), true).await.unwrap();
    assert!(runner.calls().iter().any(|c| c.starts_with("kubectl delete") && c.contains("pvc")));
}

#[tokio::test]
async fn test_declined_uninstall_changes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let base = deployed_base(&tmp).await;
    let runner = healthy_runner();
    let proxy = Arc::new(MemoryControl::new());

    let err = uninstall(&base, &tools(&runner, &proxy, false), false)
        .await
        .unwrap_err();
    assert!(matches!(err, LaunchError::Declined(_)));
    assert!(runner.calls().is_empty());
    assert!(proxy.applied().is_empty());
    assert!(state_store(&base).load().await.deployed);
}
