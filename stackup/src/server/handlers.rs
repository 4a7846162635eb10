//! HTTP request handlers

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use http::{StatusCode, Uri};
use serde::Serialize;

use crate::server::state::ServerState;
use crate::storage::deployment::DeploymentState;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "stackup".to_string(),
        version: version.version,
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Release this launcher manages, whether or not it is deployed
#[derive(Debug, Serialize)]
pub struct ManagedRelease {
    pub release: String,
    pub namespace: String,
}

/// Deployment state response
#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub managed: ManagedRelease,
    #[serde(flatten)]
    pub state: DeploymentState,
}

/// Deployment state handler; reads are unsynchronized so a long transition
/// never stalls the UI
pub async fn state_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(StateResponse {
        managed: ManagedRelease {
            release: state.release.clone(),
            namespace: state.namespace.clone(),
        },
        state: state.store.load().await,
    })
}

/// Error body for unknown paths
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub path: String,
}

pub async fn not_found_handler(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "not_found".to_string(),
            path: uri.path().to_string(),
        }),
    )
}
