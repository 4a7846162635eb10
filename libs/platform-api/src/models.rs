//! API models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Status value the deployment management API reports once a model is serving
pub const STATUS_READY: &str = "ready";

/// Model deployment creation request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateModelDeploymentRequest {
    pub name: String,
    pub namespace: String,
    pub config: ModelDeploymentConfig,
}

/// Model deployment configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelDeploymentConfig {
    /// Fully-qualified model id, e.g. `meta/llama-3.2-1b-instruct`
    pub model: String,
    pub nim_deployment: NimDeployment,
}

/// Inference container settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NimDeployment {
    pub image_name: String,
    pub image_tag: String,
    pub pvc_size: String,
    pub gpu: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_envs: BTreeMap<String, String>,
}

/// Model deployment as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelDeployment {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub status_details: Option<StatusDetails>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ModelDeployment {
    /// The raw status field, if the platform has reported one
    pub fn status(&self) -> Option<&str> {
        self.status_details
            .as_ref()
            .and_then(|details| details.status.as_deref())
    }

    /// Whether the platform reports the deployment as serving
    pub fn is_ready(&self) -> bool {
        self.status()
            .map(|s| s.eq_ignore_ascii_case(STATUS_READY))
            .unwrap_or(false)
    }
}

/// Status block of a model deployment
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusDetails {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// OpenAI-compatible model listing returned by the inference gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    #[serde(default)]
    pub data: Vec<ModelEntry>,
}

impl ModelList {
    pub fn contains(&self, model_id: &str) -> bool {
        self.data.iter().any(|m| m.id == model_id)
    }
}

/// Model listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default)]
    pub owned_by: Option<String>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_status_is_not_ready() {
        let deployment: ModelDeployment = serde_json::from_str(
            r#"{"name":"llama","namespace":"meta","status_details":null}"#,
        )
        .unwrap();
        assert_eq!(deployment.status(), None);
        assert!(!deployment.is_ready());
    }

    #[test]
    fn test_ready_status() {
        let deployment: ModelDeployment = serde_json::from_str(
            r#"{"name":"llama","namespace":"meta","status_details":{"status":"ready","description":"ok"}}"#,
        )
        .unwrap();
        assert!(deployment.is_ready());
    }

    #[test]
    fn test_model_list_contains() {
        let list: ModelList = serde_json::from_str(
            r#"{"object":"list","data":[{"id":"meta/llama-3.2-1b-instruct","object":"model"}]}"#,
        )
        .unwrap();
        assert!(list.contains("meta/llama-3.2-1b-instruct"));
        assert!(!list.contains("meta/other"));
    }
}
