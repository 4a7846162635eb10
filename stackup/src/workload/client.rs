//! Deployment management API client

use std::time::Duration;

use platform_api::{CreateModelDeploymentRequest, ModelDeployment, ModelDeploymentConfig, ModelList, NimDeployment};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use crate::errors::LaunchError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// The model deployment to create on the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub namespace: String,
    pub name: String,
    /// Fully-qualified model id
    pub model: String,
    pub image_name: String,
    pub image_tag: String,
    pub pvc_size: String,
    pub gpu: u32,
}

impl WorkloadSpec {
    /// Split a model id like `meta/llama-3.2-1b-instruct` into namespace and name
    pub fn split_model_id(model: &str) -> Result<(String, String), LaunchError> {
        match model.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok((ns.to_string(), name.to_string()))
            }
            _ => Err(LaunchError::ConfigError(format!(
                "model id must look like '<namespace>/<name>', got '{}'",
                model
            ))),
        }
    }

    /// Deployment named after the model, in the model's namespace
    pub fn from_model(
        model: &str,
        image_name: &str,
        image_tag: &str,
        pvc_size: &str,
        gpu: u32,
    ) -> Result<Self, LaunchError> {
        let (namespace, name) = Self::split_model_id(model)?;
        Ok(Self {
            namespace,
            name,
            model: model.to_string(),
            image_name: image_name.to_string(),
            image_tag: image_tag.to_string(),
            pvc_size: pvc_size.to_string(),
            gpu,
        })
    }

    pub fn to_request(&self) -> CreateModelDeploymentRequest {
        CreateModelDeploymentRequest {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            config: ModelDeploymentConfig {
                model: self.model.clone(),
                nim_deployment: NimDeployment {
                    image_name: self.image_name.clone(),
                    image_tag: self.image_tag.clone(),
                    pvc_size: self.pvc_size.clone(),
                    gpu: self.gpu,
                    additional_envs: Default::default(),
                },
            },
        }
    }
}

/// Result of [`PlatformClient::ensure_deployment`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// Already present before submission
    Existing,
    Created,
    /// Submission raced with another creator
    Conflict,
}

/// Client for the platform's deployment management and inference APIs
#[derive(Clone)]
pub struct PlatformClient {
    client: Client,
    base_url: String,
}

impl PlatformClient {
    pub fn new(base_url: &str) -> Result<Self, LaunchError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T, LaunchError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("{} failed: {} - {}", what, status, body);
            return Err(LaunchError::PlatformApiError(format!("{}: {} {}", what, status, body)));
        }
        Ok(response.json().await?)
    }

    /// Fetch a model deployment; `None` when it does not exist
    pub async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<ModelDeployment>, LaunchError> {
        let url = format!(
            "{}/v1/deployment/model-deployments/{}/{}",
            self.base_url, namespace, name
        );
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::decode(response, "get model deployment").await.map(Some)
    }

    /// Submit a model deployment; a conflict means it already exists
    pub async fn create_deployment(&self, request: &CreateModelDeploymentRequest) -> Result<EnsureOutcome, LaunchError> {
        let url = format!("{}/v1/deployment/model-deployments", self.base_url);
        debug!("POST {}", url);

        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Ok(EnsureOutcome::Conflict);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Model deployment submission failed: {} - {}", status, body);
            return Err(LaunchError::WorkloadError(format!(
                "submission of {}/{} rejected: {} {}",
                request.namespace, request.name, status, body
            )));
        }
        Ok(EnsureOutcome::Created)
    }

    /// Create the deployment unless it is already present. Safe to repeat.
    pub async fn ensure_deployment(&self, spec: &WorkloadSpec) -> Result<EnsureOutcome, LaunchError> {
        if self.get_deployment(&spec.namespace, &spec.name).await?.is_some() {
            info!("Model deployment {}/{} already exists", spec.namespace, spec.name);
            return Ok(EnsureOutcome::Existing);
        }
        let outcome = self.create_deployment(&spec.to_request()).await?;
        info!("Model deployment {}/{} submitted ({:?})", spec.namespace, spec.name, outcome);
        Ok(outcome)
    }

    /// Models served by the inference gateway
    pub async fn list_models(&self) -> Result<ModelList, LaunchError> {
        let url = format!("{}/v1/models", self.base_url);
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        Self::decode(response, "list models").await
    }

    /// Confirm the gateway lists `model`
    pub async fn verify_model_served(&self, model: &str) -> Result<(), LaunchError> {
        let models = self.list_models().await?;
        if models.contains(model) {
            info!("Inference gateway lists {}", model);
            Ok(())
        } else {
            let listed: Vec<&str> = models.data.iter().map(|m| m.id.as_str()).collect();
            Err(LaunchError::WorkloadError(format!(
                "model {} is not listed by the inference gateway (listed: {:?})",
                model, listed
            )))
        }
    }
}
