//! Registry and model-hub credentials as cluster secrets

use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::info;

use crate::errors::LaunchError;
use crate::exec::kubectl::Kubectl;

pub const IMAGE_PULL_SECRET: &str = "nvcrimagepullsecret";
pub const REGISTRY_API_SECRET: &str = "ngc-api";
pub const INFERENCE_SECRET: &str = "nvidia-nim-secrets";
pub const MODEL_HUB_SECRET: &str = "hf-token";

pub const REGISTRY_HOST: &str = "nvcr.io";
/// Fixed user name the registry expects with API-key authentication
pub const REGISTRY_USER: &str = "$oauthtoken";

/// Both tokens the platform needs; never empty once constructed
#[derive(Clone)]
pub struct Credentials {
    registry: SecretString,
    model_hub: SecretString,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn new(registry: SecretString, model_hub: SecretString) -> Result<Self, LaunchError> {
        if registry.expose_secret().trim().is_empty() {
            return Err(LaunchError::ConfigError(
                "registry API key is required (--ngc-api-key or NGC_API_KEY)".to_string(),
            ));
        }
        if model_hub.expose_secret().trim().is_empty() {
            return Err(LaunchError::ConfigError(
                "model hub token is required (--hf-token or HF_TOKEN)".to_string(),
            ));
        }
        Ok(Self { registry, model_hub })
    }

    pub fn registry_token(&self) -> &str {
        self.registry.expose_secret()
    }

    pub fn model_hub_token(&self) -> &str {
        self.model_hub.expose_secret()
    }
}

fn encode(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

fn secret(name: &str, namespace: &str, kind: &str, data: Value) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": { "app.kubernetes.io/managed-by": "stackup" }
        },
        "type": kind,
        "data": data
    })
}

/// The four secret manifests, in creation order
pub fn secret_manifests(credentials: &Credentials, namespace: &str) -> Vec<(&'static str, Value)> {
    let registry = credentials.registry_token();
    let docker_config = json!({
        "auths": {
            REGISTRY_HOST: {
                "username": REGISTRY_USER,
                "password": registry,
                "auth": encode(&format!("{}:{}", REGISTRY_USER, registry)),
            }
        }
    });

    vec![
        (
            IMAGE_PULL_SECRET,
            secret(
                IMAGE_PULL_SECRET,
                namespace,
                "kubernetes.io/dockerconfigjson",
                json!({ ".dockerconfigjson": encode(&docker_config.to_string()) }),
            ),
        ),
        (
            REGISTRY_API_SECRET,
            secret(
                REGISTRY_API_SECRET,
                namespace,
                "Opaque",
                json!({ "NGC_API_KEY": encode(registry) }),
            ),
        ),
        (
            INFERENCE_SECRET,
            secret(
                INFERENCE_SECRET,
                namespace,
                "Opaque",
                json!({
                    "NGC_API_KEY": encode(registry),
                    "NIM_NGC_API_KEY": encode(registry),
                }),
            ),
        ),
        (
            MODEL_HUB_SECRET,
            secret(
                MODEL_HUB_SECRET,
                namespace,
                "Opaque",
                json!({ "HF_TOKEN": encode(credentials.model_hub_token()) }),
            ),
        ),
    ]
}

pub struct CredentialProvisioner {
    kubectl: Kubectl,
}

impl CredentialProvisioner {
    pub fn new(kubectl: Kubectl) -> Self {
        Self { kubectl }
    }

    /// Replace the well-known secrets in `namespace`
    pub async fn provision(&self, namespace: &str, credentials: &Credentials) -> Result<(), LaunchError> {
        self.kubectl.ensure_namespace(namespace).await?;

        let manifests = secret_manifests(credentials, namespace);
        let names: Vec<&str> = manifests.iter().map(|(name, _)| *name).collect();
        self.kubectl.delete_named(Some(namespace), "secret", &names).await?;

        for (name, manifest) in &manifests {
            self.kubectl
                .apply_stdin(Some(namespace), &manifest.to_string())
                .await
                .map_err(|e| LaunchError::ClusterError(format!("creating secret {} failed: {}", name, e)))?;
        }
        info!("Created {} secrets in {}", manifests.len(), namespace);
        Ok(())
    }
}
