//! Settings file management
//!
//! `settings.json` in the state directory overrides built-in defaults; CLI flags
//! override both. Every field is optional in the file.

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Launcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON logs on stdout
    #[serde(default)]
    pub json_logs: bool,

    /// Release and chart configuration
    #[serde(default)]
    pub release: ReleaseSettings,

    /// Reverse proxy configuration
    #[serde(default)]
    pub proxy: ProxySettings,

    /// Dependent workload configuration
    #[serde(default)]
    pub workload: WorkloadSettings,

    /// Host requirements
    #[serde(default)]
    pub preflight: PreflightSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            release: ReleaseSettings::default(),
            proxy: ProxySettings::default(),
            workload: WorkloadSettings::default(),
            preflight: PreflightSettings::default(),
        }
    }
}

/// Release settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSettings {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_release_name")]
    pub release_name: String,

    #[serde(default = "default_repo_name")]
    pub repo_name: String,

    #[serde(default = "default_repo_url")]
    pub repo_url: String,

    #[serde(default = "default_chart_name")]
    pub chart_name: String,

    /// Public host name the ingress answers on
    #[serde(default = "default_public_host")]
    pub public_host: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_release_name() -> String {
    "nemo".to_string()
}

fn default_repo_name() -> String {
    "nmp".to_string()
}

fn default_repo_url() -> String {
    "https://helm.ngc.nvidia.com/nvidia/nemo-microservices".to_string()
}

fn default_chart_name() -> String {
    "nemo-microservices-helm-chart".to_string()
}

fn default_public_host() -> String {
    "nemo.test".to_string()
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            release_name: default_release_name(),
            repo_name: default_repo_name(),
            repo_url: default_repo_url(),
            chart_name: default_chart_name(),
            public_host: default_public_host(),
        }
    }
}

/// Reverse proxy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Active configuration file read by the proxy process
    #[serde(default = "default_proxy_config_path")]
    pub config_path: String,

    /// Proxy binary used for validation and reload
    #[serde(default = "default_proxy_binary")]
    pub binary: String,

    /// Address of the local UI backend
    #[serde(default = "default_ui_backend")]
    pub ui_backend: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_https_port")]
    pub https_port: u16,

    #[serde(default = "default_tls_cert")]
    pub tls_cert: String,

    #[serde(default = "default_tls_key")]
    pub tls_key: String,

    /// Regeneration interval of `proxy watch`, in seconds
    #[serde(default = "default_watch_interval")]
    pub watch_interval_secs: u64,

    /// Route to cluster IPs; when false, route to the node address and NodePorts
    #[serde(default = "default_host_network")]
    pub host_network: bool,
}

fn default_proxy_config_path() -> String {
    "/etc/nginx/nginx.conf".to_string()
}

fn default_proxy_binary() -> String {
    "nginx".to_string()
}

fn default_ui_backend() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_http_port() -> u16 {
    80
}

fn default_https_port() -> u16 {
    443
}

fn default_tls_cert() -> String {
    "/etc/nginx/certs/stackup.crt".to_string()
}

fn default_tls_key() -> String {
    "/etc/nginx/certs/stackup.key".to_string()
}

fn default_watch_interval() -> u64 {
    30
}

fn default_host_network() -> bool {
    true
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            config_path: default_proxy_config_path(),
            binary: default_proxy_binary(),
            ui_backend: default_ui_backend(),
            http_port: default_http_port(),
            https_port: default_https_port(),
            tls_cert: default_tls_cert(),
            tls_key: default_tls_key(),
            watch_interval_secs: default_watch_interval(),
            host_network: default_host_network(),
        }
    }
}

/// Dependent workload settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSettings {
    /// Base URL of the platform's management API
    #[serde(default = "default_platform_url")]
    pub platform_url: String,

    /// Model id to serve
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_image_name")]
    pub image_name: String,

    #[serde(default = "default_image_tag")]
    pub image_tag: String,

    #[serde(default = "default_pvc_size")]
    pub pvc_size: String,

    #[serde(default = "default_gpu")]
    pub gpu: u32,
}

fn default_platform_url() -> String {
    "http://nemo.test".to_string()
}

fn default_model() -> String {
    "meta/llama-3.2-1b-instruct".to_string()
}

fn default_image_name() -> String {
    "nvcr.io/nim/meta/llama-3.2-1b-instruct".to_string()
}

fn default_image_tag() -> String {
    "1.8.3".to_string()
}

fn default_pvc_size() -> String {
    "25Gi".to_string()
}

fn default_gpu() -> u32 {
    1
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            platform_url: default_platform_url(),
            model: default_model(),
            image_name: default_image_name(),
            image_tag: default_image_tag(),
            pvc_size: default_pvc_size(),
            gpu: default_gpu(),
        }
    }
}

/// Host requirement settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightSettings {
    #[serde(default = "default_min_gpus")]
    pub min_gpus: usize,

    #[serde(default = "default_min_driver")]
    pub min_driver: String,

    #[serde(default = "default_min_disk_gb")]
    pub min_free_disk_gb: u64,

    #[serde(default = "default_gpu_models")]
    pub supported_gpu_models: Vec<String>,
}

fn default_min_gpus() -> usize {
    2
}

fn default_min_driver() -> String {
    "560.35.03".to_string()
}

fn default_min_disk_gb() -> u64 {
    200
}

fn default_gpu_models() -> Vec<String> {
    ["A100", "H100", "H200", "B200", "L40S"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

impl Default for PreflightSettings {
    fn default() -> Self {
        Self {
            min_gpus: default_min_gpus(),
            min_driver: default_min_driver(),
            min_free_disk_gb: default_min_disk_gb(),
            supported_gpu_models: default_gpu_models(),
        }
    }
}
