//! Service discovery
//!
//! Best effort throughout: any service that cannot be resolved is bound to the
//! sentinel upstream, and a failed listing degrades to all-sentinel.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::LaunchError;
use crate::exec::command::{CommandRunner, CommandSpec};
use crate::exec::kubectl::Kubectl;
use crate::models::service::{Service, ServiceList, ServicePort};
use crate::proxy::topology::{ServiceEndpoint, ServiceKind, Upstream};

/// How discovered services are addressed from the proxy host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Cluster IP and service port; the proxy shares the cluster network
    ClusterIp,
    /// Node address and NodePort
    NodePort,
}

pub struct Discovery {
    kubectl: Kubectl,
    runner: Arc<dyn CommandRunner>,
    namespace: String,
    release: String,
    addressing: Addressing,
}

impl Discovery {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        namespace: impl Into<String>,
        release: impl Into<String>,
        addressing: Addressing,
    ) -> Self {
        Self {
            kubectl: Kubectl::new(runner.clone()),
            runner,
            namespace: namespace.into(),
            release: release.into(),
            addressing,
        }
    }

    async fn node_ip(&self) -> Result<String, LaunchError> {
        let spec = CommandSpec::new("minikube")
            .arg("ip")
            .timeout(Duration::from_secs(30));
        let output = self.runner.run_checked(&spec).await?;
        let ip = output.stdout.trim().to_string();
        if ip.is_empty() {
            return Err(LaunchError::ClusterError("minikube ip returned nothing".to_string()));
        }
        Ok(ip)
    }

    /// Resolve every service in `services`
    pub async fn discover(&self, services: &[ServiceKind]) -> Vec<ServiceEndpoint> {
        let listing = match self.kubectl.get_services(&self.namespace).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!("Service discovery failed, all routes use the sentinel: {}", e);
                return all_sentinel(services);
            }
        };

        let node_ip = match self.addressing {
            Addressing::ClusterIp => None,
            Addressing::NodePort => match self.node_ip().await {
                Ok(ip) => Some(ip),
                Err(e) => {
                    warn!("Node address unavailable, all routes use the sentinel: {}", e);
                    return all_sentinel(services);
                }
            },
        };

        services
            .iter()
            .map(|&service| {
                let upstream = resolve(&listing, &self.release, service, node_ip.as_deref());
                let service_port = find(&listing, &self.release, service)
                    .and_then(|svc| select_port(svc, service))
                    .map(|p| p.port)
                    .unwrap_or_else(|| service.default_port());
                if upstream.is_sentinel() {
                    warn!(
                        "Service {} not resolved; routing to sentinel",
                        service.service_name(&self.release)
                    );
                } else {
                    debug!("Service {} -> {}", service, upstream.address());
                }
                ServiceEndpoint {
                    service,
                    upstream,
                    service_port,
                }
            })
            .collect()
    }
}

fn all_sentinel(services: &[ServiceKind]) -> Vec<ServiceEndpoint> {
    services.iter().map(|&service| ServiceEndpoint::unresolved(service)).collect()
}

fn find<'a>(listing: &'a ServiceList, release: &str, service: ServiceKind) -> Option<&'a Service> {
    let exact = service.service_name(release);
    listing
        .items
        .iter()
        .find(|s| s.metadata.name == exact)
        .or_else(|| {
            let suffix = format!("-{}", service.service_suffix());
            listing.items.iter().find(|s| s.metadata.name.ends_with(&suffix))
        })
}

/// The expected port when the service exposes it, otherwise its first port
fn select_port(svc: &Service, service: ServiceKind) -> Option<&ServicePort> {
    svc.port(Some(service.default_port())).or_else(|| svc.port(None))
}

/// Resolve one service from a listing
pub fn resolve(listing: &ServiceList, release: &str, service: ServiceKind, node_ip: Option<&str>) -> Upstream {
    let Some(svc) = find(listing, release, service) else {
        return Upstream::Sentinel;
    };
    let port = select_port(svc, service);

    match (node_ip, port) {
        (Some(node_ip), Some(port)) => match port.node_port {
            Some(node_port) => Upstream::Live {
                host: node_ip.to_string(),
                port: node_port,
            },
            None => Upstream::Sentinel,
        },
        (None, Some(port)) => match svc.routable_ip() {
            Some(ip) => Upstream::Live {
                host: ip.to_string(),
                port: port.port,
            },
            None => Upstream::Sentinel,
        },
        (_, None) => Upstream::Sentinel,
    }
}
