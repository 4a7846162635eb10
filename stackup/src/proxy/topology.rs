//! Typed routing topology
//!
//! Exactly one of two topologies is active: the pre-deployment topology sends
//! everything to the UI backend, the post-deployment topology routes each
//! platform service by path. Rendering to proxy syntax lives in `render`.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Address every unresolved service is bound to; connections are refused
pub const SENTINEL_HOST: &str = "127.0.0.1";
pub const SENTINEL_PORT: u16 = 1;

/// Reserved prefix for the UI backend in both topologies
pub const UI_PREFIX: &str = "/launcher/";

/// Logical platform services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    InferenceGateway,
    EntityRegistry,
    Customization,
    Evaluation,
    PolicyGuard,
    DeploymentManagement,
    Studio,
    DataStore,
    Notebook,
}

impl ServiceKind {
    /// Services that are always part of a release
    pub const CORE: [ServiceKind; 8] = [
        ServiceKind::InferenceGateway,
        ServiceKind::EntityRegistry,
        ServiceKind::Customization,
        ServiceKind::Evaluation,
        ServiceKind::PolicyGuard,
        ServiceKind::DeploymentManagement,
        ServiceKind::Studio,
        ServiceKind::DataStore,
    ];

    /// Services for a release, with or without the notebook
    pub fn for_release(include_notebook: bool) -> Vec<ServiceKind> {
        let mut services = Self::CORE.to_vec();
        if include_notebook {
            services.push(ServiceKind::Notebook);
        }
        services
    }

    /// Suffix of the cluster service name; the full name is `<release>-<suffix>`
    pub fn service_suffix(&self) -> &'static str {
        match self {
            ServiceKind::InferenceGateway => "nim-proxy",
            ServiceKind::EntityRegistry => "entity-store",
            ServiceKind::Customization => "customizer",
            ServiceKind::Evaluation => "evaluator",
            ServiceKind::PolicyGuard => "guardrails",
            ServiceKind::DeploymentManagement => "deployment-management",
            ServiceKind::Studio => "studio",
            ServiceKind::DataStore => "data-store",
            ServiceKind::Notebook => "jupyter",
        }
    }

    pub fn service_name(&self, release: &str) -> String {
        format!("{}-{}", release, self.service_suffix())
    }

    /// Port the service listens on inside the cluster
    pub fn default_port(&self) -> u16 {
        match self {
            ServiceKind::Evaluation | ServiceKind::PolicyGuard => 7331,
            ServiceKind::Studio | ServiceKind::DataStore => 3000,
            ServiceKind::Notebook => 8888,
            _ => 8000,
        }
    }

    /// Path prefixes served; the data store takes the catch-all separately
    pub fn paths(&self) -> &'static [&'static str] {
        match self {
            ServiceKind::InferenceGateway => &[
                "/v1/chat/completions",
                "/v1/completions",
                "/v1/embeddings",
                "/v1/models",
            ],
            ServiceKind::EntityRegistry => &[
                "/v1/namespaces",
                "/v1/projects",
                "/v1/datasets",
                "/v1/models/entity",
            ],
            ServiceKind::Customization => &["/v1/customization"],
            ServiceKind::Evaluation => &["/v1/evaluation"],
            ServiceKind::PolicyGuard => &["/v1/guardrail"],
            ServiceKind::DeploymentManagement => &["/v1/deployment"],
            ServiceKind::Studio => &["/studio/"],
            ServiceKind::Notebook => &["/jupyter/"],
            ServiceKind::DataStore => &["/"],
        }
    }

    pub fn profile(&self) -> TimeoutProfile {
        match self {
            ServiceKind::InferenceGateway | ServiceKind::PolicyGuard => TimeoutProfile::Streaming,
            ServiceKind::Customization
            | ServiceKind::Evaluation
            | ServiceKind::Notebook
            | ServiceKind::DataStore => TimeoutProfile::LongPoll,
            ServiceKind::EntityRegistry | ServiceKind::DeploymentManagement | ServiceKind::Studio => {
                TimeoutProfile::Api
            }
        }
    }

    pub fn websocket(&self) -> bool {
        matches!(self, ServiceKind::Studio | ServiceKind::Notebook)
    }

    /// Identifier safe for proxy upstream and location names
    pub fn ident(&self) -> String {
        self.service_suffix().replace('-', "_")
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_suffix())
    }
}

/// Latency class of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimeoutProfile {
    /// Sub-second request/response APIs
    Api,
    /// Token streaming; buffering disabled
    Streaming,
    /// Multi-minute jobs and large uploads
    LongPoll,
}

impl TimeoutProfile {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    pub fn read_timeout(&self) -> Duration {
        match self {
            TimeoutProfile::Api => Duration::from_secs(60),
            TimeoutProfile::Streaming => Duration::from_secs(600),
            TimeoutProfile::LongPoll => Duration::from_secs(1800),
        }
    }

    pub fn buffering(&self) -> bool {
        !matches!(self, TimeoutProfile::Streaming)
    }

    /// `None` means unlimited
    pub fn max_body_size(&self) -> Option<&'static str> {
        match self {
            TimeoutProfile::Api => Some("100m"),
            TimeoutProfile::Streaming => Some("100m"),
            TimeoutProfile::LongPoll => None,
        }
    }
}

/// Where a service's traffic goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Upstream {
    Live { host: String, port: u16 },
    Sentinel,
}

impl Upstream {
    pub fn address(&self) -> String {
        match self {
            Upstream::Live { host, port } => format!("{}:{}", host, port),
            Upstream::Sentinel => format!("{}:{}", SENTINEL_HOST, SENTINEL_PORT),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, Upstream::Sentinel)
    }
}

/// A discovered (or unresolved) service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceEndpoint {
    pub service: ServiceKind,
    pub upstream: Upstream,
    /// Port the service advertises inside the cluster, used to match its own URLs
    pub service_port: u16,
}

impl ServiceEndpoint {
    /// Bound to the sentinel, assuming the default in-cluster port
    pub fn unresolved(service: ServiceKind) -> Self {
        Self {
            service,
            upstream: Upstream::Sentinel,
            service_port: service.default_port(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PathMatch {
    Prefix(String),
}

/// Response body substitution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rewrite {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub matcher: PathMatch,
    /// Name of the upstream group
    pub upstream: String,
    pub profile: TimeoutProfile,
    pub websocket: bool,
    /// Strip the matched prefix before forwarding
    pub strip_prefix: bool,
    pub rewrites: Vec<Rewrite>,
    /// Set when the upstream is the sentinel; failures answer with a
    /// structured "not ready" response naming this service
    pub not_ready_service: Option<ServiceKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamGroup {
    pub name: String,
    pub server: String,
}

/// Listener settings shared by both topologies
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Listen {
    pub server_name: String,
    pub http_port: u16,
    pub https_port: u16,
    pub tls_cert: String,
    pub tls_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopologyMode {
    PreDeployment,
    PostDeployment,
}

impl fmt::Display for TopologyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyMode::PreDeployment => f.write_str("pre-deployment"),
            TopologyMode::PostDeployment => f.write_str("post-deployment"),
        }
    }
}

/// Complete set of routing rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topology {
    pub mode: TopologyMode,
    pub listen: Listen,
    pub upstreams: Vec<UpstreamGroup>,
    pub routes: Vec<Route>,
}

impl Topology {
    /// Upstream group for a service
    pub fn upstream_for(&self, service: ServiceKind) -> Option<&UpstreamGroup> {
        let name = upstream_name(service);
        self.upstreams.iter().find(|u| u.name == name)
    }

    pub fn route(&self, prefix: &str) -> Option<&Route> {
        self.routes
            .iter()
            .find(|r| matches!(&r.matcher, PathMatch::Prefix(p) if p == prefix))
    }
}

const UI_UPSTREAM: &str = "stackup_ui";

fn upstream_name(service: ServiceKind) -> String {
    format!("stackup_{}", service.ident())
}

/// Builds either topology
#[derive(Debug, Clone)]
pub struct TopologyBuilder {
    listen: Listen,
    ui_backend: String,
    release: String,
}

impl TopologyBuilder {
    pub fn new(listen: Listen, ui_backend: impl Into<String>, release: impl Into<String>) -> Self {
        Self {
            listen,
            ui_backend: ui_backend.into(),
            release: release.into(),
        }
    }

    fn ui_route(&self, prefix: &str, strip_prefix: bool) -> Route {
        Route {
            matcher: PathMatch::Prefix(prefix.to_string()),
            upstream: UI_UPSTREAM.to_string(),
            profile: TimeoutProfile::Api,
            websocket: true,
            strip_prefix,
            rewrites: Vec::new(),
            not_ready_service: None,
        }
    }

    fn ui_upstream(&self) -> UpstreamGroup {
        UpstreamGroup {
            name: UI_UPSTREAM.to_string(),
            server: self.ui_backend.clone(),
        }
    }

    /// Everything to the UI backend
    pub fn pre_deployment(&self) -> Topology {
        Topology {
            mode: TopologyMode::PreDeployment,
            listen: self.listen.clone(),
            upstreams: vec![self.ui_upstream()],
            routes: vec![self.ui_route(UI_PREFIX, true), self.ui_route("/", false)],
        }
    }

    /// Per-service routes with the data store as the catch-all
    pub fn post_deployment(&self, endpoints: &[ServiceEndpoint]) -> Topology {
        let rewrites = self.rewrites(endpoints);
        let mut upstreams = vec![self.ui_upstream()];
        let mut routes = vec![self.ui_route(UI_PREFIX, true)];

        let mut ordered: Vec<&ServiceEndpoint> = endpoints.iter().collect();
        ordered.sort_by_key(|e| e.service);

        for endpoint in ordered {
            let service = endpoint.service;
            let name = upstream_name(service);
            upstreams.push(UpstreamGroup {
                name: name.clone(),
                server: endpoint.upstream.address(),
            });
            for path in service.paths() {
                routes.push(Route {
                    matcher: PathMatch::Prefix(path.to_string()),
                    upstream: name.clone(),
                    profile: service.profile(),
                    websocket: service.websocket(),
                    strip_prefix: false,
                    rewrites: rewrites.clone(),
                    not_ready_service: endpoint.upstream.is_sentinel().then_some(service),
                });
            }
        }

        Topology {
            mode: TopologyMode::PostDeployment,
            listen: self.listen.clone(),
            upstreams,
            routes,
        }
    }

    /// Internal hosts become relative paths; the public host is forced to https
    fn rewrites(&self, endpoints: &[ServiceEndpoint]) -> Vec<Rewrite> {
        let mut rewrites: Vec<Rewrite> = endpoints
            .iter()
            .map(|e| Rewrite {
                from: format!(
                    "http://{}:{}/",
                    e.service.service_name(&self.release),
                    e.service_port
                ),
                to: "/".to_string(),
            })
            .collect();

        rewrites.push(Rewrite {
            from: format!("http://{}", self.listen.server_name),
            to: format!("https://{}", self.listen.server_name),
        });
        rewrites
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listen() -> Listen {
        Listen {
            server_name: "nemo.test".to_string(),
            http_port: 80,
            https_port: 443,
            tls_cert: "/certs/tls.crt".to_string(),
            tls_key: "/certs/tls.key".to_string(),
        }
    }

    fn all_sentinel(include_notebook: bool) -> Vec<ServiceEndpoint> {
        ServiceKind::for_release(include_notebook)
            .into_iter()
            .map(ServiceEndpoint::unresolved)
            .collect()
    }

    #[test]
    fn test_pre_deployment_routes_everything_to_ui() {
        let topology = TopologyBuilder::new(listen(), "127.0.0.1:8080", "nemo").pre_deployment();
        assert_eq!(topology.mode, TopologyMode::PreDeployment);
        assert_eq!(topology.upstreams.len(), 1);
        assert_eq!(topology.route("/").unwrap().upstream, "stackup_ui");
        assert!(topology.route(UI_PREFIX).unwrap().strip_prefix);
    }

    #[test]
    fn test_post_deployment_catch_all_is_data_store() {
        let topology = TopologyBuilder::new(listen(), "127.0.0.1:8080", "nemo").post_deployment(&all_sentinel(false));
        assert_eq!(topology.mode, TopologyMode::PostDeployment);
        assert_eq!(topology.route("/").unwrap().upstream, "stackup_data_store");
        assert_eq!(topology.route(UI_PREFIX).unwrap().upstream, "stackup_ui");
        assert_eq!(
            topology.route("/v1/models/entity").unwrap().upstream,
            "stackup_entity_store"
        );
        assert_eq!(
            topology.route("/v1/chat/completions").unwrap().profile,
            TimeoutProfile::Streaming
        );
        assert!(topology.route("/jupyter/").is_none());
    }

    #[test]
    fn test_sentinel_routes_are_marked_not_ready() {
        let topology = TopologyBuilder::new(listen(), "127.0.0.1:8080", "nemo").post_deployment(&all_sentinel(true));
        let route = topology.route("/jupyter/").unwrap();
        assert_eq!(route.not_ready_service, Some(ServiceKind::Notebook));
        assert_eq!(
            topology.upstream_for(ServiceKind::Notebook).unwrap().server,
            "127.0.0.1:1"
        );
    }

    #[test]
    fn test_rewrites_cover_internal_hosts_and_scheme() {
        let topology = TopologyBuilder::new(listen(), "127.0.0.1:8080", "nemo").post_deployment(&all_sentinel(false));
        let rewrites = &topology.route("/").unwrap().rewrites;
        assert!(rewrites.contains(&Rewrite {
            from: "http://nemo-data-store:3000/".to_string(),
            to: "/".to_string()
        }));
        assert!(rewrites.contains(&Rewrite {
            from: "http://nemo.test".to_string(),
            to: "https://nemo.test".to_string()
        }));
    }

    #[test]
    fn test_rewrites_follow_discovered_port() {
        let mut endpoints = all_sentinel(false);
        for endpoint in endpoints.iter_mut().filter(|e| e.service == ServiceKind::DataStore) {
            endpoint.upstream = Upstream::Live {
                host: "10.96.1.1".to_string(),
                port: 3001,
            };
            endpoint.service_port = 3001;
        }
        let topology = TopologyBuilder::new(listen(), "127.0.0.1:8080", "nemo").post_deployment(&endpoints);
        let froms: Vec<&str> = topology.route("/").unwrap().rewrites.iter().map(|r| r.from.as_str()).collect();
        assert!(froms.contains(&"http://nemo-data-store:3001/"));
        assert!(!froms.contains(&"http://nemo-data-store:3000/"));
    }
}
