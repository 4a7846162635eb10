//! Service models

use serde::Deserialize;

/// `kubectl get svc -o json`
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceList {
    #[serde(default)]
    pub items: Vec<Service>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
    pub metadata: ServiceMeta,
    #[serde(default)]
    pub spec: ServiceSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceMeta {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(default, rename = "clusterIP")]
    pub cluster_ip: Option<String>,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    #[serde(default)]
    pub name: Option<String>,
    pub port: u16,
    #[serde(default)]
    pub node_port: Option<u16>,
}

impl Service {
    /// Cluster IP, unless the service is headless or has none yet
    pub fn routable_ip(&self) -> Option<&str> {
        self.spec
            .cluster_ip
            .as_deref()
            .filter(|ip| !ip.is_empty() && *ip != "None")
    }

    /// Port by number, or the first declared port when `preferred` is absent
    pub fn port(&self, preferred: Option<u16>) -> Option<&ServicePort> {
        match preferred {
            Some(number) => self.spec.ports.iter().find(|p| p.port == number),
            None => self.spec.ports.first(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_service_is_not_routable() {
        let list: ServiceList = serde_json::from_str(
            r#"{"items":[
              {"metadata":{"name":"a"},"spec":{"clusterIP":"None","ports":[{"port":80}]}},
              {"metadata":{"name":"b"},"spec":{"clusterIP":"10.0.0.7","ports":[{"port":3000,"nodePort":31000}]}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(list.items[0].routable_ip(), None);
        assert_eq!(list.items[1].routable_ip(), Some("10.0.0.7"));
        assert_eq!(list.items[1].port(Some(3000)).unwrap().node_port, Some(31000));
        assert!(list.items[1].port(Some(8000)).is_none());
    }
}
