//! Service spec

use super::{run_labels, Labels, DEFAULT_EXTERNAL_PORT, DEFAULT_PORT};

const DEFAULT_PORT_NAME: &str = "tcp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePort {
    pub name: String,
    pub port: i32,
    pub target_port: i32,
}

impl ServicePort {
    /// External port 80 to the app port; empty name becomes `tcp`
    pub fn default_named(name: &str) -> Self {
        let name = if name.is_empty() { DEFAULT_PORT_NAME } else { name };
        Self {
            name: name.to_string(),
            port: DEFAULT_EXTERNAL_PORT,
            target_port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub namespace: String,
    pub service_type: String,
    /// Also used as the pod selector
    pub labels: Labels,
    pub ports: Vec<ServicePort>,
}

impl ServiceSpec {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        service_type: impl Into<String>,
        ports: Vec<ServicePort>,
        labels: Labels,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            service_type: service_type.into(),
            labels,
            ports,
        }
    }

    /// Service named after the app selecting `run={app}`
    pub fn default_for(app_name: &str, service_type: &str, port_name: &str) -> Self {
        Self::new(
            app_name,
            app_name,
            service_type,
            vec![ServicePort::default_named(port_name)],
            run_labels(app_name),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_service() {
        let svc = ServiceSpec::default_for("myapp", "LoadBalancer", "");
        assert_eq!(svc.name, "myapp");
        assert_eq!(svc.namespace, "myapp");
        assert_eq!(svc.labels["run"], "myapp");
        assert_eq!(
            svc.ports,
            vec![ServicePort {
                name: "tcp".to_string(),
                port: 80,
                target_port: 5000,
            }]
        );
    }

    #[test]
    fn test_named_port() {
        let svc = ServiceSpec::default_for("myapp", "ClusterIP", "grpc");
        assert_eq!(svc.ports[0].name, "grpc");
        assert_eq!(svc.service_type, "ClusterIP");
    }
}
