//! Container spec and its builder

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLimits {
    pub cpu: String,
    pub memory: String,
}

impl ContainerLimits {
    pub fn new(cpu: impl Into<String>, memory: impl Into<String>) -> Self {
        Self {
            cpu: cpu.into(),
            memory: memory.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub name: String,
    pub container_port: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    pub read_only: bool,
    pub sub_path: Option<String>,
}

impl VolumeMount {
    pub fn new(name: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mount_path: mount_path.into(),
            read_only: false,
            sub_path: None,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    /// Plain env vars
    pub env: BTreeMap<String, String>,
    /// Keys of the app secret exposed as env vars
    pub secrets: Vec<String>,
    pub ports: Vec<Port>,
    pub volume_mounts: Vec<VolumeMount>,
    pub limits: Option<ContainerLimits>,
}

impl Container {
    pub fn has_volume_mount(&self, name: &str) -> bool {
        self.volume_mounts.iter().any(|vm| vm.name == name)
    }
}

/// Fluent builder for [`Container`]
#[derive(Debug, Clone)]
pub struct ContainerBuilder {
    container: Container,
}

impl ContainerBuilder {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            container: Container {
                name: name.into(),
                image: image.into(),
                command: Vec::new(),
                args: Vec::new(),
                env: BTreeMap::new(),
                secrets: Vec::new(),
                ports: Vec::new(),
                volume_mounts: Vec::new(),
                limits: None,
            },
        }
    }

    /// Merge env vars; later calls win on duplicate keys
    pub fn with_env<I, K, V>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in env {
            self.container.env.insert(k.into(), v.into());
        }
        self
    }

    pub fn with_secrets(mut self, secrets: &[String]) -> Self {
        self.container.secrets.extend(secrets.iter().cloned());
        self
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.container.command = command;
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.container.args = args;
        self
    }

    pub fn with_limits(mut self, cpu: impl Into<String>, memory: impl Into<String>) -> Self {
        self.container.limits = Some(ContainerLimits::new(cpu, memory));
        self
    }

    pub fn with_optional_limits(mut self, limits: Option<&ContainerLimits>) -> Self {
        self.container.limits = limits.cloned();
        self
    }

    pub fn expose_port(mut self, name: impl Into<String>, port: i32) -> Self {
        self.container.ports.push(Port {
            name: name.into(),
            container_port: port,
        });
        self
    }

    pub fn with_volume_mount(
        mut self,
        name: impl Into<String>,
        path: impl Into<String>,
        sub_path: Option<String>,
    ) -> Self {
        let mut vm = VolumeMount::new(name, path);
        vm.sub_path = sub_path;
        self.container.volume_mounts.push(vm);
        self
    }

    pub fn build(self) -> Container {
        self.container
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_merges_env() {
        let c = ContainerBuilder::new("app", "img")
            .with_env([("A", "1"), ("B", "2")])
            .with_env([("B", "3")])
            .build();
        assert_eq!(c.env.get("A").map(String::as_str), Some("1"));
        assert_eq!(c.env.get("B").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_builder_ports_and_limits() {
        let c = ContainerBuilder::new("app", "img")
            .expose_port("http", 5000)
            .with_limits("200m", "512Mi")
            .build();
        assert_eq!(c.ports[0].container_port, 5000);
        assert_eq!(c.limits, Some(ContainerLimits::new("200m", "512Mi")));
        assert!(c.command.is_empty());
    }
}
