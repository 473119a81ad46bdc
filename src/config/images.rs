//! Container images and resource limits for platform pods.

use serde::{Deserialize, Serialize};

use crate::domain::spec::ContainerLimits;

/// Images of the pods the platform starts on behalf of apps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagesConfig {
    /// Turns an app tarball into a slug
    #[serde(default = "default_slug_builder")]
    pub slug_builder: String,

    /// Runs a process from a slug
    #[serde(default = "default_slug_runner")]
    pub slug_runner: String,

    /// Init container that downloads the slug
    #[serde(default = "default_slug_store")]
    pub slug_store: String,

    /// nginx side-car; empty disables it even when the app ships an nginx.conf
    #[serde(default)]
    pub nginx: String,

    #[serde(default = "default_cloudsql_proxy")]
    pub cloudsql_proxy: String,
}

fn default_slug_builder() -> String {
    "luizalabs/slugbuilder:v3.4.0".to_string()
}

fn default_slug_runner() -> String {
    "luizalabs/slugrunner:v3.2.0".to_string()
}

fn default_slug_store() -> String {
    "luizalabs/slugstore:v1.0.0".to_string()
}

fn default_cloudsql_proxy() -> String {
    "gcr.io/cloudsql-docker/gce-proxy:1.11".to_string()
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            slug_builder: default_slug_builder(),
            slug_runner: default_slug_runner(),
            slug_store: default_slug_store(),
            nginx: String::new(),
            cloudsql_proxy: default_cloudsql_proxy(),
        }
    }
}

/// CPU and memory limits as Kubernetes quantities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub cpu: String,
    pub memory: String,
}

impl LimitsConfig {
    pub fn new(cpu: &str, memory: &str) -> Self {
        Self {
            cpu: cpu.to_string(),
            memory: memory.to_string(),
        }
    }

    pub fn to_container_limits(&self) -> ContainerLimits {
        ContainerLimits::new(&self.cpu, &self.memory)
    }
}

pub(super) fn default_build_limits() -> LimitsConfig {
    LimitsConfig::new("500m", "1024Mi")
}

pub(super) fn default_exec_limits() -> LimitsConfig {
    LimitsConfig::new("200m", "512Mi")
}
