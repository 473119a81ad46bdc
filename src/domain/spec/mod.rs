//! Workload specs
//!
//! Pure value objects describing what should run in the cluster, plus the
//! builders that assemble them. Nothing here talks to the cluster; the
//! gateway in `infrastructure::cluster` converts these into k8s objects.

pub mod build;
pub mod container;
pub mod cronjob;
pub mod deploy;
pub mod pod;
pub mod runner;
pub mod service;
pub mod sidecar;

use std::collections::BTreeMap;

pub use build::BuildPodBuilder;
pub use container::{Container, ContainerBuilder, ContainerLimits, Port, VolumeMount};
pub use cronjob::{CronJobBuilder, CronJobSpec};
pub use deploy::{
    DeployBuilder, DeploySpec, HealthCheck, HealthCheckProbe, Lifecycle, PreStop, RollingUpdate,
    TeresaYaml,
};
pub use pod::{PodBuilder, PodSpec, SideCar, Volume, VolumeSource};
pub use runner::RunnerPodBuilder;
pub use service::{ServicePort, ServiceSpec};
pub use sidecar::CloudSqlProxy;

/// Port the app listens on (and the one the service targets)
pub const DEFAULT_PORT: i32 = 5000;

/// Port the app moves to when a side-car takes over [`DEFAULT_PORT`]
pub const SECONDARY_PORT: i32 = 6000;

/// Port exposed by the service
pub const DEFAULT_EXTERNAL_PORT: i32 = 80;

pub const SLUG_ANNOTATION: &str = "teresa.io/slug";
pub const CHANGE_CAUSE_ANNOTATION: &str = "kubernetes.io/change-cause";
pub const APP_TYPE_ANNOTATION: &str = "teresa.io/app-type";
pub const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

/// Label used to select every pod of an app
pub const RUN_LABEL: &str = "run";

pub type Labels = BTreeMap<String, String>;

/// `{"run": value}`
pub fn run_labels(value: &str) -> Labels {
    let mut labels = Labels::new();
    labels.insert(RUN_LABEL.to_string(), value.to_string());
    labels
}

/// What pod specs need to know about the object storage backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageInfo {
    pub storage_type: String,
    pub k8s_secret_name: String,
    pub pod_env_vars: BTreeMap<String, String>,
}
