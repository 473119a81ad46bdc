//! Cluster gateway
//!
//! Capability traits, one per consumer, so each service only sees the
//! cluster operations it needs. [`KubeGateway`] implements all of them
//! against the Kubernetes API; tests use an in-memory fake.

pub mod convert;
pub mod kube;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::config::TeresaConfig;
use crate::domain::app::{Address, AutoScale, EnvVar};
use crate::domain::spec::{CronJobSpec, DeploySpec, PodSpec, ServiceSpec};
use crate::error::ClusterError;

pub use self::kube::KubeGateway;

/// How a one-shot pod ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodExit {
    Code(i32),
    /// Did not start or finish within the configured timeouts
    Timeout,
    /// Could not be observed to completion
    Failed(String),
}

/// A started one-shot pod.
///
/// `output` yields log lines while the pod runs and closes at EOF; `exit`
/// resolves once the pod is done. Dropping `output` stops the log copy.
#[derive(Debug)]
pub struct PodRun {
    pub output: mpsc::Receiver<String>,
    pub exit: oneshot::Receiver<PodExit>,
}

/// What [`DeployCluster::expose_deploy`] had to create
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExposeOutcome {
    pub service_created: bool,
    pub ingress_created: bool,
}

/// One deploy revision as tracked by its ReplicaSet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSetListItem {
    pub revision: String,
    pub description: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Has ready pods
    pub current: bool,
}

impl ReplicaSetListItem {
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.created_at
            .and_then(|created| (now - created).to_std().ok())
    }
}

/// How a rolling update settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutOutcome {
    Finished,
    /// Progress deadline exceeded; the old pods keep serving
    Stalled,
}

/// A pod of an app and its phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodListItem {
    pub name: String,
    pub state: String,
}

impl PodListItem {
    pub fn is_running(&self) -> bool {
        self.state == "Running"
    }
}

/// Which part of a pod log to stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    /// Lines from before the stream starts
    pub lines: i64,
    pub follow: bool,
}

/// Timeouts and poll intervals for one-shot pods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PodWaitOptions {
    pub start_poll: Duration,
    pub start_timeout: Duration,
    pub end_poll: Duration,
    pub run_timeout: Duration,
}

impl From<&TeresaConfig> for PodWaitOptions {
    fn from(config: &TeresaConfig) -> Self {
        Self {
            start_poll: config.pod_start_poll_interval,
            start_timeout: config.pod_start_timeout,
            end_poll: config.pod_end_poll_interval,
            run_timeout: config.pod_run_timeout,
        }
    }
}

/// Pods run to completion
#[async_trait]
pub trait PodCluster: Send + Sync {
    async fn pod_run(&self, pod: &PodSpec) -> Result<PodRun, ClusterError>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    /// Annotation of a deployment; `NotFound` when there is no deployment
    async fn deploy_annotation(
        &self,
        namespace: &str,
        deploy: &str,
        annotation: &str,
    ) -> Result<String, ClusterError>;
}

/// Long-running workloads and their revisions
#[async_trait]
pub trait DeployCluster: Send + Sync {
    /// Create or replace the deployment, keeping the live replica count
    async fn create_or_update_deploy(&self, spec: &DeploySpec) -> Result<(), ClusterError>;

    async fn create_or_update_cron_job(&self, spec: &CronJobSpec) -> Result<(), ClusterError>;

    async fn create_or_update_config_map(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), ClusterError>;

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    /// Create the service and ingress of an app if missing; never fails on existing objects
    async fn expose_deploy(
        &self,
        namespace: &str,
        name: &str,
        service_type: &str,
        port_name: &str,
        virtual_hosts: &[String],
    ) -> Result<ExposeOutcome, ClusterError>;

    async fn replica_set_list_by_label(
        &self,
        namespace: &str,
        label: &str,
        value: &str,
    ) -> Result<Vec<ReplicaSetListItem>, ClusterError>;

    async fn deploy_rollback_to_revision(
        &self,
        namespace: &str,
        name: &str,
        revision: &str,
    ) -> Result<(), ClusterError>;

    /// Env vars of a container that carry a literal value
    async fn container_explicit_env_vars(
        &self,
        namespace: &str,
        deploy: &str,
        container: &str,
    ) -> Result<Vec<EnvVar>, ClusterError>;

    /// Upsert `set` and drop `unset` in the literal env of a deployment container
    async fn update_container_env(
        &self,
        namespace: &str,
        deploy: &str,
        container: &str,
        set: &[EnvVar],
        unset: &[String],
    ) -> Result<(), ClusterError>;

    async fn deploy_set_replicas(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError>;

    /// Horizontal pod autoscaler targeting the deployment `name`
    async fn create_or_update_autoscale(
        &self,
        namespace: &str,
        name: &str,
        auto_scale: &AutoScale,
    ) -> Result<(), ClusterError>;

    /// Block until the rolling update of `name` finishes or stalls
    async fn watch_deploy(&self, namespace: &str, name: &str)
        -> Result<RolloutOutcome, ClusterError>;
}

/// Standalone services, used by throwaway build runs
#[async_trait]
pub trait ServiceCluster: Send + Sync {
    async fn create_service(&self, spec: &ServiceSpec) -> Result<(), ClusterError>;

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    /// Reachable addresses of a service, waiting for a load balancer if it has one
    async fn service_address(&self, namespace: &str, name: &str)
        -> Result<Vec<String>, ClusterError>;
}

/// Read-only app views
#[async_trait]
pub trait AppCluster: Send + Sync {
    async fn address_list(&self, namespace: &str) -> Result<Vec<Address>, ClusterError>;

    async fn deploy_replicas(&self, namespace: &str, name: &str) -> Result<i32, ClusterError>;

    /// Live autoscaler bounds; `NotFound` when the app has none
    async fn autoscale(&self, namespace: &str, name: &str) -> Result<AutoScale, ClusterError>;

    /// Pods labelled `run={app}`
    async fn pod_list(&self, namespace: &str, app: &str) -> Result<Vec<PodListItem>, ClusterError>;

    /// Log lines of one pod; the stream ends at EOF or when the receiver is dropped
    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        opts: LogOptions,
    ) -> Result<mpsc::Receiver<String>, ClusterError>;
}

/// Provider specific knobs, set through service and ingress annotations
#[async_trait]
pub trait CloudCluster: Send + Sync {
    /// Provider prefix of the nodes' provider id (`aws`, `gce`, ...)
    async fn cloud_provider_name(&self) -> Result<String, ClusterError>;

    async fn has_ingress(&self, namespace: &str, name: &str) -> Result<bool, ClusterError>;

    async fn service_annotations(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, ClusterError>;

    async fn set_service_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), ClusterError>;

    async fn ingress_annotations(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, ClusterError>;

    async fn set_ingress_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), ClusterError>;
}
