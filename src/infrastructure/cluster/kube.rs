//! Kubernetes implementation of the cluster gateway

use anyhow::Context;
use async_trait::async_trait;
use futures::{AsyncBufRead, AsyncBufReadExt, TryStreamExt};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::autoscaling::v1::HorizontalPodAutoscaler;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, Config};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::convert;
use super::{
    AppCluster, CloudCluster, DeployCluster, ExposeOutcome, LogOptions, PodCluster, PodExit,
    PodListItem, PodRun, PodWaitOptions, ReplicaSetListItem, RolloutOutcome, ServiceCluster,
};
use crate::config::TeresaConfig;
use crate::domain::app::{Address, AutoScale, EnvVar};
use crate::domain::spec::{CronJobSpec, DeploySpec, PodSpec, ServiceSpec, RUN_LABEL};
use crate::error::ClusterError;

/// Lines kept from before the log follow starts
const LOG_TAIL_LINES: i64 = 10;

/// Log lines buffered between the pod and the reader
const LOG_BUFFER: usize = 256;

const LOAD_BALANCER_POLL: Duration = Duration::from_secs(2);

/// Gateway knobs that come from the server config
#[derive(Debug, Clone, Copy)]
pub struct GatewayOptions {
    pub pod_wait: PodWaitOptions,
    /// Create an ingress next to the service on expose
    pub ingress: bool,
    pub load_balancer_timeout: Duration,
}

impl From<&TeresaConfig> for GatewayOptions {
    fn from(config: &TeresaConfig) -> Self {
        Self {
            pod_wait: PodWaitOptions::from(config),
            ingress: config.ingress,
            load_balancer_timeout: config.load_balancer_timeout,
        }
    }
}

/// Map an API error to the gateway taxonomy
pub fn classify(err: kube::Error, kind: &str, name: &str) -> ClusterError {
    match &err {
        kube::Error::Api(ae) if ae.code == 404 => ClusterError::not_found(kind, name),
        kube::Error::Api(ae) if ae.reason == "AlreadyExists" || ae.code == 409 => {
            ClusterError::already_exists(kind, name)
        }
        kube::Error::Api(ae) if ae.code == 422 || ae.reason == "Invalid" => {
            ClusterError::Invalid {
                message: ae.message.clone(),
            }
        }
        _ => ClusterError::Internal(
            anyhow::Error::new(err).context(format!("{} {} request failed", kind, name)),
        ),
    }
}

#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    options: GatewayOptions,
}

impl KubeGateway {
    pub fn new(client: Client, options: GatewayOptions) -> Self {
        Self { client, options }
    }

    /// Connect using the in-cluster config or the local kubeconfig
    pub async fn connect(options: GatewayOptions) -> anyhow::Result<Self> {
        let config = Config::infer()
            .await
            .context("Failed to infer kubeconfig")?;
        let client = Client::try_from(config).context("Failed to create Kubernetes client")?;
        Ok(Self::new(client, options))
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_opt<K>(api: &Api<K>, kind: &str, name: &str) -> Result<Option<K>, ClusterError>
    where
        K: Clone + DeserializeOwned + Debug,
    {
        api.get_opt(name).await.map_err(|e| classify(e, kind, name))
    }

    /// Create `obj`, or replace it keeping the live resourceVersion
    async fn create_or_replace<K>(
        api: &Api<K>,
        kind: &str,
        name: &str,
        mut obj: K,
    ) -> Result<(), ClusterError>
    where
        K: kube::Resource + Clone + DeserializeOwned + serde::Serialize + Debug,
    {
        match Self::get_opt(api, kind, name).await? {
            Some(live) => {
                obj.meta_mut().resource_version = live.meta().resource_version.clone();
                api.replace(name, &PostParams::default(), &obj)
                    .await
                    .map_err(|e| classify(e, kind, name))?;
                debug!(kind, name, "replaced");
            }
            None => {
                api.create(&PostParams::default(), &obj)
                    .await
                    .map_err(|e| classify(e, kind, name))?;
                debug!(kind, name, "created");
            }
        }
        Ok(())
    }

    async fn get_deploy(&self, namespace: &str, name: &str) -> Result<Deployment, ClusterError> {
        self.api::<Deployment>(namespace)
            .get(name)
            .await
            .map_err(|e| classify(e, "deployment", name))
    }

    async fn pod_phase(pods: &Api<Pod>, name: &str) -> Result<String, ClusterError> {
        let pod = pods.get(name).await.map_err(|e| classify(e, "pod", name))?;
        Ok(pod.status.and_then(|s| s.phase).unwrap_or_default())
    }

    async fn exit_code(pods: &Api<Pod>, name: &str) -> Result<i32, ClusterError> {
        let pod = pods.get(name).await.map_err(|e| classify(e, "pod", name))?;
        pod.status
            .and_then(|s| s.container_statuses)
            .into_iter()
            .flatten()
            .find_map(|cs| cs.state.and_then(|st| st.terminated).map(|t| t.exit_code))
            .ok_or_else(|| ClusterError::Invalid {
                message: format!("pod {} has no terminated container", name),
            })
    }

    /// Copy log lines until EOF or until the reader goes away.
    ///
    /// A quiet pod never wakes the line read, so the closed reader is
    /// watched on its own; the log connection is dropped on return.
    async fn copy_lines<R>(
        reader: R,
        pod: &str,
        output: mpsc::Sender<String>,
    ) -> Result<(), ClusterError>
    where
        R: AsyncBufRead + Send,
    {
        let mut lines = Box::pin(reader.lines());
        loop {
            let next = tokio::select! {
                biased;
                _ = output.closed() => {
                    debug!(pod = %pod, "log reader gone, stop following");
                    return Ok(());
                }
                next = lines.try_next() => next.map_err(|e| {
                    ClusterError::Internal(anyhow::Error::new(e).context("read pod logs"))
                })?,
            };
            let Some(line) = next else {
                return Ok(());
            };
            if output.send(line).await.is_err() {
                debug!(pod = %pod, "log reader gone, stop following");
                return Ok(());
            }
        }
    }

    async fn follow_logs(
        pods: &Api<Pod>,
        name: &str,
        output: mpsc::Sender<String>,
    ) -> Result<(), ClusterError> {
        if output.is_closed() {
            return Ok(());
        }
        let params = LogParams {
            follow: true,
            tail_lines: Some(LOG_TAIL_LINES),
            ..Default::default()
        };
        let reader = pods
            .log_stream(name, &params)
            .await
            .map_err(|e| classify(e, "pod", name))?;
        Self::copy_lines(reader, name, output).await
    }

    async fn get_annotations<K>(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, ClusterError>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let obj = self
            .api::<K>(namespace)
            .get(name)
            .await
            .map_err(|e| classify(e, kind, name))?;
        Ok(obj.meta().annotations.clone().unwrap_or_default())
    }

    /// Merge `annotations` into the live object
    async fn patch_annotations<K>(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), ClusterError>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let keys = annotations.len();
        let patch = serde_json::json!({ "metadata": { "annotations": annotations } });
        self.api::<K>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify(e, kind, name))?;
        info!(kind, name, keys, "annotations set");
        Ok(())
    }

    /// Drive a created pod to completion
    async fn supervise(
        pods: Api<Pod>,
        name: String,
        wait: PodWaitOptions,
        output: mpsc::Sender<String>,
    ) -> PodExit {
        let api = &pods;
        let pod = name.as_str();
        let started = poll_until(wait.start_poll, wait.start_timeout, move || async move {
            match Self::pod_phase(api, pod).await?.as_str() {
                "Failed" => Err(ClusterError::Invalid {
                    message: format!("pod {} failed to start", pod),
                }),
                "Running" | "Succeeded" => Ok(true),
                _ => Ok(false),
            }
        })
        .await;
        match started {
            Ok(true) => {}
            Ok(false) => return PodExit::Timeout,
            Err(e) => return PodExit::Failed(e.to_string()),
        }

        if let Err(e) = Self::follow_logs(&pods, &name, output).await {
            return PodExit::Failed(e.to_string());
        }

        let ended = poll_until(wait.end_poll, wait.run_timeout, move || async move {
            let phase = Self::pod_phase(api, pod).await?;
            Ok(phase == "Succeeded" || phase == "Failed")
        })
        .await;
        match ended {
            Ok(true) => {}
            Ok(false) => return PodExit::Timeout,
            Err(e) => return PodExit::Failed(e.to_string()),
        }

        match Self::exit_code(&pods, &name).await {
            Ok(code) => PodExit::Code(code),
            Err(e) => PodExit::Failed(e.to_string()),
        }
    }
}

/// Poll `check` every `interval` until it says done or `timeout` passes.
///
/// `Ok(false)` means the timeout hit.
async fn poll_until<F, Fut>(
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> Result<bool, ClusterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, ClusterError>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await? {
            return Ok(true);
        }
        if tokio::time::Instant::now() + interval > deadline {
            return Ok(false);
        }
        tokio::time::sleep(interval).await;
    }
}

#[async_trait]
impl PodCluster for KubeGateway {
    async fn pod_run(&self, spec: &PodSpec) -> Result<PodRun, ClusterError> {
        let pod = convert::pod(spec)?;
        let pods: Api<Pod> = self.api(&spec.namespace);
        pods.create(&PostParams::default(), &pod)
            .await
            .map_err(|e| classify(e, "pod", &spec.name))?;
        info!(pod = %spec.name, namespace = %spec.namespace, "pod created");

        let (line_tx, line_rx) = mpsc::channel(LOG_BUFFER);
        let (exit_tx, exit_rx) = oneshot::channel();
        let name = spec.name.clone();
        let namespace = spec.namespace.clone();
        let wait = self.options.pod_wait;
        let gateway = self.clone();

        tokio::spawn(async move {
            let exit = Self::supervise(pods, name.clone(), wait, line_tx).await;
            debug!(pod = %name, exit = ?exit, "pod run finished");
            if exit_tx.send(exit).is_err() {
                debug!(pod = %name, "nobody waiting for the exit code");
            }
            if let Err(e) = gateway.delete_pod(&namespace, &name).await {
                warn!(pod = %name, error = %e, "failed to delete pod");
            }
        });

        Ok(PodRun {
            output: line_rx,
            exit: exit_rx,
        })
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.api::<Pod>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| classify(e, "pod", name))?;
        debug!(pod = %name, namespace, "pod deleted");
        Ok(())
    }

    async fn deploy_annotation(
        &self,
        namespace: &str,
        deploy: &str,
        annotation: &str,
    ) -> Result<String, ClusterError> {
        let d = self.get_deploy(namespace, deploy).await?;
        Ok(d.metadata
            .annotations
            .and_then(|a| a.get(annotation).cloned())
            .unwrap_or_default())
    }
}

#[async_trait]
impl DeployCluster for KubeGateway {
    async fn create_or_update_deploy(&self, spec: &DeploySpec) -> Result<(), ClusterError> {
        let api: Api<Deployment> = self.api(spec.namespace());
        let live = Self::get_opt(&api, "deployment", spec.name()).await?;
        let replicas = live
            .as_ref()
            .and_then(|d| d.spec.as_ref())
            .and_then(|s| s.replicas)
            .unwrap_or(1);
        let obj = convert::deployment(spec, replicas)?;

        match live {
            Some(live) => {
                let mut obj = obj;
                obj.metadata.resource_version = live.metadata.resource_version;
                api.replace(spec.name(), &PostParams::default(), &obj)
                    .await
                    .map_err(|e| classify(e, "deployment", spec.name()))?;
            }
            None => {
                api.create(&PostParams::default(), &obj)
                    .await
                    .map_err(|e| classify(e, "deployment", spec.name()))?;
            }
        }
        info!(deploy = %spec.name(), replicas, "deployment applied");
        Ok(())
    }

    async fn create_or_update_cron_job(&self, spec: &CronJobSpec) -> Result<(), ClusterError> {
        let api: Api<CronJob> = self.api(spec.namespace());
        let obj = convert::cron_job(spec)?;
        Self::create_or_replace(&api, "cronjob", spec.name(), obj).await?;
        info!(cron_job = %spec.name(), schedule = %spec.schedule, "cron job applied");
        Ok(())
    }

    async fn create_or_update_config_map(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        let api: Api<ConfigMap> = self.api(namespace);
        Self::create_or_replace(&api, "configmap", name, convert::config_map(namespace, name, data))
            .await
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.api::<ConfigMap>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| classify(e, "configmap", name))?;
        Ok(())
    }

    async fn expose_deploy(
        &self,
        namespace: &str,
        name: &str,
        service_type: &str,
        port_name: &str,
        virtual_hosts: &[String],
    ) -> Result<ExposeOutcome, ClusterError> {
        let mut outcome = ExposeOutcome::default();

        let services: Api<Service> = self.api(namespace);
        if Self::get_opt(&services, "service", name).await?.is_none() {
            let spec = ServiceSpec::default_for(name, service_type, port_name);
            match self.create_service(&spec).await {
                Ok(()) => outcome.service_created = true,
                Err(e) if e.is_already_exists() => {}
                Err(e) => return Err(e),
            }
        }

        if !self.options.ingress {
            return Ok(outcome);
        }

        let ingresses: Api<Ingress> = self.api(namespace);
        if Self::get_opt(&ingresses, "ingress", name).await?.is_none() {
            let obj = convert::ingress(namespace, name, virtual_hosts);
            match ingresses.create(&PostParams::default(), &obj).await {
                Ok(_) => outcome.ingress_created = true,
                Err(e) => {
                    let e = classify(e, "ingress", name);
                    if !e.is_already_exists() {
                        return Err(e);
                    }
                }
            }
        }
        Ok(outcome)
    }

    async fn replica_set_list_by_label(
        &self,
        namespace: &str,
        label: &str,
        value: &str,
    ) -> Result<Vec<ReplicaSetListItem>, ClusterError> {
        let params = ListParams::default().labels(&format!("{}={}", label, value));
        let list = self
            .api::<ReplicaSet>(namespace)
            .list(&params)
            .await
            .map_err(|e| classify(e, "replicaset", value))?;
        Ok(list.items.iter().map(convert::replica_set_item).collect())
    }

    async fn deploy_rollback_to_revision(
        &self,
        namespace: &str,
        name: &str,
        revision: &str,
    ) -> Result<(), ClusterError> {
        let params = ListParams::default().labels(&format!("{}={}", RUN_LABEL, name));
        let list = self
            .api::<ReplicaSet>(namespace)
            .list(&params)
            .await
            .map_err(|e| classify(e, "replicaset", name))?;
        let rs = list
            .items
            .iter()
            .find(|rs| convert::replica_set_revision(rs) == revision)
            .ok_or_else(|| ClusterError::not_found("revision", revision))?;

        let mut deploy = self.get_deploy(namespace, name).await?;
        convert::apply_rollback(&mut deploy, rs)?;
        self.api::<Deployment>(namespace)
            .replace(name, &PostParams::default(), &deploy)
            .await
            .map_err(|e| classify(e, "deployment", name))?;
        info!(deploy = %name, revision, "rolled back");
        Ok(())
    }

    async fn container_explicit_env_vars(
        &self,
        namespace: &str,
        deploy: &str,
        container: &str,
    ) -> Result<Vec<EnvVar>, ClusterError> {
        let d = self.get_deploy(namespace, deploy).await?;
        let containers = d
            .spec
            .and_then(|s| s.template.spec)
            .map(|ps| ps.containers)
            .unwrap_or_default();
        containers
            .iter()
            .find(|c| c.name == container)
            .map(convert::explicit_env_vars)
            .ok_or_else(|| ClusterError::not_found("container", container))
    }

    async fn update_container_env(
        &self,
        namespace: &str,
        deploy: &str,
        container: &str,
        set: &[EnvVar],
        unset: &[String],
    ) -> Result<(), ClusterError> {
        let mut d = self.get_deploy(namespace, deploy).await?;
        let target = d
            .spec
            .as_mut()
            .and_then(|s| s.template.spec.as_mut())
            .and_then(|ps| ps.containers.iter_mut().find(|c| c.name == container))
            .ok_or_else(|| ClusterError::not_found("container", container))?;
        convert::merge_env(target, set, unset);
        self.api::<Deployment>(namespace)
            .replace(deploy, &PostParams::default(), &d)
            .await
            .map_err(|e| classify(e, "deployment", deploy))?;
        info!(deploy = %deploy, set = set.len(), unset = unset.len(), "container env updated");
        Ok(())
    }

    async fn deploy_set_replicas(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        self.api::<Deployment>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify(e, "deployment", name))?;
        info!(deploy = %name, replicas, "replicas set");
        Ok(())
    }

    async fn create_or_update_autoscale(
        &self,
        namespace: &str,
        name: &str,
        auto_scale: &AutoScale,
    ) -> Result<(), ClusterError> {
        let api: Api<HorizontalPodAutoscaler> = self.api(namespace);
        let obj = convert::horizontal_pod_autoscaler(namespace, name, auto_scale);
        Self::create_or_replace(&api, "hpa", name, obj).await?;
        info!(
            deploy = %name,
            min = auto_scale.min,
            max = auto_scale.max,
            cpu = auto_scale.cpu_target_utilization,
            "autoscale applied"
        );
        Ok(())
    }

    async fn watch_deploy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<RolloutOutcome, ClusterError> {
        let api: Api<Deployment> = self.api(namespace);
        let config = watcher::Config::default().fields(&format!("metadata.name={}", name));
        let mut deploys = Box::pin(watcher(api, config).applied_objects());
        while let Some(deploy) = deploys.try_next().await.map_err(|e| {
            ClusterError::Internal(anyhow::Error::new(e).context(format!("watch deployment {}", name)))
        })? {
            if let Some(outcome) = convert::rollout_state(&deploy) {
                debug!(deploy = %name, outcome = ?outcome, "rollout settled");
                return Ok(outcome);
            }
        }
        Err(ClusterError::Internal(anyhow::anyhow!(
            "watch of deployment {} ended early",
            name
        )))
    }
}

#[async_trait]
impl ServiceCluster for KubeGateway {
    async fn create_service(&self, spec: &ServiceSpec) -> Result<(), ClusterError> {
        self.api::<Service>(&spec.namespace)
            .create(&PostParams::default(), &convert::service(spec))
            .await
            .map_err(|e| classify(e, "service", &spec.name))?;
        info!(service = %spec.name, service_type = %spec.service_type, "service created");
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.api::<Service>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| classify(e, "service", name))?;
        Ok(())
    }

    async fn service_address(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Vec<String>, ClusterError> {
        let api: Api<Service> = self.api(namespace);
        let deadline = tokio::time::Instant::now() + self.options.load_balancer_timeout;
        loop {
            let svc = api.get(name).await.map_err(|e| classify(e, "service", name))?;
            let spec = svc.spec.clone().unwrap_or_default();
            if spec.type_.as_deref() != Some("LoadBalancer") {
                return Ok(spec.cluster_ip.into_iter().collect());
            }
            let addresses = load_balancer_addresses(&svc.status);
            if !addresses.is_empty() {
                return Ok(addresses);
            }
            if tokio::time::Instant::now() + LOAD_BALANCER_POLL > deadline {
                warn!(service = %name, "load balancer address not ready in time");
                return Ok(addresses);
            }
            tokio::time::sleep(LOAD_BALANCER_POLL).await;
        }
    }
}

fn load_balancer_addresses(
    status: &Option<k8s_openapi::api::core::v1::ServiceStatus>,
) -> Vec<String> {
    status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|i| i.hostname.clone().or_else(|| i.ip.clone()))
        .collect()
}

#[async_trait]
impl AppCluster for KubeGateway {
    async fn address_list(&self, namespace: &str) -> Result<Vec<Address>, ClusterError> {
        let list = self
            .api::<Service>(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| classify(e, "service", namespace))?;
        Ok(list
            .items
            .iter()
            .flat_map(|svc| load_balancer_addresses(&svc.status))
            .map(|hostname| Address { hostname })
            .collect())
    }

    async fn deploy_replicas(&self, namespace: &str, name: &str) -> Result<i32, ClusterError> {
        let d = self.get_deploy(namespace, name).await?;
        Ok(d.spec.and_then(|s| s.replicas).unwrap_or(1))
    }

    async fn autoscale(&self, namespace: &str, name: &str) -> Result<AutoScale, ClusterError> {
        let hpa = self
            .api::<HorizontalPodAutoscaler>(namespace)
            .get(name)
            .await
            .map_err(|e| classify(e, "hpa", name))?;
        convert::auto_scale_of(&hpa).ok_or_else(|| ClusterError::Invalid {
            message: format!("autoscaler {} has no spec", name),
        })
    }

    async fn pod_list(&self, namespace: &str, app: &str) -> Result<Vec<PodListItem>, ClusterError> {
        let params = ListParams::default().labels(&format!("{}={}", RUN_LABEL, app));
        let list = self
            .api::<Pod>(namespace)
            .list(&params)
            .await
            .map_err(|e| classify(e, "pod", app))?;
        Ok(list.items.iter().map(convert::pod_item).collect())
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        opts: LogOptions,
    ) -> Result<mpsc::Receiver<String>, ClusterError> {
        let params = LogParams {
            follow: opts.follow,
            tail_lines: Some(opts.lines),
            ..Default::default()
        };
        let reader = self
            .api::<Pod>(namespace)
            .log_stream(pod, &params)
            .await
            .map_err(|e| classify(e, "pod", pod))?;

        let (tx, rx) = mpsc::channel(LOG_BUFFER);
        let name = pod.to_string();
        tokio::spawn(async move {
            if let Err(e) = Self::copy_lines(reader, &name, tx).await {
                warn!(pod = %name, error = %e, "pod log stream broke");
            }
        });
        Ok(rx)
    }
}

#[async_trait]
impl CloudCluster for KubeGateway {
    async fn cloud_provider_name(&self) -> Result<String, ClusterError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default().limit(1))
            .await
            .map_err(|e| classify(e, "node", "list"))?;
        let provider_id = list
            .items
            .first()
            .and_then(|n| n.spec.as_ref())
            .and_then(|s| s.provider_id.clone())
            .unwrap_or_default();
        Ok(convert::cloud_provider_of(&provider_id)
            .unwrap_or_default()
            .to_string())
    }

    async fn has_ingress(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let api: Api<Ingress> = self.api(namespace);
        Ok(Self::get_opt(&api, "ingress", name).await?.is_some())
    }

    async fn service_annotations(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, ClusterError> {
        self.get_annotations::<Service>(namespace, "service", name).await
    }

    async fn set_service_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        self.patch_annotations::<Service>(namespace, "service", name, annotations)
            .await
    }

    async fn ingress_annotations(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, ClusterError> {
        self.get_annotations::<Ingress>(namespace, "ingress", name).await
    }

    async fn set_ingress_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        self.patch_annotations::<Ingress>(namespace, "ingress", name, annotations)
            .await
    }
}
