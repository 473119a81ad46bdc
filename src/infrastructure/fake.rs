//! In-memory cluster for service tests

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};

use super::cluster::{
    AppCluster, CloudCluster, DeployCluster, ExposeOutcome, LogOptions, PodCluster, PodExit,
    PodListItem, PodRun, ReplicaSetListItem, RolloutOutcome, ServiceCluster,
};
use super::registry::{RegistryDocument, Team, YamlRegistry};
use crate::domain::app::{Address, App, AutoScale, EnvVar, User};
use crate::domain::spec::{
    CronJobSpec, DeploySpec, PodSpec, ServiceSpec, CHANGE_CAUSE_ANNOTATION, SLUG_ANNOTATION,
};
use crate::error::ClusterError;

/// What the next started pod prints and how it ends; `exit: None` never ends
#[derive(Debug, Clone)]
pub struct PodScript {
    pub lines: Vec<String>,
    pub exit: Option<PodExit>,
}

#[derive(Debug, Clone)]
pub struct Revision {
    pub deploy: String,
    pub revision: String,
    pub spec: DeploySpec,
}

#[derive(Default)]
pub struct FakeState {
    pub deploys: BTreeMap<String, DeploySpec>,
    pub deploy_calls: usize,
    pub cron_jobs: BTreeMap<String, CronJobSpec>,
    pub config_maps: BTreeMap<String, BTreeMap<String, String>>,
    pub deleted_config_maps: Vec<String>,
    pub pods: Vec<PodSpec>,
    pub deleted_pods: Vec<String>,
    pub scripts: VecDeque<PodScript>,
    pub held_exits: Vec<oneshot::Sender<PodExit>>,
    /// Log sources of held pods, open until the pod is gone
    pub held_outputs: Vec<mpsc::Sender<String>>,
    pub fail_pod_delete: bool,
    pub revisions: Vec<Revision>,
    pub replicas: BTreeMap<String, i32>,
    pub services: BTreeMap<String, ServiceSpec>,
    pub deleted_services: Vec<String>,
    pub ingresses: BTreeSet<String>,
    pub fail_expose: bool,
    pub fail_deploy: bool,
    pub reject_pods: bool,
    pub env_updates: usize,
    pub autoscales: BTreeMap<String, AutoScale>,
    pub watch_calls: usize,
    pub stalled_rollout: bool,
    /// Rolling updates never settle
    pub hold_rollout: bool,
    /// Pods per `namespace/app`
    pub app_pods: BTreeMap<String, Vec<PodListItem>>,
    pub pod_logs: BTreeMap<String, Vec<String>>,
    pub broken_logs: BTreeSet<String>,
    pub service_annotations: BTreeMap<String, BTreeMap<String, String>>,
    pub ingress_annotations: BTreeMap<String, BTreeMap<String, String>>,
}

pub struct FakeCluster {
    state: Mutex<FakeState>,
    ingress: bool,
    addresses: Vec<String>,
    provider: String,
}

fn key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            ingress: false,
            addresses: vec!["myapp.example.com".to_string()],
            provider: String::new(),
        }
    }

    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = provider.to_string();
        self
    }

    pub fn with_ingress(mut self) -> Self {
        self.ingress = true;
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn script_pod(&self, lines: &[&str], exit: PodExit) {
        self.state().scripts.push_back(PodScript {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            exit: Some(exit),
        });
    }

    pub fn hold_next_pod(&self, lines: &[&str]) {
        self.state().scripts.push_back(PodScript {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            exit: None,
        });
    }

    pub fn deploy(&self, namespace: &str, name: &str) -> Option<DeploySpec> {
        self.state().deploys.get(&key(namespace, name)).cloned()
    }

    pub fn pod_names(&self) -> Vec<String> {
        self.state().pods.iter().map(|p| p.name.clone()).collect()
    }

    pub fn add_app_pod(&self, namespace: &str, app: &str, pod: &str, state: &str, lines: &[&str]) {
        let mut s = self.state();
        s.app_pods
            .entry(key(namespace, app))
            .or_default()
            .push(PodListItem {
                name: pod.to_string(),
                state: state.to_string(),
            });
        s.pod_logs
            .insert(pod.to_string(), lines.iter().map(|l| l.to_string()).collect());
    }

    pub fn add_service(&self, namespace: &str, name: &str) {
        self.state().services.insert(
            key(namespace, name),
            ServiceSpec::default_for(name, "LoadBalancer", "http"),
        );
    }

    pub fn add_ingress(&self, namespace: &str, name: &str) {
        self.state().ingresses.insert(key(namespace, name));
    }
}

#[async_trait]
impl PodCluster for FakeCluster {
    async fn pod_run(&self, pod: &PodSpec) -> Result<PodRun, ClusterError> {
        let mut state = self.state();
        if state.reject_pods {
            return Err(ClusterError::Invalid {
                message: format!("pod name {} is invalid", pod.name),
            });
        }
        state.pods.push(pod.clone());
        let script = state.scripts.pop_front().unwrap_or(PodScript {
            lines: Vec::new(),
            exit: Some(PodExit::Code(0)),
        });

        let (line_tx, line_rx) = mpsc::channel(script.lines.len().max(1));
        for line in script.lines {
            line_tx.try_send(line).unwrap();
        }
        let (exit_tx, exit_rx) = oneshot::channel();
        match script.exit {
            Some(exit) => exit_tx.send(exit).unwrap(),
            None => {
                state.held_exits.push(exit_tx);
                state.held_outputs.push(line_tx);
            }
        }
        Ok(PodRun {
            output: line_rx,
            exit: exit_rx,
        })
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state();
        if state.fail_pod_delete {
            return Err(ClusterError::Internal(anyhow::anyhow!("pod {} is stuck", name)));
        }
        state.deleted_pods.push(key(namespace, name));
        Ok(())
    }

    async fn deploy_annotation(
        &self,
        namespace: &str,
        deploy: &str,
        annotation: &str,
    ) -> Result<String, ClusterError> {
        let state = self.state();
        let spec = state
            .deploys
            .get(&key(namespace, deploy))
            .ok_or_else(|| ClusterError::not_found("deployment", deploy))?;
        Ok(match annotation {
            SLUG_ANNOTATION => spec.slug_url.clone(),
            CHANGE_CAUSE_ANNOTATION => spec.description.clone(),
            _ => String::new(),
        })
    }
}

#[async_trait]
impl DeployCluster for FakeCluster {
    async fn create_or_update_deploy(&self, spec: &DeploySpec) -> Result<(), ClusterError> {
        let mut state = self.state();
        if state.fail_deploy {
            return Err(ClusterError::Internal(anyhow::anyhow!("api server down")));
        }
        state.deploy_calls += 1;
        let k = key(spec.namespace(), spec.name());
        if state.deploys.get(&k) != Some(spec) {
            let revision = state
                .revisions
                .iter()
                .filter(|r| r.deploy == k)
                .count()
                + 1;
            state.revisions.push(Revision {
                deploy: k.clone(),
                revision: revision.to_string(),
                spec: spec.clone(),
            });
        }
        state.replicas.entry(k.clone()).or_insert(1);
        state.deploys.insert(k, spec.clone());
        Ok(())
    }

    async fn create_or_update_cron_job(&self, spec: &CronJobSpec) -> Result<(), ClusterError> {
        self.state()
            .cron_jobs
            .insert(key(spec.namespace(), spec.name()), spec.clone());
        Ok(())
    }

    async fn create_or_update_config_map(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        self.state().config_maps.insert(key(namespace, name), data);
        Ok(())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state();
        let k = key(namespace, name);
        state.deleted_config_maps.push(k.clone());
        state
            .config_maps
            .remove(&k)
            .map(|_| ())
            .ok_or_else(|| ClusterError::not_found("configmap", name))
    }

    async fn expose_deploy(
        &self,
        namespace: &str,
        name: &str,
        service_type: &str,
        port_name: &str,
        _virtual_hosts: &[String],
    ) -> Result<ExposeOutcome, ClusterError> {
        let mut state = self.state();
        if state.fail_expose {
            return Err(ClusterError::Internal(anyhow::anyhow!("quota exceeded")));
        }
        let k = key(namespace, name);
        let mut outcome = ExposeOutcome::default();
        if !state.services.contains_key(&k) {
            state
                .services
                .insert(k.clone(), ServiceSpec::default_for(name, service_type, port_name));
            outcome.service_created = true;
        }
        if self.ingress && state.ingresses.insert(k) {
            outcome.ingress_created = true;
        }
        Ok(outcome)
    }

    async fn replica_set_list_by_label(
        &self,
        namespace: &str,
        _label: &str,
        value: &str,
    ) -> Result<Vec<ReplicaSetListItem>, ClusterError> {
        let state = self.state();
        let k = key(namespace, value);
        let live = state.deploys.get(&k);
        Ok(state
            .revisions
            .iter()
            .filter(|r| r.deploy == k)
            .map(|r| ReplicaSetListItem {
                revision: r.revision.clone(),
                description: r.spec.description.clone(),
                created_at: None,
                current: live == Some(&r.spec),
            })
            .collect())
    }

    async fn deploy_rollback_to_revision(
        &self,
        namespace: &str,
        name: &str,
        revision: &str,
    ) -> Result<(), ClusterError> {
        let mut state = self.state();
        let k = key(namespace, name);
        let spec = state
            .revisions
            .iter()
            .find(|r| r.deploy == k && r.revision == revision)
            .map(|r| r.spec.clone())
            .ok_or_else(|| ClusterError::not_found("revision", revision))?;
        state.deploys.insert(k, spec);
        Ok(())
    }

    async fn container_explicit_env_vars(
        &self,
        namespace: &str,
        deploy: &str,
        container: &str,
    ) -> Result<Vec<EnvVar>, ClusterError> {
        let state = self.state();
        let spec = state
            .deploys
            .get(&key(namespace, deploy))
            .ok_or_else(|| ClusterError::not_found("deployment", deploy))?;
        let c = spec
            .pod
            .container(container)
            .ok_or_else(|| ClusterError::not_found("container", container))?;
        Ok(c.env.iter().map(|(k, v)| EnvVar::new(k, v)).collect())
    }

    async fn update_container_env(
        &self,
        namespace: &str,
        deploy: &str,
        container: &str,
        set: &[EnvVar],
        unset: &[String],
    ) -> Result<(), ClusterError> {
        let mut state = self.state();
        let k = key(namespace, deploy);
        let mut spec = state
            .deploys
            .get(&k)
            .cloned()
            .ok_or_else(|| ClusterError::not_found("deployment", deploy))?;
        let c = spec
            .pod
            .containers
            .iter_mut()
            .find(|c| c.name == container)
            .ok_or_else(|| ClusterError::not_found("container", container))?;
        c.env.retain(|name, _| !unset.contains(name));
        for ev in set {
            c.env.insert(ev.key.clone(), ev.value.clone());
        }
        let revision = state.revisions.iter().filter(|r| r.deploy == k).count() + 1;
        state.revisions.push(Revision {
            deploy: k.clone(),
            revision: revision.to_string(),
            spec: spec.clone(),
        });
        state.env_updates += 1;
        state.deploys.insert(k, spec);
        Ok(())
    }

    async fn deploy_set_replicas(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        let mut state = self.state();
        let k = key(namespace, name);
        if !state.deploys.contains_key(&k) {
            return Err(ClusterError::not_found("deployment", name));
        }
        state.replicas.insert(k, replicas);
        Ok(())
    }

    async fn create_or_update_autoscale(
        &self,
        namespace: &str,
        name: &str,
        auto_scale: &AutoScale,
    ) -> Result<(), ClusterError> {
        self.state()
            .autoscales
            .insert(key(namespace, name), auto_scale.clone());
        Ok(())
    }

    async fn watch_deploy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<RolloutOutcome, ClusterError> {
        let (hold, stalled) = {
            let mut state = self.state();
            state.watch_calls += 1;
            if !state.deploys.contains_key(&key(namespace, name)) {
                return Err(ClusterError::not_found("deployment", name));
            }
            (state.hold_rollout, state.stalled_rollout)
        };
        if hold {
            std::future::pending::<()>().await;
        }
        Ok(if stalled {
            RolloutOutcome::Stalled
        } else {
            RolloutOutcome::Finished
        })
    }
}

#[async_trait]
impl ServiceCluster for FakeCluster {
    async fn create_service(&self, spec: &ServiceSpec) -> Result<(), ClusterError> {
        let mut state = self.state();
        let k = key(&spec.namespace, &spec.name);
        if state.services.contains_key(&k) {
            return Err(ClusterError::already_exists("service", &spec.name));
        }
        state.services.insert(k, spec.clone());
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state();
        let k = key(namespace, name);
        state.services.remove(&k);
        state.deleted_services.push(k);
        Ok(())
    }

    async fn service_address(
        &self,
        _namespace: &str,
        _name: &str,
    ) -> Result<Vec<String>, ClusterError> {
        Ok(self.addresses.clone())
    }
}

#[async_trait]
impl AppCluster for FakeCluster {
    async fn address_list(&self, _namespace: &str) -> Result<Vec<Address>, ClusterError> {
        Ok(self
            .addresses
            .iter()
            .map(|hostname| Address {
                hostname: hostname.clone(),
            })
            .collect())
    }

    async fn deploy_replicas(&self, namespace: &str, name: &str) -> Result<i32, ClusterError> {
        self.state()
            .replicas
            .get(&key(namespace, name))
            .copied()
            .ok_or_else(|| ClusterError::not_found("deployment", name))
    }

    async fn autoscale(&self, namespace: &str, name: &str) -> Result<AutoScale, ClusterError> {
        self.state()
            .autoscales
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ClusterError::not_found("hpa", name))
    }

    async fn pod_list(&self, namespace: &str, app: &str) -> Result<Vec<PodListItem>, ClusterError> {
        Ok(self
            .state()
            .app_pods
            .get(&key(namespace, app))
            .cloned()
            .unwrap_or_default())
    }

    async fn pod_logs(
        &self,
        _namespace: &str,
        pod: &str,
        opts: LogOptions,
    ) -> Result<mpsc::Receiver<String>, ClusterError> {
        let state = self.state();
        if state.broken_logs.contains(pod) {
            return Err(ClusterError::Internal(anyhow::anyhow!("log stream of {} broke", pod)));
        }
        let lines = state
            .pod_logs
            .get(pod)
            .ok_or_else(|| ClusterError::not_found("pod", pod))?;
        let skip = lines.len().saturating_sub(opts.lines.max(0) as usize);
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in &lines[skip..] {
            tx.try_send(line.clone()).unwrap();
        }
        Ok(rx)
    }
}

#[async_trait]
impl CloudCluster for FakeCluster {
    async fn cloud_provider_name(&self) -> Result<String, ClusterError> {
        Ok(self.provider.clone())
    }

    async fn has_ingress(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        Ok(self.state().ingresses.contains(&key(namespace, name)))
    }

    async fn service_annotations(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, ClusterError> {
        let state = self.state();
        let k = key(namespace, name);
        if !state.services.contains_key(&k) {
            return Err(ClusterError::not_found("service", name));
        }
        Ok(state.service_annotations.get(&k).cloned().unwrap_or_default())
    }

    async fn set_service_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        let mut state = self.state();
        let k = key(namespace, name);
        if !state.services.contains_key(&k) {
            return Err(ClusterError::not_found("service", name));
        }
        state.service_annotations.entry(k).or_default().extend(annotations);
        Ok(())
    }

    async fn ingress_annotations(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, ClusterError> {
        let state = self.state();
        let k = key(namespace, name);
        if !state.ingresses.contains(&k) {
            return Err(ClusterError::not_found("ingress", name));
        }
        Ok(state.ingress_annotations.get(&k).cloned().unwrap_or_default())
    }

    async fn set_ingress_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        let mut state = self.state();
        let k = key(namespace, name);
        if !state.ingresses.contains(&k) {
            return Err(ClusterError::not_found("ingress", name));
        }
        state.ingress_annotations.entry(k).or_default().extend(annotations);
        Ok(())
    }
}

/// Registry with team `luizalabs` (member `gopher@luizalabs.com`) owning `apps`
pub fn registry(apps: Vec<App>) -> YamlRegistry {
    let mut doc = RegistryDocument::default();
    doc.teams.insert(
        "luizalabs".to_string(),
        Team {
            members: vec![member().email],
        },
    );
    for app in apps {
        doc.apps.insert(app.name.clone(), app);
    }
    YamlRegistry::new(doc)
}

pub fn member() -> User {
    User::new("gopher", "gopher@luizalabs.com")
}
