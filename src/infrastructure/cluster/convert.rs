//! Workload specs to Kubernetes objects, and back for the views we read

use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, DeploymentStrategy, ReplicaSet, RollingUpdateDeployment,
};
use k8s_openapi::api::autoscaling::v1::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec,
};
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec as K8sCronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container as K8sContainer, ContainerPort,
    EmptyDirVolumeSource, EnvVar as K8sEnvVar, EnvVarSource, ExecAction, HTTPGetAction, KeyToPath,
    Lifecycle as K8sLifecycle, LifecycleHandler, Pod, PodSpec as K8sPodSpec, PodTemplateSpec,
    Probe, ResourceRequirements, SecretKeySelector, SecretVolumeSource, Service,
    ServicePort as K8sServicePort, ServiceSpec as K8sServiceSpec, Volume as K8sVolume,
    VolumeMount as K8sVolumeMount,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::{PodListItem, ReplicaSetListItem, RolloutOutcome};
use crate::domain::app::{AutoScale, EnvVar, APP_SECRETS_NAME};
use crate::domain::spec::{
    Container, CronJobSpec, DeploySpec, HealthCheckProbe, Labels, PodSpec, ServiceSpec, Volume,
    VolumeSource, APP_TYPE_ANNOTATION, CHANGE_CAUSE_ANNOTATION, DEFAULT_EXTERNAL_PORT,
    REVISION_ANNOTATION, SLUG_ANNOTATION,
};
use crate::error::ClusterError;

const POD_TEMPLATE_HASH_LABEL: &str = "pod-template-hash";
const CRONJOB_APP_TYPE: &str = "cronjob";
const INGRESS_PATH: &str = "/";
const INGRESS_PATH_TYPE: &str = "Prefix";
const PROGRESS_DEADLINE_EXCEEDED: &str = "ProgressDeadlineExceeded";

fn quantity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[+-]?([0-9]+(\.[0-9]*)?|\.[0-9]+)([eE][+-]?[0-9]+|[numkMGTPE]|[KMGTPE]i)?$")
            .expect("quantity pattern")
    })
}

/// Reject malformed resource quantities before the API server does
pub fn quantity(value: &str) -> Result<Quantity, ClusterError> {
    if !quantity_regex().is_match(value) {
        return Err(ClusterError::Invalid {
            message: format!("invalid resource quantity {:?}", value),
        });
    }
    Ok(Quantity(value.to_string()))
}

/// Integers stay integers; `25%` style values stay strings
pub fn int_or_string(value: &str) -> IntOrString {
    match value.parse::<i32>() {
        Ok(n) => IntOrString::Int(n),
        Err(_) => IntOrString::String(value.to_string()),
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

fn non_zero(n: i32) -> Option<i32> {
    (n != 0).then_some(n)
}

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

fn env_vars(c: &Container) -> Vec<K8sEnvVar> {
    let plain = c.env.iter().map(|(k, v)| K8sEnvVar {
        name: k.clone(),
        value: Some(v.clone()),
        ..Default::default()
    });
    let secrets = c.secrets.iter().map(|s| K8sEnvVar {
        name: s.clone(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: APP_SECRETS_NAME.to_string(),
                key: s.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    });
    plain.chain(secrets).collect()
}

pub fn container(c: &Container) -> Result<K8sContainer, ClusterError> {
    let resources = match &c.limits {
        Some(limits) => {
            let mut map = BTreeMap::new();
            map.insert("cpu".to_string(), quantity(&limits.cpu)?);
            map.insert("memory".to_string(), quantity(&limits.memory)?);
            Some(ResourceRequirements {
                limits: Some(map),
                ..Default::default()
            })
        }
        None => None,
    };

    Ok(K8sContainer {
        name: c.name.clone(),
        image: Some(c.image.clone()),
        image_pull_policy: Some("Always".to_string()),
        command: non_empty(c.command.clone()),
        args: non_empty(c.args.clone()),
        env: non_empty(env_vars(c)),
        ports: non_empty(
            c.ports
                .iter()
                .map(|p| ContainerPort {
                    name: Some(p.name.clone()),
                    container_port: p.container_port,
                    ..Default::default()
                })
                .collect(),
        ),
        volume_mounts: non_empty(
            c.volume_mounts
                .iter()
                .map(|vm| K8sVolumeMount {
                    name: vm.name.clone(),
                    mount_path: vm.mount_path.clone(),
                    read_only: Some(vm.read_only),
                    sub_path: vm.sub_path.clone(),
                    ..Default::default()
                })
                .collect(),
        ),
        resources,
        ..Default::default()
    })
}

fn volume(v: &Volume) -> K8sVolume {
    let mut out = K8sVolume {
        name: v.name.clone(),
        ..Default::default()
    };
    match &v.source {
        VolumeSource::EmptyDir => out.empty_dir = Some(EmptyDirVolumeSource::default()),
        VolumeSource::Secret { secret_name, items } => {
            out.secret = Some(SecretVolumeSource {
                secret_name: Some(secret_name.clone()),
                items: non_empty(
                    items
                        .iter()
                        .map(|i| KeyToPath {
                            key: i.clone(),
                            path: i.clone(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            })
        }
        VolumeSource::ConfigMap { name } => {
            out.config_map = Some(ConfigMapVolumeSource {
                name: name.clone(),
                ..Default::default()
            })
        }
    }
    out
}

fn pod_spec(spec: &PodSpec, restart_policy: &str) -> Result<K8sPodSpec, ClusterError> {
    Ok(K8sPodSpec {
        containers: spec.containers.iter().map(container).collect::<Result<_, _>>()?,
        init_containers: non_empty(
            spec.init_containers
                .iter()
                .map(container)
                .collect::<Result<_, _>>()?,
        ),
        volumes: non_empty(spec.volumes.iter().map(volume).collect()),
        restart_policy: Some(restart_policy.to_string()),
        automount_service_account_token: Some(false),
        ..Default::default()
    })
}

fn labels(labels: &Labels) -> Option<BTreeMap<String, String>> {
    if labels.is_empty() {
        None
    } else {
        Some(labels.clone())
    }
}

fn pod_template(spec: &PodSpec, restart_policy: &str) -> Result<PodTemplateSpec, ClusterError> {
    Ok(PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: labels(&spec.labels),
            ..Default::default()
        }),
        spec: Some(pod_spec(spec, restart_policy)?),
    })
}

/// One-shot pod, never restarted
pub fn pod(spec: &PodSpec) -> Result<Pod, ClusterError> {
    Ok(Pod {
        metadata: ObjectMeta {
            labels: labels(&spec.labels),
            ..meta(&spec.namespace, &spec.name)
        },
        spec: Some(pod_spec(spec, "Never")?),
        ..Default::default()
    })
}

fn health_check(hc: &HealthCheckProbe, port: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(hc.path.clone()).filter(|p| !p.is_empty()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        failure_threshold: non_zero(hc.failure_threshold),
        initial_delay_seconds: non_zero(hc.initial_delay_seconds),
        period_seconds: non_zero(hc.period_seconds),
        success_threshold: non_zero(hc.success_threshold),
        timeout_seconds: non_zero(hc.timeout_seconds),
        ..Default::default()
    }
}

fn workload_annotations(description: &str, slug_url: &str) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    annotations.insert(CHANGE_CAUSE_ANNOTATION.to_string(), description.to_string());
    annotations.insert(SLUG_ANNOTATION.to_string(), slug_url.to_string());
    annotations
}

/// Deployment for `spec` running `replicas` pods
pub fn deployment(spec: &DeploySpec, replicas: i32) -> Result<Deployment, ClusterError> {
    let mut template = pod_template(&spec.pod, "Always")?;

    if let Some(app) = template
        .spec
        .as_mut()
        .and_then(|ps| ps.containers.first_mut())
    {
        let port = app
            .ports
            .as_ref()
            .and_then(|ports| ports.first())
            .map(|p| p.container_port);
        if let (Some(port), Some(hc)) = (port, spec.teresa_yaml.health_check.as_ref()) {
            app.liveness_probe = hc.liveness.as_ref().map(|p| health_check(p, port));
            app.readiness_probe = hc.readiness.as_ref().map(|p| health_check(p, port));
        }
        if let Some(drain) = spec.drain_timeout_seconds().filter(|d| *d > 0) {
            app.lifecycle = Some(K8sLifecycle {
                pre_stop: Some(LifecycleHandler {
                    exec: Some(ExecAction {
                        command: Some(vec!["/bin/sleep".to_string(), drain.to_string()]),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }
    }

    let strategy = spec.teresa_yaml.rolling_update.as_ref().map(|ru| DeploymentStrategy {
        type_: Some("RollingUpdate".to_string()),
        rolling_update: Some(RollingUpdateDeployment {
            max_surge: ru.max_surge.as_deref().map(int_or_string),
            max_unavailable: ru.max_unavailable.as_deref().map(int_or_string),
        }),
    });

    Ok(Deployment {
        metadata: ObjectMeta {
            annotations: Some(workload_annotations(&spec.description, &spec.slug_url)),
            labels: labels(&spec.pod.labels),
            ..meta(spec.namespace(), spec.name())
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            revision_history_limit: Some(spec.revision_history_limit),
            selector: LabelSelector {
                match_labels: labels(&spec.match_labels),
                ..Default::default()
            },
            strategy,
            template,
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn cron_job(spec: &CronJobSpec) -> Result<CronJob, ClusterError> {
    let mut annotations = workload_annotations(&spec.description, &spec.slug_url);
    annotations.insert(APP_TYPE_ANNOTATION.to_string(), CRONJOB_APP_TYPE.to_string());

    Ok(CronJob {
        metadata: ObjectMeta {
            annotations: Some(annotations),
            labels: labels(&spec.pod.labels),
            ..meta(spec.namespace(), spec.name())
        },
        spec: Some(K8sCronJobSpec {
            schedule: spec.schedule.clone(),
            successful_jobs_history_limit: Some(spec.successful_jobs_history_limit),
            failed_jobs_history_limit: Some(spec.failed_jobs_history_limit),
            job_template: JobTemplateSpec {
                metadata: None,
                spec: Some(JobSpec {
                    template: pod_template(&spec.pod, "Never")?,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn service(spec: &ServiceSpec) -> Service {
    Service {
        metadata: ObjectMeta {
            labels: labels(&spec.labels),
            ..meta(&spec.namespace, &spec.name)
        },
        spec: Some(K8sServiceSpec {
            type_: Some(spec.service_type.clone()),
            session_affinity: Some("None".to_string()),
            selector: labels(&spec.labels),
            ports: Some(
                spec.ports
                    .iter()
                    .map(|p| K8sServicePort {
                        name: Some(p.name.clone()),
                        port: p.port,
                        target_port: Some(IntOrString::Int(p.target_port)),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Ingress routing every virtual host to the app service.
///
/// Without virtual hosts a single host-less rule catches everything.
pub fn ingress(namespace: &str, name: &str, virtual_hosts: &[String]) -> Ingress {
    let http = HTTPIngressRuleValue {
        paths: vec![HTTPIngressPath {
            path: Some(INGRESS_PATH.to_string()),
            path_type: INGRESS_PATH_TYPE.to_string(),
            backend: IngressBackend {
                service: Some(IngressServiceBackend {
                    name: name.to_string(),
                    port: Some(ServiceBackendPort {
                        number: Some(DEFAULT_EXTERNAL_PORT),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            },
        }],
    };
    let rules = if virtual_hosts.is_empty() {
        vec![IngressRule {
            host: None,
            http: Some(http),
        }]
    } else {
        virtual_hosts
            .iter()
            .map(|host| IngressRule {
                host: Some(host.clone()),
                http: Some(http.clone()),
            })
            .collect()
    };

    Ingress {
        metadata: meta(namespace, name),
        spec: Some(IngressSpec {
            rules: Some(rules),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn config_map(namespace: &str, name: &str, data: BTreeMap<String, String>) -> ConfigMap {
    ConfigMap {
        metadata: meta(namespace, name),
        data: Some(data),
        ..Default::default()
    }
}

/// Env vars with a literal value; secret references are skipped
pub fn explicit_env_vars(container: &K8sContainer) -> Vec<EnvVar> {
    container
        .env
        .iter()
        .flatten()
        .filter(|ev| ev.value_from.is_none())
        .map(|ev| EnvVar::new(&ev.name, ev.value.clone().unwrap_or_default()))
        .collect()
}

/// Upsert `set` and drop `unset` among the literal env vars of `container`.
///
/// Secret references are left alone; new keys are appended in order.
pub fn merge_env(container: &mut K8sContainer, set: &[EnvVar], unset: &[String]) {
    let env = container.env.get_or_insert_with(Vec::new);
    env.retain(|ev| ev.value_from.is_some() || !unset.contains(&ev.name));
    for ev in set {
        match env
            .iter_mut()
            .find(|cur| cur.name == ev.key && cur.value_from.is_none())
        {
            Some(cur) => cur.value = Some(ev.value.clone()),
            None => env.push(K8sEnvVar {
                name: ev.key.clone(),
                value: Some(ev.value.clone()),
                ..Default::default()
            }),
        }
    }
}

fn annotation(meta: &ObjectMeta, key: &str) -> String {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .cloned()
        .unwrap_or_default()
}

pub fn replica_set_revision(rs: &ReplicaSet) -> String {
    annotation(&rs.metadata, REVISION_ANNOTATION)
}

pub fn replica_set_item(rs: &ReplicaSet) -> ReplicaSetListItem {
    ReplicaSetListItem {
        revision: replica_set_revision(rs),
        description: annotation(&rs.metadata, CHANGE_CAUSE_ANNOTATION),
        created_at: rs.metadata.creation_timestamp.as_ref().map(|t| t.0),
        current: rs
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0)
            > 0,
    }
}

/// Point `deploy` back at the pod template and annotations of `rs`
pub fn apply_rollback(deploy: &mut Deployment, rs: &ReplicaSet) -> Result<(), ClusterError> {
    let mut template = rs
        .spec
        .as_ref()
        .and_then(|s| s.template.clone())
        .ok_or_else(|| ClusterError::Invalid {
            message: "replica set has no pod template".to_string(),
        })?;
    if let Some(labels) = template.metadata.as_mut().and_then(|m| m.labels.as_mut()) {
        labels.remove(POD_TEMPLATE_HASH_LABEL);
    }

    let spec = deploy.spec.get_or_insert_with(DeploymentSpec::default);
    spec.template = template;

    let annotations = deploy.metadata.annotations.get_or_insert_with(BTreeMap::new);
    for key in [CHANGE_CAUSE_ANNOTATION, SLUG_ANNOTATION] {
        annotations.insert(key.to_string(), annotation(&rs.metadata, key));
    }
    Ok(())
}

/// autoscaling/v1 HPA scaling the deployment of the same name on CPU
pub fn horizontal_pod_autoscaler(
    namespace: &str,
    name: &str,
    auto_scale: &AutoScale,
) -> HorizontalPodAutoscaler {
    HorizontalPodAutoscaler {
        metadata: meta(namespace, name),
        spec: Some(HorizontalPodAutoscalerSpec {
            min_replicas: Some(auto_scale.min),
            max_replicas: auto_scale.max,
            target_cpu_utilization_percentage: Some(auto_scale.cpu_target_utilization),
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: name.to_string(),
            },
        }),
        ..Default::default()
    }
}

pub fn auto_scale_of(hpa: &HorizontalPodAutoscaler) -> Option<AutoScale> {
    let spec = hpa.spec.as_ref()?;
    Some(AutoScale::new(
        spec.min_replicas.unwrap_or(1),
        spec.max_replicas,
        spec.target_cpu_utilization_percentage.unwrap_or_default(),
    ))
}

/// Where a rolling update stands; `None` while it is still progressing.
///
/// Follows `kubectl rollout status`: the controller must have seen the
/// latest generation, and every desired replica must be updated and
/// available with no old ones left.
pub fn rollout_state(deploy: &Deployment) -> Option<RolloutOutcome> {
    let status = deploy.status.as_ref()?;
    if deploy.metadata.generation > status.observed_generation {
        return None;
    }

    let stalled = status.conditions.iter().flatten().any(|c| {
        c.type_ == "Progressing" && c.reason.as_deref() == Some(PROGRESS_DEADLINE_EXCEEDED)
    });
    if stalled {
        return Some(RolloutOutcome::Stalled);
    }

    let desired = deploy.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let updated = status.updated_replicas.unwrap_or(0);
    let total = status.replicas.unwrap_or(0);
    let available = status.available_replicas.unwrap_or(0);
    if updated < desired || total > updated || available < updated {
        return None;
    }
    Some(RolloutOutcome::Finished)
}

pub fn pod_item(pod: &Pod) -> PodListItem {
    PodListItem {
        name: pod.metadata.name.clone().unwrap_or_default(),
        state: pod
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
    }
}

/// `aws` from `aws:///us-east-1a/i-0abc`; `None` for ids with no scheme
pub fn cloud_provider_of(provider_id: &str) -> Option<&str> {
    match provider_id.find("://") {
        Some(0) | None => None,
        Some(idx) => Some(&provider_id[..idx]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::spec::{
        ContainerBuilder, CronJobBuilder, DeployBuilder, PodBuilder, TeresaYaml,
    };
    use k8s_openapi::api::apps::v1::{
        DeploymentCondition, DeploymentStatus, ReplicaSetSpec, ReplicaSetStatus,
    };
    use k8s_openapi::api::core::v1::PodStatus;

    fn app_container() -> Container {
        ContainerBuilder::new("myapp", "runner:v1")
            .with_env([("APP", "myapp")])
            .with_secrets(&["DB_PASSWORD".to_string()])
            .expose_port("http", 5000)
            .with_limits("200m", "512Mi")
            .build()
    }

    fn pod_spec_fixture() -> PodSpec {
        let mut labels = Labels::new();
        labels.insert("run".to_string(), "myapp".to_string());
        PodBuilder::new("myapp", "myapp")
            .with_app_container(app_container())
            .share_volume_with_init("slug", "/slug")
            .with_labels(&labels)
            .build()
    }

    #[test]
    fn test_quantity_validation() {
        for ok in ["200m", "1", "0.5", "512Mi", "1Gi", "1e3", "100k"] {
            assert!(quantity(ok).is_ok(), "{} should be valid", ok);
        }
        for bad in ["", "lots", "1 Gi", "12x"] {
            let err = quantity(bad).unwrap_err();
            assert!(matches!(err, ClusterError::Invalid { .. }), "{}", bad);
        }
    }

    #[test]
    fn test_int_or_string() {
        assert_eq!(int_or_string("3"), IntOrString::Int(3));
        assert_eq!(int_or_string("30%"), IntOrString::String("30%".to_string()));
    }

    #[test]
    fn test_container_conversion() {
        let c = container(&app_container()).unwrap();
        assert_eq!(c.image_pull_policy.as_deref(), Some("Always"));
        assert!(c.command.is_none());

        let env = c.env.unwrap();
        let plain = env.iter().find(|e| e.name == "APP").unwrap();
        assert_eq!(plain.value.as_deref(), Some("myapp"));
        let secret = env.iter().find(|e| e.name == "DB_PASSWORD").unwrap();
        let selector = secret
            .value_from
            .as_ref()
            .and_then(|v| v.secret_key_ref.as_ref())
            .unwrap();
        assert_eq!(selector.name, APP_SECRETS_NAME);
        assert_eq!(selector.key, "DB_PASSWORD");

        let limits = c.resources.unwrap().limits.unwrap();
        assert_eq!(limits["cpu"], Quantity("200m".to_string()));
        assert_eq!(limits["memory"], Quantity("512Mi".to_string()));
    }

    #[test]
    fn test_bad_limits_are_invalid() {
        let c = ContainerBuilder::new("x", "img")
            .with_limits("a lot", "512Mi")
            .build();
        assert!(matches!(container(&c), Err(ClusterError::Invalid { .. })));
    }

    #[test]
    fn test_pod_never_restarts() {
        let p = pod(&pod_spec_fixture()).unwrap();
        assert_eq!(p.metadata.namespace.as_deref(), Some("myapp"));
        let spec = p.spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(spec.automount_service_account_token, Some(false));
        assert!(spec.volumes.unwrap()[0].empty_dir.is_some());
    }

    #[test]
    fn test_deployment_conversion() {
        let ty: TeresaYaml = serde_yaml::from_str(
            "healthCheck:\n  liveness:\n    path: /health\n    periodSeconds: 5\nrollingUpdate:\n  maxSurge: 2\n  maxUnavailable: '10%'\n",
        )
        .unwrap();
        let pod = pod_spec_fixture();
        let spec = DeployBuilder::new("deploys/myapp/1/out/slug.tgz")
            .with_teresa_yaml(Some(&ty))
            .with_revision_history_limit(5)
            .with_description("first")
            .with_match_labels(&pod.labels)
            .build(pod);

        let d = deployment(&spec, 3).unwrap();
        let annotations = d.metadata.annotations.unwrap();
        assert_eq!(annotations[CHANGE_CAUSE_ANNOTATION], "first");
        assert_eq!(annotations[SLUG_ANNOTATION], "deploys/myapp/1/out/slug.tgz");

        let ds = d.spec.unwrap();
        assert_eq!(ds.replicas, Some(3));
        assert_eq!(ds.revision_history_limit, Some(5));
        assert_eq!(ds.selector.match_labels.unwrap()["run"], "myapp");
        let ru = ds.strategy.unwrap().rolling_update.unwrap();
        assert_eq!(ru.max_surge, Some(IntOrString::Int(2)));
        assert_eq!(ru.max_unavailable, Some(IntOrString::String("10%".to_string())));

        let ps = ds.template.spec.unwrap();
        assert_eq!(ps.restart_policy.as_deref(), Some("Always"));
        let app = &ps.containers[0];
        let liveness = app.liveness_probe.as_ref().unwrap();
        assert_eq!(liveness.period_seconds, Some(5));
        assert_eq!(liveness.failure_threshold, None);
        assert_eq!(
            liveness.http_get.as_ref().unwrap().port,
            IntOrString::Int(5000)
        );
        assert!(app.readiness_probe.is_none());
        let pre_stop = app.lifecycle.as_ref().unwrap().pre_stop.as_ref().unwrap();
        assert_eq!(
            pre_stop.exec.as_ref().unwrap().command,
            Some(vec!["/bin/sleep".to_string(), "10".to_string()])
        );
    }

    #[test]
    fn test_deployment_without_rolling_update_keeps_server_defaults() {
        let spec = DeployBuilder::new("s").build(pod_spec_fixture());
        let d = deployment(&spec, 1).unwrap();
        assert!(d.spec.unwrap().strategy.is_none());
    }

    #[test]
    fn test_cron_job_conversion() {
        let spec = CronJobBuilder::new("slug.tgz")
            .with_schedule("*/5 * * * *")
            .with_description("nightly")
            .build(pod_spec_fixture());
        let cj = cron_job(&spec).unwrap();
        assert_eq!(
            cj.metadata.annotations.unwrap()[APP_TYPE_ANNOTATION],
            CRONJOB_APP_TYPE
        );
        let s = cj.spec.unwrap();
        assert_eq!(s.schedule, "*/5 * * * *");
        assert_eq!(s.successful_jobs_history_limit, Some(3));
        let template = s.job_template.spec.unwrap().template;
        assert_eq!(
            template.spec.unwrap().restart_policy.as_deref(),
            Some("Never")
        );
    }

    #[test]
    fn test_service_and_ingress() {
        let svc = service(&ServiceSpec::default_for("myapp", "LoadBalancer", ""));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
        assert_eq!(spec.selector.unwrap()["run"], "myapp");
        let port: &K8sServicePort = &spec.ports.unwrap()[0];
        assert_eq!(port.name.as_deref(), Some("tcp"));
        assert_eq!(port.port, 80);
        assert_eq!(port.target_port, Some(IntOrString::Int(5000)));

        let ing = ingress("myapp", "myapp", &[]);
        let rules = ing.spec.unwrap().rules.unwrap();
        assert_eq!(rules.len(), 1);
        assert!(rules[0].host.is_none());

        let hosts = vec!["a.example.com".to_string(), "b.example.com".to_string()];
        let rules = ingress("myapp", "myapp", &hosts).spec.unwrap().rules.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].host.as_deref(), Some("b.example.com"));
    }

    #[test]
    fn test_explicit_env_vars_skip_secret_refs() {
        let c = container(&app_container()).unwrap();
        let evs = explicit_env_vars(&c);
        assert_eq!(evs, vec![EnvVar::new("APP", "myapp")]);
    }

    fn replica_set(revision: &str, ready: i32) -> ReplicaSet {
        let mut annotations = BTreeMap::new();
        annotations.insert(REVISION_ANNOTATION.to_string(), revision.to_string());
        annotations.insert(CHANGE_CAUSE_ANNOTATION.to_string(), format!("rev {}", revision));
        annotations.insert(SLUG_ANNOTATION.to_string(), format!("slug-{}", revision));
        let mut template_labels = BTreeMap::new();
        template_labels.insert("run".to_string(), "myapp".to_string());
        template_labels.insert(POD_TEMPLATE_HASH_LABEL.to_string(), "abc".to_string());
        ReplicaSet {
            metadata: ObjectMeta {
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(ReplicaSetSpec {
                template: Some(PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(template_labels),
                        ..Default::default()
                    }),
                    spec: None,
                }),
                ..Default::default()
            }),
            status: Some(ReplicaSetStatus {
                ready_replicas: Some(ready),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_replica_set_item() {
        let item = replica_set_item(&replica_set("2", 1));
        assert_eq!(item.revision, "2");
        assert_eq!(item.description, "rev 2");
        assert!(item.current);
        assert!(!replica_set_item(&replica_set("1", 0)).current);
    }

    #[test]
    fn test_apply_rollback() {
        let spec = DeployBuilder::new("slug-3")
            .with_description("rev 3")
            .build(pod_spec_fixture());
        let mut d = deployment(&spec, 1).unwrap();

        apply_rollback(&mut d, &replica_set("1", 0)).unwrap();

        let annotations = d.metadata.annotations.unwrap();
        assert_eq!(annotations[SLUG_ANNOTATION], "slug-1");
        assert_eq!(annotations[CHANGE_CAUSE_ANNOTATION], "rev 1");
        let labels = d.spec.unwrap().template.metadata.unwrap().labels.unwrap();
        assert!(!labels.contains_key(POD_TEMPLATE_HASH_LABEL));
        assert_eq!(labels["run"], "myapp");
    }

    #[test]
    fn test_merge_env_keeps_secrets_and_order() {
        let mut c = container(&app_container()).unwrap();
        merge_env(
            &mut c,
            &[EnvVar::new("APP", "renamed"), EnvVar::new("DEBUG", "1")],
            &["DB_PASSWORD".to_string()],
        );
        let names: Vec<_> = c.env.iter().flatten().map(|ev| ev.name.as_str()).collect();
        assert_eq!(names, vec!["APP", "DB_PASSWORD", "DEBUG"]);
        assert_eq!(
            explicit_env_vars(&c),
            vec![EnvVar::new("APP", "renamed"), EnvVar::new("DEBUG", "1")]
        );

        merge_env(&mut c, &[], &["DEBUG".to_string()]);
        assert_eq!(explicit_env_vars(&c), vec![EnvVar::new("APP", "renamed")]);
    }

    fn rolling(generation: i64, observed: i64, updated: i32, total: i32, available: i32) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                generation: Some(generation),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(2),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                observed_generation: Some(observed),
                updated_replicas: Some(updated),
                replicas: Some(total),
                available_replicas: Some(available),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_rollout_state() {
        assert_eq!(rollout_state(&rolling(2, 1, 2, 2, 2)), None);
        assert_eq!(rollout_state(&rolling(2, 2, 1, 3, 2)), None);
        assert_eq!(rollout_state(&rolling(2, 2, 2, 3, 2)), None);
        assert_eq!(rollout_state(&rolling(2, 2, 2, 2, 1)), None);
        assert_eq!(
            rollout_state(&rolling(2, 2, 2, 2, 2)),
            Some(RolloutOutcome::Finished)
        );

        let mut stalled = rolling(2, 2, 1, 3, 2);
        if let Some(status) = stalled.status.as_mut() {
            status.conditions = Some(vec![DeploymentCondition {
                type_: "Progressing".to_string(),
                status: "False".to_string(),
                reason: Some(PROGRESS_DEADLINE_EXCEEDED.to_string()),
                ..Default::default()
            }]);
        }
        assert_eq!(rollout_state(&stalled), Some(RolloutOutcome::Stalled));
        assert_eq!(rollout_state(&Deployment::default()), None);
    }

    #[test]
    fn test_horizontal_pod_autoscaler() {
        let scale = AutoScale::new(2, 5, 70);
        let hpa = horizontal_pod_autoscaler("myapp", "myapp", &scale);
        let spec = hpa.spec.as_ref().unwrap();
        assert_eq!(spec.scale_target_ref.kind, "Deployment");
        assert_eq!(spec.scale_target_ref.name, "myapp");
        assert_eq!(spec.scale_target_ref.api_version.as_deref(), Some("apps/v1"));
        assert_eq!(hpa.metadata.namespace.as_deref(), Some("myapp"));
        assert_eq!(auto_scale_of(&hpa), Some(scale));
        assert_eq!(auto_scale_of(&HorizontalPodAutoscaler::default()), None);
    }

    #[test]
    fn test_pod_item_and_provider() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("myapp-abc".to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(pod_item(&pod).is_running());
        assert_eq!(pod_item(&Pod::default()).state, "Unknown");

        assert_eq!(cloud_provider_of("aws:///us-east-1a/i-0abc"), Some("aws"));
        assert_eq!(cloud_provider_of("gce://project/zone/node"), Some("gce"));
        assert_eq!(cloud_provider_of("kind-node"), None);
        assert_eq!(cloud_provider_of("://x"), None);
    }
}
