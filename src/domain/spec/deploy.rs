//! Deploy spec and the `teresa.yaml` model

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use super::pod::PodSpec;
use super::Labels;

/// Drain applied before stop when `teresa.yaml` does not say otherwise
pub const DEFAULT_DRAIN_TIMEOUT_SECONDS: i32 = 10;

/// Upper bound accepted for `lifecycle.preStop.drainTimeoutSeconds`
pub const MAX_DRAIN_TIMEOUT_SECONDS: i32 = 30;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckProbe {
    #[serde(default)]
    pub failure_threshold: i32,
    #[serde(default)]
    pub initial_delay_seconds: i32,
    #[serde(default)]
    pub period_seconds: i32,
    #[serde(default)]
    pub success_threshold: i32,
    #[serde(default)]
    pub timeout_seconds: i32,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(default)]
    pub liveness: Option<HealthCheckProbe>,
    #[serde(default)]
    pub readiness: Option<HealthCheckProbe>,
}

/// Rolling update bounds; plain numbers become absolute counts, anything else is a percentage string
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdate {
    #[serde(default, deserialize_with = "scalar_as_string")]
    pub max_surge: Option<String>,
    #[serde(default, deserialize_with = "scalar_as_string")]
    pub max_unavailable: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreStop {
    #[serde(default)]
    pub drain_timeout_seconds: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lifecycle {
    #[serde(default)]
    pub pre_stop: Option<PreStop>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronArgs {
    #[serde(default)]
    pub schedule: String,
}

/// Per-app deploy tuning shipped inside the tarball
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeresaYaml {
    #[serde(default)]
    pub health_check: Option<HealthCheck>,
    #[serde(default)]
    pub rolling_update: Option<RollingUpdate>,
    #[serde(default)]
    pub lifecycle: Option<Lifecycle>,
    #[serde(default)]
    pub cron: Option<CronArgs>,
    /// Raw side-car sections, decoded by the side-car that owns the key
    #[serde(default, rename = "sidecars")]
    pub side_cars: BTreeMap<String, serde_yaml::Value>,
}

impl TeresaYaml {
    pub fn validate(&self) -> Result<(), String> {
        let drain = self
            .lifecycle
            .as_ref()
            .and_then(|lc| lc.pre_stop.as_ref())
            .map(|ps| ps.drain_timeout_seconds);
        if let Some(drain) = drain {
            if !(0..=MAX_DRAIN_TIMEOUT_SECONDS).contains(&drain) {
                return Err(format!(
                    "drainTimeoutSeconds must be between 0 and {}, got {}",
                    MAX_DRAIN_TIMEOUT_SECONDS, drain
                ));
            }
        }
        Ok(())
    }

    pub fn cron_schedule(&self) -> Option<&str> {
        self.cron
            .as_ref()
            .map(|c| c.schedule.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// `version: v2` documents keep one section per app
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TeresaYamlV2 {
    #[serde(default)]
    pub applications: BTreeMap<String, TeresaYaml>,
}

fn scalar_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a number or a string, got {:?}",
            other
        ))),
    }
}

/// Long-running workload built from a pod template
#[derive(Debug, Clone, PartialEq)]
pub struct DeploySpec {
    pub pod: PodSpec,
    pub teresa_yaml: TeresaYaml,
    pub revision_history_limit: i32,
    /// Change cause recorded on the deployment
    pub description: String,
    pub slug_url: String,
    pub match_labels: Labels,
}

impl DeploySpec {
    pub fn name(&self) -> &str {
        &self.pod.name
    }

    pub fn namespace(&self) -> &str {
        &self.pod.namespace
    }

    pub fn drain_timeout_seconds(&self) -> Option<i32> {
        self.teresa_yaml
            .lifecycle
            .as_ref()
            .and_then(|lc| lc.pre_stop.as_ref())
            .map(|ps| ps.drain_timeout_seconds)
    }
}

#[derive(Debug, Clone)]
pub struct DeployBuilder {
    slug_url: String,
    teresa_yaml: TeresaYaml,
    revision_history_limit: i32,
    description: String,
    match_labels: Labels,
}

impl DeployBuilder {
    pub fn new(slug_url: impl Into<String>) -> Self {
        Self {
            slug_url: slug_url.into(),
            teresa_yaml: TeresaYaml::default(),
            revision_history_limit: 0,
            description: String::new(),
            match_labels: Labels::new(),
        }
    }

    pub fn with_teresa_yaml(mut self, teresa_yaml: Option<&TeresaYaml>) -> Self {
        if let Some(ty) = teresa_yaml {
            self.teresa_yaml = ty.clone();
        }
        self
    }

    pub fn with_revision_history_limit(mut self, limit: i32) -> Self {
        self.revision_history_limit = limit;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_match_labels(mut self, labels: &Labels) -> Self {
        for (k, v) in labels {
            self.match_labels.insert(k.clone(), v.clone());
        }
        self
    }

    /// Wrap `pod` as the deploy template.
    ///
    /// Fills in the default pre-stop drain when no lifecycle was given.
    pub fn build(mut self, pod: PodSpec) -> DeploySpec {
        if self.teresa_yaml.lifecycle.is_none() {
            self.teresa_yaml.lifecycle = Some(Lifecycle {
                pre_stop: Some(PreStop {
                    drain_timeout_seconds: DEFAULT_DRAIN_TIMEOUT_SECONDS,
                }),
            });
        }
        DeploySpec {
            pod,
            teresa_yaml: self.teresa_yaml,
            revision_history_limit: self.revision_history_limit,
            description: self.description,
            slug_url: self.slug_url,
            match_labels: self.match_labels,
        }
    }
}
