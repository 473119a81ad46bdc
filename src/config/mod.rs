//! # Server Configuration
//!
//! One YAML document (`teresa.conf.yaml` by default) holding everything the
//! deploy core needs besides the cluster credentials: platform images,
//! resource limits for throwaway pods, timeouts and local storage paths.
//! Every field has a default, so an empty file is a valid config.
//!
//! ## Example
//!
//! ```yaml
//! images:
//!   slugBuilder: luizalabs/slugbuilder:v3.4.0
//!   nginx: nginx:1.25
//! buildLimits:
//!   cpu: "1"
//!   memory: 2Gi
//! podRunTimeout: 45m
//! ingress: true
//! ```

mod duration;
mod images;

pub use images::{ImagesConfig, LimitsConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeresaConfig {
    #[serde(default)]
    pub images: ImagesConfig,

    /// Limits of builder pods
    #[serde(default = "images::default_build_limits")]
    pub build_limits: LimitsConfig,

    /// Limits of release and exec pods
    #[serde(default = "images::default_exec_limits")]
    pub exec_limits: LimitsConfig,

    /// Old ReplicaSets kept per deployment, i.e. how far back rollback reaches
    #[serde(default = "default_revision_history_limit")]
    pub revision_history_limit: i32,

    /// Interval of the keep-alive marker on long operation streams
    #[serde(default = "default_keep_alive_interval", with = "duration")]
    pub keep_alive_interval: Duration,

    #[serde(default = "default_pod_start_timeout", with = "duration")]
    pub pod_start_timeout: Duration,

    #[serde(default = "default_pod_start_poll_interval", with = "duration")]
    pub pod_start_poll_interval: Duration,

    /// Upper bound for a one-shot pod to finish once started
    #[serde(default = "default_pod_run_timeout", with = "duration")]
    pub pod_run_timeout: Duration,

    #[serde(default = "default_pod_end_poll_interval", with = "duration")]
    pub pod_end_poll_interval: Duration,

    /// How long to wait for a load balancer address before giving up
    #[serde(default = "default_load_balancer_timeout", with = "duration")]
    pub load_balancer_timeout: Duration,

    /// Wait for the rolling update to settle at the end of a deploy
    #[serde(default = "default_monitor_rollout")]
    pub monitor_rollout: bool,

    #[serde(default = "default_rollout_timeout", with = "duration")]
    pub rollout_timeout: Duration,

    /// Service type created when an app is first exposed
    #[serde(default = "default_service_type")]
    pub default_service_type: String,

    /// Create an ingress next to the service of web apps
    #[serde(default)]
    pub ingress: bool,

    /// Root of the file-backed object storage
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Apps, teams and members
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,
}

fn default_revision_history_limit() -> i32 {
    5
}

fn default_keep_alive_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_pod_start_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_pod_start_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_pod_run_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_pod_end_poll_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_load_balancer_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_monitor_rollout() -> bool {
    true
}

fn default_rollout_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_service_type() -> String {
    "LoadBalancer".to_string()
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("/var/lib/teresa/storage")
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("/var/lib/teresa/registry.yaml")
}

impl Default for TeresaConfig {
    fn default() -> Self {
        Self {
            images: ImagesConfig::default(),
            build_limits: images::default_build_limits(),
            exec_limits: images::default_exec_limits(),
            revision_history_limit: default_revision_history_limit(),
            keep_alive_interval: default_keep_alive_interval(),
            pod_start_timeout: default_pod_start_timeout(),
            pod_start_poll_interval: default_pod_start_poll_interval(),
            pod_run_timeout: default_pod_run_timeout(),
            pod_end_poll_interval: default_pod_end_poll_interval(),
            load_balancer_timeout: default_load_balancer_timeout(),
            monitor_rollout: default_monitor_rollout(),
            rollout_timeout: default_rollout_timeout(),
            default_service_type: default_service_type(),
            ingress: false,
            storage_root: default_storage_root(),
            registry_path: default_registry_path(),
        }
    }
}

impl TeresaConfig {
    /// Load and validate the config at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("{}: {}", path.display(), e),
        })?;
        let config = Self::from_yaml(&content)?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Load `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
                message: e.to_string(),
            })?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, value: String| ConfigError::InvalidValue {
            field: field.to_string(),
            value,
        };

        for (field, image) in [
            ("images.slugBuilder", &self.images.slug_builder),
            ("images.slugRunner", &self.images.slug_runner),
            ("images.slugStore", &self.images.slug_store),
        ] {
            if image.trim().is_empty() {
                return Err(invalid(field, image.clone()));
            }
        }
        for (field, limits) in [
            ("buildLimits", &self.build_limits),
            ("execLimits", &self.exec_limits),
        ] {
            if limits.cpu.trim().is_empty() || limits.memory.trim().is_empty() {
                return Err(invalid(field, format!("{:?}", limits)));
            }
        }
        if self.revision_history_limit < 0 {
            return Err(invalid(
                "revisionHistoryLimit",
                self.revision_history_limit.to_string(),
            ));
        }
        for (field, value) in [
            ("keepAliveInterval", self.keep_alive_interval),
            ("podStartTimeout", self.pod_start_timeout),
            ("podStartPollInterval", self.pod_start_poll_interval),
            ("podRunTimeout", self.pod_run_timeout),
            ("podEndPollInterval", self.pod_end_poll_interval),
            ("rolloutTimeout", self.rollout_timeout),
        ] {
            if value.is_zero() {
                return Err(invalid(field, "0s".to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = TeresaConfig::from_yaml("").unwrap();
        assert_eq!(config.revision_history_limit, 5);
        assert_eq!(config.keep_alive_interval, Duration::from_secs(30));
        assert_eq!(config.pod_end_poll_interval, Duration::from_secs(3));
        assert_eq!(config.default_service_type, "LoadBalancer");
        assert!(config.images.nginx.is_empty());
        assert!(!config.ingress);
        assert!(config.monitor_rollout);
        assert_eq!(config.rollout_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_overrides_and_durations() {
        let config = TeresaConfig::from_yaml(
            "images:\n  nginx: nginx:1.25\nbuildLimits:\n  cpu: '1'\n  memory: 2Gi\npodRunTimeout: 1h 30m\ningress: true\nmonitorRollout: false\nrolloutTimeout: 2m\n",
        )
        .unwrap();
        assert_eq!(config.images.nginx, "nginx:1.25");
        assert_eq!(config.images.slug_builder, ImagesConfig::default().slug_builder);
        assert_eq!(config.build_limits, LimitsConfig::new("1", "2Gi"));
        assert_eq!(config.exec_limits, LimitsConfig::new("200m", "512Mi"));
        assert_eq!(config.pod_run_timeout, Duration::from_secs(90 * 60));
        assert!(config.ingress);
        assert!(!config.monitor_rollout);
        assert_eq!(config.rollout_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_invalid_values() {
        let err = TeresaConfig::from_yaml("podRunTimeout: forever\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));

        let err = TeresaConfig::from_yaml("podRunTimeout: 0s\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = TeresaConfig::from_yaml("images:\n  slugRunner: ''\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "images.slugRunner"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = TeresaConfig::load(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
        assert!(TeresaConfig::load_or_default(None).is_ok());
    }

    #[test]
    fn test_duration_round_trip() {
        let config = TeresaConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("keepAliveInterval: 30s"));
        let back = TeresaConfig::from_yaml(&yaml).unwrap();
        assert_eq!(back.pod_start_timeout, config.pod_start_timeout);
    }
}
