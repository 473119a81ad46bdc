//! Application domain types
//!
//! An [`App`] is the unit a team deploys. Env var manipulation lives here
//! so every entry point enforces the same protected-key and naming rules.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::AppError;

/// Process type that receives HTTP traffic
pub const PROCESS_TYPE_WEB: &str = "web";

/// Process type prefix for scheduled jobs
pub const PROCESS_TYPE_CRON: &str = "cron";

/// Name of the k8s secret holding app secrets
pub const APP_SECRETS_NAME: &str = "teresa-secrets";

/// Directory where secret files are projected inside the app container
pub const SECRET_FILES_PATH: &str = "/teresa/secrets";

/// Env vars owned by the platform; users can neither set nor unset them
pub const PROTECTED_ENV_VARS: [&str; 9] = [
    "PYTHONPATH",
    "SLUG_URL",
    "PORT",
    "DEIS_DEBUG",
    "BUILDER_STORAGE",
    "APP",
    "SLUG_DIR",
    "NGINX_PORT",
    "NGINX_BACKEND",
];

fn env_var_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[-._a-zA-Z][-._a-zA-Z0-9]*$").expect("env var pattern"))
}

fn app_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("app name pattern"))
}

pub fn is_protected_env_var(key: &str) -> bool {
    PROTECTED_ENV_VARS.contains(&key)
}

pub fn is_web_app(process_type: &str) -> bool {
    process_type == PROCESS_TYPE_WEB
}

pub fn is_cron_job(process_type: &str) -> bool {
    process_type.starts_with(PROCESS_TYPE_CRON)
}

/// A single environment variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Resource quantity such as `cpu: 200m`, passed to the cluster verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRangeQuantity {
    pub resource: String,
    pub quantity: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default)]
    pub default: Vec<LimitRangeQuantity>,
    #[serde(default)]
    pub default_request: Vec<LimitRangeQuantity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoScale {
    pub min: i32,
    pub max: i32,
    pub cpu_target_utilization: i32,
}

impl AutoScale {
    pub fn new(min: i32, max: i32, cpu_target_utilization: i32) -> Self {
        Self {
            min,
            max,
            cpu_target_utilization,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let reason = if self.min < 1 {
            "min replicas must be at least 1"
        } else if self.max < self.min {
            "max replicas must not be lower than min"
        } else if !(1..=100).contains(&self.cpu_target_utilization) {
            "cpu target utilization must be between 1 and 100"
        } else {
            return Ok(());
        };
        Err(AppError::InvalidAutoScale {
            reason: reason.to_string(),
        })
    }
}

/// Identity of the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub email: String,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// Deployable application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub name: String,
    pub team: String,
    #[serde(default = "default_process_type")]
    pub process_type: String,
    #[serde(default)]
    pub env_vars: Vec<EnvVar>,
    #[serde(default)]
    pub auto_scale: Option<AutoScale>,
    #[serde(default)]
    pub limits: Option<Limits>,
    #[serde(default)]
    pub virtual_hosts: Vec<String>,
    /// Expose through a cluster-internal service only
    #[serde(default)]
    pub internal: bool,
    /// Service port name (`http`, `grpc`, ...); empty means `tcp`
    #[serde(default)]
    pub protocol: String,
    /// Secret keys exposed as env vars
    #[serde(default)]
    pub secrets: Vec<String>,
    /// Secret keys projected as files under [`SECRET_FILES_PATH`]
    #[serde(default)]
    pub secret_files: Vec<String>,
}

fn default_process_type() -> String {
    PROCESS_TYPE_WEB.to_string()
}

impl App {
    /// Create an app with the web process type and no env vars
    pub fn new(name: impl Into<String>, team: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            team: team.into(),
            process_type: default_process_type(),
            env_vars: Vec::new(),
            auto_scale: None,
            limits: None,
            virtual_hosts: Vec::new(),
            internal: false,
            protocol: String::new(),
            secrets: Vec::new(),
            secret_files: Vec::new(),
        }
    }

    pub fn with_process_type(mut self, process_type: impl Into<String>) -> Self {
        self.process_type = process_type.into();
        self
    }

    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push(EnvVar::new(key, value));
        self
    }

    pub fn is_web(&self) -> bool {
        is_web_app(&self.process_type)
    }

    pub fn is_cron(&self) -> bool {
        is_cron_job(&self.process_type)
    }

    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env_vars
            .iter()
            .find(|ev| ev.key == key)
            .map(|ev| ev.value.as_str())
    }

    /// Validate the app name as a DNS-1123 label
    pub fn validate_name(&self) -> Result<(), AppError> {
        if self.name.len() > 63 || !app_name_regex().is_match(&self.name) {
            return Err(AppError::InvalidName {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Set env vars: existing keys are replaced in place, new keys are appended.
    ///
    /// The whole batch is validated first; on error nothing is changed.
    pub fn set_env_vars(&mut self, evs: &[EnvVar]) -> Result<(), AppError> {
        for ev in evs {
            validate_env_var_key(&ev.key)?;
        }
        for ev in evs {
            match self.env_vars.iter_mut().find(|cur| cur.key == ev.key) {
                Some(cur) => cur.value = ev.value.clone(),
                None => self.env_vars.push(ev.clone()),
            }
        }
        Ok(())
    }

    /// Remove env vars by key; unknown keys are ignored.
    pub fn unset_env_vars(&mut self, keys: &[String]) -> Result<(), AppError> {
        for key in keys {
            if is_protected_env_var(key) {
                return Err(AppError::ProtectedEnvVar { key: key.clone() });
            }
        }
        self.env_vars.retain(|ev| !keys.contains(&ev.key));
        Ok(())
    }
}

fn validate_env_var_key(key: &str) -> Result<(), AppError> {
    if is_protected_env_var(key) {
        return Err(AppError::ProtectedEnvVar {
            key: key.to_string(),
        });
    }
    if !env_var_name_regex().is_match(key) {
        return Err(AppError::InvalidEnvVarName {
            key: key.to_string(),
        });
    }
    Ok(())
}

/// Incoming request to create an app
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateAppRequest {
    pub name: String,
    pub team: String,
    #[serde(default)]
    pub process_type: String,
    #[serde(default)]
    pub limits: Option<Limits>,
    #[serde(default)]
    pub auto_scale: Option<AutoScale>,
    #[serde(default)]
    pub virtual_host: String,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub protocol: String,
}

impl From<CreateAppRequest> for App {
    fn from(req: CreateAppRequest) -> Self {
        let process_type = if req.process_type.is_empty() {
            default_process_type()
        } else {
            req.process_type
        };
        let virtual_hosts = if req.virtual_host.is_empty() {
            Vec::new()
        } else {
            vec![req.virtual_host]
        };
        Self {
            process_type,
            limits: Some(req.limits.unwrap_or_default()),
            auto_scale: req.auto_scale,
            virtual_hosts,
            internal: req.internal,
            protocol: req.protocol,
            ..App::new(req.name, req.team)
        }
    }
}

/// Externally reachable address of an app
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Address {
    pub hostname: String,
}

/// Detailed view of an app
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppInfo {
    pub name: String,
    pub team: String,
    pub process_type: String,
    pub addresses: Vec<Address>,
    pub env_vars: Vec<EnvVar>,
    pub auto_scale: Option<AutoScale>,
    pub limits: Option<Limits>,
    pub replicas: i32,
}

impl AppInfo {
    pub fn new(app: &App, addresses: Vec<Address>, replicas: i32) -> Self {
        Self {
            name: app.name.clone(),
            team: app.team.clone(),
            process_type: app.process_type.clone(),
            addresses,
            env_vars: app.env_vars.clone(),
            auto_scale: app.auto_scale.clone(),
            limits: app.limits.clone(),
            replicas,
        }
    }
}

/// Summary line of an app listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppListItem {
    pub name: String,
    pub team: String,
    pub process_type: String,
    pub addresses: Vec<Address>,
    pub auto_scale: Option<AutoScale>,
    pub limits: Option<Limits>,
}

impl AppListItem {
    pub fn new(app: &App, addresses: Vec<Address>) -> Self {
        Self {
            name: app.name.clone(),
            team: app.team.clone(),
            process_type: app.process_type.clone(),
            addresses,
            auto_scale: app.auto_scale.clone(),
            limits: app.limits.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_with(vars: &[(&str, &str)]) -> App {
        let mut app = App::new("myapp", "luizalabs");
        for (k, v) in vars {
            app.env_vars.push(EnvVar::new(*k, *v));
        }
        app
    }

    #[test]
    fn test_set_env_var_appends_new_key() {
        let mut app = app_with(&[("A", "1"), ("B", "2")]);
        app.set_env_vars(&[EnvVar::new("C", "3")]).unwrap();
        let keys: Vec<&str> = app.env_vars.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["A", "B", "C"]);
        assert_eq!(app.env_var("C"), Some("3"));
    }

    #[test]
    fn test_set_env_var_replaces_in_place() {
        let mut app = app_with(&[("A", "1"), ("B", "2"), ("C", "3")]);
        app.set_env_vars(&[EnvVar::new("B", "two")]).unwrap();
        assert_eq!(
            app.env_vars,
            vec![
                EnvVar::new("A", "1"),
                EnvVar::new("B", "two"),
                EnvVar::new("C", "3"),
            ]
        );
    }

    #[test]
    fn test_set_env_var_law_over_many_sets() {
        let base = app_with(&[("K0", "v0"), ("K1", "v1"), ("K2", "v2"), ("K3", "v3")]);
        for i in 0..8 {
            let key = format!("K{}", i);
            let mut app = base.clone();
            app.set_env_vars(&[EnvVar::new(key.clone(), "new")]).unwrap();

            if i < 4 {
                assert_eq!(app.env_vars.len(), base.env_vars.len());
                for (j, ev) in app.env_vars.iter().enumerate() {
                    if j == i {
                        assert_eq!(ev.value, "new");
                    } else {
                        assert_eq!(ev, &base.env_vars[j]);
                    }
                }
            } else {
                assert_eq!(&app.env_vars[..4], &base.env_vars[..]);
                assert_eq!(app.env_vars[4], EnvVar::new(key, "new"));
            }
        }
    }

    #[test]
    fn test_protected_keys_cannot_be_set_or_unset() {
        for key in PROTECTED_ENV_VARS {
            let mut app = app_with(&[("A", "1")]);
            let before = app.env_vars.clone();

            let err = app
                .set_env_vars(&[EnvVar::new("OK", "1"), EnvVar::new(key, "x")])
                .unwrap_err();
            assert!(matches!(err, AppError::ProtectedEnvVar { .. }));
            assert_eq!(app.env_vars, before);

            let err = app
                .unset_env_vars(&["A".to_string(), key.to_string()])
                .unwrap_err();
            assert!(matches!(err, AppError::ProtectedEnvVar { .. }));
            assert_eq!(app.env_vars, before);
        }
    }

    #[test]
    fn test_invalid_env_var_name_rejected() {
        let mut app = App::new("myapp", "t");
        for key in ["1ABC", "A B", "", "A=B"] {
            let err = app.set_env_vars(&[EnvVar::new(key, "x")]).unwrap_err();
            assert!(matches!(err, AppError::InvalidEnvVarName { .. }), "{}", key);
        }
        app.set_env_vars(&[EnvVar::new("_under.score-1", "x")]).unwrap();
    }

    #[test]
    fn test_unset_env_vars() {
        let mut app = app_with(&[("A", "1"), ("B", "2"), ("C", "3")]);
        app.unset_env_vars(&["B".to_string(), "MISSING".to_string()])
            .unwrap();
        assert_eq!(app.env_vars, vec![EnvVar::new("A", "1"), EnvVar::new("C", "3")]);
    }

    #[test]
    fn test_process_type_helpers() {
        assert!(App::new("a", "t").is_web());
        let cron = App::new("a", "t").with_process_type("cron-nightly");
        assert!(cron.is_cron());
        assert!(!cron.is_web());
    }

    #[test]
    fn test_validate_name() {
        assert!(App::new("my-app-1", "t").validate_name().is_ok());
        assert!(App::new("My_App", "t").validate_name().is_err());
        assert!(App::new("-app", "t").validate_name().is_err());
        assert!(App::new(&"a".repeat(64), "t").validate_name().is_err());
    }

    #[test]
    fn test_request_projections_round_trip() {
        let limits = Limits {
            default: vec![LimitRangeQuantity {
                resource: "cpu".to_string(),
                quantity: "500m".to_string(),
            }],
            default_request: vec![LimitRangeQuantity {
                resource: "memory".to_string(),
                quantity: "256Mi".to_string(),
            }],
        };
        let auto_scale = AutoScale {
            min: 2,
            max: 10,
            cpu_target_utilization: 70,
        };
        let req = CreateAppRequest {
            name: "shop".to_string(),
            team: "checkout".to_string(),
            process_type: "worker".to_string(),
            limits: Some(limits.clone()),
            auto_scale: Some(auto_scale.clone()),
            ..Default::default()
        };

        let app: App = req.into();
        let info = AppInfo::new(&app, vec![], 1);
        let item = AppListItem::new(&app, vec![]);

        assert_eq!(info.name, "shop");
        assert_eq!(info.team, "checkout");
        assert_eq!(info.process_type, "worker");
        assert_eq!(info.limits, Some(limits.clone()));
        assert_eq!(info.auto_scale, Some(auto_scale.clone()));
        assert_eq!(item.name, "shop");
        assert_eq!(item.team, "checkout");
        assert_eq!(item.process_type, "worker");
        assert_eq!(item.limits, Some(limits));
        assert_eq!(item.auto_scale, Some(auto_scale));
    }

    #[test]
    fn test_request_defaults_to_web() {
        let app: App = CreateAppRequest {
            name: "a".to_string(),
            team: "t".to_string(),
            ..Default::default()
        }
        .into();
        assert_eq!(app.process_type, PROCESS_TYPE_WEB);
        assert!(app.env_vars.is_empty());
    }

    #[test]
    fn test_auto_scale_bounds() {
        assert!(AutoScale::new(1, 4, 70).validate().is_ok());
        assert!(AutoScale::new(2, 2, 100).validate().is_ok());
        for bad in [
            AutoScale::new(0, 4, 70),
            AutoScale::new(3, 2, 70),
            AutoScale::new(1, 4, 0),
            AutoScale::new(1, 4, 101),
        ] {
            assert!(matches!(
                bad.validate(),
                Err(AppError::InvalidAutoScale { .. })
            ));
        }
    }
}
