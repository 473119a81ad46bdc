//! Side-car containers: nginx in front of web apps and the Cloud SQL proxy

use serde::Deserialize;
use std::path::Path;

use super::container::ContainerBuilder;
use super::deploy::TeresaYaml;
use super::pod::{SecretFileMount, SideCar};
use super::{DEFAULT_PORT, SECONDARY_PORT};
use crate::domain::app::App;

pub const NGINX_CONF_FILE: &str = "nginx.conf";
pub const NGINX_VOLUME_NAME: &str = "nginx-conf";
pub const NGINX_CONF_TMPL_DIR: &str = "/etc/nginx/template/";
const NGINX_CONF_DIR: &str = "/etc/nginx/";
const NGINX_DEFAULT_CPU_LIMIT: &str = "100m";
const NGINX_DEFAULT_MEMORY_LIMIT: &str = "256Mi";

pub const SHARED_VOLUME_NAME: &str = "shared-data";
pub const SHARED_VOLUME_MOUNT_PATH: &str = "/app";

/// Volume name of the app secret in the pod
pub const APP_SECRET_VOLUME: &str = "secrets";

pub const CLOUDSQL_PROXY_KEY: &str = "cloudsql-proxy";
const CLOUDSQL_MOUNT_DIR: &str = "/secrets/cloudsql";
const CLOUDSQL_DEFAULT_CPU_LIMIT: &str = "100m";
const CLOUDSQL_DEFAULT_MEMORY_LIMIT: &str = "256Mi";
const CLOUDSQL_INSTANCE_ENV: &str = "GCP_CLOUDSQL_INSTANCE_NAME";
const CLOUDSQL_DEFAULT_INSTANCES: &str = "$(DB_PROJECT):$(DB_ZONE):$(DB_NAME)=tcp:3306";

/// nginx listening on the public port, proxying to the app on [`SECONDARY_PORT`].
///
/// The nginx config comes from the config map named after the app, rendered
/// with `envsubst` at start-up.
pub fn nginx_side_car(image: &str, app: &App) -> SideCar {
    let env = [
        ("NGINX_PORT".to_string(), DEFAULT_PORT.to_string()),
        (
            "NGINX_BACKEND".to_string(),
            format!("http://localhost:{}", SECONDARY_PORT),
        ),
    ];
    let mut vars: Vec<String> = env.iter().map(|(k, _)| format!("${}", k)).collect();
    vars.sort();
    let script = format!(
        "envsubst '{}' < {}{} > {}{} && nginx -g 'daemon off;'",
        vars.join(" "),
        NGINX_CONF_TMPL_DIR,
        NGINX_CONF_FILE,
        NGINX_CONF_DIR,
        NGINX_CONF_FILE,
    );

    let container = ContainerBuilder::new("nginx", image)
        .with_command(vec!["/bin/sh".to_string()])
        .with_args(vec!["-c".to_string(), script])
        .with_env(app.env_vars.iter().map(|ev| (ev.key.clone(), ev.value.clone())))
        .with_env(env)
        .with_limits(NGINX_DEFAULT_CPU_LIMIT, NGINX_DEFAULT_MEMORY_LIMIT)
        .expose_port("nginx", SECONDARY_PORT)
        .build();

    let mut side_car = SideCar::new(container);
    side_car.shared_volume = Some((
        SHARED_VOLUME_NAME.to_string(),
        SHARED_VOLUME_MOUNT_PATH.to_string(),
    ));
    side_car.config_map = Some((
        NGINX_VOLUME_NAME.to_string(),
        NGINX_CONF_TMPL_DIR.to_string(),
        app.name.clone(),
    ));
    side_car.swap_port = true;
    side_car
}

/// `sidecars.cloudsql-proxy` section of `teresa.yaml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudSqlProxy {
    #[serde(default)]
    pub instances: String,
    #[serde(default)]
    pub credential_file: String,
    #[serde(skip)]
    pub image: String,
}

impl CloudSqlProxy {
    /// Decode the proxy section, if any, and resolve the instance string
    pub fn from_teresa_yaml(
        image: &str,
        teresa_yaml: Option<&TeresaYaml>,
        app: &App,
    ) -> Result<Option<Self>, String> {
        let Some(raw) = teresa_yaml.and_then(|ty| ty.side_cars.get(CLOUDSQL_PROXY_KEY)) else {
            return Ok(None);
        };
        let mut csp: CloudSqlProxy = serde_yaml::from_value(raw.clone())
            .map_err(|e| format!("failed to build cloudsql proxy: {}", e))?;
        csp.image = image.to_string();
        if csp.instances.is_empty() {
            csp.instances = app
                .env_var(CLOUDSQL_INSTANCE_ENV)
                .unwrap_or(CLOUDSQL_DEFAULT_INSTANCES)
                .to_string();
        }
        Ok(Some(csp))
    }

    fn credential_key(&self) -> String {
        Path::new(&self.credential_file)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn mount_path(&self) -> String {
        format!("{}/{}", CLOUDSQL_MOUNT_DIR, self.credential_key())
    }

    pub fn side_car(&self, app: &App) -> SideCar {
        let container = ContainerBuilder::new("cloudsql-proxy", &self.image)
            .with_command(vec!["/cloud_sql_proxy".to_string()])
            .with_args(vec![
                format!("-instances={}", self.instances),
                format!("-credential_file={}", self.mount_path()),
            ])
            .with_env(app.env_vars.iter().map(|ev| (ev.key.clone(), ev.value.clone())))
            .with_limits(CLOUDSQL_DEFAULT_CPU_LIMIT, CLOUDSQL_DEFAULT_MEMORY_LIMIT)
            .build();

        let mut side_car = SideCar::new(container);
        side_car.secret_file = Some(SecretFileMount {
            volume: APP_SECRET_VOLUME.to_string(),
            secret_name: crate::domain::app::APP_SECRETS_NAME.to_string(),
            key: self.credential_key(),
            mount_path: self.mount_path(),
        });
        side_car
    }
}
