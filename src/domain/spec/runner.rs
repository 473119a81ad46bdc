//! Runner pod: fetches the slug in an init container and starts a process from it

use super::build::{STORAGE_KEYS_PATH, STORAGE_KEYS_VOLUME};
use super::container::{Container, ContainerBuilder, ContainerLimits};
use super::pod::{PodBuilder, PodSpec};
use super::sidecar::{nginx_side_car, CloudSqlProxy, APP_SECRET_VOLUME};
use super::{Labels, StorageInfo, DEFAULT_PORT};
use crate::domain::app::{App, APP_SECRETS_NAME, SECRET_FILES_PATH};

pub const SLUG_VOLUME_NAME: &str = "slug";
pub const SLUG_VOLUME_MOUNT_PATH: &str = "/slug";
pub const SLUG_STORE_CONTAINER: &str = "slugstore";

/// Staged builder for pods that run a slug.
///
/// Containers are declared first; side-cars that take over the public port
/// are resolved when [`RunnerPodBuilder::build`] assembles the pod.
pub struct RunnerPodBuilder<'a> {
    name: String,
    image: String,
    init_image: String,
    app: &'a App,
    storage: &'a StorageInfo,
    slug_url: String,
    args: Vec<String>,
    limits: Option<ContainerLimits>,
    labels: Labels,
    nginx_image: Option<String>,
    cloudsql_proxy: Option<CloudSqlProxy>,
}

impl<'a> RunnerPodBuilder<'a> {
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        init_image: impl Into<String>,
        app: &'a App,
        storage: &'a StorageInfo,
    ) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            init_image: init_image.into(),
            app,
            storage,
            slug_url: String::new(),
            args: Vec::new(),
            limits: None,
            labels: Labels::new(),
            nginx_image: None,
            cloudsql_proxy: None,
        }
    }

    pub fn with_slug(mut self, url: impl Into<String>) -> Self {
        self.slug_url = url.into();
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_limits(mut self, limits: &ContainerLimits) -> Self {
        self.limits = Some(limits.clone());
        self
    }

    pub fn with_labels(mut self, labels: &Labels) -> Self {
        for (k, v) in labels {
            self.labels.insert(k.clone(), v.clone());
        }
        self
    }

    /// Empty image means no side-car
    pub fn with_nginx_side_car(mut self, image: &str) -> Self {
        if !image.is_empty() {
            self.nginx_image = Some(image.to_string());
        }
        self
    }

    pub fn with_cloudsql_proxy_side_car(mut self, csp: Option<CloudSqlProxy>) -> Self {
        self.cloudsql_proxy = csp;
        self
    }

    fn app_container(&self) -> Container {
        let mut builder = ContainerBuilder::new(&self.name, &self.image)
            .with_env([
                ("APP".to_string(), self.app.name.clone()),
                ("SLUG_URL".to_string(), self.slug_url.clone()),
                ("SLUG_DIR".to_string(), SLUG_VOLUME_MOUNT_PATH.to_string()),
            ])
            .with_env(
                self.app
                    .env_vars
                    .iter()
                    .map(|ev| (ev.key.clone(), ev.value.clone())),
            )
            .with_secrets(&self.app.secrets)
            .with_args(self.args.clone())
            .with_optional_limits(self.limits.as_ref());

        if self.app.is_web() {
            builder = builder
                .with_env([("PORT".to_string(), DEFAULT_PORT.to_string())])
                .expose_port("http", DEFAULT_PORT);
        }
        builder.build()
    }

    fn init_container(&self) -> Container {
        ContainerBuilder::new(SLUG_STORE_CONTAINER, &self.init_image)
            .with_env([
                ("BUILDER_STORAGE".to_string(), self.storage.storage_type.clone()),
                ("SLUG_URL".to_string(), self.slug_url.clone()),
                ("SLUG_DIR".to_string(), SLUG_VOLUME_MOUNT_PATH.to_string()),
            ])
            .with_env(self.storage.pod_env_vars.clone())
            .build()
    }

    pub fn build(self) -> PodSpec {
        let mut builder = PodBuilder::new(&self.name, &self.app.name)
            .with_app_container(self.app_container())
            .mount_secret_items_in_app(
                APP_SECRET_VOLUME,
                SECRET_FILES_PATH,
                APP_SECRETS_NAME,
                &self.app.secret_files,
            )
            .with_labels(&self.labels)
            .with_init_container(self.init_container())
            .mount_secret_in_init(
                STORAGE_KEYS_VOLUME,
                STORAGE_KEYS_PATH,
                &self.storage.k8s_secret_name,
            )
            .share_volume_with_init(SLUG_VOLUME_NAME, SLUG_VOLUME_MOUNT_PATH);

        if let Some(image) = &self.nginx_image {
            builder = builder.with_side_car(nginx_side_car(image, self.app));
        }
        if let Some(csp) = &self.cloudsql_proxy {
            builder = builder.with_side_car(csp.side_car(self.app));
        }
        builder.build()
    }
}
