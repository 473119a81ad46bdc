//! Builder pod: turns the uploaded tarball into a slug

use super::container::{ContainerBuilder, ContainerLimits};
use super::pod::{PodBuilder, PodSpec};
use super::StorageInfo;
use crate::domain::app::App;

/// Volume holding the object storage credentials
pub const STORAGE_KEYS_VOLUME: &str = "storage-keys";
pub const STORAGE_KEYS_PATH: &str = "/var/run/secrets/deis/objectstore/creds";

pub struct BuildPodBuilder<'a> {
    name: String,
    image: String,
    app: &'a App,
    storage: &'a StorageInfo,
    tarball_path: String,
    slug_dest: String,
    limits: Option<ContainerLimits>,
}

impl<'a> BuildPodBuilder<'a> {
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        app: &'a App,
        storage: &'a StorageInfo,
    ) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            app,
            storage,
            tarball_path: String::new(),
            slug_dest: String::new(),
            limits: None,
        }
    }

    pub fn with_tarball_path(mut self, path: impl Into<String>) -> Self {
        self.tarball_path = path.into();
        self
    }

    pub fn send_slug_to(mut self, dest: impl Into<String>) -> Self {
        self.slug_dest = dest.into();
        self
    }

    pub fn with_limits(mut self, limits: &ContainerLimits) -> Self {
        self.limits = Some(limits.clone());
        self
    }

    pub fn build(self) -> PodSpec {
        let container = ContainerBuilder::new(&self.name, self.image)
            .with_env([
                ("TAR_PATH".to_string(), self.tarball_path),
                ("PUT_PATH".to_string(), self.slug_dest),
                ("BUILDER_STORAGE".to_string(), self.storage.storage_type.clone()),
            ])
            .with_env(
                self.app
                    .env_vars
                    .iter()
                    .map(|ev| (ev.key.clone(), ev.value.clone())),
            )
            .with_env(self.storage.pod_env_vars.clone())
            .with_secrets(&self.app.secrets)
            .with_optional_limits(self.limits.as_ref())
            .build();

        PodBuilder::new(self.name, &self.app.name)
            .with_app_container(container)
            .mount_secret_in_app(
                STORAGE_KEYS_VOLUME,
                STORAGE_KEYS_PATH,
                &self.storage.k8s_secret_name,
            )
            .build()
    }
}
