//! Pod spec and the staged builder that wires volumes between containers
//!
//! The builder collects the app container, an optional init container and
//! side-cars, then resolves cross-container concerns (shared volumes, port
//! swaps) in [`PodBuilder::build`] once every container has declared its ports.

use super::container::{Container, VolumeMount};
use super::Labels;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeSource {
    EmptyDir,
    /// `items` restricts the projected keys; empty projects the whole secret
    Secret {
        secret_name: String,
        items: Vec<String>,
    },
    ConfigMap {
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub name: String,
    pub source: VolumeSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSpec {
    pub name: String,
    pub namespace: String,
    pub containers: Vec<Container>,
    pub init_containers: Vec<Container>,
    pub volumes: Vec<Volume>,
    pub labels: Labels,
}

impl PodSpec {
    /// The first container is always the app container
    pub fn app_container(&self) -> Option<&Container> {
        self.containers.first()
    }

    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.name == name)
    }

    pub fn volume(&self, name: &str) -> Option<&Volume> {
        self.volumes.iter().find(|v| v.name == name)
    }
}

/// Volume mounted from the app secret into a side-car
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretFileMount {
    pub volume: String,
    pub secret_name: String,
    pub key: String,
    pub mount_path: String,
}

/// A helper container running next to the app container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideCar {
    pub container: Container,
    /// Empty-dir shared with the app container: (volume, mount path)
    pub shared_volume: Option<(String, String)>,
    /// Config map mounted read-only: (volume, mount path, config map name)
    pub config_map: Option<(String, String, String)>,
    pub secret_file: Option<SecretFileMount>,
    /// Take over the app's public port; the app moves to the side-car's port
    pub swap_port: bool,
}

impl SideCar {
    pub fn new(container: Container) -> Self {
        Self {
            container,
            shared_volume: None,
            config_map: None,
            secret_file: None,
            swap_port: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PodBuilder {
    name: String,
    namespace: String,
    app: Option<Container>,
    init: Option<Container>,
    side_cars: Vec<SideCar>,
    volumes: Vec<Volume>,
    labels: Labels,
}

impl PodBuilder {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            app: None,
            init: None,
            side_cars: Vec::new(),
            volumes: Vec::new(),
            labels: Labels::new(),
        }
    }

    pub fn with_app_container(mut self, container: Container) -> Self {
        self.app = Some(container);
        self
    }

    pub fn with_init_container(mut self, container: Container) -> Self {
        self.init = Some(container);
        self
    }

    pub fn with_side_car(mut self, side_car: SideCar) -> Self {
        self.side_cars.push(side_car);
        self
    }

    pub fn with_labels(mut self, labels: &Labels) -> Self {
        for (k, v) in labels {
            self.labels.insert(k.clone(), v.clone());
        }
        self
    }

    /// Mount a whole secret read-only in the app container
    pub fn mount_secret_in_app(mut self, volume: &str, path: &str, secret: &str) -> Self {
        self.add_volume(secret_volume(volume, secret, Vec::new()));
        if let Some(app) = self.app.as_mut() {
            app.volume_mounts
                .push(VolumeMount::new(volume, path).read_only());
        }
        self
    }

    /// Project selected secret keys as files in the app container; no-op without keys
    pub fn mount_secret_items_in_app(
        mut self,
        volume: &str,
        path: &str,
        secret: &str,
        items: &[String],
    ) -> Self {
        if items.is_empty() {
            return self;
        }
        self.add_volume(secret_volume(volume, secret, items.to_vec()));
        if let Some(app) = self.app.as_mut() {
            app.volume_mounts
                .push(VolumeMount::new(volume, path).read_only());
        }
        self
    }

    /// Mount a whole secret read-only in the init container
    pub fn mount_secret_in_init(mut self, volume: &str, path: &str, secret: &str) -> Self {
        self.add_volume(secret_volume(volume, secret, Vec::new()));
        if let Some(init) = self.init.as_mut() {
            init.volume_mounts
                .push(VolumeMount::new(volume, path).read_only());
        }
        self
    }

    /// Empty-dir mounted at the same path in the init and app containers
    pub fn share_volume_with_init(mut self, volume: &str, path: &str) -> Self {
        self.add_volume(empty_dir(volume));
        for c in [self.init.as_mut(), self.app.as_mut()].into_iter().flatten() {
            if !c.has_volume_mount(volume) {
                c.volume_mounts.push(VolumeMount::new(volume, path));
            }
        }
        self
    }

    pub fn build(mut self) -> PodSpec {
        let mut app = self.app.take();
        let mut side_cars = Vec::with_capacity(self.side_cars.len());

        for mut sc in std::mem::take(&mut self.side_cars) {
            if let Some((volume, path)) = sc.shared_volume.clone() {
                self.add_volume(empty_dir(&volume));
                for c in [app.as_mut(), Some(&mut sc.container)].into_iter().flatten() {
                    if !c.has_volume_mount(&volume) {
                        c.volume_mounts.push(VolumeMount::new(&volume, &path));
                    }
                }
            }
            if let Some((volume, path, config_map)) = sc.config_map.clone() {
                self.add_volume(Volume {
                    name: volume.clone(),
                    source: VolumeSource::ConfigMap { name: config_map },
                });
                sc.container
                    .volume_mounts
                    .push(VolumeMount::new(volume, path).read_only());
            }
            if let Some(sf) = sc.secret_file.clone() {
                self.add_secret_item(&sf.volume, &sf.secret_name, &sf.key);
                let mut vm = VolumeMount::new(&sf.volume, &sf.mount_path).read_only();
                vm.sub_path = Some(sf.key.clone());
                sc.container.volume_mounts.push(vm);
            }
            if sc.swap_port {
                if let Some(app) = app.as_mut() {
                    swap_ports(app, &mut sc.container);
                }
            }
            side_cars.push(sc.container);
        }

        let mut containers: Vec<Container> = app.into_iter().collect();
        containers.extend(side_cars);

        PodSpec {
            name: self.name,
            namespace: self.namespace,
            containers,
            init_containers: self.init.into_iter().collect(),
            volumes: self.volumes,
            labels: self.labels,
        }
    }

    fn add_volume(&mut self, volume: Volume) {
        if self.volumes.iter().all(|v| v.name != volume.name) {
            self.volumes.push(volume);
        }
    }

    /// Make sure `key` is projected by the secret volume `name`
    fn add_secret_item(&mut self, name: &str, secret: &str, key: &str) {
        match self.volumes.iter_mut().find(|v| v.name == name) {
            Some(Volume {
                source: VolumeSource::Secret { items, .. },
                ..
            }) => {
                if !items.is_empty() && !items.iter().any(|i| i == key) {
                    items.push(key.to_string());
                }
            }
            Some(_) => {}
            None => self.volumes.push(secret_volume(name, secret, vec![key.to_string()])),
        }
    }
}

fn secret_volume(name: &str, secret: &str, items: Vec<String>) -> Volume {
    Volume {
        name: name.to_string(),
        source: VolumeSource::Secret {
            secret_name: secret.to_string(),
            items,
        },
    }
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        source: VolumeSource::EmptyDir,
    }
}

/// Exchange the first declared port of both containers and keep the app's PORT env in sync
fn swap_ports(app: &mut Container, side_car: &mut Container) {
    let (Some(app_port), Some(sc_port)) = (app.ports.first_mut(), side_car.ports.first_mut())
    else {
        return;
    };
    std::mem::swap(&mut app_port.container_port, &mut sc_port.container_port);
    let new_app_port = app_port.container_port;
    if app.env.contains_key("PORT") {
        app.env.insert("PORT".to_string(), new_app_port.to_string());
    }
}
