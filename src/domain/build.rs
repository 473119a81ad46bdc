//! Build identity and storage layout
//!
//! Every build gets an id from an injected [`IdGenerator`] and derives its
//! storage paths from `{app}/{id}`, so concurrent builds never overlap.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Source of build and pod ids
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Random ids (UUID v4, hyphenless)
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Deterministic ids: `{prefix}1`, `{prefix}2`, ...
#[derive(Debug, Default)]
pub struct SequentialGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for SequentialGenerator {
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}{}", self.prefix, n)
    }
}

/// Where a build reads its source and writes its slug
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDescriptor {
    pub id: String,
    pub source_location: String,
    pub artifact_destination: String,
}

impl BuildDescriptor {
    /// Build for a deploy: `deploys/{app}/{id}/in/app.tgz` -> `deploys/{app}/{id}/out`
    pub fn for_deploy(app: &str, id: impl Into<String>) -> Self {
        let id = id.into();
        let base = format!("deploys/{}/{}", app, id);
        Self {
            source_location: format!("{}/in/app.tgz", base),
            artifact_destination: format!("{}/out", base),
            id,
        }
    }

    /// Named build kept for later runs: `builds/{app}/{name}/...`
    pub fn named(app: &str, name: &str) -> Self {
        let base = build_prefix(app, Some(name));
        Self {
            id: name.to_string(),
            source_location: format!("{}in/app.tgz", base),
            artifact_destination: format!("{}out", base),
        }
    }

    /// Location of the produced slug
    pub fn slug_url(&self) -> String {
        format!("{}/slug.tgz", self.artifact_destination)
    }
}

/// Storage prefix for named builds; trailing slash keeps `foo` from matching `foobar`
pub fn build_prefix(app: &str, name: Option<&str>) -> String {
    match name {
        Some(name) => format!("builds/{}/{}/", app, name),
        None => format!("builds/{}/", app),
    }
}

/// Name of the pod that builds `id`
pub fn build_pod_name(id: &str) -> String {
    format!("build-{}", id)
}

/// Name of the pod that runs the release command of `id`
pub fn release_pod_name(app: &str, id: &str) -> String {
    format!("release-{}-{}", app, id)
}

/// Name of the pod for an ad-hoc command
pub fn exec_pod_name(app: &str, id: &str) -> String {
    format!("exec-command-{}-{}", app, id)
}

/// Name of the throwaway pod (and service) running a stored build
pub fn build_run_pod_name(app: &str, id: &str) -> String {
    format!("build-run-{}-{}", app, id)
}

/// Build name of a stored object under [`build_prefix`]`(app, None)`
pub fn build_name_of(app: &str, object: &str) -> Option<String> {
    let rest = object.strip_prefix(&build_prefix(app, None))?;
    match rest.split_once('/') {
        Some((name, _)) if !name.is_empty() => Some(name.to_string()),
        _ => None,
    }
}
