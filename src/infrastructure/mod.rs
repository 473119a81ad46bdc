//! Infrastructure layer - external I/O adapters
//!
//! This module contains all code that interacts with external systems:
//! - Kubernetes API (cluster gateway)
//! - Object storage for tarballs and slugs
//! - App registry
//! - Uploaded tarballs

pub mod cluster;
pub mod registry;
pub mod storage;
pub mod tarball;

#[cfg(test)]
pub(crate) mod fake;

// Re-export commonly used types
pub use cluster::{
    AppCluster, CloudCluster, DeployCluster, KubeGateway, PodCluster, PodExit, PodRun,
    ServiceCluster,
};
pub use registry::{AppRegistry, YamlRegistry};
pub use storage::{FileStorage, Storage};
