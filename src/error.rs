//! Centralized error types for teresa-core
//!
//! Uses thiserror for typed errors that can be matched on,
//! while adapters underneath keep using anyhow for context chains.
//! Every error collapses to an [`ErrorKind`] at the caller boundary.

use thiserror::Error;

/// Caller-facing classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PermissionDenied,
    NotFound,
    AlreadyExists,
    InvalidInput,
    BuildFailed,
    ReleaseFailed,
    Timeout,
    Canceled,
    /// Not available on this cluster's cloud provider
    NotImplemented,
    Internal,
}

impl ErrorKind {
    /// Process exit code used by the binary for this kind
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Internal => 1,
            Self::InvalidInput => 2,
            Self::PermissionDenied => 3,
            Self::NotFound => 4,
            Self::AlreadyExists => 5,
            Self::BuildFailed => 6,
            Self::ReleaseFailed => 7,
            Self::Timeout => 8,
            Self::NotImplemented => 9,
            Self::Canceled => 130,
        }
    }
}

/// Top-level error type for teresa-core operations
#[derive(Error, Debug)]
pub enum TeresaError {
    #[error(transparent)]
    App(#[from] AppError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TeresaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::App(e) => e.kind(),
            Self::Cluster(e) => e.kind(),
            Self::Exec(e) => e.kind(),
            Self::Build(e) => e.kind(),
            Self::Deploy(e) => e.kind(),
            Self::Cloud(e) => e.kind(),
            Self::Config(_) => ErrorKind::InvalidInput,
        }
    }

    /// Message that is safe to show to a remote caller.
    ///
    /// Internal failures are reduced to a generic line; the detail
    /// belongs in the logs.
    pub fn safe_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Application registry and env var errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("App {name} not found")]
    NotFound { name: String },

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Manipulating the env var {key} is not allowed")]
    ProtectedEnvVar { key: String },

    #[error("Invalid env var name: {key}")]
    InvalidEnvVarName { key: String },

    #[error("Invalid app name: {name}")]
    InvalidName { name: String },

    #[error("Invalid autoscale: {reason}")]
    InvalidAutoScale { reason: String },

    #[error("Registry failure: {0:#}")]
    Registry(anyhow::Error),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::PermissionDenied => ErrorKind::PermissionDenied,
            Self::ProtectedEnvVar { .. }
            | Self::InvalidEnvVarName { .. }
            | Self::InvalidName { .. }
            | Self::InvalidAutoScale { .. } => ErrorKind::InvalidInput,
            Self::Registry(_) => ErrorKind::Internal,
        }
    }
}

/// Cluster API errors, classified from the API server response
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("Invalid object: {message}")]
    Invalid { message: String },

    #[error("Cluster failure: {0:#}")]
    Internal(anyhow::Error),
}

impl ClusterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::Invalid { .. } => ErrorKind::InvalidInput,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn not_found(kind: &str, name: &str) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub fn already_exists(kind: &str, name: &str) -> Self {
        Self::AlreadyExists {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// Pod execution errors
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Pod exited with non zero code: {code}")]
    NonZeroExitCode { code: i32 },

    #[error("Pod run timed out")]
    Timeout,

    #[error("Operation canceled")]
    Canceled,

    #[error("Operation deadline exceeded")]
    DeadlineExceeded,

    #[error("Pod failed: {reason}")]
    PodFailed { reason: String },

    #[error("App {app} has no deploy yet")]
    DeployNotFound { app: String },

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl ExecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NonZeroExitCode { .. } | Self::PodFailed { .. } => ErrorKind::Internal,
            Self::Timeout | Self::DeadlineExceeded => ErrorKind::Timeout,
            Self::Canceled => ErrorKind::Canceled,
            Self::DeployNotFound { .. } => ErrorKind::NotFound,
            Self::Cluster(e) => e.kind(),
        }
    }
}

/// Build orchestration errors
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Build failed")]
    BuildFailed,

    #[error("Invalid build name: {name}")]
    InvalidBuildName { name: String },

    #[error("Build timed out")]
    Timeout,

    #[error("Storage failure: {0:#}")]
    Storage(anyhow::Error),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BuildFailed => ErrorKind::BuildFailed,
            Self::InvalidBuildName { .. } => ErrorKind::InvalidInput,
            Self::Timeout => ErrorKind::Timeout,
            Self::Storage(_) => ErrorKind::Internal,
            Self::Exec(e) => e.kind(),
        }
    }
}

/// Deploy pipeline errors
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Invalid config file: {message}")]
    InvalidConfigFile { message: String },

    #[error("Release command failed")]
    ReleaseFailed,

    #[error("Cron schedule not found in teresa.yaml")]
    CronScheduleNotFound,

    #[error("Process type {process_type} not found in Procfile")]
    ProcessTypeNotFound { process_type: String },

    #[error("Revision {revision} not found")]
    RevisionNotFound { revision: String },

    #[error("Invalid replica count: {replicas}")]
    InvalidReplicas { replicas: i32 },

    #[error("Rolling update stalled, still running the old deploy")]
    RolloutStalled,

    #[error("Rolling update not finished after {waited}")]
    RolloutTimeout { waited: String },

    #[error("Deploy stage {stage} ran out of order")]
    StageOutOfOrder { stage: &'static str },
}

impl DeployError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfigFile { .. }
            | Self::CronScheduleNotFound
            | Self::ProcessTypeNotFound { .. }
            | Self::InvalidReplicas { .. } => ErrorKind::InvalidInput,
            Self::ReleaseFailed => ErrorKind::ReleaseFailed,
            Self::RevisionNotFound { .. } => ErrorKind::NotFound,
            Self::RolloutStalled | Self::RolloutTimeout { .. } => ErrorKind::Timeout,
            Self::StageOutOfOrder { .. } => ErrorKind::Internal,
        }
    }
}

/// Cloud provider specific operations (SSL, static IPs)
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Operation not implemented for this cloud provider")]
    NotImplemented,

    #[error("Operation not implemented for apps exposed through an ingress")]
    NotImplementedOnIngress,

    #[error("Operation not implemented for apps exposed through a load balancer")]
    NotImplementedOnLoadBalancer,

    #[error("Service of app {app} not found")]
    ServiceNotFound { app: String },

    #[error("Invalid value for annotation {key}: {value}")]
    InvalidAnnotation { key: String, value: String },

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl CloudError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotImplemented
            | Self::NotImplementedOnIngress
            | Self::NotImplementedOnLoadBalancer => ErrorKind::NotImplemented,
            Self::ServiceNotFound { .. } => ErrorKind::NotFound,
            Self::InvalidAnnotation { .. } => ErrorKind::Internal,
            Self::Cluster(e) => e.kind(),
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },
}
