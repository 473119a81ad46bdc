//! Domain layer - pure business logic
//!
//! This module contains business logic with no external I/O.
//! Types and functions here can be unit tested without mocking.

pub mod app;
pub mod build;
pub mod deploy;
pub mod spec;

// Re-export commonly used types
pub use app::{App, AutoScale, EnvVar, User};
pub use build::{BuildDescriptor, IdGenerator, UuidGenerator};
pub use deploy::{DeployOptions, DeployStage, StageOutcome, StageResult};
