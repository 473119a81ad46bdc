//! Services layer - orchestration logic
//!
//! This module coordinates between domain logic and infrastructure.
//! Services use infrastructure adapters to perform I/O operations.

pub mod app_service;
pub mod build_service;
pub mod cloud_service;
pub mod deploy_service;
pub mod exec_service;

// Re-export commonly used types
pub use app_service::AppService;
pub use build_service::BuildService;
pub use cloud_service::{CloudProvider, CloudService};
pub use deploy_service::DeployService;
pub use exec_service::ExecService;
