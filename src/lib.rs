//! Build and deploy orchestration core for the teresa PaaS
//!
//! Turns an app tarball into a slug built in a one-shot pod, then into a
//! running, exposed workload, streaming progress lines back to the caller.

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod services;
pub mod stream;
