//! Fabric Kubernetes operator: configuration and controller wiring

#![deny(missing_docs)]

/// Environment configuration
pub mod config;
/// Controller construction
pub mod controller_runner;

pub use config::{EnvSource, OperatorConfig, OsEnvSource};
