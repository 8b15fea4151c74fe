//! Common types for the fabric operator: CRDs, errors, and collaborators

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod exec;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;
pub mod template;

use std::time::Duration;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group of the fabric CRDs
pub const FABRIC_API_GROUP: &str = "fabric.dev";

/// API version of the fabric CRDs
pub const FABRIC_API_VERSION: &str = "v1alpha1";

/// Field manager for server-side apply and status patches
pub const FIELD_MANAGER: &str = "fabric-operator";

/// Directory the per-pod configuration blobs are mounted at inside agent pods
pub const CONFIG_MOUNT_PATH: &str = "/etc/contrailconfigmaps";

/// Requeue delay while a rollout still has work to do
pub const REQUEUE_PROGRESS: Duration = Duration::from_secs(3);

/// Requeue delay while reconcile is blocked by the staged upgrade gate
pub const REQUEUE_UPGRADE_GATED: Duration = Duration::from_secs(20);

/// Requeue delay once everything converged
pub const REQUEUE_CONVERGED: Duration = Duration::from_secs(60);

/// Requeue delay after a reconcile error
pub const REQUEUE_ERROR: Duration = Duration::from_secs(30);
