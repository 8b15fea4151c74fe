//! Forwarding agent configuration rollout for the fabric operator
//!
//! This crate drives the per-node agent configuration of a Vrouter:
//!
//! - **Params**: Resolves the desired baseline parameters and renders the agent files
//! - **Rollout**: Advances one node per tick from Starting to Ready
//! - **Controller**: Kubernetes controller for Vrouter CRDs

pub mod cluster_nodes;
pub mod configs;
pub mod controller;
pub mod error;
pub mod params;
pub mod pod;
pub mod rollout;
pub mod store;
pub mod templates;

pub use controller::{error_policy, reconcile, VrouterContext};
pub use error::ReconcileError;
pub use rollout::{RolloutEngine, RolloutStep, TickOutcome};
