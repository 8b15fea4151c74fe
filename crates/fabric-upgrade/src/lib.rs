//! Staged upgrade coordination
//!
//! During a platform upgrade exactly one service kind reconciles at a time,
//! in a fixed order, and the forwarding agent fleet waits until the whole
//! sequence is done. This crate provides:
//!
//! - [`ServiceKind`] and [`KindSequence`]: the kinds and their upgrade order
//! - [`admit`] / [`UpgradeGate`]: the admission check every driver runs first
//! - [`is_upgrade_required`]: idle-state detection of a pending upgrade
//! - [`arm`] / [`advance`]: stage transitions for the stage driver

#![deny(missing_docs)]

pub mod gate;
pub mod probe;
pub mod sequence;
pub mod stage;
pub mod store;

pub use gate::{admit, UpgradeGate};
pub use probe::{is_upgrade_required, upgrade_probe_target, ProbeTarget};
pub use sequence::{KindSequence, ServiceKind};
pub use stage::{advance, arm};
pub use store::{KubeZiuStore, ZiuStore};
