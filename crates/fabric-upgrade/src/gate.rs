//! Admission control for reconcile drivers during a staged upgrade
//!
//! Every reconcile driver asks the gate before mutating anything. While a
//! staged upgrade runs, only the kind at the current stage is admitted and
//! the forwarding agent fleet is held back entirely.

use std::sync::Arc;

use fabric_common::crd::{Manager, ZiuStage};
use fabric_common::Error;
use tracing::{debug, instrument};

use crate::probe::is_upgrade_required;
use crate::sequence::{KindSequence, ServiceKind};
use crate::store::ZiuStore;

/// Decide whether `kind` may reconcile.
///
/// * idle: admitted unless an upgrade is pending (`upgrade_required`)
/// * staging: the forwarding agent is never admitted; any other kind is
///   admitted iff it sits at position `stage - 1` of `sequence`
///
/// A kind that is absent from the sequence while staging is a
/// configuration error, never a plain "not now".
pub fn admit(
    stage: ZiuStage,
    sequence: &KindSequence,
    kind: &str,
    upgrade_required: bool,
) -> Result<bool, Error> {
    if stage.is_idle() {
        return Ok(!upgrade_required);
    }
    if kind == ServiceKind::Vrouter.as_str() {
        return Ok(false);
    }
    let position = sequence
        .position(kind)
        .ok_or_else(|| Error::upgrade_sequence(kind))?;
    Ok(stage.active_index() == Some(position))
}

/// Kind sequence in force for a manager: the one recorded at arm time, or
/// the one implied by the enabled services when nothing was recorded.
pub fn active_sequence(manager: &Manager) -> Result<KindSequence, Error> {
    match manager.status.as_ref().map(|s| &s.ziu_kinds) {
        Some(kinds) if !kinds.is_empty() => KindSequence::from_names(kinds.as_slice()),
        _ => Ok(KindSequence::for_services(&manager.spec.services)),
    }
}

/// Current stage of a manager
pub fn current_stage(manager: &Manager) -> ZiuStage {
    manager
        .status
        .as_ref()
        .map(|s| s.ziu_state)
        .unwrap_or_default()
}

/// Staged upgrade gate over the cluster store
#[derive(Clone)]
pub struct UpgradeGate {
    store: Arc<dyn ZiuStore>,
}

impl UpgradeGate {
    /// Create a gate reading state from `store`
    pub fn new(store: Arc<dyn ZiuStore>) -> Self {
        Self { store }
    }

    /// Whether the driver for `kind` may reconcile now.
    ///
    /// Without a manager object there is no staged upgrade to coordinate and
    /// every kind is admitted.
    #[instrument(skip(self))]
    pub async fn can_reconcile(&self, kind: &str) -> Result<bool, Error> {
        let Some(manager) = self.store.get_manager().await? else {
            debug!("no manager object, staged upgrade disabled");
            return Ok(true);
        };
        let stage = current_stage(&manager);

        // The recorded sequence only matters while staging
        let admitted = if stage.is_idle() {
            let upgrade_required =
                is_upgrade_required(&manager.spec.services, self.store.as_ref()).await?;
            debug!(upgrade_required, "staged upgrade idle");
            !upgrade_required
        } else {
            let sequence = active_sequence(&manager)?;
            admit(stage, &sequence, kind, false)?
        };
        debug!(%stage, admitted, "staged upgrade gate evaluated");
        Ok(admitted)
    }
}
