//! Stage transitions used by the external stage driver
//!
//! The driver arms a staged upgrade once [`is_upgrade_required`] reports a
//! pending version change, then advances one stage each time the admitted
//! kind finished converging.
//!
//! [`is_upgrade_required`]: crate::probe::is_upgrade_required

use fabric_common::crd::{Manager, ZiuStage};
use fabric_common::Error;
use tracing::info;

use crate::gate::{active_sequence, current_stage};
use crate::sequence::KindSequence;
use crate::store::ZiuStore;

async fn require_manager(store: &dyn ZiuStore) -> Result<Manager, Error> {
    store
        .get_manager()
        .await?
        .ok_or_else(|| Error::validation_for("Manager", "manager object not found"))
}

/// Arm a staged upgrade: record the kind sequence and set stage `0`.
///
/// Returns the recorded sequence.
pub async fn arm(store: &dyn ZiuStore) -> Result<KindSequence, Error> {
    let manager = require_manager(store).await?;
    let sequence = KindSequence::for_services(&manager.spec.services);
    store
        .set_stage(ZiuStage::ARMED, Some(sequence.names()))
        .await?;
    info!(kinds = ?sequence.names(), "staged upgrade armed");
    Ok(sequence)
}

/// Move to the next stage. Past the last kind the upgrade is finished and
/// the stage returns to idle with the recorded sequence cleared.
///
/// Returns the stage now in force.
pub async fn advance(store: &dyn ZiuStore) -> Result<ZiuStage, Error> {
    let manager = require_manager(store).await?;
    let stage = current_stage(&manager);
    if stage.is_idle() {
        return Err(Error::validation_for(
            "Manager",
            "cannot advance: no staged upgrade is armed",
        ));
    }
    let sequence = active_sequence(&manager)?;

    let next = stage.next();
    if next.active_index().is_some_and(|i| i >= sequence.len()) {
        store.set_stage(ZiuStage::IDLE, Some(Vec::new())).await?;
        info!(%stage, "staged upgrade finished");
        return Ok(ZiuStage::IDLE);
    }

    store.set_stage(next, None).await?;
    let kind = next.active_index().and_then(|i| sequence.get(i));
    info!(%next, ?kind, "staged upgrade advanced");
    Ok(next)
}
