use log::{debug, info};

use lioutils::driver::{StorageObjectRef, TargetDriver, TpgId};
use targetmgr_api::error::{DriverFailureError, ReportError, TargetMgrError};

use super::{allocator::IndexScope, inventory, SkipReason, StepOutcome};

/// Attaches the storage object called `name` to the TPG as a new LUN.
pub(super) fn attach(
    driver: &mut dyn TargetDriver,
    tpg: TpgId,
    name: &str,
) -> Result<StepOutcome, TargetMgrError> {
    info!("Trying to attach '{name}' to target '{}'", tpg.iqn);
    let attached = inventory::list_attached_luns(driver, tpg)?;
    if attached.iter().any(|lun| lun.name == name) {
        debug!("LUN '{name}' already exists");
        return Ok(StepOutcome::AlreadyPresent);
    }

    let Some(backstore) = inventory::list_backstores(driver)?
        .into_iter()
        .find(|b| b.name == name)
    else {
        info!("No storage object named '{name}' exists, not attaching it");
        return Ok(StepOutcome::Skipped(SkipReason::NoStorageObject));
    };

    let index = IndexScope::Lun.next_free(attached.iter().map(|lun| lun.lun));
    driver
        .create_lun(
            tpg,
            index,
            &StorageObjectRef {
                plugin: backstore.plugin,
                backstore_index: backstore.index,
                name: name.into(),
            },
        )
        .structured(DriverFailureError::AttachLun {
            iqn: tpg.iqn.into(),
            name: name.into(),
        })?;
    debug!("Attached '{name}' as LUN {index} of '{tpg}'");
    Ok(StepOutcome::Created)
}

/// Maps the attached LUN backed by `name` into the initiator's ACL. A LUN that
/// is not attached is skipped, not treated as an error.
pub(super) fn map(
    driver: &mut dyn TargetDriver,
    tpg: TpgId,
    initiator: &str,
    name: &str,
) -> Result<StepOutcome, TargetMgrError> {
    info!("Trying to map LUN '{name}' for '{initiator}' on target '{}'", tpg.iqn);
    let Some(lun) = inventory::list_attached_luns(driver, tpg)?
        .into_iter()
        .find(|lun| lun.name == name)
    else {
        info!("LUN '{name}' is not attached to '{}', not mapping it", tpg.iqn);
        return Ok(StepOutcome::Skipped(SkipReason::NotAttached));
    };

    let mapped = inventory::list_mapped_luns(driver, tpg, initiator)?;
    if mapped.iter().any(|m| m.tpg_lun == lun.lun) {
        debug!("LUN '{name}' is already mapped for '{initiator}'");
        return Ok(StepOutcome::AlreadyPresent);
    }

    let index = IndexScope::MappedLun.next_free(mapped.iter().map(|m| m.lun));
    driver
        .create_mapped_lun(tpg, initiator, index, lun.lun)
        .structured(DriverFailureError::MapLun {
            iqn: tpg.iqn.into(),
            initiator: initiator.into(),
            name: name.into(),
        })?;
    debug!("Mapped LUN {} of '{tpg}' as LUN {index} for '{initiator}'", lun.lun);
    Ok(StepOutcome::Created)
}
