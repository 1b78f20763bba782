use std::net::IpAddr;

use log::{debug, info};

use lioutils::driver::{NetworkPortal, TargetDriver, TpgId};
use targetmgr_api::{
    config::PortalSpec,
    constants::SINGLE_TPG_TAG,
    error::{DriverFailureError, ReportError, TargetMgrError},
};

use super::{allocator::IndexScope, inventory, StepOutcome};

pub(super) fn create_target(
    driver: &mut dyn TargetDriver,
    iqn: &str,
) -> Result<StepOutcome, TargetMgrError> {
    info!("Trying to create target '{iqn}'");
    if inventory::list_targets(driver)?.iter().any(|t| t == iqn) {
        debug!("Target '{iqn}' already exists");
        return Ok(StepOutcome::AlreadyPresent);
    }

    driver
        .create_target(iqn)
        .structured(DriverFailureError::CreateTarget { iqn: iqn.into() })?;
    debug!("Created target '{iqn}'");
    Ok(StepOutcome::Created)
}

/// Picks the TPG all further steps of a target act on.
///
/// Returns `None` as the outcome when the TPG is missing and the driver brings
/// it into existence together with the first portal. Otherwise a missing TPG
/// is created here, with a tag from the target's TPG tag scope.
pub(super) fn prepare_tpg<'a>(
    driver: &mut dyn TargetDriver,
    iqn: &'a str,
) -> Result<(TpgId<'a>, Option<StepOutcome>), TargetMgrError> {
    let tags = inventory::list_tpgs(driver, iqn)?
        .into_iter()
        .map(|record| record.tag)
        .collect::<Vec<_>>();

    if tags.contains(&SINGLE_TPG_TAG) {
        debug!("TPG {SINGLE_TPG_TAG} of target '{iqn}' already exists");
        return Ok((
            TpgId::new(iqn, SINGLE_TPG_TAG),
            Some(StepOutcome::AlreadyPresent),
        ));
    }

    if driver.creates_tpg_with_portal() {
        // Creating the first portal creates TPG 1
        return Ok((TpgId::new(iqn, SINGLE_TPG_TAG), None));
    }

    let tpg = TpgId::new(iqn, IndexScope::TpgTag.next_free(tags));
    info!("Trying to create TPG {} for target '{iqn}'", tpg.tag);
    driver
        .create_tpg(tpg)
        .structured(DriverFailureError::CreateTpg {
            iqn: iqn.into(),
            tag: tpg.tag,
        })?;
    Ok((tpg, Some(StepOutcome::Created)))
}

pub(super) fn create_portal(
    driver: &mut dyn TargetDriver,
    tpg: TpgId,
    spec: &PortalSpec,
) -> Result<StepOutcome, TargetMgrError> {
    let portal = NetworkPortal {
        ip: spec.ip.clone(),
        port: spec.port,
    };

    info!("Trying to create portal '{portal}' for target '{}'", tpg.iqn);
    if inventory::list_portals(driver, tpg)?
        .iter()
        .any(|existing| same_portal(existing, &portal))
    {
        debug!("Portal '{portal}' of target '{}' already exists", tpg.iqn);
        return Ok(StepOutcome::AlreadyPresent);
    }

    driver
        .create_portal(tpg, &portal)
        .structured(DriverFailureError::CreatePortal {
            iqn: tpg.iqn.into(),
            portal: portal.to_string(),
        })?;
    Ok(StepOutcome::Created)
}

/// Compares portals by address value, so that differently spelled IPv6
/// addresses match.
fn same_portal(a: &NetworkPortal, b: &NetworkPortal) -> bool {
    if a.port != b.port {
        return false;
    }

    match (a.ip.parse::<IpAddr>(), b.ip.parse::<IpAddr>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.ip == b.ip,
    }
}

pub(super) fn create_node_acl(
    driver: &mut dyn TargetDriver,
    tpg: TpgId,
    initiator: &str,
) -> Result<StepOutcome, TargetMgrError> {
    info!("Trying to create ACL for '{initiator}' on target '{}'", tpg.iqn);
    if inventory::list_acls(driver, tpg)?
        .iter()
        .any(|acl| acl == initiator)
    {
        debug!("ACL for '{initiator}' already exists");
        return Ok(StepOutcome::AlreadyPresent);
    }

    driver
        .create_node_acl(tpg, initiator)
        .structured(DriverFailureError::CreateNodeAcl {
            iqn: tpg.iqn.into(),
            initiator: initiator.into(),
        })?;
    Ok(StepOutcome::Created)
}
