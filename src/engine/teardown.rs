use std::collections::BTreeSet;

use log::{debug, info};

use lioutils::driver::TargetDriver;
use targetmgr_api::error::{ReportError, TargetMgrError, TeardownError};

use super::inventory;

/// What a teardown removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TeardownReport {
    pub targets: usize,
    pub backstores: usize,
    pub fabric_removed: bool,
}

/// Deletes every target, then every backstore, then the iSCSI fabric root.
///
/// Nothing is checked against the configuration: this resets the target
/// subsystem completely.
pub fn teardown_all(driver: &mut dyn TargetDriver) -> Result<TeardownReport, TargetMgrError> {
    info!("Cleaning up target resources");
    let mut report = TeardownReport::default();

    for iqn in inventory::list_targets(driver)? {
        debug!("Deleting target '{iqn}'");
        driver
            .delete_target(&iqn)
            .structured(TeardownError::DeleteTarget { iqn: iqn.clone() })?;
        report.targets += 1;
    }

    // Backstores of different plugins may share an index, deleting one index
    // removes all of them
    let indices = inventory::list_backstore_indices(driver)?
        .into_iter()
        .collect::<BTreeSet<_>>();
    for index in indices {
        debug!("Deleting backstore {index}");
        driver
            .delete_backstore(index)
            .structured(TeardownError::DeleteBackstore { index })?;
        report.backstores += 1;
    }

    if driver.fabric_exists() {
        debug!("Deleting the iSCSI fabric root");
        driver
            .delete_fabric()
            .structured(TeardownError::DeleteFabric)?;
        report.fabric_removed = true;
    } else {
        debug!("iSCSI fabric is not loaded");
    }

    info!(
        "Removed {} target(s) and {} backstore(s)",
        report.targets, report.backstores
    );
    Ok(report)
}
