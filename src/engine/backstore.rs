use log::{debug, info, warn};
use uuid::Uuid;

use lioutils::driver::TargetDriver;
use targetmgr_api::{
    config::LunSpec,
    error::{DriverFailureError, ReportError, TargetMgrError, TeardownError},
};

use super::{allocator::IndexScope, inventory, SkipReason, StepOutcome};

/// Creates an IBlock backstore holding one storage object for `lun`, unless a
/// storage object with the same name or on the same device already exists.
///
/// The backstore and its storage object are created as a pair: if the storage
/// object cannot be created, the fresh backstore is deleted again before the
/// error is returned.
pub(super) fn create_iblock(
    driver: &mut dyn TargetDriver,
    lun: &LunSpec,
) -> Result<StepOutcome, TargetMgrError> {
    info!("Trying to create backstore '{}'", lun.name);
    let existing = inventory::list_backstores(driver)?;
    if existing.iter().any(|b| b.name == lun.name) {
        debug!("IBlock storage object '{}' already exists", lun.name);
        return Ok(StepOutcome::AlreadyPresent);
    }
    if let Some(owner) = existing.iter().find(|b| b.device == lun.device) {
        info!(
            "Device '{}' is already used by storage object '{}', not creating '{}'",
            lun.device, owner.name, lun.name
        );
        return Ok(StepOutcome::Skipped(SkipReason::DeviceInUse));
    }

    let index = IndexScope::Backstore.next_free(inventory::list_backstore_indices(driver)?);
    debug!("Creating backstore {index} for '{}'", lun.name);
    driver
        .create_backstore(index)
        .structured(DriverFailureError::CreateBackstore { index })?;

    let wwn = Uuid::new_v4().to_string();
    if let Err(e) = driver
        .create_storage_object(index, &lun.name, &lun.device, &wwn)
        .structured(DriverFailureError::CreateStorageObject {
            name: lun.name.clone(),
            device: lun.device.clone(),
        })
    {
        warn!(
            "Failed to create storage object '{}', deleting backstore {index}",
            lun.name
        );
        return match driver
            .delete_backstore(index)
            .structured(TeardownError::DeleteBackstore { index })
        {
            Ok(()) => Err(e),
            Err(rollback_error) => Err(e.secondary_error_context(rollback_error)),
        };
    }

    Ok(StepOutcome::Created)
}

#[cfg(test)]
mod tests {
    use super::*;

    use lioutils::testutils::{DriverCall, DriverOperation, FakeDriver};
    use targetmgr_api::error::ErrorKind;

    fn lun(name: &str, device: &str) -> LunSpec {
        LunSpec {
            name: name.into(),
            device: device.into(),
        }
    }

    #[test]
    fn test_create_iblock() {
        let mut driver = FakeDriver::new();

        assert_eq!(
            create_iblock(&mut driver, &lun("lun0", "/dev/sdb")).unwrap(),
            StepOutcome::Created
        );
        assert_eq!(
            create_iblock(&mut driver, &lun("lun1", "/dev/sdc")).unwrap(),
            StepOutcome::Created
        );

        let backstores = driver.backstores().unwrap();
        assert_eq!(backstores.len(), 2);
        assert_eq!(backstores[0].index, 0);
        assert_eq!(backstores[0].storage_objects[0].name, "lun0");
        assert_eq!(backstores[1].index, 1);
        assert_eq!(backstores[1].storage_objects[0].udev_path, "/dev/sdc");
        assert!(backstores[1].storage_objects[0].wwn.is_some());
    }

    #[test]
    fn test_existing_name_or_device() {
        let mut driver = FakeDriver::new().with_iblock(4, "lun0", "/dev/sdb");

        assert_eq!(
            create_iblock(&mut driver, &lun("lun0", "/dev/sdx")).unwrap(),
            StepOutcome::AlreadyPresent
        );
        assert_eq!(
            create_iblock(&mut driver, &lun("other", "/dev/sdb")).unwrap(),
            StepOutcome::Skipped(SkipReason::DeviceInUse)
        );
        assert!(driver.journal().is_empty());

        // Allocation continues above the highest index in use
        create_iblock(&mut driver, &lun("lun1", "/dev/sdc")).unwrap();
        assert_eq!(
            driver.journal()[0],
            DriverCall::CreateBackstore { index: 5 }
        );
    }

    #[test]
    fn test_rollback() {
        let mut driver = FakeDriver::new().with_iblock(0, "lun0", "/dev/sdb");
        driver.fail_next(DriverOperation::CreateStorageObject);

        let error = create_iblock(&mut driver, &lun("lun1", "/dev/sdc")).unwrap_err();
        assert_eq!(
            error.kind(),
            &ErrorKind::DriverFailure(DriverFailureError::CreateStorageObject {
                name: "lun1".into(),
                device: "/dev/sdc".into(),
            })
        );
        assert_eq!(
            driver.journal(),
            &[
                DriverCall::CreateBackstore { index: 1 },
                DriverCall::DeleteBackstore { index: 1 },
            ]
        );

        let backstores = driver.backstores().unwrap();
        assert_eq!(backstores.len(), 1);
        assert_eq!(backstores[0].index, 0);
    }

    #[test]
    fn test_failed_rollback() {
        let mut driver = FakeDriver::new();
        driver.fail_next(DriverOperation::CreateStorageObject);
        driver.fail_next(DriverOperation::DeleteBackstore);

        let error = create_iblock(&mut driver, &lun("lun0", "/dev/sdb")).unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::DriverFailure(_)));
        assert!(format!("{error:?}").contains("Failed to delete backstore 0"));
    }

    #[test]
    fn test_backstore_creation_failure() {
        let mut driver = FakeDriver::new();
        driver.fail_next(DriverOperation::CreateBackstore);

        let error = create_iblock(&mut driver, &lun("lun0", "/dev/sdb")).unwrap_err();
        assert_eq!(
            error.kind(),
            &ErrorKind::DriverFailure(DriverFailureError::CreateBackstore { index: 0 })
        );
        assert!(driver.journal().is_empty());
    }
}
