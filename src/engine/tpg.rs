use log::{debug, info};

use lioutils::driver::{TargetDriver, TpgId};
use targetmgr_api::{
    config::TpgAttributes,
    error::{DriverFailureError, ReportError, TargetMgrError},
};

/// Writes every managed attribute whose live value differs from the desired
/// one. Returns the number of attributes changed.
pub(super) fn apply_attributes(
    driver: &mut dyn TargetDriver,
    tpg: TpgId,
    attributes: &TpgAttributes,
) -> Result<usize, TargetMgrError> {
    let mut changed = 0;
    for (attribute, value) in attributes.values() {
        let current = driver
            .tpg_attribute(tpg, attribute)
            .structured(DriverFailureError::ReadTpgAttribute {
                iqn: tpg.iqn.into(),
                attribute: attribute.to_string(),
            })?;
        if current == value {
            continue;
        }

        driver
            .set_tpg_attribute(tpg, attribute, value)
            .structured(DriverFailureError::SetTpgAttribute {
                iqn: tpg.iqn.into(),
                attribute: attribute.to_string(),
            })?;
        debug!("TPG attribute '{attribute}' of '{tpg}' has been set to '{value}'");
        changed += 1;
    }

    Ok(changed)
}

pub(super) fn enable(driver: &mut dyn TargetDriver, tpg: TpgId) -> Result<(), TargetMgrError> {
    info!("Enabling TPG '{tpg}'");
    driver
        .set_tpg_enabled(tpg, true)
        .structured(DriverFailureError::EnableTpg {
            iqn: tpg.iqn.into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    use lioutils::testutils::{DriverCall, DriverOperation, FakeDriver};
    use targetmgr_api::{config::TpgAttribute, error::ErrorKind};

    const IQN: &str = "iqn.2020-01.com.example:t1";

    #[test]
    fn test_apply_attributes() {
        let mut driver = FakeDriver::new().with_target(IQN);
        let tpg = TpgId::new(IQN, 1);

        assert_eq!(
            apply_attributes(&mut driver, tpg, &TpgAttributes::default()).unwrap(),
            4
        );
        assert_eq!(
            driver.tpg_attribute(tpg, TpgAttribute::Authentication).unwrap(),
            "0"
        );
        assert_eq!(
            driver
                .tpg_attribute(tpg, TpgAttribute::GenerateNodeAcls)
                .unwrap(),
            "1"
        );

        // Already matching attributes are not written again
        driver.clear_journal();
        assert_eq!(
            apply_attributes(&mut driver, tpg, &TpgAttributes::default()).unwrap(),
            0
        );
        assert!(driver.journal().is_empty());
    }

    #[test]
    fn test_apply_single_changed_attribute() {
        let mut driver = FakeDriver::new().with_target(IQN);
        let tpg = TpgId::new(IQN, 1);
        apply_attributes(&mut driver, tpg, &TpgAttributes::default()).unwrap();
        driver
            .set_tpg_attribute(tpg, TpgAttribute::DemoModeWriteProtect, "1")
            .unwrap();
        driver.clear_journal();

        assert_eq!(
            apply_attributes(&mut driver, tpg, &TpgAttributes::default()).unwrap(),
            1
        );
        assert_eq!(
            driver.journal(),
            &[DriverCall::SetTpgAttribute {
                iqn: IQN.into(),
                attribute: TpgAttribute::DemoModeWriteProtect,
                value: "0".into(),
            }]
        );
    }

    #[test]
    fn test_apply_attributes_failure() {
        let mut driver = FakeDriver::new().with_target(IQN);
        driver.fail_next(DriverOperation::SetTpgAttribute);

        let error =
            apply_attributes(&mut driver, TpgId::new(IQN, 1), &TpgAttributes::default())
                .unwrap_err();
        assert_eq!(
            error.kind(),
            &ErrorKind::DriverFailure(DriverFailureError::SetTpgAttribute {
                iqn: IQN.into(),
                attribute: "authentication".into(),
            })
        );
    }

    #[test]
    fn test_enable() {
        let mut driver = FakeDriver::new().with_target(IQN);
        let tpg = TpgId::new(IQN, 1);
        assert!(!driver.tpg_enabled(tpg).unwrap());

        enable(&mut driver, tpg).unwrap();
        assert!(driver.tpg_enabled(tpg).unwrap());

        enable(&mut driver, TpgId::new(IQN, 2)).unwrap_err();
    }
}
