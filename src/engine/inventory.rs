//! Read-only view of the live target subsystem.
//!
//! Every function re-queries the driver. Nothing is cached, so callers must
//! call again after any mutation of the set they are about to inspect.

use std::collections::BTreeMap;

use serde::Serialize;
use strum::IntoEnumIterator;

use lioutils::driver::{Backstore, Lun, MappedLun, NetworkPortal, TargetDriver, TpgId};
use targetmgr_api::{
    config::TpgAttribute,
    error::{DriverFailureError, ReportError, TargetMgrError, TargetMgrResultExt},
};

/// A storage object together with the index of the backstore holding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackstoreRecord {
    pub plugin: String,
    pub index: u32,
    pub name: String,
    pub device: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpgRecord<'a> {
    pub iqn: &'a str,
    pub tag: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedLunRecord {
    pub lun: u32,
    pub name: String,
    pub device: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedLunRecord {
    pub lun: u32,
    pub tpg_lun: u32,
}

fn query_failed(entity: impl Into<String>) -> DriverFailureError {
    DriverFailureError::QueryInventory {
        entity: entity.into(),
    }
}

/// Indices of all backstores, including those without a storage object.
pub fn list_backstore_indices(driver: &dyn TargetDriver) -> Result<Vec<u32>, TargetMgrError> {
    Ok(driver
        .backstores()
        .structured(query_failed("backstores"))?
        .into_iter()
        .map(|backstore| backstore.index)
        .collect())
}

/// Every storage object of every backstore.
pub fn list_backstores(driver: &dyn TargetDriver) -> Result<Vec<BackstoreRecord>, TargetMgrError> {
    Ok(driver
        .backstores()
        .structured(query_failed("backstores"))?
        .into_iter()
        .flat_map(|backstore| {
            let Backstore {
                plugin,
                index,
                storage_objects,
            } = backstore;
            storage_objects
                .into_iter()
                .map(move |so| BackstoreRecord {
                    plugin: plugin.clone(),
                    index,
                    name: so.name,
                    device: so.udev_path,
                })
        })
        .collect())
}

pub fn list_targets(driver: &dyn TargetDriver) -> Result<Vec<String>, TargetMgrError> {
    driver.targets().structured(query_failed("targets"))
}

pub fn list_tpgs<'a>(
    driver: &dyn TargetDriver,
    iqn: &'a str,
) -> Result<Vec<TpgRecord<'a>>, TargetMgrError> {
    Ok(driver
        .tpgs(iqn)
        .structured(query_failed(format!("TPGs of '{iqn}'")))?
        .into_iter()
        .map(|tag| TpgRecord { iqn, tag })
        .collect())
}

pub fn list_portals(
    driver: &dyn TargetDriver,
    tpg: TpgId,
) -> Result<Vec<NetworkPortal>, TargetMgrError> {
    driver
        .portals(tpg)
        .structured(query_failed(format!("portals of '{tpg}'")))
}

pub fn list_acls(driver: &dyn TargetDriver, tpg: TpgId) -> Result<Vec<String>, TargetMgrError> {
    driver
        .node_acls(tpg)
        .structured(query_failed(format!("node ACLs of '{tpg}'")))
}

pub fn list_attached_luns(
    driver: &dyn TargetDriver,
    tpg: TpgId,
) -> Result<Vec<AttachedLunRecord>, TargetMgrError> {
    Ok(driver
        .luns(tpg)
        .structured(query_failed(format!("LUNs of '{tpg}'")))?
        .into_iter()
        .map(|lun| AttachedLunRecord {
            lun: lun.index,
            name: lun.storage_object.name,
            device: lun.udev_path,
        })
        .collect())
}

pub fn list_mapped_luns(
    driver: &dyn TargetDriver,
    tpg: TpgId,
    initiator: &str,
) -> Result<Vec<MappedLunRecord>, TargetMgrError> {
    Ok(driver
        .mapped_luns(tpg, initiator)
        .structured(query_failed(format!(
            "mapped LUNs of '{initiator}' on '{tpg}'"
        )))?
        .into_iter()
        .map(|mapped| MappedLunRecord {
            lun: mapped.index,
            tpg_lun: mapped.tpg_lun,
        })
        .collect())
}

/// Full snapshot of the live tree, as printed by `show`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct LiveTopology {
    pub fabric_loaded: bool,
    pub backstores: Vec<Backstore>,
    pub targets: Vec<LiveTarget>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct LiveTarget {
    pub iqn: String,
    pub tpgs: Vec<LiveTpg>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct LiveTpg {
    pub tag: u32,
    pub enabled: bool,
    pub attributes: BTreeMap<String, String>,
    pub portals: Vec<NetworkPortal>,
    pub acls: Vec<LiveAcl>,
    pub luns: Vec<Lun>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct LiveAcl {
    pub initiator: String,
    pub mapped_luns: Vec<MappedLun>,
}

impl LiveTopology {
    pub fn read(driver: &dyn TargetDriver) -> Result<Self, TargetMgrError> {
        let backstores = driver
            .backstores()
            .structured(query_failed("backstores"))?;

        let mut targets = Vec::new();
        for iqn in list_targets(driver)? {
            let mut tpgs = Vec::new();
            for record in list_tpgs(driver, &iqn)? {
                tpgs.push(
                    read_tpg(driver, TpgId::new(record.iqn, record.tag))
                        .message(format!("Failed to read target '{iqn}'"))?,
                );
            }
            targets.push(LiveTarget { iqn, tpgs });
        }

        Ok(Self {
            fabric_loaded: driver.fabric_exists(),
            backstores,
            targets,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.backstores.is_empty() && self.targets.is_empty()
    }
}

fn read_tpg(driver: &dyn TargetDriver, tpg: TpgId) -> Result<LiveTpg, TargetMgrError> {
    let attributes = TpgAttribute::iter()
        .map(|attribute| {
            driver
                .tpg_attribute(tpg, attribute)
                .structured(DriverFailureError::ReadTpgAttribute {
                    iqn: tpg.iqn.into(),
                    attribute: attribute.to_string(),
                })
                .map(|value| (attribute.to_string(), value))
        })
        .collect::<Result<BTreeMap<_, _>, _>>()?;

    let mut acls = Vec::new();
    for initiator in list_acls(driver, tpg)? {
        let mapped_luns = driver
            .mapped_luns(tpg, &initiator)
            .structured(query_failed(format!("mapped LUNs of '{initiator}'")))?;
        acls.push(LiveAcl {
            initiator,
            mapped_luns,
        });
    }

    Ok(LiveTpg {
        tag: tpg.tag,
        enabled: driver
            .tpg_enabled(tpg)
            .structured(query_failed(format!("state of '{tpg}'")))?,
        attributes,
        portals: list_portals(driver, tpg)?,
        acls,
        luns: driver
            .luns(tpg)
            .structured(query_failed(format!("LUNs of '{tpg}'")))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use lioutils::{
        driver::{StorageObjectRef, IBLOCK_PLUGIN},
        testutils::FakeDriver,
    };

    const IQN: &str = "iqn.2020-01.com.example:t1";
    const INITIATOR: &str = "iqn.initiator:i1";

    fn populated_driver() -> FakeDriver {
        let mut driver = FakeDriver::new()
            .with_iblock(0, "lun0", "/dev/sdb")
            .with_empty_backstore(3)
            .with_iblock(5, "lun1", "/dev/sdc")
            .with_target(IQN);
        let tpg = TpgId::new(IQN, 1);
        driver
            .create_lun(
                tpg,
                0,
                &StorageObjectRef {
                    plugin: IBLOCK_PLUGIN.into(),
                    backstore_index: 5,
                    name: "lun1".into(),
                },
            )
            .unwrap();
        driver.create_node_acl(tpg, INITIATOR).unwrap();
        driver.create_mapped_lun(tpg, INITIATOR, 2, 0).unwrap();
        driver
    }

    #[test]
    fn test_list_backstores() {
        let driver = populated_driver();

        assert_eq!(list_backstore_indices(&driver).unwrap(), vec![0, 3, 5]);
        assert_eq!(
            list_backstores(&driver).unwrap(),
            vec![
                BackstoreRecord {
                    plugin: IBLOCK_PLUGIN.into(),
                    index: 0,
                    name: "lun0".into(),
                    device: "/dev/sdb".into(),
                },
                BackstoreRecord {
                    plugin: IBLOCK_PLUGIN.into(),
                    index: 5,
                    name: "lun1".into(),
                    device: "/dev/sdc".into(),
                },
            ]
        );
    }

    #[test]
    fn test_list_target_contents() {
        let driver = populated_driver();
        let tpg = TpgId::new(IQN, 1);

        assert_eq!(list_targets(&driver).unwrap(), vec![IQN.to_string()]);
        assert_eq!(
            list_tpgs(&driver, IQN).unwrap(),
            vec![TpgRecord { iqn: IQN, tag: 1 }]
        );
        assert!(list_portals(&driver, tpg).unwrap().is_empty());
        assert_eq!(list_acls(&driver, tpg).unwrap(), vec![INITIATOR.to_string()]);
        assert_eq!(
            list_attached_luns(&driver, tpg).unwrap(),
            vec![AttachedLunRecord {
                lun: 0,
                name: "lun1".into(),
                device: "/dev/sdc".into(),
            }]
        );
        assert_eq!(
            list_mapped_luns(&driver, tpg, INITIATOR).unwrap(),
            vec![MappedLunRecord { lun: 2, tpg_lun: 0 }]
        );
        assert!(list_mapped_luns(&driver, tpg, "iqn.initiator:other")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_list_tpgs_of_missing_target() {
        let driver = FakeDriver::new();
        let error = list_tpgs(&driver, IQN).unwrap_err();
        assert!(matches!(
            error.kind(),
            targetmgr_api::error::ErrorKind::DriverFailure(DriverFailureError::QueryInventory { .. })
        ));
    }

    #[test]
    fn test_live_topology() {
        assert!(LiveTopology::read(&FakeDriver::new()).unwrap().is_empty());

        let topology = LiveTopology::read(&populated_driver()).unwrap();
        assert!(!topology.is_empty());
        assert!(topology.fabric_loaded);
        assert_eq!(topology.backstores.len(), 3);
        assert_eq!(topology.targets.len(), 1);

        let tpg = &topology.targets[0].tpgs[0];
        assert_eq!(tpg.tag, 1);
        assert!(!tpg.enabled);
        assert_eq!(tpg.attributes.len(), 4);
        assert_eq!(tpg.attributes["authentication"], "1");
        assert_eq!(tpg.acls[0].mapped_luns, vec![MappedLun { index: 2, tpg_lun: 0 }]);

        let rendered = serde_yaml::to_string(&topology).unwrap();
        assert!(rendered.contains("fabric_loaded: true"), "{rendered}");
    }
}
