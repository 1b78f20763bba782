//! Interface to the kernel target subsystem.
//!
//! The target manager never touches the live object tree directly; every read
//! and every mutation goes through a [`TargetDriver`]. The records returned by
//! the query methods are owned snapshots, they do not track later changes.

use std::fmt::{Display, Formatter, Result as FmtResult};

use anyhow::Error;
use serde::{Deserialize, Serialize};

use targetmgr_api::config::TpgAttribute;

/// Backstore plugin used for block device backed storage objects.
pub const IBLOCK_PLUGIN: &str = "iblock";

/// Identifies a TPG by its parent target and its tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TpgId<'a> {
    pub iqn: &'a str,
    pub tag: u32,
}

impl<'a> TpgId<'a> {
    pub fn new(iqn: &'a str, tag: u32) -> Self {
        Self { iqn, tag }
    }
}

impl Display for TpgId<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/tpgt_{}", self.iqn, self.tag)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StorageObject {
    pub name: String,
    pub udev_path: String,
    pub wwn: Option<String>,
}

/// A backstore (HBA) container and the storage objects inside it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Backstore {
    pub plugin: String,
    pub index: u32,
    pub storage_objects: Vec<StorageObject>,
}

/// Points at a storage object inside a backstore.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageObjectRef {
    pub plugin: String,
    pub backstore_index: u32,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkPortal {
    pub ip: String,
    pub port: u16,
}

impl Display for NetworkPortal {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if self.ip.contains(':') {
            write!(f, "[{}]:{}", self.ip, self.port)
        } else {
            write!(f, "{}:{}", self.ip, self.port)
        }
    }
}

/// A LUN attached to a TPG.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Lun {
    pub index: u32,
    pub storage_object: StorageObjectRef,
    pub udev_path: String,
}

/// An entry of an ACL's LUN map.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedLun {
    /// Index the initiator sees.
    pub index: u32,
    /// Index of the TPG LUN it refers to.
    pub tpg_lun: u32,
}

pub trait TargetDriver {
    /// Lists every backstore of every plugin.
    fn backstores(&self) -> Result<Vec<Backstore>, Error>;

    /// Lists the IQNs of all iSCSI targets. Empty if the fabric is not loaded.
    fn targets(&self) -> Result<Vec<String>, Error>;

    /// Lists the TPG tags of a target.
    fn tpgs(&self, iqn: &str) -> Result<Vec<u32>, Error>;

    /// Lists the portals of a TPG. Empty if the TPG does not exist.
    fn portals(&self, tpg: TpgId) -> Result<Vec<NetworkPortal>, Error>;

    /// Lists the initiator IQNs that have a node ACL on a TPG.
    fn node_acls(&self, tpg: TpgId) -> Result<Vec<String>, Error>;

    fn luns(&self, tpg: TpgId) -> Result<Vec<Lun>, Error>;

    fn mapped_luns(&self, tpg: TpgId, initiator: &str) -> Result<Vec<MappedLun>, Error>;

    fn tpg_attribute(&self, tpg: TpgId, attribute: TpgAttribute) -> Result<String, Error>;

    fn tpg_enabled(&self, tpg: TpgId) -> Result<bool, Error>;

    fn fabric_exists(&self) -> bool;

    /// Whether `create_portal` brings the TPG into existence when it is
    /// missing. Callers relying on that side effect must check this and call
    /// `create_tpg` themselves otherwise.
    fn creates_tpg_with_portal(&self) -> bool {
        true
    }

    /// Creates the iSCSI fabric root, loading the fabric module.
    fn ensure_fabric(&mut self) -> Result<(), Error>;

    /// Removes the iSCSI fabric root. The fabric must hold no targets.
    fn delete_fabric(&mut self) -> Result<(), Error>;

    /// Creates an empty IBlock backstore container.
    fn create_backstore(&mut self, index: u32) -> Result<(), Error>;

    /// Deletes the backstore(s) with the given index together with their
    /// storage objects.
    fn delete_backstore(&mut self, index: u32) -> Result<(), Error>;

    /// Creates an IBlock storage object bound to `udev_path` inside backstore
    /// `backstore_index`, and enables it.
    fn create_storage_object(
        &mut self,
        backstore_index: u32,
        name: &str,
        udev_path: &str,
        wwn: &str,
    ) -> Result<(), Error>;

    /// Creates a target, loading the iSCSI fabric first if needed.
    fn create_target(&mut self, iqn: &str) -> Result<(), Error>;

    /// Deletes a target and everything below it.
    fn delete_target(&mut self, iqn: &str) -> Result<(), Error>;

    fn create_tpg(&mut self, tpg: TpgId) -> Result<(), Error>;

    /// Creates a network portal on a TPG.
    ///
    /// LIO creates the TPG as a side effect when the TPG is missing, see
    /// [`TargetDriver::creates_tpg_with_portal`].
    fn create_portal(&mut self, tpg: TpgId, portal: &NetworkPortal) -> Result<(), Error>;

    /// Creates an initiator ACL. The TPG must exist, as it must for every
    /// call below that takes a [`TpgId`].
    fn create_node_acl(&mut self, tpg: TpgId, initiator: &str) -> Result<(), Error>;

    fn create_lun(
        &mut self,
        tpg: TpgId,
        index: u32,
        storage_object: &StorageObjectRef,
    ) -> Result<(), Error>;

    fn create_mapped_lun(
        &mut self,
        tpg: TpgId,
        initiator: &str,
        index: u32,
        tpg_lun: u32,
    ) -> Result<(), Error>;

    fn set_tpg_attribute(
        &mut self,
        tpg: TpgId,
        attribute: TpgAttribute,
        value: &str,
    ) -> Result<(), Error>;

    fn set_tpg_enabled(&mut self, tpg: TpgId, enabled: bool) -> Result<(), Error>;

    /// Persists the live configuration so it survives a reboot.
    fn save_config(&mut self) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portal_display() {
        let portal = NetworkPortal {
            ip: "10.0.0.1".into(),
            port: 3260,
        };
        assert_eq!(portal.to_string(), "10.0.0.1:3260");

        let portal = NetworkPortal {
            ip: "fd00::1".into(),
            port: 3261,
        };
        assert_eq!(portal.to_string(), "[fd00::1]:3261");
    }

    #[test]
    fn test_tpg_display() {
        assert_eq!(
            TpgId::new("iqn.2020-01.com.example:t1", 1).to_string(),
            "iqn.2020-01.com.example:t1/tpgt_1"
        );
    }
}
