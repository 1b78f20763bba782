//! In-memory [`TargetDriver`] for tests.
//!
//! The fake mirrors the preconditions configfs enforces (parents must exist,
//! names and indices must be free) and records every successful mutation in a
//! journal, so tests can assert on call order as well as on the final tree.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{bail, Context, Error};
use strum_macros::EnumDiscriminants;

use targetmgr_api::config::TpgAttribute;

use crate::driver::{
    Backstore, Lun, MappedLun, NetworkPortal, StorageObject, StorageObjectRef, TargetDriver,
    TpgId, IBLOCK_PLUGIN,
};

/// A successful mutating call, as recorded in the journal.
#[derive(Debug, Clone, PartialEq, Eq, EnumDiscriminants)]
#[strum_discriminants(name(DriverOperation), derive(Hash))]
pub enum DriverCall {
    EnsureFabric,
    DeleteFabric,
    CreateBackstore {
        index: u32,
    },
    DeleteBackstore {
        index: u32,
    },
    CreateStorageObject {
        backstore_index: u32,
        name: String,
        udev_path: String,
    },
    CreateTarget {
        iqn: String,
    },
    DeleteTarget {
        iqn: String,
    },
    CreateTpg {
        iqn: String,
        tag: u32,
    },
    CreatePortal {
        iqn: String,
        portal: NetworkPortal,
    },
    CreateNodeAcl {
        iqn: String,
        initiator: String,
    },
    CreateLun {
        iqn: String,
        index: u32,
        name: String,
    },
    CreateMappedLun {
        iqn: String,
        initiator: String,
        index: u32,
        tpg_lun: u32,
    },
    SetTpgAttribute {
        iqn: String,
        attribute: TpgAttribute,
        value: String,
    },
    SetTpgEnabled {
        iqn: String,
        enabled: bool,
    },
    SaveConfig,
}

#[derive(Debug)]
struct FakeTpg {
    enabled: bool,
    attributes: HashMap<TpgAttribute, String>,
    portals: Vec<NetworkPortal>,
    /// Initiator IQN to mapped LUN index to TPG LUN index.
    acls: BTreeMap<String, BTreeMap<u32, u32>>,
    luns: BTreeMap<u32, StorageObjectRef>,
}

impl Default for FakeTpg {
    /// Kernel defaults of a fresh iSCSI TPG.
    fn default() -> Self {
        Self {
            enabled: false,
            attributes: HashMap::from([
                (TpgAttribute::Authentication, "1".into()),
                (TpgAttribute::CacheDynamicAcls, "0".into()),
                (TpgAttribute::DemoModeWriteProtect, "1".into()),
                (TpgAttribute::GenerateNodeAcls, "0".into()),
            ]),
            portals: Vec::new(),
            acls: BTreeMap::new(),
            luns: BTreeMap::new(),
        }
    }
}

pub struct FakeDriver {
    fabric: bool,
    backstores: BTreeMap<u32, Vec<StorageObject>>,
    targets: BTreeMap<String, BTreeMap<u32, FakeTpg>>,
    implicit_tpg: bool,
    failures: HashSet<DriverOperation>,
    journal: Vec<DriverCall>,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            fabric: false,
            backstores: BTreeMap::new(),
            targets: BTreeMap::new(),
            implicit_tpg: true,
            failures: HashSet::new(),
            journal: Vec::new(),
        }
    }

    /// Makes `create_portal` fail on a missing TPG instead of creating it.
    pub fn without_implicit_tpg(mut self) -> Self {
        self.implicit_tpg = false;
        self
    }

    /// Seeds an IBlock backstore holding one storage object, without recording
    /// a call.
    pub fn with_iblock(mut self, index: u32, name: &str, udev_path: &str) -> Self {
        self.backstores.insert(
            index,
            vec![StorageObject {
                name: name.into(),
                udev_path: udev_path.into(),
                wwn: None,
            }],
        );
        self
    }

    /// Seeds an empty backstore, without recording a call.
    pub fn with_empty_backstore(mut self, index: u32) -> Self {
        self.backstores.insert(index, Vec::new());
        self
    }

    /// Seeds a target with an empty TPG 1, without recording a call.
    pub fn with_target(mut self, iqn: &str) -> Self {
        self.fabric = true;
        self.targets
            .insert(iqn.into(), BTreeMap::from([(1, FakeTpg::default())]));
        self
    }

    /// Makes the next call of the given operation fail.
    pub fn fail_next(&mut self, operation: DriverOperation) {
        self.failures.insert(operation);
    }

    pub fn journal(&self) -> &[DriverCall] {
        &self.journal
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    /// Number of recorded calls of the given operation.
    pub fn count(&self, operation: DriverOperation) -> usize {
        self.journal
            .iter()
            .filter(|call| DriverOperation::from(*call) == operation)
            .count()
    }

    /// Position of the first recorded call matching the predicate.
    pub fn position(&self, predicate: impl Fn(&DriverCall) -> bool) -> Option<usize> {
        self.journal.iter().position(predicate)
    }

    fn record(&mut self, call: DriverCall) -> Result<(), Error> {
        let operation = DriverOperation::from(&call);
        if self.failures.remove(&operation) {
            bail!("Injected failure of {operation:?}");
        }

        self.journal.push(call);
        Ok(())
    }

    fn tpg(&self, tpg: TpgId) -> Result<&FakeTpg, Error> {
        self.targets
            .get(tpg.iqn)
            .and_then(|tpgs| tpgs.get(&tpg.tag))
            .with_context(|| format!("TPG '{tpg}' does not exist"))
    }

    fn tpg_mut(&mut self, tpg: TpgId) -> Result<&mut FakeTpg, Error> {
        self.targets
            .get_mut(tpg.iqn)
            .and_then(|tpgs| tpgs.get_mut(&tpg.tag))
            .with_context(|| format!("TPG '{tpg}' does not exist"))
    }

    fn storage_object(&self, storage_object: &StorageObjectRef) -> Option<&StorageObject> {
        if storage_object.plugin != IBLOCK_PLUGIN {
            return None;
        }
        self.backstores
            .get(&storage_object.backstore_index)?
            .iter()
            .find(|so| so.name == storage_object.name)
    }
}

impl TargetDriver for FakeDriver {
    fn backstores(&self) -> Result<Vec<Backstore>, Error> {
        Ok(self
            .backstores
            .iter()
            .map(|(index, storage_objects)| Backstore {
                plugin: IBLOCK_PLUGIN.into(),
                index: *index,
                storage_objects: storage_objects.clone(),
            })
            .collect())
    }

    fn targets(&self) -> Result<Vec<String>, Error> {
        Ok(self.targets.keys().cloned().collect())
    }

    fn tpgs(&self, iqn: &str) -> Result<Vec<u32>, Error> {
        Ok(self
            .targets
            .get(iqn)
            .with_context(|| format!("Target '{iqn}' does not exist"))?
            .keys()
            .copied()
            .collect())
    }

    fn portals(&self, tpg: TpgId) -> Result<Vec<NetworkPortal>, Error> {
        Ok(self
            .tpg(tpg)
            .map(|t| t.portals.clone())
            .unwrap_or_default())
    }

    fn node_acls(&self, tpg: TpgId) -> Result<Vec<String>, Error> {
        Ok(self
            .tpg(tpg)
            .map(|t| t.acls.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn luns(&self, tpg: TpgId) -> Result<Vec<Lun>, Error> {
        let Ok(fake_tpg) = self.tpg(tpg) else {
            return Ok(Vec::new());
        };

        Ok(fake_tpg
            .luns
            .iter()
            .map(|(index, storage_object)| Lun {
                index: *index,
                storage_object: storage_object.clone(),
                udev_path: self
                    .storage_object(storage_object)
                    .map(|so| so.udev_path.clone())
                    .unwrap_or_default(),
            })
            .collect())
    }

    fn mapped_luns(&self, tpg: TpgId, initiator: &str) -> Result<Vec<MappedLun>, Error> {
        Ok(self
            .tpg(tpg)
            .ok()
            .and_then(|t| t.acls.get(initiator))
            .map(|map| {
                map.iter()
                    .map(|(index, tpg_lun)| MappedLun {
                        index: *index,
                        tpg_lun: *tpg_lun,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn tpg_attribute(&self, tpg: TpgId, attribute: TpgAttribute) -> Result<String, Error> {
        self.tpg(tpg)?
            .attributes
            .get(&attribute)
            .cloned()
            .with_context(|| format!("TPG '{tpg}' has no attribute '{attribute}'"))
    }

    fn tpg_enabled(&self, tpg: TpgId) -> Result<bool, Error> {
        Ok(self.tpg(tpg)?.enabled)
    }

    fn fabric_exists(&self) -> bool {
        self.fabric
    }

    fn creates_tpg_with_portal(&self) -> bool {
        self.implicit_tpg
    }

    fn ensure_fabric(&mut self) -> Result<(), Error> {
        self.record(DriverCall::EnsureFabric)?;
        self.fabric = true;
        Ok(())
    }

    fn delete_fabric(&mut self) -> Result<(), Error> {
        if !self.fabric {
            bail!("Fabric does not exist");
        }
        if !self.targets.is_empty() {
            bail!("Fabric still holds {} target(s)", self.targets.len());
        }

        self.record(DriverCall::DeleteFabric)?;
        self.fabric = false;
        Ok(())
    }

    fn create_backstore(&mut self, index: u32) -> Result<(), Error> {
        if self.backstores.contains_key(&index) {
            bail!("Backstore {index} already exists");
        }

        self.record(DriverCall::CreateBackstore { index })?;
        self.backstores.insert(index, Vec::new());
        Ok(())
    }

    fn delete_backstore(&mut self, index: u32) -> Result<(), Error> {
        if !self.backstores.contains_key(&index) {
            bail!("Backstore {index} does not exist");
        }

        self.record(DriverCall::DeleteBackstore { index })?;
        self.backstores.remove(&index);
        Ok(())
    }

    fn create_storage_object(
        &mut self,
        backstore_index: u32,
        name: &str,
        udev_path: &str,
        wwn: &str,
    ) -> Result<(), Error> {
        let Some(storage_objects) = self.backstores.get(&backstore_index) else {
            bail!("Backstore {backstore_index} does not exist");
        };
        if storage_objects.iter().any(|so| so.name == name) {
            bail!("Storage object '{name}' already exists");
        }

        self.record(DriverCall::CreateStorageObject {
            backstore_index,
            name: name.into(),
            udev_path: udev_path.into(),
        })?;
        if let Some(storage_objects) = self.backstores.get_mut(&backstore_index) {
            storage_objects.push(StorageObject {
                name: name.into(),
                udev_path: udev_path.into(),
                wwn: Some(wwn.into()),
            });
        }
        Ok(())
    }

    fn create_target(&mut self, iqn: &str) -> Result<(), Error> {
        if self.targets.contains_key(iqn) {
            bail!("Target '{iqn}' already exists");
        }

        self.record(DriverCall::CreateTarget { iqn: iqn.into() })?;
        self.fabric = true;
        self.targets.insert(iqn.into(), BTreeMap::new());
        Ok(())
    }

    fn delete_target(&mut self, iqn: &str) -> Result<(), Error> {
        if !self.targets.contains_key(iqn) {
            bail!("Target '{iqn}' does not exist");
        }

        self.record(DriverCall::DeleteTarget { iqn: iqn.into() })?;
        self.targets.remove(iqn);
        Ok(())
    }

    fn create_tpg(&mut self, tpg: TpgId) -> Result<(), Error> {
        match self.targets.get(tpg.iqn) {
            None => bail!("Target '{}' does not exist", tpg.iqn),
            Some(tpgs) if tpgs.contains_key(&tpg.tag) => bail!("TPG '{tpg}' already exists"),
            Some(_) => (),
        }

        self.record(DriverCall::CreateTpg {
            iqn: tpg.iqn.into(),
            tag: tpg.tag,
        })?;
        if let Some(tpgs) = self.targets.get_mut(tpg.iqn) {
            tpgs.insert(tpg.tag, FakeTpg::default());
        }
        Ok(())
    }

    fn create_portal(&mut self, tpg: TpgId, portal: &NetworkPortal) -> Result<(), Error> {
        let Some(tpgs) = self.targets.get(tpg.iqn) else {
            bail!("Target '{}' does not exist", tpg.iqn);
        };
        match tpgs.get(&tpg.tag) {
            None if !self.implicit_tpg => bail!("TPG '{tpg}' does not exist"),
            Some(t) if t.portals.contains(portal) => {
                bail!("Portal '{portal}' already exists on '{tpg}'")
            }
            _ => (),
        }

        self.record(DriverCall::CreatePortal {
            iqn: tpg.iqn.into(),
            portal: portal.clone(),
        })?;
        if let Some(tpgs) = self.targets.get_mut(tpg.iqn) {
            tpgs.entry(tpg.tag)
                .or_default()
                .portals
                .push(portal.clone());
        }
        Ok(())
    }

    fn create_node_acl(&mut self, tpg: TpgId, initiator: &str) -> Result<(), Error> {
        if self.tpg(tpg)?.acls.contains_key(initiator) {
            bail!("ACL '{initiator}' already exists on '{tpg}'");
        }

        self.record(DriverCall::CreateNodeAcl {
            iqn: tpg.iqn.into(),
            initiator: initiator.into(),
        })?;
        self.tpg_mut(tpg)?
            .acls
            .insert(initiator.into(), BTreeMap::new());
        Ok(())
    }

    fn create_lun(
        &mut self,
        tpg: TpgId,
        index: u32,
        storage_object: &StorageObjectRef,
    ) -> Result<(), Error> {
        if self.tpg(tpg)?.luns.contains_key(&index) {
            bail!("LUN {index} already exists on '{tpg}'");
        }
        if self.storage_object(storage_object).is_none() {
            bail!("Storage object '{}' does not exist", storage_object.name);
        }

        self.record(DriverCall::CreateLun {
            iqn: tpg.iqn.into(),
            index,
            name: storage_object.name.clone(),
        })?;
        self.tpg_mut(tpg)?
            .luns
            .insert(index, storage_object.clone());
        Ok(())
    }

    fn create_mapped_lun(
        &mut self,
        tpg: TpgId,
        initiator: &str,
        index: u32,
        tpg_lun: u32,
    ) -> Result<(), Error> {
        let fake_tpg = self.tpg(tpg)?;
        if !fake_tpg.luns.contains_key(&tpg_lun) {
            bail!("LUN {tpg_lun} does not exist on '{tpg}'");
        }
        match fake_tpg.acls.get(initiator) {
            None => bail!("ACL '{initiator}' does not exist on '{tpg}'"),
            Some(map) if map.contains_key(&index) => {
                bail!("Mapped LUN {index} already exists for '{initiator}'")
            }
            Some(_) => (),
        }

        self.record(DriverCall::CreateMappedLun {
            iqn: tpg.iqn.into(),
            initiator: initiator.into(),
            index,
            tpg_lun,
        })?;
        if let Some(map) = self.tpg_mut(tpg)?.acls.get_mut(initiator) {
            map.insert(index, tpg_lun);
        }
        Ok(())
    }

    fn set_tpg_attribute(
        &mut self,
        tpg: TpgId,
        attribute: TpgAttribute,
        value: &str,
    ) -> Result<(), Error> {
        self.tpg(tpg)?;

        self.record(DriverCall::SetTpgAttribute {
            iqn: tpg.iqn.into(),
            attribute,
            value: value.into(),
        })?;
        self.tpg_mut(tpg)?
            .attributes
            .insert(attribute, value.into());
        Ok(())
    }

    fn set_tpg_enabled(&mut self, tpg: TpgId, enabled: bool) -> Result<(), Error> {
        self.tpg(tpg)?;

        self.record(DriverCall::SetTpgEnabled {
            iqn: tpg.iqn.into(),
            enabled,
        })?;
        self.tpg_mut(tpg)?.enabled = enabled;
        Ok(())
    }

    fn save_config(&mut self) -> Result<(), Error> {
        self.record(DriverCall::SaveConfig)
    }
}
