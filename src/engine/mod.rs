//! Reconciliation of the desired iSCSI topology against the live target
//! subsystem.

use std::collections::BTreeMap;

use log::{debug, info};
use serde::Serialize;
use strum_macros::Display;

use lioutils::driver::TargetDriver;
use targetmgr_api::{
    config::{TargetSpec, TpgAttributes},
    error::{
        DriverFailureError, NotEmptyError, ReportError, TargetMgrError, TargetMgrResultExt,
    },
};

pub mod allocator;
mod backstore;
pub mod inventory;
mod lun;
mod target;
pub mod teardown;
mod tpg;

/// Why a provisioning step did nothing although its entity is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The device is already bound to a storage object with another name.
    DeviceInUse,
    /// No storage object with the LUN's name exists to attach.
    NoStorageObject,
    /// The LUN to map is not attached to the TPG.
    NotAttached,
}

/// Result of a single idempotent provisioning step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Created,
    AlreadyPresent,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Target,
    Tpg,
    Portal,
    NodeAcl,
    Backstore,
    Lun,
    MappedLun,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub created: usize,
    pub already_present: usize,
    pub skipped: usize,
}

/// Summary of a provisioning run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub entities: BTreeMap<EntityKind, EntityCounts>,
    pub changed_attributes: usize,
    pub enabled_tpgs: usize,
}

impl ReconcileReport {
    fn record(&mut self, kind: EntityKind, outcome: StepOutcome) {
        let counts = self.entities.entry(kind).or_default();
        match outcome {
            StepOutcome::Created => counts.created += 1,
            StepOutcome::AlreadyPresent => counts.already_present += 1,
            StepOutcome::Skipped(_) => counts.skipped += 1,
        }
    }

    pub fn counts(&self, kind: EntityKind) -> EntityCounts {
        self.entities.get(&kind).copied().unwrap_or_default()
    }

    /// Number of entities of any kind created by the run.
    pub fn total_created(&self) -> usize {
        self.entities.values().map(|c| c.created).sum()
    }
}

/// Fails with a `NotEmpty` error if any backstore or target exists.
pub fn check_empty(driver: &dyn TargetDriver) -> Result<(), TargetMgrError> {
    let backstores = inventory::list_backstore_indices(driver)?.len();
    if backstores > 0 {
        return Err(TargetMgrError::new(NotEmptyError::BackstoresExist {
            count: backstores,
        }));
    }

    let targets = inventory::list_targets(driver)?.len();
    if targets > 0 {
        return Err(TargetMgrError::new(NotEmptyError::TargetsExist {
            count: targets,
        }));
    }

    Ok(())
}

/// Creates the entities of the desired topology that are missing from the
/// live tree, in dependency order.
pub struct Provisioner<'a> {
    driver: &'a mut dyn TargetDriver,
    attributes: TpgAttributes,
}

impl<'a> Provisioner<'a> {
    pub fn new(driver: &'a mut dyn TargetDriver) -> Self {
        Self {
            driver,
            attributes: TpgAttributes::default(),
        }
    }

    /// Builds the topology from an empty target subsystem. Refuses to touch
    /// anything if backstores or targets already exist.
    pub fn reconcile(&mut self, targets: &[TargetSpec]) -> Result<ReconcileReport, TargetMgrError> {
        check_empty(self.driver).message("Refusing to provision a non-empty target subsystem")?;

        debug!("Loading the iSCSI fabric");
        self.driver
            .ensure_fabric()
            .structured(DriverFailureError::EnsureFabric)?;

        self.provision(targets)
    }

    /// Provisions every target in order, skipping whatever already exists.
    /// The first failure aborts the run and leaves the tree as it is.
    pub fn provision(&mut self, targets: &[TargetSpec]) -> Result<ReconcileReport, TargetMgrError> {
        let mut report = ReconcileReport::default();
        for spec in targets {
            self.provision_target(spec, &mut report)
                .message(format!("Failed to provision target '{}'", spec.iqn))?;
        }

        info!(
            "Provisioned {} target(s), created {} entities and changed {} TPG attribute(s)",
            targets.len(),
            report.total_created(),
            report.changed_attributes
        );
        Ok(report)
    }

    fn provision_target(
        &mut self,
        spec: &TargetSpec,
        report: &mut ReconcileReport,
    ) -> Result<(), TargetMgrError> {
        report.record(
            EntityKind::Target,
            target::create_target(self.driver, &spec.iqn)?,
        );

        let (tpg, tpg_outcome) = target::prepare_tpg(self.driver, &spec.iqn)?;
        let portal_outcome = target::create_portal(self.driver, tpg, &spec.portal)?;
        report.record(EntityKind::Tpg, tpg_outcome.unwrap_or(portal_outcome));
        report.record(EntityKind::Portal, portal_outcome);

        report.record(
            EntityKind::NodeAcl,
            target::create_node_acl(self.driver, tpg, &spec.iqn_initiator)?,
        );

        report.changed_attributes += tpg::apply_attributes(self.driver, tpg, &self.attributes)?;

        for lun in &spec.luns {
            report.record(
                EntityKind::Backstore,
                backstore::create_iblock(self.driver, lun)?,
            );
            report.record(EntityKind::Lun, lun::attach(self.driver, tpg, &lun.name)?);
            report.record(
                EntityKind::MappedLun,
                lun::map(self.driver, tpg, &spec.iqn_initiator, &lun.name)?,
            );
        }

        tpg::enable(self.driver, tpg)?;
        report.enabled_tpgs += 1;

        Ok(())
    }
}
