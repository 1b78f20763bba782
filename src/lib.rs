use std::{fs, path::Path};

use anyhow::{Context, Error};
use log::info;

use lioutils::driver::TargetDriver;
use targetmgr_api::{
    config::TargetManagerConfig,
    error::{PersistenceError, ReportError, TargetMgrError},
};

pub mod cli;
pub mod config;
mod engine;
mod logging;
pub mod validation;

pub use engine::{
    allocator::{next_free_index, IndexScope},
    check_empty,
    inventory::LiveTopology,
    teardown::TeardownReport,
    EntityCounts, EntityKind, Provisioner, ReconcileReport, SkipReason, StepOutcome,
};
pub use logging::{file_log::FileLog, multilog::MultiLogger};

/// Target manager version as provided by environment variables at build time
pub const TARGETMGR_VERSION: &str = match option_env!("TARGETMGR_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};

/// Writes a failed command's error as YAML, for tooling that drives the
/// target manager.
pub fn write_error_report(path: impl AsRef<Path>, error: &TargetMgrError) -> Result<(), Error> {
    let path = path.as_ref();
    let report = serde_yaml::to_string(error).context("Failed to serialize error")?;
    fs::write(path, report)
        .with_context(|| format!("Failed to write error report to '{}'", path.display()))
}

/// Entry point for the commands that touch the target subsystem.
pub struct TargetManager<D> {
    driver: D,
}

impl<D: TargetDriver> TargetManager<D> {
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Provisions the configured topology on an empty target subsystem and
    /// persists the result.
    pub fn apply(
        &mut self,
        config: &TargetManagerConfig,
    ) -> Result<ReconcileReport, TargetMgrError> {
        let report = Provisioner::new(&mut self.driver).reconcile(&config.targets)?;

        self.driver
            .save_config()
            .structured(PersistenceError::SaveConfiguration)?;
        info!("Saved the target configuration");

        Ok(report)
    }

    /// Removes every target, every backstore and the iSCSI fabric.
    pub fn teardown(&mut self) -> Result<TeardownReport, TargetMgrError> {
        engine::teardown::teardown_all(&mut self.driver)
    }

    pub fn show(&self) -> Result<LiveTopology, TargetMgrError> {
        LiveTopology::read(&self.driver)
    }
}
