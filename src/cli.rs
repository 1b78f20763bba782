use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};

use clap::{Parser, Subcommand};
use log::LevelFilter;

use targetmgr_api::constants::{CONFIGFS_TARGET_ROOT, DEFAULT_CONFIG_PATH};

use crate::TARGETMGR_VERSION;

/// Provision LIO iSCSI targets from a declarative configuration
#[derive(Parser, Debug)]
#[clap(version = TARGETMGR_VERSION)]
pub struct Cli {
    /// Logging verbosity [OFF, ERROR, WARN, INFO, DEBUG, TRACE]
    #[arg(global = true, short, long, default_value_t = LevelFilter::Info)]
    pub verbosity: LevelFilter,

    /// Show debug output, same as `--verbosity debug`
    #[arg(global = true, short, long)]
    pub debug: bool,

    /// Additionally write JSON formatted logs to this file
    #[arg(global = true, long)]
    pub log_file: Option<PathBuf>,

    /// On failure, write the error as YAML to this file
    #[arg(global = true, long)]
    pub error_file: Option<PathBuf>,

    /// Root of the target subsystem in configfs
    #[arg(global = true, long, hide = true, default_value = CONFIGFS_TARGET_ROOT)]
    pub configfs_root: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Level of the console logger.
    pub fn log_level(&self) -> LevelFilter {
        if self.debug {
            self.verbosity.max(LevelFilter::Debug)
        } else {
            self.verbosity
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the configured targets on a host without iSCSI resources
    Apply {
        /// Path to the target manager configuration
        #[clap(index = 1, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Delete all iSCSI targets, all backstores and the iSCSI fabric
    Teardown,

    /// Validate a target manager configuration without touching the host
    Validate {
        /// Path to the target manager configuration
        #[clap(index = 1, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Print the live targets and backstores
    Show,
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Apply { .. } => "apply",
            Commands::Teardown => "teardown",
            Commands::Validate { .. } => "validate",
            Commands::Show => "show",
        }
    }
}

impl Display for Commands {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.name())
    }
}
