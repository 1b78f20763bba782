use std::process::Command;

use anyhow::{Context, Error};
use log::info;

use targetmgr_api::constants::TARGETCLI_BINARY;

use crate::exe::RunAndCheck;

/// Writes the live target configuration to targetcli's default save file, so
/// that the target service restores it on boot.
pub fn save_config() -> Result<(), Error> {
    info!("Saving live target configuration");

    save_config_command()
        .run_and_check()
        .context("Failed to run targetcli saveconfig")
}

fn save_config_command() -> Command {
    let mut command = Command::new(TARGETCLI_BINARY);
    command.arg("saveconfig");
    command
}
