use std::{fs, path::Path};

use anyhow::{Context, Error};
use log::debug;

use targetmgr_api::{
    config::TargetManagerConfig,
    error::{InvalidInputError, ReportError, TargetMgrError},
};

/// Reads, parses and validates a configuration file. Files ending in `.json`
/// are parsed as JSON, anything else as YAML.
pub fn load(path: impl AsRef<Path>) -> Result<TargetManagerConfig, TargetMgrError> {
    let path = path.as_ref();
    debug!("Loading configuration from '{}'", path.display());

    let contents = fs::read_to_string(path).structured(InvalidInputError::LoadConfiguration {
        path: path.display().to_string(),
    })?;

    let config =
        parse(path, &contents).structured(InvalidInputError::ParseConfiguration {
            path: path.display().to_string(),
        })?;

    config
        .validate()
        .map_err(|e| TargetMgrError::new(InvalidInputError::from(e)))?;

    Ok(config)
}

fn parse(path: &Path, contents: &str) -> Result<TargetManagerConfig, Error> {
    if path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    {
        serde_json::from_str(contents).context("Failed to parse JSON")
    } else {
        serde_yaml::from_str(contents).context("Failed to parse YAML")
    }
}
