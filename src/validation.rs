use std::path::Path;

use log::{debug, info};

use targetmgr_api::error::{InternalError, ReportError, TargetMgrError, TargetMgrResultExt};

use crate::config;

pub fn validate_config_file(path: impl AsRef<Path>) -> Result<(), TargetMgrError> {
    info!(
        "Validating target manager configuration file: {}",
        path.as_ref().display()
    );

    let config = config::load(path.as_ref()).message("Configuration is invalid")?;

    info!(
        "Configuration is valid, it describes {} target(s)",
        config.targets.len()
    );
    debug!(
        "Parsed contents:\n{}",
        serde_yaml::to_string(&config)
            .structured(InternalError::Internal("Failed to serialize configuration"))?
    );
    Ok(())
}
