//! Validation errors for the target manager configuration.

use serde::{Deserialize, Serialize};

/// Errors detected during static validation of the configuration, i.e. errors
/// that can be detected without touching the live target subsystem.
#[derive(thiserror::Error, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigurationValidationError {
    #[error("Device '{device}' of LUN '{name}' must be an absolute path")]
    DevicePathNotAbsolute { name: String, device: String },

    #[error("Target '{iqn}' lists device '{device}' more than once")]
    DuplicateLunDevice { iqn: String, device: String },

    #[error("Target '{iqn}' lists LUN '{name}' more than once")]
    DuplicateLunName { iqn: String, name: String },

    #[error("Target '{iqn}' is configured more than once")]
    DuplicateTargetIqn { iqn: String },

    #[error("Name '{name}' is not a valid iSCSI name, must start with 'iqn.', 'eui.' or 'naa.'")]
    InvalidIscsiName { name: String },

    #[error("LUN name '{name}' is invalid, must be non-empty and contain no '/'")]
    InvalidLunName { name: String },

    #[error("Portal address '{ip}' of target '{iqn}' is not a valid IP address")]
    InvalidPortalAddress { iqn: String, ip: String },

    #[error("Portal port of target '{iqn}' must be non-zero")]
    InvalidPortalPort { iqn: String },
}
