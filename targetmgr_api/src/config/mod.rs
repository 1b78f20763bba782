use std::{collections::HashSet, net::IpAddr, path::Path};

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_ISCSI_PORT, ISCSI_NAME_PREFIXES};

mod error;
mod tpg;

pub use error::ConfigurationValidationError;
pub use tpg::{TpgAttribute, TpgAttributes};

/// Desired iSCSI topology of the host. The target manager creates every entity
/// described here that is not yet present in the live target subsystem.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct TargetManagerConfig {
    /// Targets to provision, processed in order.
    #[serde(default)]
    pub targets: Vec<TargetSpec>,
}

/// One iSCSI target together with its single TPG contents.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct TargetSpec {
    /// IQN of the target.
    pub iqn: String,

    /// Network portal the TPG listens on.
    pub portal: PortalSpec,

    /// IQN of the initiator allowed to log into this target.
    pub iqn_initiator: String,

    /// Block devices exported through this target, in LUN order.
    #[serde(default)]
    pub luns: Vec<LunSpec>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct PortalSpec {
    pub ip: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_ISCSI_PORT
}

/// An IBlock backstore to create and export as a LUN.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct LunSpec {
    /// Name of the storage object. Unique across all backstores on the host.
    pub name: String,

    /// Block device backing the storage object, e.g. `/dev/sdb` or a
    /// `/dev/disk/by-id/...` link.
    pub device: String,
}

impl TargetManagerConfig {
    /// Checks the configuration for errors that can be found without looking
    /// at the live target subsystem.
    pub fn validate(&self) -> Result<(), ConfigurationValidationError> {
        let mut seen_targets = HashSet::new();
        for target in &self.targets {
            target.validate()?;
            if !seen_targets.insert(target.iqn.as_str()) {
                return Err(ConfigurationValidationError::DuplicateTargetIqn {
                    iqn: target.iqn.clone(),
                });
            }
        }

        Ok(())
    }
}

impl TargetSpec {
    fn validate(&self) -> Result<(), ConfigurationValidationError> {
        validate_iscsi_name(&self.iqn)?;
        validate_iscsi_name(&self.iqn_initiator)?;
        self.portal.validate(&self.iqn)?;

        let mut names = HashSet::new();
        let mut devices = HashSet::new();
        for lun in &self.luns {
            lun.validate()?;
            if !names.insert(lun.name.as_str()) {
                return Err(ConfigurationValidationError::DuplicateLunName {
                    iqn: self.iqn.clone(),
                    name: lun.name.clone(),
                });
            }
            if !devices.insert(lun.device.as_str()) {
                return Err(ConfigurationValidationError::DuplicateLunDevice {
                    iqn: self.iqn.clone(),
                    device: lun.device.clone(),
                });
            }
        }

        Ok(())
    }
}

impl PortalSpec {
    fn validate(&self, iqn: &str) -> Result<(), ConfigurationValidationError> {
        if self.ip.parse::<IpAddr>().is_err() {
            return Err(ConfigurationValidationError::InvalidPortalAddress {
                iqn: iqn.into(),
                ip: self.ip.clone(),
            });
        }

        if self.port == 0 {
            return Err(ConfigurationValidationError::InvalidPortalPort { iqn: iqn.into() });
        }

        Ok(())
    }
}

impl LunSpec {
    fn validate(&self) -> Result<(), ConfigurationValidationError> {
        if self.name.is_empty() || self.name.contains('/') {
            return Err(ConfigurationValidationError::InvalidLunName {
                name: self.name.clone(),
            });
        }

        if !Path::new(&self.device).is_absolute() {
            return Err(ConfigurationValidationError::DevicePathNotAbsolute {
                name: self.name.clone(),
                device: self.device.clone(),
            });
        }

        Ok(())
    }
}

fn validate_iscsi_name(name: &str) -> Result<(), ConfigurationValidationError> {
    if ISCSI_NAME_PREFIXES
        .iter()
        .any(|prefix| name.len() > prefix.len() && name.starts_with(prefix))
    {
        Ok(())
    } else {
        Err(ConfigurationValidationError::InvalidIscsiName { name: name.into() })
    }
}
