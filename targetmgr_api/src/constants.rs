use const_format::formatcp;

// Configuration constants

/// Port used by a portal when the configuration does not name one.
pub const DEFAULT_ISCSI_PORT: u16 = 3260;

/// Default location of the target manager configuration.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/targetmgr/targetmgr.json";

/// Tag of the one TPG every target is provisioned with.
pub const SINGLE_TPG_TAG: u32 = 1;

/// Prefixes accepted for target and initiator names.
pub const ISCSI_NAME_PREFIXES: [&str; 3] = ["iqn.", "eui.", "naa."];

// Block of configfs path constants

/// Mount point of configfs.
pub const CONFIGFS_MOUNT_POINT: &str = "/sys/kernel/config";

/// Root of the LIO target subsystem in configfs.
pub const CONFIGFS_TARGET_ROOT: &str = formatcp!("{CONFIGFS_MOUNT_POINT}/target");

/// Directory name of the iSCSI fabric module under the target root.
pub const ISCSI_FABRIC_DIRECTORY: &str = "iscsi";

/// Full path of the iSCSI fabric root.
pub const ISCSI_FABRIC_PATH: &str = formatcp!("{CONFIGFS_TARGET_ROOT}/{ISCSI_FABRIC_DIRECTORY}");

/// Directory name of the backstore (HBA) tree under the target root.
pub const CORE_DIRECTORY: &str = "core";

/// Binary used to persist the live configuration.
pub const TARGETCLI_BINARY: &str = "targetcli";
