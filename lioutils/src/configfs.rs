//! [`TargetDriver`] operating on the LIO configfs tree.
//!
//! Layout below the target root (`/sys/kernel/config/target`):
//!
//! ```text
//! core/iblock_<N>/<name>/{control,udev_path,enable,wwn/vpd_unit_serial}
//! iscsi/<iqn>/tpgt_<T>/{enable,attrib/*}
//! iscsi/<iqn>/tpgt_<T>/np/<ip>:<port>
//! iscsi/<iqn>/tpgt_<T>/lun/lun_<L>/<link to storage object>
//! iscsi/<iqn>/tpgt_<T>/acls/<initiator>/lun_<M>/<link to lun_<L>>
//! ```
//!
//! configfs only allows removing directories created with `mkdir`, and only
//! once they are empty of user-created children, so deletion walks the tree
//! bottom-up. Creating a group never creates its parent: a `mkdir` of a
//! missing target or TPG directory would create that kernel object.
//!
//! Below any root outside the configfs mount the tree is a plain directory
//! tree. There the default groups and attributes the kernel would add to a new
//! group are created by the driver, and groups are removed with their
//! contents.

use std::{
    fs,
    os::unix::fs::symlink,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Error};
use log::{debug, trace};

use targetmgr_api::{
    config::TpgAttribute,
    constants::{CONFIGFS_MOUNT_POINT, CORE_DIRECTORY, ISCSI_FABRIC_DIRECTORY},
};

use crate::{
    driver::{
        Backstore, Lun, MappedLun, NetworkPortal, StorageObject, StorageObjectRef, TargetDriver,
        TpgId, IBLOCK_PLUGIN,
    },
    targetcli,
};

const TPG_PREFIX: &str = "tpgt_";
const LUN_PREFIX: &str = "lun_";
const DISCOVERY_AUTH_DIRECTORY: &str = "discovery_auth";

const TPG_DEFAULT_GROUPS: [&str; 6] = ["acls", "attrib", "auth", "lun", "np", "param"];
const STORAGE_OBJECT_DEFAULT_GROUPS: [&str; 2] = ["attrib", "wwn"];

/// Values the kernel gives the managed attributes of a new TPG.
const TPG_ATTRIBUTE_DEFAULTS: [(TpgAttribute, &str); 4] = [
    (TpgAttribute::Authentication, "1"),
    (TpgAttribute::CacheDynamicAcls, "0"),
    (TpgAttribute::DemoModeWriteProtect, "1"),
    (TpgAttribute::GenerateNodeAcls, "0"),
];

pub struct ConfigFs {
    root: PathBuf,
    /// The kernel does not back the tree, see the module docs.
    emulated: bool,
}

impl ConfigFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let emulated = !root.starts_with(CONFIGFS_MOUNT_POINT);
        if emulated {
            debug!(
                "'{}' is outside of configfs, emulating kernel-created groups",
                root.display()
            );
        }
        Self { root, emulated }
    }

    fn core_path(&self) -> PathBuf {
        self.root.join(CORE_DIRECTORY)
    }

    fn backstore_path(&self, plugin: &str, index: u32) -> PathBuf {
        self.core_path().join(format!("{plugin}_{index}"))
    }

    fn storage_object_path(&self, storage_object: &StorageObjectRef) -> PathBuf {
        self.backstore_path(&storage_object.plugin, storage_object.backstore_index)
            .join(&storage_object.name)
    }

    fn fabric_path(&self) -> PathBuf {
        self.root.join(ISCSI_FABRIC_DIRECTORY)
    }

    fn target_path(&self, iqn: &str) -> PathBuf {
        self.fabric_path().join(iqn)
    }

    fn tpg_path(&self, tpg: TpgId) -> PathBuf {
        self.target_path(tpg.iqn)
            .join(format!("{TPG_PREFIX}{}", tpg.tag))
    }

    fn acl_path(&self, tpg: TpgId, initiator: &str) -> PathBuf {
        self.tpg_path(tpg).join("acls").join(initiator)
    }

    fn lun_path(&self, tpg: TpgId, index: u32) -> PathBuf {
        self.tpg_path(tpg)
            .join("lun")
            .join(format!("{LUN_PREFIX}{index}"))
    }

    /// Path of an existing TPG.
    fn existing_tpg_path(&self, tpg: TpgId) -> Result<PathBuf, Error> {
        let path = self.tpg_path(tpg);
        if !path.is_dir() {
            bail!("TPG '{tpg}' does not exist");
        }
        Ok(path)
    }

    fn read_storage_object(&self, plugin: &str, index: u32, name: &str) -> StorageObject {
        let path = self.backstore_path(plugin, index).join(name);
        StorageObject {
            name: name.into(),
            udev_path: read_attribute(path.join("udev_path")).unwrap_or_default(),
            wwn: read_attribute(path.join("wwn/vpd_unit_serial")).ok(),
        }
    }

    /// Adds the default groups and attributes the kernel creates along with
    /// `group`. Existing ones are left untouched.
    fn populate_defaults(
        &self,
        group: &Path,
        default_groups: &[&str],
        attributes: &[(PathBuf, &str)],
    ) -> Result<(), Error> {
        if !self.emulated {
            return Ok(());
        }

        for name in default_groups {
            let path = group.join(name);
            if !path.is_dir() {
                make_dir(&path)?;
            }
        }
        for (name, value) in attributes {
            let path = group.join(name);
            if !path.exists() {
                write_attribute(&path, value)?;
            }
        }
        Ok(())
    }

    /// Removes a group whose user-created children are already gone.
    fn remove_group(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        if !self.emulated {
            return remove_dir(path);
        }

        trace!("Removing '{}' with its contents", path.display());
        fs::remove_dir_all(path).with_context(|| format!("Could not remove '{}'", path.display()))
    }

    fn delete_tpg(&self, tpg: TpgId) -> Result<(), Error> {
        let tpg_path = self.tpg_path(tpg);
        debug!("Deleting TPG '{tpg}'");

        for initiator in subdirectories(tpg_path.join("acls"))? {
            let acl_path = self.acl_path(tpg, &initiator);
            for (_, mapped_lun) in indexed_subdirectories(&acl_path, LUN_PREFIX)? {
                remove_links_and_dir(&mapped_lun)?;
            }
            self.remove_group(&acl_path)?;
        }

        for (_, lun) in indexed_subdirectories(tpg_path.join("lun"), LUN_PREFIX)? {
            remove_links_and_dir(&lun)?;
        }

        for portal in subdirectories(tpg_path.join("np"))? {
            remove_dir(tpg_path.join("np").join(portal))?;
        }

        self.remove_group(&tpg_path)
    }
}

impl TargetDriver for ConfigFs {
    fn backstores(&self) -> Result<Vec<Backstore>, Error> {
        let mut backstores = Vec::new();
        for name in subdirectories(self.core_path())? {
            // Skips 'alua' and other non-HBA groups
            let Some((plugin, index)) = parse_backstore_name(&name) else {
                continue;
            };

            let storage_objects = subdirectories(self.core_path().join(&name))?
                .iter()
                .map(|so| self.read_storage_object(plugin, index, so))
                .collect();
            backstores.push(Backstore {
                plugin: plugin.into(),
                index,
                storage_objects,
            });
        }

        backstores.sort_by_key(|b| b.index);
        Ok(backstores)
    }

    fn targets(&self) -> Result<Vec<String>, Error> {
        Ok(subdirectories(self.fabric_path())?
            .into_iter()
            .filter(|name| name != DISCOVERY_AUTH_DIRECTORY)
            .collect())
    }

    fn tpgs(&self, iqn: &str) -> Result<Vec<u32>, Error> {
        let target_path = self.target_path(iqn);
        if !target_path.is_dir() {
            bail!("Target '{iqn}' does not exist");
        }

        Ok(indexed_subdirectories(target_path, TPG_PREFIX)?
            .into_iter()
            .map(|(tag, _)| tag)
            .collect())
    }

    fn portals(&self, tpg: TpgId) -> Result<Vec<NetworkPortal>, Error> {
        subdirectories(self.tpg_path(tpg).join("np"))?
            .iter()
            .map(|name| parse_portal_name(name))
            .collect()
    }

    fn node_acls(&self, tpg: TpgId) -> Result<Vec<String>, Error> {
        subdirectories(self.tpg_path(tpg).join("acls"))
    }

    fn luns(&self, tpg: TpgId) -> Result<Vec<Lun>, Error> {
        let mut luns = Vec::new();
        for (index, path) in indexed_subdirectories(self.tpg_path(tpg).join("lun"), LUN_PREFIX)? {
            let Some(link) = links(&path)?.into_iter().next() else {
                trace!("LUN '{}' has no storage object", path.display());
                continue;
            };

            let storage_object = parse_storage_object_link(&link)
                .with_context(|| format!("Failed to parse link of '{}'", path.display()))?;
            let udev_path =
                read_attribute(self.storage_object_path(&storage_object).join("udev_path"))
                    .unwrap_or_default();
            luns.push(Lun {
                index,
                storage_object,
                udev_path,
            });
        }

        Ok(luns)
    }

    fn mapped_luns(&self, tpg: TpgId, initiator: &str) -> Result<Vec<MappedLun>, Error> {
        let mut mapped_luns = Vec::new();
        for (index, path) in indexed_subdirectories(self.acl_path(tpg, initiator), LUN_PREFIX)? {
            let Some(link) = links(&path)?.into_iter().next() else {
                trace!("Mapped LUN '{}' has no TPG LUN", path.display());
                continue;
            };

            let tpg_lun = link
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_prefix(LUN_PREFIX))
                .and_then(|index| index.parse().ok())
                .with_context(|| format!("Unexpected link target '{}'", link.display()))?;
            mapped_luns.push(MappedLun { index, tpg_lun });
        }

        Ok(mapped_luns)
    }

    fn tpg_attribute(&self, tpg: TpgId, attribute: TpgAttribute) -> Result<String, Error> {
        read_attribute(self.tpg_path(tpg).join("attrib").join(attribute.name()))
    }

    fn tpg_enabled(&self, tpg: TpgId) -> Result<bool, Error> {
        Ok(read_attribute(self.tpg_path(tpg).join("enable"))? == "1")
    }

    fn fabric_exists(&self) -> bool {
        self.fabric_path().is_dir()
    }

    fn ensure_fabric(&mut self) -> Result<(), Error> {
        let path = self.fabric_path();
        if !path.is_dir() {
            debug!("Creating iSCSI fabric root '{}'", path.display());
            fs::create_dir_all(&path)
                .with_context(|| format!("Could not create '{}'", path.display()))?;
        }
        Ok(())
    }

    fn delete_fabric(&mut self) -> Result<(), Error> {
        self.remove_group(self.fabric_path())
    }

    fn create_backstore(&mut self, index: u32) -> Result<(), Error> {
        self.populate_defaults(&self.root, &[CORE_DIRECTORY], &[])?;
        make_dir(self.backstore_path(IBLOCK_PLUGIN, index))
    }

    fn delete_backstore(&mut self, index: u32) -> Result<(), Error> {
        let mut found = false;
        for name in subdirectories(self.core_path())? {
            if !matches!(parse_backstore_name(&name), Some((_, i)) if i == index) {
                continue;
            }

            found = true;
            let path = self.core_path().join(&name);
            for storage_object in subdirectories(&path)? {
                self.remove_group(path.join(storage_object))?;
            }
            self.remove_group(&path)?;
        }

        if !found {
            bail!("Backstore {index} does not exist");
        }
        Ok(())
    }

    fn create_storage_object(
        &mut self,
        backstore_index: u32,
        name: &str,
        udev_path: &str,
        wwn: &str,
    ) -> Result<(), Error> {
        let path = self.backstore_path(IBLOCK_PLUGIN, backstore_index).join(name);
        if !path.parent().is_some_and(Path::is_dir) {
            bail!("Backstore {backstore_index} does not exist");
        }

        make_dir(&path)?;
        self.populate_defaults(&path, &STORAGE_OBJECT_DEFAULT_GROUPS, &[])?;
        write_attribute(path.join("control"), format!("udev_path={udev_path}"))?;
        write_attribute(path.join("udev_path"), udev_path)?;
        write_attribute(path.join("wwn/vpd_unit_serial"), wwn)?;
        write_attribute(path.join("enable"), "1")
    }

    fn create_target(&mut self, iqn: &str) -> Result<(), Error> {
        self.ensure_fabric()?;
        make_dir(self.target_path(iqn))
    }

    fn delete_target(&mut self, iqn: &str) -> Result<(), Error> {
        for tag in self.tpgs(iqn)? {
            self.delete_tpg(TpgId::new(iqn, tag))?;
        }
        self.remove_group(self.target_path(iqn))
    }

    fn create_tpg(&mut self, tpg: TpgId) -> Result<(), Error> {
        if !self.target_path(tpg.iqn).is_dir() {
            bail!("Target '{}' does not exist", tpg.iqn);
        }

        let path = self.tpg_path(tpg);
        make_dir(&path)?;

        let mut attributes = vec![(PathBuf::from("enable"), "0")];
        for (attribute, value) in TPG_ATTRIBUTE_DEFAULTS {
            attributes.push((Path::new("attrib").join(attribute.name()), value));
        }
        self.populate_defaults(&path, &TPG_DEFAULT_GROUPS, &attributes)
    }

    fn create_portal(&mut self, tpg: TpgId, portal: &NetworkPortal) -> Result<(), Error> {
        if !self.tpg_path(tpg).is_dir() {
            debug!("Creating TPG '{tpg}' for the first portal");
            self.create_tpg(tpg)?;
        }
        make_dir(self.tpg_path(tpg).join("np").join(portal.to_string()))
    }

    fn create_node_acl(&mut self, tpg: TpgId, initiator: &str) -> Result<(), Error> {
        self.existing_tpg_path(tpg)?;
        make_dir(self.acl_path(tpg, initiator))
    }

    fn create_lun(
        &mut self,
        tpg: TpgId,
        index: u32,
        storage_object: &StorageObjectRef,
    ) -> Result<(), Error> {
        self.existing_tpg_path(tpg)?;
        let target = self.storage_object_path(storage_object);
        if !target.is_dir() {
            bail!("Storage object '{}' does not exist", target.display());
        }

        let path = self.lun_path(tpg, index);
        make_dir(&path)?;
        make_link(&target, path.join(link_alias()))
    }

    fn create_mapped_lun(
        &mut self,
        tpg: TpgId,
        initiator: &str,
        index: u32,
        tpg_lun: u32,
    ) -> Result<(), Error> {
        let target = self.lun_path(tpg, tpg_lun);
        if !target.is_dir() {
            bail!("LUN {tpg_lun} of '{tpg}' does not exist");
        }

        let acl_path = self.acl_path(tpg, initiator);
        if !acl_path.is_dir() {
            bail!("ACL '{initiator}' of '{tpg}' does not exist");
        }

        let path = acl_path.join(format!("{LUN_PREFIX}{index}"));
        make_dir(&path)?;
        make_link(&target, path.join(link_alias()))
    }

    fn set_tpg_attribute(
        &mut self,
        tpg: TpgId,
        attribute: TpgAttribute,
        value: &str,
    ) -> Result<(), Error> {
        write_attribute(
            self.existing_tpg_path(tpg)?
                .join("attrib")
                .join(attribute.name()),
            value,
        )
    }

    fn set_tpg_enabled(&mut self, tpg: TpgId, enabled: bool) -> Result<(), Error> {
        write_attribute(
            self.existing_tpg_path(tpg)?.join("enable"),
            if enabled { "1" } else { "0" },
        )
    }

    fn save_config(&mut self) -> Result<(), Error> {
        targetcli::save_config()
    }
}

/// Splits a backstore directory name such as `iblock_3` into plugin and index.
fn parse_backstore_name(name: &str) -> Option<(&str, u32)> {
    let (plugin, index) = name.rsplit_once('_')?;
    if plugin.is_empty() {
        return None;
    }
    Some((plugin, index.parse().ok()?))
}

/// Parses a portal directory name, `10.0.0.1:3260` or `[fd00::1]:3260`.
fn parse_portal_name(name: &str) -> Result<NetworkPortal, Error> {
    let (ip, port) = name
        .rsplit_once(':')
        .with_context(|| format!("Portal '{name}' has no port"))?;
    let ip = ip
        .strip_prefix('[')
        .and_then(|ip| ip.strip_suffix(']'))
        .unwrap_or(ip);
    Ok(NetworkPortal {
        ip: ip.into(),
        port: port
            .parse()
            .with_context(|| format!("Portal '{name}' has an invalid port"))?,
    })
}

/// Recovers the storage object from the target of a LUN link, which ends in
/// `core/<plugin>_<index>/<name>`.
fn parse_storage_object_link(link: &Path) -> Result<StorageObjectRef, Error> {
    let mut components = link.iter().rev().filter_map(|c| c.to_str());
    let name = components.next().context("Link target is empty")?;
    let backstore = components.next().context("Link target has no backstore")?;
    let (plugin, backstore_index) =
        parse_backstore_name(backstore).context("Link target is not a backstore")?;

    Ok(StorageObjectRef {
        plugin: plugin.into(),
        backstore_index,
        name: name.into(),
    })
}

fn link_alias() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..10].to_string()
}

/// Names of the directories directly below `path`. A missing `path` has no
/// children.
fn subdirectories(path: impl AsRef<Path>) -> Result<Vec<String>, Error> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in
        fs::read_dir(path).with_context(|| format!("Could not list '{}'", path.display()))?
    {
        let entry = entry.with_context(|| format!("Could not list '{}'", path.display()))?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    names.sort();
    Ok(names)
}

/// Directories named `<prefix><index>` below `path`, sorted by index.
fn indexed_subdirectories(
    path: impl AsRef<Path>,
    prefix: &str,
) -> Result<Vec<(u32, PathBuf)>, Error> {
    let mut children: Vec<_> = subdirectories(path.as_ref())?
        .into_iter()
        .filter_map(|name| {
            let index = name.strip_prefix(prefix)?.parse().ok()?;
            Some((index, path.as_ref().join(name)))
        })
        .collect();
    children.sort_by_key(|(index, _)| *index);
    Ok(children)
}

/// Targets of the symlinks directly below `path`.
fn links(path: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut targets = Vec::new();
    for entry in
        fs::read_dir(path).with_context(|| format!("Could not list '{}'", path.display()))?
    {
        let entry = entry.with_context(|| format!("Could not list '{}'", path.display()))?;
        if entry.file_type().map(|t| t.is_symlink()).unwrap_or(false) {
            targets.push(
                fs::read_link(entry.path())
                    .with_context(|| format!("Could not read '{}'", entry.path().display()))?,
            );
        }
    }
    Ok(targets)
}

fn make_dir(path: impl AsRef<Path>) -> Result<(), Error> {
    let path = path.as_ref();
    trace!("Creating '{}'", path.display());
    fs::create_dir(path).with_context(|| format!("Could not create '{}'", path.display()))
}

fn make_link(target: &Path, link: PathBuf) -> Result<(), Error> {
    trace!("Linking '{}' to '{}'", link.display(), target.display());
    symlink(target, &link).with_context(|| {
        format!(
            "Could not link '{}' to '{}'",
            link.display(),
            target.display()
        )
    })
}

fn remove_dir(path: impl AsRef<Path>) -> Result<(), Error> {
    let path = path.as_ref();
    trace!("Removing '{}'", path.display());
    fs::remove_dir(path).with_context(|| format!("Could not remove '{}'", path.display()))
}

/// Removes the symlinks inside a LUN or mapped LUN group, then the group.
fn remove_links_and_dir(path: &Path) -> Result<(), Error> {
    for entry in
        fs::read_dir(path).with_context(|| format!("Could not list '{}'", path.display()))?
    {
        let entry = entry.with_context(|| format!("Could not list '{}'", path.display()))?;
        if entry.file_type().map(|t| t.is_symlink()).unwrap_or(false) {
            fs::remove_file(entry.path())
                .with_context(|| format!("Could not unlink '{}'", entry.path().display()))?;
        }
    }
    remove_dir(path)
}

fn read_attribute(path: impl AsRef<Path>) -> Result<String, Error> {
    let path = path.as_ref();
    Ok(fs::read_to_string(path)
        .with_context(|| format!("Could not read '{}'", path.display()))?
        .trim()
        .to_string())
}

fn write_attribute(path: impl AsRef<Path>, value: impl AsRef<str>) -> Result<(), Error> {
    let path = path.as_ref();
    trace!("Writing '{}' to '{}'", value.as_ref(), path.display());
    fs::write(path, value.as_ref())
        .with_context(|| format!("Could not write '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    const IQN: &str = "iqn.2020-01.com.example:t1";
    const INITIATOR: &str = "iqn.initiator:i1";

    fn iblock(index: u32, name: &str) -> StorageObjectRef {
        StorageObjectRef {
            plugin: IBLOCK_PLUGIN.into(),
            backstore_index: index,
            name: name.into(),
        }
    }

    #[test]
    fn test_parse_backstore_name() {
        assert_eq!(parse_backstore_name("iblock_0"), Some(("iblock", 0)));
        assert_eq!(parse_backstore_name("rd_mcp_12"), Some(("rd_mcp", 12)));
        assert_eq!(parse_backstore_name("alua"), None);
        assert_eq!(parse_backstore_name("_3"), None);
        assert_eq!(parse_backstore_name("iblock_x"), None);
    }

    #[test]
    fn test_parse_portal_name() {
        assert_eq!(
            parse_portal_name("10.0.0.1:3260").unwrap(),
            NetworkPortal {
                ip: "10.0.0.1".into(),
                port: 3260
            }
        );
        assert_eq!(
            parse_portal_name("[fd00::1]:3261").unwrap(),
            NetworkPortal {
                ip: "fd00::1".into(),
                port: 3261
            }
        );
        parse_portal_name("10.0.0.1").unwrap_err();
        parse_portal_name("10.0.0.1:port").unwrap_err();
    }

    #[test]
    fn test_parse_storage_object_link() {
        assert_eq!(
            parse_storage_object_link(Path::new(
                "../../../../../../target/core/iblock_2/lun0"
            ))
            .unwrap(),
            iblock(2, "lun0")
        );
        parse_storage_object_link(Path::new("lun0")).unwrap_err();
    }

    #[test]
    fn test_empty_tree() {
        let dir = tempdir().unwrap();
        let configfs = ConfigFs::new(dir.path());

        assert!(configfs.backstores().unwrap().is_empty());
        assert!(configfs.targets().unwrap().is_empty());
        assert!(!configfs.fabric_exists());
        configfs.tpgs(IQN).unwrap_err();
    }

    #[test]
    fn test_backstore_lifecycle() {
        let dir = tempdir().unwrap();
        let mut configfs = ConfigFs::new(dir.path());
        fs::create_dir_all(dir.path().join("core/alua")).unwrap();

        configfs.create_backstore(0).unwrap();
        configfs.create_backstore(0).unwrap_err();
        configfs
            .create_storage_object(1, "lun1", "/dev/sdc", "wwn")
            .unwrap_err();
        configfs
            .create_storage_object(0, "lun0", "/dev/sdb", "0123456789")
            .unwrap();

        let so_path = dir.path().join("core/iblock_0/lun0");
        assert_eq!(
            fs::read_to_string(so_path.join("control")).unwrap(),
            "udev_path=/dev/sdb"
        );
        assert_eq!(fs::read_to_string(so_path.join("enable")).unwrap(), "1");

        assert_eq!(
            configfs.backstores().unwrap(),
            vec![Backstore {
                plugin: IBLOCK_PLUGIN.into(),
                index: 0,
                storage_objects: vec![StorageObject {
                    name: "lun0".into(),
                    udev_path: "/dev/sdb".into(),
                    wwn: Some("0123456789".into()),
                }],
            }]
        );

        // An empty backstore can be removed on any filesystem
        configfs.create_backstore(4).unwrap();
        configfs.delete_backstore(4).unwrap();
        configfs.delete_backstore(4).unwrap_err();
        assert_eq!(configfs.backstores().unwrap().len(), 1);
    }

    #[test]
    fn test_target_tree() {
        let dir = tempdir().unwrap();
        let mut configfs = ConfigFs::new(dir.path());
        let tpg = TpgId::new(IQN, 1);

        configfs.ensure_fabric().unwrap();
        fs::create_dir(dir.path().join("iscsi/discovery_auth")).unwrap();
        assert!(configfs.fabric_exists());

        configfs.create_target(IQN).unwrap();
        assert_eq!(configfs.targets().unwrap(), vec![IQN.to_string()]);
        assert!(configfs.tpgs(IQN).unwrap().is_empty());
        assert!(configfs.portals(tpg).unwrap().is_empty());

        let portal = NetworkPortal {
            ip: "10.0.0.1".into(),
            port: 3260,
        };
        configfs.create_portal(tpg, &portal).unwrap();
        assert_eq!(configfs.tpgs(IQN).unwrap(), vec![1]);
        assert_eq!(configfs.portals(tpg).unwrap(), vec![portal]);

        configfs.create_node_acl(tpg, INITIATOR).unwrap();
        assert_eq!(configfs.node_acls(tpg).unwrap(), vec![INITIATOR.to_string()]);

        configfs.create_backstore(0).unwrap();
        configfs
            .create_storage_object(0, "lun0", "/dev/sdb", "0123456789")
            .unwrap();
        configfs.create_lun(tpg, 0, &iblock(0, "lun0")).unwrap();
        configfs.create_lun(tpg, 1, &iblock(0, "missing")).unwrap_err();
        assert_eq!(
            configfs.luns(tpg).unwrap(),
            vec![Lun {
                index: 0,
                storage_object: iblock(0, "lun0"),
                udev_path: "/dev/sdb".into(),
            }]
        );

        configfs.create_mapped_lun(tpg, INITIATOR, 0, 0).unwrap();
        configfs
            .create_mapped_lun(tpg, INITIATOR, 1, 7)
            .unwrap_err();
        assert_eq!(
            configfs.mapped_luns(tpg, INITIATOR).unwrap(),
            vec![MappedLun {
                index: 0,
                tpg_lun: 0
            }]
        );

        configfs
            .set_tpg_attribute(tpg, TpgAttribute::GenerateNodeAcls, "1")
            .unwrap();
        assert_eq!(
            configfs
                .tpg_attribute(tpg, TpgAttribute::GenerateNodeAcls)
                .unwrap(),
            "1"
        );

        configfs.set_tpg_enabled(tpg, true).unwrap();
        assert!(configfs.tpg_enabled(tpg).unwrap());
    }

    #[test]
    fn test_ipv6_portal_directory() {
        let dir = tempdir().unwrap();
        let mut configfs = ConfigFs::new(dir.path());
        let tpg = TpgId::new(IQN, 1);

        configfs.create_target(IQN).unwrap();
        configfs
            .create_tpg(TpgId::new("iqn.2020-01.com.example:t9", 1))
            .unwrap_err();
        configfs
            .create_portal(
                tpg,
                &NetworkPortal {
                    ip: "fd00::1".into(),
                    port: 3260,
                },
            )
            .unwrap();
        assert!(dir
            .path()
            .join("iscsi")
            .join(IQN)
            .join("tpgt_1/np/[fd00::1]:3260")
            .is_dir());
    }

    #[test]
    fn test_delete_target_without_tpg() {
        let dir = tempdir().unwrap();
        let mut configfs = ConfigFs::new(dir.path());

        configfs.create_target(IQN).unwrap();
        configfs.delete_target(IQN).unwrap();
        assert!(configfs.targets().unwrap().is_empty());
        configfs.delete_target(IQN).unwrap_err();

        configfs.delete_fabric().unwrap();
        assert!(!configfs.fabric_exists());
    }

    #[test]
    fn test_missing_parent_is_not_created() {
        let dir = tempdir().unwrap();
        let mut configfs = ConfigFs::new(dir.path());
        configfs.create_target(IQN).unwrap();

        let missing_target = TpgId::new("iqn.2020-01.com.example:nope", 1);
        configfs
            .create_node_acl(missing_target, INITIATOR)
            .unwrap_err();
        configfs
            .set_tpg_attribute(missing_target, TpgAttribute::Authentication, "0")
            .unwrap_err();
        assert_eq!(configfs.targets().unwrap(), vec![IQN.to_string()]);

        let missing_tpg = TpgId::new(IQN, 2);
        configfs.set_tpg_enabled(missing_tpg, true).unwrap_err();
        configfs.create_node_acl(missing_tpg, INITIATOR).unwrap_err();
        configfs
            .create_lun(missing_tpg, 0, &iblock(0, "lun0"))
            .unwrap_err();
        assert!(configfs.tpgs(IQN).unwrap().is_empty());

        // The TPG exists but the ACL to map into does not
        let tpg = TpgId::new(IQN, 1);
        configfs.create_tpg(tpg).unwrap();
        configfs.create_backstore(0).unwrap();
        configfs
            .create_storage_object(0, "lun0", "/dev/sdb", "0123456789")
            .unwrap();
        configfs.create_lun(tpg, 0, &iblock(0, "lun0")).unwrap();
        configfs
            .create_mapped_lun(tpg, INITIATOR, 0, 0)
            .unwrap_err();
        assert!(configfs.node_acls(tpg).unwrap().is_empty());
    }

    #[test]
    fn test_new_tpg_has_kernel_defaults() {
        let dir = tempdir().unwrap();
        let mut configfs = ConfigFs::new(dir.path().join("target"));
        let tpg = TpgId::new(IQN, 1);

        configfs.create_target(IQN).unwrap();
        configfs.create_tpg(tpg).unwrap();

        assert!(!configfs.tpg_enabled(tpg).unwrap());
        for (attribute, value) in TPG_ATTRIBUTE_DEFAULTS {
            assert_eq!(configfs.tpg_attribute(tpg, attribute).unwrap(), value);
        }
        assert!(configfs.node_acls(tpg).unwrap().is_empty());
        assert!(configfs.luns(tpg).unwrap().is_empty());

        // A second TPG on the same target gets its own defaults
        configfs
            .set_tpg_attribute(tpg, TpgAttribute::Authentication, "0")
            .unwrap();
        let other = TpgId::new(IQN, 2);
        configfs.create_tpg(other).unwrap();
        assert_eq!(
            configfs
                .tpg_attribute(other, TpgAttribute::Authentication)
                .unwrap(),
            "1"
        );
    }

    #[test]
    fn test_kernel_tree_is_not_emulated() {
        assert!(!ConfigFs::new(targetmgr_api::constants::CONFIGFS_TARGET_ROOT).emulated);
        assert!(ConfigFs::new("/tmp/target").emulated);
    }

    #[test]
    fn test_delete_populated_tree() {
        let dir = tempdir().unwrap();
        let mut configfs = ConfigFs::new(dir.path());
        let tpg = TpgId::new(IQN, 1);

        configfs.create_target(IQN).unwrap();
        configfs
            .create_portal(
                tpg,
                &NetworkPortal {
                    ip: "10.0.0.1".into(),
                    port: 3260,
                },
            )
            .unwrap();
        configfs.create_node_acl(tpg, INITIATOR).unwrap();
        configfs.create_backstore(0).unwrap();
        configfs
            .create_storage_object(0, "lun0", "/dev/sdb", "0123456789")
            .unwrap();
        configfs.create_lun(tpg, 0, &iblock(0, "lun0")).unwrap();
        configfs.create_mapped_lun(tpg, INITIATOR, 0, 0).unwrap();
        configfs.set_tpg_enabled(tpg, true).unwrap();

        configfs.delete_target(IQN).unwrap();
        configfs.delete_backstore(0).unwrap();
        configfs.delete_fabric().unwrap();

        assert!(configfs.targets().unwrap().is_empty());
        assert!(configfs.backstores().unwrap().is_empty());
        assert!(!configfs.fabric_exists());
    }
}
