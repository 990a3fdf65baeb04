//! Windows virtual machine builder.
//!
//! A VM is encrypted one of two ways, selected by [`VmEncryption`]:
//!
//! - `Ade`: the Azure Disk Encryption extension runs in the guest and wraps
//!   volume keys with a key vault key. `encryptionAtHost` is off.
//! - `Sse`: every managed disk references a disk encryption set and the host
//!   encrypts the temp disk and caches. `encryptionAtHost` is on.
//!
//! The `encryptionAtHost` flag is derived from the variant and cannot be set
//! independently.
//!
//! ### Parameters
//!
//! | Parameter | Required | Description |
//! |-----------|----------|-------------|
//! | `name` | Yes | VM and computer name, at most 15 characters |
//! | `vmSize` | Yes | VM size (e.g., `Standard_D2s_v3`) |
//! | `zone` | Yes | Availability zone, `0` for none |
//! | `adminUsername` | Yes | Local administrator |
//! | `adminPassword` | Yes | Local administrator password (secret) |
//! | `imageReference` | Yes | Marketplace image |
//! | `nicConfigurations` | Yes | One NIC on the given subnet |
//! | `osDisk` | Yes | OS disk |
//! | `dataDisks` | No | Data disks |
//! | `encryptionAtHost` | Yes | Host-based encryption |
//! | `extensionAzureDiskEncryptionConfig` | No | ADE extension, present for ADE VMs only |

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::key_vault::key_uri_with_version;
use super::{insert_tags, ModuleSource, ResourceKind};
use crate::graph::{OutputRef, Param, ResourceNode};

/// Parameter holding the ADE extension in a VM node.
pub const ADE_EXTENSION_PARAM: &str = "extensionAzureDiskEncryptionConfig";

/// Marketplace image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageReference {
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    pub version: String,
}

impl Default for ImageReference {
    fn default() -> Self {
        Self {
            publisher: "MicrosoftWindowsServer".to_string(),
            offer: "WindowsServer".to_string(),
            sku: "2022-datacenter-azure-edition".to_string(),
            version: "latest".to_string(),
        }
    }
}

impl ImageReference {
    fn to_param(&self) -> Param {
        Param::object([
            ("publisher", Param::from(self.publisher.as_str())),
            ("offer", Param::from(self.offer.as_str())),
            ("sku", Param::from(self.sku.as_str())),
            ("version", Param::from(self.version.as_str())),
        ])
    }
}

/// OS disk configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsDiskConfig {
    pub disk_size_gb: u32,
    /// Storage account type: Standard_LRS, Premium_LRS, StandardSSD_LRS
    pub storage_account_type: String,
    /// Caching type: None, ReadOnly, ReadWrite
    pub caching: String,
}

impl Default for OsDiskConfig {
    fn default() -> Self {
        Self {
            disk_size_gb: 128,
            storage_account_type: "Premium_LRS".to_string(),
            caching: "ReadWrite".to_string(),
        }
    }
}

/// Data disk configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDiskConfig {
    /// Logical unit number (LUN)
    pub lun: u32,
    pub disk_size_gb: u32,
    pub storage_account_type: String,
    pub caching: String,
}

impl DataDiskConfig {
    /// Premium SSD data disk at `lun`.
    pub fn premium(lun: u32, disk_size_gb: u32) -> Self {
        Self {
            lun,
            disk_size_gb,
            storage_account_type: "Premium_LRS".to_string(),
            caching: "ReadWrite".to_string(),
        }
    }
}

/// Whether ADE wraps volume keys with a key-encryption key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdeKeyMode {
    /// Customer-managed key-encryption key from the vault
    #[default]
    Cmk,
    /// Platform-managed, no key-encryption key
    Pmk,
}

impl fmt::Display for AdeKeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdeKeyMode::Cmk => write!(f, "cmk"),
            AdeKeyMode::Pmk => write!(f, "pmk"),
        }
    }
}

/// Azure Disk Encryption extension settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdeSettings {
    /// Node id of the key vault the extension reads from
    pub key_vault: String,
    pub key_name: String,
    pub key_mode: AdeKeyMode,
    pub volume_type: String,
}

impl AdeSettings {
    pub fn new(key_vault: impl Into<String>, key_name: impl Into<String>) -> Self {
        Self {
            key_vault: key_vault.into(),
            key_name: key_name.into(),
            key_mode: AdeKeyMode::default(),
            volume_type: "All".to_string(),
        }
    }

    pub fn with_key_mode(mut self, mode: AdeKeyMode) -> Self {
        self.key_mode = mode;
        self
    }

    fn to_param(&self) -> Param {
        let vault_id = Param::reference(self.key_vault.as_str(), "resourceId");
        let mut settings = Param::object([
            ("EncryptionOperation", Param::from("EnableEncryption")),
            ("KeyEncryptionAlgorithm", Param::from("RSA-OAEP")),
            ("KekVaultResourceId", vault_id.clone()),
            ("KeyVaultResourceId", vault_id),
            ("KeyVaultURL", Param::reference(self.key_vault.as_str(), "uri")),
            // The extension reads settings as strings.
            ("ResizeOSDisk", Param::from("false")),
            ("VolumeType", Param::from(self.volume_type.as_str())),
        ]);
        if self.key_mode == AdeKeyMode::Cmk {
            settings.insert(
                "KeyEncryptionKeyURL",
                Param::reference(
                    self.key_vault.as_str(),
                    key_uri_with_version(&self.key_name),
                ),
            );
        }
        Param::object([("enabled", Param::from(true)), ("settings", settings)])
    }
}

/// Disk encryption strategy of a VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmEncryption {
    /// Guest-level encryption through the ADE extension
    Ade(AdeSettings),
    /// Server-side encryption with a customer-managed key; the reference
    /// points at a disk encryption set's `resourceId`
    Sse { disk_encryption_set: OutputRef },
}

impl VmEncryption {
    pub fn encryption_at_host(&self) -> bool {
        matches!(self, VmEncryption::Sse { .. })
    }

    fn managed_disk(&self, storage_account_type: &str) -> Param {
        let mut disk = Param::object([("storageAccountType", Param::from(storage_account_type))]);
        if let VmEncryption::Sse {
            disk_encryption_set,
        } = self
        {
            disk.insert(
                "diskEncryptionSetResourceId",
                Param::Ref(disk_encryption_set.clone()),
            );
        }
        disk
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VirtualMachineSpec {
    pub name: String,
    pub location: String,
    pub resource_group: OutputRef,
    pub vm_size: String,
    pub zone: u32,
    pub admin_username: String,
    pub admin_password: String,
    pub image: ImageReference,
    pub subnet_id: String,
    pub os_disk: OsDiskConfig,
    pub data_disks: Vec<DataDiskConfig>,
    pub encryption: VmEncryption,
    pub tags: IndexMap<String, String>,
}

impl VirtualMachineSpec {
    pub fn new(
        name: impl Into<String>,
        location: impl Into<String>,
        resource_group: OutputRef,
        subnet_id: impl Into<String>,
        admin_password: impl Into<String>,
        encryption: VmEncryption,
    ) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            resource_group,
            vm_size: "Standard_D2s_v3".to_string(),
            zone: 0,
            admin_username: "localAdminUser".to_string(),
            admin_password: admin_password.into(),
            image: ImageReference::default(),
            subnet_id: subnet_id.into(),
            os_disk: OsDiskConfig::default(),
            data_disks: Vec::new(),
            encryption,
            tags: IndexMap::new(),
        }
    }

    pub fn with_size(mut self, vm_size: impl Into<String>) -> Self {
        self.vm_size = vm_size.into();
        self
    }

    pub fn with_zone(mut self, zone: u32) -> Self {
        self.zone = zone;
        self
    }

    pub fn with_admin_username(mut self, username: impl Into<String>) -> Self {
        self.admin_username = username.into();
        self
    }

    pub fn with_image(mut self, image: ImageReference) -> Self {
        self.image = image;
        self
    }

    pub fn with_data_disk(mut self, disk: DataDiskConfig) -> Self {
        self.data_disks.push(disk);
        self
    }

    pub fn with_tags(mut self, tags: IndexMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn into_node(self, id: &str, flow: &str, module: ModuleSource) -> ResourceNode {
        let nic = Param::object([
            ("nicSuffix", Param::from("-nic-01")),
            ("deleteOption", Param::from("Delete")),
            (
                "ipConfigurations",
                Param::List(vec![Param::object([
                    ("name", Param::from("ipconfig01")),
                    ("subnetResourceId", Param::from(self.subnet_id.as_str())),
                ])]),
            ),
        ]);

        let os_disk = Param::object([
            ("caching", Param::from(self.os_disk.caching.as_str())),
            ("diskSizeGB", Param::from(self.os_disk.disk_size_gb)),
            (
                "managedDisk",
                self.encryption
                    .managed_disk(&self.os_disk.storage_account_type),
            ),
        ]);

        let data_disks = self
            .data_disks
            .iter()
            .map(|disk| {
                Param::object([
                    ("lun", Param::from(disk.lun)),
                    ("caching", Param::from(disk.caching.as_str())),
                    ("diskSizeGB", Param::from(disk.disk_size_gb)),
                    (
                        "managedDisk",
                        self.encryption.managed_disk(&disk.storage_account_type),
                    ),
                ])
            })
            .collect();

        let mut params = Param::object([
            ("resourceGroupName", Param::Ref(self.resource_group)),
            ("name", Param::from(self.name.as_str())),
            ("location", Param::from(self.location.as_str())),
            ("osType", Param::from("Windows")),
            ("vmSize", Param::from(self.vm_size.as_str())),
            ("zone", Param::from(self.zone)),
            ("adminUsername", Param::from(self.admin_username.as_str())),
            ("adminPassword", Param::Secret(self.admin_password)),
            ("imageReference", self.image.to_param()),
            ("nicConfigurations", Param::List(vec![nic])),
            ("osDisk", os_disk),
            ("dataDisks", Param::List(data_disks)),
            (
                "encryptionAtHost",
                Param::from(self.encryption.encryption_at_host()),
            ),
        ]);
        if let VmEncryption::Ade(settings) = &self.encryption {
            params.insert(ADE_EXTENSION_PARAM, settings.to_param());
        }
        insert_tags(&mut params, &self.tags);

        ResourceNode::new(id, ResourceKind::VirtualMachine, self.name, flow, module, params)
    }
}

/// `encryptionAtHost` of a VM node, if set to a boolean.
pub fn encryption_at_host(node: &ResourceNode) -> Option<bool> {
    node.params.get("encryptionAtHost").and_then(Param::as_bool)
}

/// Settings of an enabled ADE extension on a VM node.
pub fn ade_extension_settings(node: &ResourceNode) -> Option<&Param> {
    let ext = node.params.get(ADE_EXTENSION_PARAM)?;
    if ext.get("enabled").and_then(Param::as_bool) != Some(true) {
        return None;
    }
    ext.get("settings")
}

/// Every managed disk of a VM node, as `(label, diskEncryptionSetResourceId)`.
///
/// The label is `osDisk` or `dataDisks/<i>`. The second element is `None` for
/// a disk without a set and `Some(Err(value))` when the setting holds a literal
/// instead of a reference.
pub fn disk_encryption_set_refs(node: &ResourceNode) -> Vec<(String, Option<Result<&OutputRef, &Param>>)> {
    fn des_of(disk: &Param) -> Option<Result<&OutputRef, &Param>> {
        disk.pointer("managedDisk/diskEncryptionSetResourceId")
            .map(|v| v.as_ref_target().ok_or(v))
    }

    let mut disks = Vec::new();
    if let Some(os_disk) = node.params.get("osDisk") {
        disks.push(("osDisk".to_string(), des_of(os_disk)));
    }
    if let Some(data_disks) = node.params.get("dataDisks").and_then(Param::as_list) {
        for (i, disk) in data_disks.iter().enumerate() {
            disks.push((format!("dataDisks/{}", i), des_of(disk)));
        }
    }
    disks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ModuleCatalog;

    const SUBNET: &str = "/subscriptions/0000/resourceGroups/net/providers/Microsoft.Network/virtualNetworks/vnet/subnets/default";

    fn vm(encryption: VmEncryption) -> ResourceNode {
        VirtualMachineSpec::new(
            "vmTest",
            "westeurope",
            OutputRef::new("rg", "name"),
            SUBNET,
            "P@ssw0rd-example",
            encryption,
        )
        .with_data_disk(DataDiskConfig::premium(0, 128))
        .into_node(
            "vm",
            "test",
            ModuleCatalog::default().source(ResourceKind::VirtualMachine),
        )
    }

    #[test]
    fn test_ade_vm() {
        let node = vm(VmEncryption::Ade(AdeSettings::new("kv", "encryptKey")));
        assert_eq!(encryption_at_host(&node), Some(false));

        let settings = ade_extension_settings(&node).unwrap();
        assert_eq!(
            settings.get("ResizeOSDisk").and_then(Param::as_str),
            Some("false")
        );
        assert_eq!(
            settings
                .get("KeyEncryptionKeyURL")
                .and_then(Param::as_ref_target)
                .map(|r| r.output.as_str()),
            Some("keys.encryptKey.uriWithVersion")
        );
        assert!(disk_encryption_set_refs(&node)
            .iter()
            .all(|(_, des)| des.is_none()));
    }

    #[test]
    fn test_ade_pmk_omits_kek_url() {
        let node = vm(VmEncryption::Ade(
            AdeSettings::new("kv", "encryptKey").with_key_mode(AdeKeyMode::Pmk),
        ));
        let settings = ade_extension_settings(&node).unwrap();
        assert!(settings.get("KeyEncryptionKeyURL").is_none());
        assert!(settings.get("KeyVaultURL").is_some());
    }

    #[test]
    fn test_sse_vm() {
        let des = OutputRef::new("des", "resourceId");
        let node = vm(VmEncryption::Sse {
            disk_encryption_set: des.clone(),
        });
        assert_eq!(encryption_at_host(&node), Some(true));
        assert!(ade_extension_settings(&node).is_none());

        let disks = disk_encryption_set_refs(&node);
        assert_eq!(disks.len(), 2);
        assert_eq!(disks[1].0, "dataDisks/0");
        for (_, r) in disks {
            assert_eq!(r, Some(Ok(&des)));
        }
    }

    #[test]
    fn test_password_is_secret() {
        let node = vm(VmEncryption::Ade(AdeSettings::new("kv", "encryptKey")));
        assert!(matches!(
            node.params.get("adminPassword"),
            Some(Param::Secret(_))
        ));
    }
}
