//! Azure resource builders.
//!
//! Every resource in a deployment is provisioned by an externally maintained,
//! versioned module. This module describes those modules' contracts: which
//! parameters each one takes, and which output fields it declares for
//! downstream wiring.
//!
//! ## Available Builders
//!
//! - [`ResourceGroupSpec`](resource_group::ResourceGroupSpec): resource group
//! - [`KeyVaultSpec`](key_vault::KeyVaultSpec): key vault with keys and role assignments
//! - [`UserAssignedIdentitySpec`](identity::UserAssignedIdentitySpec): user-assigned managed identity
//! - [`DiskEncryptionSetSpec`](disk_encryption_set::DiskEncryptionSetSpec): customer-managed-key disk encryption set
//! - [`VirtualMachineSpec`](virtual_machine::VirtualMachineSpec): Windows virtual machine with ADE or SSE disk encryption
//!
//! Each builder lowers into a [`ResourceNode`](crate::graph::ResourceNode) with
//! `into_node`.

pub mod disk_encryption_set;
pub mod identity;
pub mod key_vault;
pub mod resource_group;
pub mod virtual_machine;

pub use disk_encryption_set::{DiskEncryptionSetSpec, EncryptionType};
pub use identity::UserAssignedIdentitySpec;
pub use key_vault::{BuiltinRole, KeySpec, KeyVaultSku, KeyVaultSpec, RoleAssignment};
pub use resource_group::ResourceGroupSpec;
pub use virtual_machine::{
    AdeKeyMode, AdeSettings, DataDiskConfig, ImageReference, OsDiskConfig, VirtualMachineSpec,
    VmEncryption,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::graph::Param;

/// Kind of resource a node provisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    ResourceGroup,
    KeyVault,
    UserAssignedIdentity,
    DiskEncryptionSet,
    VirtualMachine,
}

impl ResourceKind {
    /// All kinds, in the order they are listed in rendered documents.
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::ResourceGroup,
        ResourceKind::UserAssignedIdentity,
        ResourceKind::KeyVault,
        ResourceKind::DiskEncryptionSet,
        ResourceKind::VirtualMachine,
    ];

    /// Output fields the provisioning module declares.
    pub fn outputs(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::ResourceGroup => &["resourceId", "name", "location"],
            ResourceKind::KeyVault => &["resourceId", "name", "uri", "keys"],
            ResourceKind::UserAssignedIdentity => {
                &["resourceId", "name", "principalId", "clientId"]
            }
            ResourceKind::DiskEncryptionSet => &["resourceId", "name", "location"],
            ResourceKind::VirtualMachine => &["resourceId", "name", "location"],
        }
    }

    /// Whether `field` is a declared output of this kind.
    pub fn declares(&self, field: &str) -> bool {
        self.outputs().contains(&field)
    }

    /// Azure resource provider type.
    pub fn azure_type(&self) -> &'static str {
        match self {
            ResourceKind::ResourceGroup => "Microsoft.Resources/resourceGroups",
            ResourceKind::KeyVault => "Microsoft.KeyVault/vaults",
            ResourceKind::UserAssignedIdentity => {
                "Microsoft.ManagedIdentity/userAssignedIdentities"
            }
            ResourceKind::DiskEncryptionSet => "Microsoft.Compute/diskEncryptionSets",
            ResourceKind::VirtualMachine => "Microsoft.Compute/virtualMachines",
        }
    }

    /// Key used for this kind in configuration files.
    pub fn config_key(&self) -> &'static str {
        match self {
            ResourceKind::ResourceGroup => "resource_group",
            ResourceKind::KeyVault => "key_vault",
            ResourceKind::UserAssignedIdentity => "user_assigned_identity",
            ResourceKind::DiskEncryptionSet => "disk_encryption_set",
            ResourceKind::VirtualMachine => "virtual_machine",
        }
    }

    /// Names of this kind must be unique across the whole deployment, not
    /// just within a resource group.
    pub fn globally_named(&self) -> bool {
        matches!(self, ResourceKind::ResourceGroup | ResourceKind::KeyVault)
    }

    fn default_module(&self) -> ModuleSource {
        match self {
            ResourceKind::ResourceGroup => {
                ModuleSource::new("br/public:avm/res/resources/resource-group", "0.4.0")
            }
            ResourceKind::KeyVault => ModuleSource::new("br/public:avm/res/key-vault/vault", "0.11.0"),
            ResourceKind::UserAssignedIdentity => ModuleSource::new(
                "br/public:avm/res/managed-identity/user-assigned-identity",
                "0.4.0",
            ),
            ResourceKind::DiskEncryptionSet => {
                ModuleSource::new("br/public:avm/res/compute/disk-encryption-set", "0.3.0")
            }
            ResourceKind::VirtualMachine => {
                ModuleSource::new("br/public:avm/res/compute/virtual-machine", "0.10.0")
            }
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::ResourceGroup => write!(f, "Resource Group"),
            ResourceKind::KeyVault => write!(f, "Key Vault"),
            ResourceKind::UserAssignedIdentity => write!(f, "User-Assigned Identity"),
            ResourceKind::DiskEncryptionSet => write!(f, "Disk Encryption Set"),
            ResourceKind::VirtualMachine => write!(f, "Virtual Machine"),
        }
    }
}

/// Registry path and version of the module that provisions a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSource {
    pub path: String,
    pub version: String,
}

impl ModuleSource {
    pub fn new(path: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ModuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path, self.version)
    }
}

/// Module source per resource kind, with per-kind overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleCatalog {
    /// Overrides keyed by [`ResourceKind::config_key`]
    #[serde(flatten)]
    pub overrides: IndexMap<String, ModuleSource>,
}

impl ModuleCatalog {
    /// Module used for `kind`: the override if one is configured, the pinned
    /// default otherwise.
    pub fn source(&self, kind: ResourceKind) -> ModuleSource {
        self.overrides
            .get(kind.config_key())
            .cloned()
            .unwrap_or_else(|| kind.default_module())
    }

    pub fn with_override(mut self, kind: ResourceKind, source: ModuleSource) -> Self {
        self.overrides.insert(kind.config_key().to_string(), source);
        self
    }
}

/// Copy tags into a node parameter object, omitting the key when empty.
pub(crate) fn insert_tags(params: &mut Param, tags: &IndexMap<String, String>) {
    if !tags.is_empty() {
        params.insert(
            "tags",
            Param::object(tags.iter().map(|(k, v)| (k.clone(), Param::from(v.as_str())))),
        );
    }
}
