//! Disk encryption set builder.
//!
//! Binds a key vault key and a user-assigned identity into an encryption-at-rest
//! policy that managed disks reference by resource id.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{insert_tags, ModuleSource, ResourceKind};
use crate::graph::{OutputRef, Param, ResourceNode};

/// Encryption-at-rest policy of a disk encryption set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EncryptionType {
    #[default]
    EncryptionAtRestWithCustomerKey,
    EncryptionAtRestWithPlatformAndCustomerKeys,
    ConfidentialVmEncryptedWithCustomerKey,
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionType::EncryptionAtRestWithCustomerKey => {
                write!(f, "EncryptionAtRestWithCustomerKey")
            }
            EncryptionType::EncryptionAtRestWithPlatformAndCustomerKeys => {
                write!(f, "EncryptionAtRestWithPlatformAndCustomerKeys")
            }
            EncryptionType::ConfidentialVmEncryptedWithCustomerKey => {
                write!(f, "ConfidentialVmEncryptedWithCustomerKey")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiskEncryptionSetSpec {
    pub name: String,
    pub location: String,
    pub resource_group: OutputRef,
    pub key_vault: OutputRef,
    pub key_name: String,
    pub identity: OutputRef,
    pub encryption_type: EncryptionType,
    pub rotation_to_latest_key_version_enabled: bool,
    pub tags: IndexMap<String, String>,
}

impl DiskEncryptionSetSpec {
    /// `key_vault` must point at a vault's `resourceId` output and `identity`
    /// at an identity's `resourceId` output.
    pub fn new(
        name: impl Into<String>,
        location: impl Into<String>,
        resource_group: OutputRef,
        key_vault: OutputRef,
        key_name: impl Into<String>,
        identity: OutputRef,
    ) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            resource_group,
            key_vault,
            key_name: key_name.into(),
            identity,
            encryption_type: EncryptionType::default(),
            rotation_to_latest_key_version_enabled: false,
            tags: IndexMap::new(),
        }
    }

    pub fn with_tags(mut self, tags: IndexMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn into_node(self, id: &str, flow: &str, module: ModuleSource) -> ResourceNode {
        let mut params = Param::object([
            ("resourceGroupName", Param::Ref(self.resource_group)),
            ("name", Param::from(self.name.as_str())),
            ("location", Param::from(self.location.as_str())),
            ("encryptionType", Param::from(self.encryption_type.to_string())),
            ("keyVaultResourceId", Param::Ref(self.key_vault)),
            ("keyName", Param::from(self.key_name.as_str())),
            (
                "managedIdentities",
                Param::object([(
                    "userAssignedResourceIds",
                    Param::List(vec![Param::Ref(self.identity)]),
                )]),
            ),
            (
                "rotationToLatestKeyVersionEnabled",
                Param::from(self.rotation_to_latest_key_version_enabled),
            ),
        ]);
        insert_tags(&mut params, &self.tags);

        ResourceNode::new(
            id,
            ResourceKind::DiskEncryptionSet,
            self.name,
            flow,
            module,
            params,
        )
    }
}

/// Identity references bound to a disk encryption set node.
pub fn identity_refs(node: &ResourceNode) -> Vec<&OutputRef> {
    node.params
        .pointer("managedIdentities/userAssignedResourceIds")
        .and_then(Param::as_list)
        .map(|ids| ids.iter().filter_map(Param::as_ref_target).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ModuleCatalog;

    #[test]
    fn test_disk_encryption_set_node() {
        let node = DiskEncryptionSetSpec::new(
            "des-vmSse",
            "westeurope",
            OutputRef::new("sseResourceGroup", "name"),
            OutputRef::new("sseKeyVault", "resourceId"),
            "encryptKey",
            OutputRef::new("sseIdentity", "resourceId"),
        )
        .into_node(
            "sseDiskEncryptionSet",
            "sse",
            ModuleCatalog::default().source(ResourceKind::DiskEncryptionSet),
        );

        assert_eq!(
            node.params.get("encryptionType").and_then(Param::as_str),
            Some("EncryptionAtRestWithCustomerKey")
        );
        assert_eq!(
            identity_refs(&node),
            vec![&OutputRef::new("sseIdentity", "resourceId")]
        );
        assert_eq!(node.params.refs().len(), 3);
    }
}
