//! Key vault builder.
//!
//! Two presets cover the two encryption strategies:
//!
//! - [`KeyVaultSpec::for_disk_encryption`]: the vault an in-guest ADE agent
//!   reads its key-encryption key from. Purge protection and soft delete are
//!   off, and the vault is enabled for disk encryption.
//! - [`KeyVaultSpec::for_customer_managed_key`]: the vault backing a disk
//!   encryption set. Purge protection and soft delete are both on, which the
//!   platform requires before a disk encryption set may use one of its keys.
//!
//! ### Parameters
//!
//! | Parameter | Required | Description |
//! |-----------|----------|-------------|
//! | `name` | Yes | Vault name, 3-24 characters, globally unique |
//! | `location` | Yes | Azure region |
//! | `sku` | No | `standard` or `premium` (default: standard) |
//! | `enablePurgeProtection` | Yes | Purge protection |
//! | `enableSoftDelete` | Yes | Soft delete |
//! | `enableRbacAuthorization` | No | Authorize data plane via RBAC (default: true) |
//! | `enableVaultForDiskEncryption` | No | Allow ADE to read secrets/keys (default: false) |
//! | `keys` | No | Keys to create |
//! | `roleAssignments` | No | Role assignments scoped to the vault |
//!
//! ### Outputs
//!
//! `resourceId`, `name`, `uri`, and `keys.<keyName>.{resourceId,uri,uriWithVersion}`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{insert_tags, ModuleSource, ResourceKind};
use crate::graph::{OutputRef, Param, ResourceNode};

/// Key vault pricing tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyVaultSku {
    #[default]
    Standard,
    Premium,
}

impl fmt::Display for KeyVaultSku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyVaultSku::Standard => write!(f, "standard"),
            KeyVaultSku::Premium => write!(f, "premium"),
        }
    }
}

/// An Azure built-in role definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinRole {
    pub name: &'static str,
    pub id: &'static str,
}

impl BuiltinRole {
    /// Grants wrap/unwrap on keys to services encrypting data at rest.
    pub const KEY_VAULT_CRYPTO_SERVICE_ENCRYPTION_USER: BuiltinRole = BuiltinRole {
        name: "Key Vault Crypto Service Encryption User",
        id: "e147488a-f6f5-4113-8e2d-b22465e65bf6",
    };

    /// Whether a `roleDefinitionIdOrName` value designates this role. Accepts
    /// the display name, the bare GUID, or a full role definition resource id.
    pub fn matches(&self, id_or_name: &str) -> bool {
        id_or_name.eq_ignore_ascii_case(self.name)
            || id_or_name.eq_ignore_ascii_case(self.id)
            || id_or_name
                .rsplit('/')
                .next()
                .is_some_and(|last| last.eq_ignore_ascii_case(self.id))
    }
}

/// A key to create in the vault
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    pub name: String,
    /// Key type, always `RSA` for disk encryption
    pub kty: String,
    pub key_size: u32,
    pub key_ops: Vec<String>,
}

impl KeySpec {
    pub fn rsa(name: impl Into<String>, key_size: u32) -> Self {
        Self {
            name: name.into(),
            kty: "RSA".to_string(),
            key_size,
            key_ops: ["encrypt", "decrypt", "wrapKey", "unwrapKey"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    fn to_param(&self) -> Param {
        Param::object([
            ("name", Param::from(self.name.as_str())),
            ("kty", Param::from(self.kty.as_str())),
            ("keySize", Param::from(self.key_size)),
            (
                "keyOps",
                Param::List(self.key_ops.iter().map(|op| Param::from(op.as_str())).collect()),
            ),
        ])
    }
}

/// A role assignment scoped to the vault
#[derive(Debug, Clone, PartialEq)]
pub struct RoleAssignment {
    /// Principal receiving the role, usually a reference to an identity's
    /// `principalId`
    pub principal_id: Param,
    pub role: BuiltinRole,
    pub principal_type: String,
}

impl RoleAssignment {
    /// Grant `role` to a service principal.
    pub fn service_principal(principal_id: OutputRef, role: BuiltinRole) -> Self {
        Self {
            principal_id: Param::Ref(principal_id),
            role,
            principal_type: "ServicePrincipal".to_string(),
        }
    }

    fn to_param(&self) -> Param {
        Param::object([
            ("principalId", self.principal_id.clone()),
            ("roleDefinitionIdOrName", Param::from(self.role.name)),
            ("principalType", Param::from(self.principal_type.as_str())),
        ])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyVaultSpec {
    pub name: String,
    pub location: String,
    pub resource_group: OutputRef,
    pub sku: KeyVaultSku,
    pub enable_purge_protection: bool,
    pub enable_soft_delete: bool,
    pub enable_rbac_authorization: bool,
    pub enable_vault_for_disk_encryption: bool,
    pub keys: Vec<KeySpec>,
    pub role_assignments: Vec<RoleAssignment>,
    pub tags: IndexMap<String, String>,
}

impl KeyVaultSpec {
    fn base(name: impl Into<String>, location: impl Into<String>, resource_group: OutputRef) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            resource_group,
            sku: KeyVaultSku::default(),
            enable_purge_protection: false,
            enable_soft_delete: false,
            enable_rbac_authorization: true,
            enable_vault_for_disk_encryption: false,
            keys: Vec::new(),
            role_assignments: Vec::new(),
            tags: IndexMap::new(),
        }
    }

    /// Vault read by the in-guest ADE agent.
    pub fn for_disk_encryption(
        name: impl Into<String>,
        location: impl Into<String>,
        resource_group: OutputRef,
    ) -> Self {
        Self {
            enable_vault_for_disk_encryption: true,
            ..Self::base(name, location, resource_group)
        }
    }

    /// Vault backing a disk encryption set.
    pub fn for_customer_managed_key(
        name: impl Into<String>,
        location: impl Into<String>,
        resource_group: OutputRef,
    ) -> Self {
        Self {
            enable_purge_protection: true,
            enable_soft_delete: true,
            ..Self::base(name, location, resource_group)
        }
    }

    pub fn with_sku(mut self, sku: KeyVaultSku) -> Self {
        self.sku = sku;
        self
    }

    pub fn with_key(mut self, key: KeySpec) -> Self {
        self.keys.push(key);
        self
    }

    pub fn with_role_assignment(mut self, assignment: RoleAssignment) -> Self {
        self.role_assignments.push(assignment);
        self
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
            ("sku", Param::from(self.sku.to_string())),
            ("enablePurgeProtection", Param::from(self.enable_purge_protection)),
            ("enableSoftDelete", Param::from(self.enable_soft_delete)),
            ("enableRbacAuthorization", Param::from(self.enable_rbac_authorization)),
            (
                "enableVaultForDiskEncryption",
                Param::from(self.enable_vault_for_disk_encryption),
            ),
            (
                "keys",
                Param::List(self.keys.iter().map(KeySpec::to_param).collect()),
            ),
        ]);
        if !self.role_assignments.is_empty() {
            params.insert(
                "roleAssignments",
                Param::List(
                    self.role_assignments
                        .iter()
                        .map(RoleAssignment::to_param)
                        .collect(),
                ),
            );
        }
        insert_tags(&mut params, &self.tags);

        ResourceNode::new(id, ResourceKind::KeyVault, self.name, flow, module, params)
    }
}

/// Output path of a key's versioned URI on a vault node.
pub fn key_uri_with_version(key_name: &str) -> String {
    format!("keys.{}.uriWithVersion", key_name)
}

/// Names of the keys a vault node declares.
pub fn key_names(node: &ResourceNode) -> Vec<&str> {
    node.params
        .get("keys")
        .and_then(Param::as_list)
        .map(|keys| {
            keys.iter()
                .filter_map(|k| k.get("name").and_then(Param::as_str))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ModuleCatalog;

    fn rg() -> OutputRef {
        OutputRef::new("sseResourceGroup", "name")
    }

    #[test]
    fn test_presets() {
        let ade = KeyVaultSpec::for_disk_encryption("kv-vmAde", "westeurope", rg());
        assert!(!ade.enable_purge_protection);
        assert!(!ade.enable_soft_delete);
        assert!(ade.enable_vault_for_disk_encryption);

        let cmk = KeyVaultSpec::for_customer_managed_key("kv-vmSse", "westeurope", rg());
        assert!(cmk.enable_purge_protection);
        assert!(cmk.enable_soft_delete);
    }

    #[test]
    fn test_key_vault_node() {
        let node = KeyVaultSpec::for_customer_managed_key("kv-vmSse", "westeurope", rg())
            .with_key(KeySpec::rsa("encryptKey", 3072))
            .with_role_assignment(RoleAssignment::service_principal(
                OutputRef::new("sseIdentity", "principalId"),
                BuiltinRole::KEY_VAULT_CRYPTO_SERVICE_ENCRYPTION_USER,
            ))
            .into_node(
                "sseKeyVault",
                "sse",
                ModuleCatalog::default().source(ResourceKind::KeyVault),
            );

        assert_eq!(node.scope().as_deref(), Some("sseResourceGroup"));
        assert_eq!(key_names(&node), vec!["encryptKey"]);
        assert_eq!(
            node.params.pointer("keys/0/kty").and_then(Param::as_str),
            Some("RSA")
        );
        assert_eq!(
            node.params
                .pointer("roleAssignments/0/principalId")
                .and_then(Param::as_ref_target),
            Some(&OutputRef::new("sseIdentity", "principalId"))
        );
    }

    #[test]
    fn test_builtin_role_matches() {
        let role = BuiltinRole::KEY_VAULT_CRYPTO_SERVICE_ENCRYPTION_USER;
        assert!(role.matches("Key Vault Crypto Service Encryption User"));
        assert!(role.matches("e147488a-f6f5-4113-8e2d-b22465e65bf6"));
        assert!(role.matches(
            "/providers/Microsoft.Authorization/roleDefinitions/e147488a-f6f5-4113-8e2d-b22465e65bf6"
        ));
        assert!(!role.matches("Key Vault Reader"));
    }
}
