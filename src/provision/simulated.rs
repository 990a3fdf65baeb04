//! In-memory provisioner.
//!
//! Fabricates the outputs Azure would return and enforces the platform
//! rules a disk-encryption deployment runs into.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use super::{NodeOutputs, ProvisionError, ProvisionResult, Provisioner, ResolvedNode};
use crate::config::PLACEHOLDER_SUBSCRIPTION_ID;
use crate::graph::REDACTED;
use crate::resources::{BuiltinRole, ResourceKind};

/// A role assignment the simulator has applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleGrant {
    /// Resource id of the vault the role is scoped to
    pub vault_id: String,
    pub principal_id: String,
    /// Role name or definition id, as requested
    pub role: String,
    pub granted_at: DateTime<Utc>,
}

#[derive(Debug)]
struct VaultState {
    purge_protection: bool,
    soft_delete: bool,
    disk_encryption: bool,
    keys: HashSet<String>,
}

#[derive(Debug, Default)]
struct State {
    resource_groups: HashSet<String>,
    vault_names: HashSet<String>,
    vaults: HashMap<String, VaultState>,
    /// Identity resource id to principal id
    identities: HashMap<String, String>,
    disk_encryption_sets: HashSet<String>,
    grants: Vec<RoleGrant>,
    created: Vec<String>,
}

impl State {
    fn require_group<'a>(&self, node: &'a ResolvedNode) -> ProvisionResult<&'a str> {
        let group = node.require_str("resourceGroupName")?;
        if !self.resource_groups.contains(group) {
            return Err(reject(node, format!("resource group '{}' not found", group)));
        }
        Ok(group)
    }

    fn has_grant(&self, vault_id: &str, principal_id: &str, role: &BuiltinRole) -> bool {
        self.grants
            .iter()
            .any(|g| g.vault_id == vault_id && g.principal_id == principal_id && role.matches(&g.role))
    }
}

fn reject(node: &ResolvedNode, reason: impl Into<String>) -> ProvisionError {
    ProvisionError::Rejected {
        node: node.id.clone(),
        reason: reason.into(),
    }
}

/// Provisioner that keeps every resource in memory
#[derive(Debug)]
pub struct SimulatedProvisioner {
    subscription_id: String,
    fail_on: HashSet<String>,
    latency: Option<Duration>,
    state: Mutex<State>,
}

impl Default for SimulatedProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedProvisioner {
    pub fn new() -> Self {
        Self {
            subscription_id: PLACEHOLDER_SUBSCRIPTION_ID.to_string(),
            fail_on: HashSet::new(),
            latency: None,
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_subscription_id(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = subscription_id.into();
        self
    }

    /// Fail the node with this id instead of creating it.
    pub fn fail_on(mut self, node_id: impl Into<String>) -> Self {
        self.fail_on.insert(node_id.into());
        self
    }

    /// Sleep this long before each resource.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Role assignments applied so far, in order.
    pub fn grants(&self) -> Vec<RoleGrant> {
        self.state.lock().grants.clone()
    }

    /// Ids of the nodes created so far, in creation order.
    pub fn created(&self) -> Vec<String> {
        self.state.lock().created.clone()
    }

    fn resource_id(&self, group: &str, kind: ResourceKind, name: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/{}/{}",
            self.subscription_id,
            group,
            kind.azure_type(),
            name
        )
    }

    fn create(&self, node: &ResolvedNode) -> ProvisionResult<NodeOutputs> {
        let mut state = self.state.lock();
        let outputs = match node.kind {
            ResourceKind::ResourceGroup => self.create_resource_group(&mut state, node)?,
            ResourceKind::UserAssignedIdentity => self.create_identity(&mut state, node)?,
            ResourceKind::KeyVault => self.create_key_vault(&mut state, node)?,
            ResourceKind::DiskEncryptionSet => self.create_disk_encryption_set(&mut state, node)?,
            ResourceKind::VirtualMachine => self.create_virtual_machine(&state, node)?,
        };
        state.created.push(node.id.clone());
        Ok(outputs)
    }

    fn create_resource_group(
        &self,
        state: &mut State,
        node: &ResolvedNode,
    ) -> ProvisionResult<NodeOutputs> {
        let name = node.require_str("name")?;
        let location = node.require_str("location")?;
        if !state.resource_groups.insert(name.to_string()) {
            return Err(reject(node, format!("resource group '{}' already exists", name)));
        }
        Ok(NodeOutputs::new()
            .with(
                "resourceId",
                format!("/subscriptions/{}/resourceGroups/{}", self.subscription_id, name),
            )
            .with("name", name)
            .with("location", location))
    }

    fn create_identity(
        &self,
        state: &mut State,
        node: &ResolvedNode,
    ) -> ProvisionResult<NodeOutputs> {
        let group = state.require_group(node)?;
        let name = node.require_str("name")?;
        let resource_id = self.resource_id(group, node.kind, name);
        let principal_id = Uuid::new_v4().to_string();
        state
            .identities
            .insert(resource_id.clone(), principal_id.clone());
        Ok(NodeOutputs::new()
            .with("resourceId", resource_id)
            .with("name", name)
            .with("principalId", principal_id)
            .with("clientId", Uuid::new_v4().to_string()))
    }

    fn create_key_vault(
        &self,
        state: &mut State,
        node: &ResolvedNode,
    ) -> ProvisionResult<NodeOutputs> {
        let group = state.require_group(node)?;
        let name = node.require_str("name")?;
        if state.vault_names.contains(&name.to_ascii_lowercase()) {
            return Err(reject(node, format!("vault name '{}' is already in use", name)));
        }

        let resource_id = self.resource_id(group, node.kind, name);
        let uri = format!("https://{}.vault.azure.net/", name);

        let mut keys = serde_json::Map::new();
        let mut key_names = HashSet::new();
        for key in node
            .param("keys")
            .and_then(|k| k.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            let key_name = key.get("name").and_then(|n| n.as_str()).ok_or_else(|| {
                ProvisionError::InvalidParameters {
                    node: node.id.clone(),
                    message: "every key needs a name".to_string(),
                }
            })?;
            let key_uri = format!("{}keys/{}", uri, key_name);
            keys.insert(
                key_name.to_string(),
                json!({
                    "resourceId": format!("{}/keys/{}", resource_id, key_name),
                    "uri": key_uri,
                    "uriWithVersion": format!("{}/{}", key_uri, Uuid::new_v4().simple()),
                }),
            );
            key_names.insert(key_name.to_string());
        }

        let mut grants = Vec::new();
        for assignment in node
            .param("roleAssignments")
            .and_then(|r| r.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            let principal_id = assignment.get("principalId").and_then(|p| p.as_str());
            let role = assignment
                .get("roleDefinitionIdOrName")
                .and_then(|r| r.as_str());
            let (Some(principal_id), Some(role)) = (principal_id, role) else {
                return Err(ProvisionError::InvalidParameters {
                    node: node.id.clone(),
                    message: "role assignments need principalId and roleDefinitionIdOrName"
                        .to_string(),
                });
            };
            grants.push(RoleGrant {
                vault_id: resource_id.clone(),
                principal_id: principal_id.to_string(),
                role: role.to_string(),
                granted_at: Utc::now(),
            });
        }

        for grant in &grants {
            debug!(vault = %name, principal = %grant.principal_id, role = %grant.role, "granted role");
        }
        state.grants.extend(grants);
        state.vault_names.insert(name.to_ascii_lowercase());
        state.vaults.insert(
            resource_id.clone(),
            VaultState {
                purge_protection: node.param_bool("enablePurgeProtection").unwrap_or(false),
                soft_delete: node.param_bool("enableSoftDelete").unwrap_or(true),
                disk_encryption: node
                    .param_bool("enableVaultForDiskEncryption")
                    .unwrap_or(false),
                keys: key_names,
            },
        );

        Ok(NodeOutputs::new()
            .with("resourceId", resource_id)
            .with("name", name)
            .with("uri", uri)
            .with("keys", serde_json::Value::Object(keys)))
    }

    fn create_disk_encryption_set(
        &self,
        state: &mut State,
        node: &ResolvedNode,
    ) -> ProvisionResult<NodeOutputs> {
        let group = state.require_group(node)?;
        let name = node.require_str("name")?;
        let vault_id = node.require_str("keyVaultResourceId")?;
        let key_name = node.require_str("keyName")?;

        let vault = state
            .vaults
            .get(vault_id)
            .ok_or_else(|| reject(node, format!("key vault '{}' not found", vault_id)))?;
        if !vault.purge_protection || !vault.soft_delete {
            return Err(reject(
                node,
                "the key vault must have purge protection and soft delete enabled",
            ));
        }
        if !vault.keys.contains(key_name) {
            return Err(reject(node, format!("key '{}' not found in vault", key_name)));
        }

        let identity_ids: Vec<&str> = node
            .param("managedIdentities/userAssignedResourceIds")
            .and_then(|ids| ids.as_array())
            .map(|ids| ids.iter().filter_map(|id| id.as_str()).collect())
            .unwrap_or_default();
        if identity_ids.is_empty() {
            return Err(reject(node, "a user-assigned identity is required"));
        }

        let role = BuiltinRole::KEY_VAULT_CRYPTO_SERVICE_ENCRYPTION_USER;
        let mut authorized = false;
        for identity_id in &identity_ids {
            let principal_id = state
                .identities
                .get(*identity_id)
                .ok_or_else(|| reject(node, format!("identity '{}' not found", identity_id)))?;
            authorized |= state.has_grant(vault_id, principal_id, &role);
        }
        if !authorized {
            return Err(ProvisionError::AccessDenied {
                node: node.id.clone(),
                reason: format!(
                    "no bound identity holds '{}' on the key vault",
                    role.name
                ),
            });
        }

        let resource_id = self.resource_id(group, node.kind, name);
        state.disk_encryption_sets.insert(resource_id.clone());
        Ok(NodeOutputs::new()
            .with("resourceId", resource_id)
            .with("name", name)
            .with("location", node.param_str("location").unwrap_or_default()))
    }

    fn create_virtual_machine(
        &self,
        state: &State,
        node: &ResolvedNode,
    ) -> ProvisionResult<NodeOutputs> {
        let group = state.require_group(node)?;
        let name = node.require_str("name")?;

        match node.param_str("adminPassword") {
            Some(password) if !password.is_empty() && password != REDACTED => {}
            _ => {
                return Err(ProvisionError::InvalidParameters {
                    node: node.id.clone(),
                    message: "adminPassword is missing or redacted".to_string(),
                })
            }
        }

        let encryption_at_host = node.param_bool("encryptionAtHost").unwrap_or(false);
        let ade_enabled = node
            .param_bool("extensionAzureDiskEncryptionConfig/enabled")
            .unwrap_or(false);
        if ade_enabled {
            if encryption_at_host {
                return Err(reject(
                    node,
                    "Azure Disk Encryption cannot be combined with encryption at host",
                ));
            }
            let vault_id =
                node.require_str("extensionAzureDiskEncryptionConfig/settings/KeyVaultResourceId")?;
            let vault = state
                .vaults
                .get(vault_id)
                .ok_or_else(|| reject(node, format!("key vault '{}' not found", vault_id)))?;
            if !vault.disk_encryption {
                return Err(reject(node, "the key vault is not enabled for disk encryption"));
            }
        }

        let mut disks = vec!["osDisk/managedDisk".to_string()];
        let data_disks = node
            .param("dataDisks")
            .and_then(|d| d.as_array())
            .map_or(0, Vec::len);
        disks.extend((0..data_disks).map(|i| format!("dataDisks/{}/managedDisk", i)));
        for disk in disks {
            let path = format!("{}/diskEncryptionSetResourceId", disk);
            if let Some(des) = node.param_str(&path) {
                if !state.disk_encryption_sets.contains(des) {
                    return Err(reject(node, format!("disk encryption set '{}' not found", des)));
                }
            }
        }

        Ok(NodeOutputs::new()
            .with("resourceId", self.resource_id(group, node.kind, name))
            .with("name", name)
            .with("location", node.param_str("location").unwrap_or_default()))
    }
}

#[async_trait]
impl Provisioner for SimulatedProvisioner {
    async fn provision(&self, node: &ResolvedNode) -> ProvisionResult<NodeOutputs> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail_on.contains(&node.id) {
            return Err(ProvisionError::Injected {
                node: node.id.clone(),
            });
        }
        self.create(node)
    }

    fn name(&self) -> &str {
        "simulated"
    }
}
