//! Provisioning engine
//!
//! The [`Deployer`] walks the resource graph wave by wave. Before a node is
//! handed to a [`Provisioner`], every output reference in its parameters is
//! replaced with the concrete value its producer returned, giving a
//! [`ResolvedNode`]. Nodes within a wave run concurrently; when one fails,
//! everything downstream of it is skipped while independent branches carry on.
//!
//! [`SimulatedProvisioner`] stands in for the real deployment engine and
//! reproduces the platform checks that matter for disk encryption.

mod deployer;
mod simulated;

pub use deployer::{DeploymentReport, Deployer, NodeReport, NodeStatus};
pub use simulated::{RoleGrant, SimulatedProvisioner};

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{OutputRef, ResourceNode};
use crate::resources::{ModuleSource, ResourceKind};

/// Errors raised while provisioning a node
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    /// The platform refused to create the resource
    #[error("{node}: rejected by the platform: {reason}")]
    Rejected { node: String, reason: String },

    /// A principal lacks the permissions an operation needs
    #[error("{node}: access denied: {reason}")]
    AccessDenied { node: String, reason: String },

    /// Parameters are missing or malformed
    #[error("{node}: invalid parameters: {message}")]
    InvalidParameters { node: String, message: String },

    /// A reference could not be resolved from upstream outputs
    #[error("{node}: {message}")]
    Unresolved { node: String, message: String },

    /// Failure requested through [`SimulatedProvisioner::fail_on`]
    #[error("{node}: injected failure")]
    Injected { node: String },
}

impl ProvisionError {
    /// Id of the node that failed.
    pub fn node(&self) -> &str {
        match self {
            ProvisionError::Rejected { node, .. }
            | ProvisionError::AccessDenied { node, .. }
            | ProvisionError::InvalidParameters { node, .. }
            | ProvisionError::Unresolved { node, .. }
            | ProvisionError::Injected { node } => node,
        }
    }
}

/// Result type for provisioning operations
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Outputs a provisioned node returned, keyed by declared output field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeOutputs(pub serde_json::Map<String, serde_json::Value>);

impl NodeOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Look up a dotted output path (`keys.encryptKey.uriWithVersion`).
    pub fn lookup(&self, path: &str) -> Option<&serde_json::Value> {
        let mut segments = path.split('.');
        let first = self.0.get(segments.next()?)?;
        segments.try_fold(first, |value, segment| value.get(segment))
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.lookup(path).and_then(serde_json::Value::as_str)
    }
}

/// A node with every reference replaced by its concrete value
#[derive(Clone)]
pub struct ResolvedNode {
    pub id: String,
    pub kind: ResourceKind,
    pub name: String,
    pub flow: String,
    pub module: ModuleSource,
    /// Module parameters, secrets in clear
    pub params: serde_json::Value,
}

impl ResolvedNode {
    /// Resolve `node` against the outputs of already provisioned nodes.
    pub fn resolve(
        node: &ResourceNode,
        outputs: &HashMap<String, NodeOutputs>,
    ) -> ProvisionResult<Self> {
        Self::resolve_with(node, &|r: &OutputRef| {
            outputs.get(&r.node).and_then(|o| o.lookup(&r.output)).cloned()
        })
    }

    /// Resolve `node` with an arbitrary lookup.
    pub fn resolve_with<F>(node: &ResourceNode, lookup: &F) -> ProvisionResult<Self>
    where
        F: Fn(&OutputRef) -> Option<serde_json::Value>,
    {
        let params = node
            .params
            .resolve(lookup)
            .map_err(|e| ProvisionError::Unresolved {
                node: node.id.clone(),
                message: e.to_string(),
            })?;
        Ok(Self {
            id: node.id.clone(),
            kind: node.kind,
            name: node.name.clone(),
            flow: node.flow.clone(),
            module: node.module.clone(),
            params,
        })
    }

    /// A parameter by `/`-separated path.
    pub fn param(&self, path: &str) -> Option<&serde_json::Value> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .try_fold(&self.params, |value, segment| match value {
                serde_json::Value::Array(items) => {
                    segment.parse::<usize>().ok().and_then(|i| items.get(i))
                }
                other => other.get(segment),
            })
    }

    pub fn param_str(&self, path: &str) -> Option<&str> {
        self.param(path).and_then(serde_json::Value::as_str)
    }

    pub fn param_bool(&self, path: &str) -> Option<bool> {
        self.param(path).and_then(serde_json::Value::as_bool)
    }

    /// A required string parameter.
    pub fn require_str(&self, path: &str) -> ProvisionResult<&str> {
        self.param_str(path)
            .ok_or_else(|| ProvisionError::InvalidParameters {
                node: self.id.clone(),
                message: format!("'{}' must be a string", path),
            })
    }
}

// Resolved params hold secrets in clear.
impl fmt::Debug for ResolvedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("module", &self.module.to_string())
            .finish_non_exhaustive()
    }
}

/// Creates resources
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create the resource and return its declared outputs.
    async fn provision(&self, node: &ResolvedNode) -> ProvisionResult<NodeOutputs>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "provisioner"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Param;
    use crate::resources::ModuleCatalog;
    use serde_json::json;

    #[test]
    fn test_outputs_lookup() {
        let outputs = NodeOutputs::new()
            .with("uri", "https://kv-vmAde.vault.azure.net/")
            .with("keys", json!({"encryptKey": {"uriWithVersion": "https://kv-vmAde.vault.azure.net/keys/encryptKey/1"}}));
        assert_eq!(outputs.get_str("uri"), Some("https://kv-vmAde.vault.azure.net/"));
        assert_eq!(
            outputs.get_str("keys.encryptKey.uriWithVersion"),
            Some("https://kv-vmAde.vault.azure.net/keys/encryptKey/1")
        );
        assert!(outputs.lookup("keys.missing.uri").is_none());
    }

    #[test]
    fn test_resolve_node() {
        let node = ResourceNode::new(
            "vm",
            ResourceKind::VirtualMachine,
            "vm01",
            "test",
            ModuleCatalog::default().source(ResourceKind::VirtualMachine),
            Param::object([
                ("resourceGroupName", Param::reference("rg", "name")),
                ("adminPassword", Param::Secret("Example-Passw0rd!".to_string())),
            ]),
        );
        let mut outputs = HashMap::new();
        outputs.insert("rg".to_string(), NodeOutputs::new().with("name", "rg-vm01"));

        let resolved = ResolvedNode::resolve(&node, &outputs).unwrap();
        assert_eq!(resolved.param_str("resourceGroupName"), Some("rg-vm01"));
        assert_eq!(resolved.param_str("adminPassword"), Some("Example-Passw0rd!"));
        assert!(!format!("{:?}", resolved).contains("Passw0rd"));

        let err = ResolvedNode::resolve(&node, &HashMap::new()).unwrap_err();
        assert!(matches!(err, ProvisionError::Unresolved { .. }));
    }
}
