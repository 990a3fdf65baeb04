//! Shared test utilities and fixtures for the vmcrypt test suite.
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;

use vmcrypt::flows::Template;
use vmcrypt::graph::{Param, ResourceGraph, ResourceNode};
use vmcrypt::params::DeploymentParameters;
use vmcrypt::provision::{
    NodeOutputs, ProvisionResult, Provisioner, ResolvedNode, SimulatedProvisioner,
};

pub const SUBNET: &str = "/subscriptions/11111111-2222-3333-4444-555555555555/resourceGroups/rg-network/providers/Microsoft.Network/virtualNetworks/vnet-hub/subnets/snet-vms";

pub const PASSWORD: &str = "Correct-Horse-42";

/// Parameters with only the required values and a fixed password.
pub fn params() -> DeploymentParameters {
    let mut params = DeploymentParameters::new("westeurope", SUBNET);
    params.admin_password = Some(PASSWORD.to_string());
    params
}

/// The full template with default parameters.
pub fn template_graph() -> ResourceGraph {
    Template::new(params()).render().unwrap()
}

/// Rebuild `graph` after applying `edit` to the node with `id`.
pub fn edit_node(
    graph: &ResourceGraph,
    id: &str,
    edit: impl FnOnce(&mut ResourceNode),
) -> ResourceGraph {
    let mut edit = Some(edit);
    let nodes = graph.nodes().cloned().map(|mut node| {
        if node.id == id {
            if let Some(edit) = edit.take() {
                edit(&mut node);
            }
        }
        node
    });
    ResourceGraph::from_nodes(nodes).unwrap()
}

/// Mutable access to a parameter by `/`-separated path; list segments are
/// indices.
pub fn param_mut<'a>(params: &'a mut Param, path: &str) -> &'a mut Param {
    path.split('/').fold(params, |param, key| {
        let next = match param {
            Param::List(items) => key.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
            other => other.get_mut(key),
        };
        next.unwrap_or_else(|| panic!("no parameter '{}'", key))
    })
}

/// Provisioner that records every resolved node before delegating to the
/// simulator.
pub struct RecordingProvisioner {
    pub inner: SimulatedProvisioner,
    seen: Mutex<Vec<ResolvedNode>>,
}

impl RecordingProvisioner {
    pub fn new(inner: SimulatedProvisioner) -> Self {
        Self {
            inner,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn resolved(&self, id: &str) -> Option<ResolvedNode> {
        self.seen.lock().iter().find(|n| n.id == id).cloned()
    }
}

#[async_trait]
impl Provisioner for RecordingProvisioner {
    async fn provision(&self, node: &ResolvedNode) -> ProvisionResult<NodeOutputs> {
        self.seen.lock().push(node.clone());
        self.inner.provision(node).await
    }

    fn name(&self) -> &str {
        "recording"
    }
}
