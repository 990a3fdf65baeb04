//! Wave executor

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::{NodeOutputs, ProvisionResult, Provisioner, ResolvedNode};
use crate::error::{Error, Result};
use crate::graph::{OutputRef, ResourceGraph, ResourceNode};
use crate::resources::ResourceKind;

/// Outcome of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Created,
    Failed,
    /// An upstream node failed or was skipped
    Skipped,
    /// Resolved in check mode without provisioning
    Planned,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Created => write!(f, "created"),
            NodeStatus::Failed => write!(f, "failed"),
            NodeStatus::Skipped => write!(f, "skipped"),
            NodeStatus::Planned => write!(f, "planned"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReport {
    pub id: String,
    pub name: String,
    pub kind: ResourceKind,
    pub wave: usize,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<NodeOutputs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl NodeReport {
    fn new(node: &ResourceNode, wave: usize, status: NodeStatus) -> Self {
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            kind: node.kind,
            wave,
            status,
            outputs: None,
            error: None,
            elapsed_ms: 0,
        }
    }
}

/// Result of a deployment run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub check_mode: bool,
    pub provisioner: String,
    pub waves: Vec<Vec<String>>,
    /// Node outcomes in wave order
    pub nodes: Vec<NodeReport>,
}

impl DeploymentReport {
    pub fn node(&self, id: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.nodes.iter().filter(|n| n.status == status).count()
    }

    pub fn created_count(&self) -> usize {
        self.count(NodeStatus::Created)
    }

    pub fn failed_count(&self) -> usize {
        self.count(NodeStatus::Failed)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(NodeStatus::Skipped)
    }

    /// No node failed or was skipped.
    pub fn is_success(&self) -> bool {
        self.failed_count() == 0 && self.skipped_count() == 0
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Turn a report with failures into [`Error::DeploymentFailed`].
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::DeploymentFailed {
                failed: self.failed_count(),
                skipped: self.skipped_count(),
            })
        }
    }
}

/// Called once per node as soon as its outcome is known
pub type ProgressCallback = Arc<dyn Fn(&NodeReport) + Send + Sync>;

/// Applies a resource graph through a [`Provisioner`]
pub struct Deployer {
    provisioner: Arc<dyn Provisioner>,
    check_mode: bool,
    on_progress: Option<ProgressCallback>,
}

impl Deployer {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            provisioner,
            check_mode: false,
            on_progress: None,
        }
    }

    /// Resolve every node without calling the provisioner.
    pub fn check_mode(mut self, enabled: bool) -> Self {
        self.check_mode = enabled;
        self
    }

    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Deploy the graph wave by wave.
    ///
    /// Fails only when the graph cannot be ordered. Provisioning failures
    /// are recorded in the report; use [`DeploymentReport::into_result`] to
    /// turn them into an error.
    pub async fn deploy(&self, graph: &ResourceGraph) -> Result<DeploymentReport> {
        let started_at = Utc::now();
        let waves = graph.waves()?;
        info!(
            provisioner = self.provisioner.name(),
            waves = waves.len(),
            resources = graph.node_count(),
            check_mode = self.check_mode,
            "starting deployment"
        );

        let mut outputs: HashMap<String, NodeOutputs> = HashMap::new();
        // Skipped node id to the failed node that caused it
        let mut blocked: HashMap<String, String> = HashMap::new();
        let mut reports = Vec::with_capacity(graph.node_count());

        for (index, wave) in waves.iter().enumerate() {
            let mut runnable = Vec::new();
            for id in wave {
                let Some(node) = graph.node(id) else {
                    continue;
                };
                match blocked.get(id) {
                    Some(upstream) => {
                        warn!(node = %id, upstream = %upstream, "skipping resource");
                        let mut report = NodeReport::new(node, index, NodeStatus::Skipped);
                        report.error = Some(format!("upstream resource '{}' failed", upstream));
                        self.record(&mut reports, report);
                    }
                    None => runnable.push(node),
                }
            }

            info!(wave = index, resources = runnable.len(), "deploying wave");
            let results = if self.check_mode {
                runnable.iter().map(|node| plan(node)).collect::<Vec<_>>()
            } else {
                let outputs = &outputs;
                join_all(runnable.iter().map(|node| {
                    let provisioner = &self.provisioner;
                    async move {
                        let start = Instant::now();
                        let result = match ResolvedNode::resolve(node, outputs) {
                            Ok(resolved) => {
                                debug!(node = %node.id, module = %node.module, "provisioning");
                                provisioner.provision(&resolved).await
                            }
                            Err(e) => Err(e),
                        };
                        (result, start.elapsed().as_millis() as u64)
                    }
                }))
                .await
            };

            for (node, (result, elapsed_ms)) in runnable.into_iter().zip(results) {
                let mut report = NodeReport::new(node, index, NodeStatus::Created);
                report.elapsed_ms = elapsed_ms;
                match result {
                    Ok(node_outputs) if self.check_mode => {
                        report.status = NodeStatus::Planned;
                        report.outputs = Some(node_outputs);
                    }
                    Ok(node_outputs) => {
                        info!(node = %node.id, name = %node.name, elapsed_ms, "created resource");
                        report.outputs = Some(node_outputs.clone());
                        outputs.insert(node.id.clone(), node_outputs);
                    }
                    Err(e) => {
                        error!(node = %node.id, error = %e, "provisioning failed");
                        report.status = NodeStatus::Failed;
                        report.error = Some(e.to_string());
                        for dependent in graph.dependents(&node.id) {
                            blocked.entry(dependent).or_insert_with(|| node.id.clone());
                        }
                    }
                }
                self.record(&mut reports, report);
            }
        }

        let report = DeploymentReport {
            started_at,
            finished_at: Utc::now(),
            check_mode: self.check_mode,
            provisioner: self.provisioner.name().to_string(),
            waves,
            nodes: reports,
        };
        info!(
            created = report.created_count(),
            failed = report.failed_count(),
            skipped = report.skipped_count(),
            duration_ms = report.duration_ms(),
            "deployment finished"
        );
        Ok(report)
    }

    fn record(&self, reports: &mut Vec<NodeReport>, report: NodeReport) {
        if let Some(callback) = &self.on_progress {
            callback(&report);
        }
        reports.push(report);
    }
}

/// Resolve a node against placeholder values and return placeholder outputs.
fn plan(node: &ResourceNode) -> (ProvisionResult<NodeOutputs>, u64) {
    let placeholder = |r: &OutputRef| Some(serde_json::Value::String(format!("<{}>", r)));
    let result = ResolvedNode::resolve_with(node, &placeholder).map(|_| {
        node.kind
            .outputs()
            .iter()
            .fold(NodeOutputs::new(), |outputs, field| {
                let reference = OutputRef::new(node.id.as_str(), *field);
                outputs.with(*field, format!("<{}>", reference))
            })
    });
    (result, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::Template;
    use crate::params::DeploymentParameters;
    use crate::provision::SimulatedProvisioner;

    const SUBNET: &str = "/subscriptions/0000/resourceGroups/net/providers/Microsoft.Network/virtualNetworks/vnet/subnets/default";

    fn graph() -> ResourceGraph {
        Template::new(DeploymentParameters::new("westeurope", SUBNET))
            .render()
            .unwrap()
    }

    #[tokio::test]
    async fn test_deploy_template() {
        let sim = Arc::new(SimulatedProvisioner::new());
        let report = Deployer::new(sim.clone()).deploy(&graph()).await.unwrap();
        assert!(report.is_success(), "{:?}", report.nodes);
        assert_eq!(report.created_count(), 8);
        assert_eq!(report.waves.len(), 5);
        let created = sim.created();
        let position = |id: &str| created.iter().position(|c| c == id).unwrap();
        assert!(position("sseKeyVault") < position("sseDiskEncryptionSet"));
        assert!(position("sseDiskEncryptionSet") < position("sseVirtualMachine"));
    }

    #[tokio::test]
    async fn test_check_mode_does_not_provision() {
        let sim = Arc::new(SimulatedProvisioner::new());
        let report = Deployer::new(sim.clone())
            .check_mode(true)
            .deploy(&graph())
            .await
            .unwrap();
        assert_eq!(report.count(NodeStatus::Planned), 8);
        assert!(sim.created().is_empty());
        let vault = report.node("adeKeyVault").unwrap();
        assert_eq!(
            vault.outputs.as_ref().and_then(|o| o.get_str("uri")),
            Some("<adeKeyVault.outputs.uri>")
        );
    }

    #[tokio::test]
    async fn test_failure_skips_dependents() {
        let sim = Arc::new(SimulatedProvisioner::new().fail_on("sseIdentity"));
        let report = Deployer::new(sim).deploy(&graph()).await.unwrap();
        assert_eq!(report.node("sseIdentity").unwrap().status, NodeStatus::Failed);
        for id in ["sseKeyVault", "sseDiskEncryptionSet", "sseVirtualMachine"] {
            assert_eq!(report.node(id).unwrap().status, NodeStatus::Skipped, "{}", id);
        }
        assert_eq!(report.created_count(), 4);
        assert!(matches!(
            report.into_result(),
            Err(Error::DeploymentFailed { failed: 1, skipped: 3 })
        ));
    }
}
