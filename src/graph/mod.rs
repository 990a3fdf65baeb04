//! Resource dependency graph
//!
//! Each resource is a node with a set of declared output fields. Each
//! downstream parameter that references an upstream output becomes an edge
//! from producer to consumer. Deployment order is never hardcoded: it is
//! the topological order of this edge set, and independent nodes are grouped
//! into waves that may be applied concurrently.
//!
//! This module provides:
//!
//! - Edge derivation from [`Param`] references
//! - Execution ordering and wave layering
//! - Impact analysis (what is skipped when a node fails)
//! - Cycle and dangling-reference detection
//! - DOT export for visualization

pub mod param;

pub use param::{OutputRef, Param, REDACTED};

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resources::{ModuleSource, ResourceKind};

/// Errors raised while building or ordering a resource graph
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Dependency cycle detected between: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error("Invalid output reference '{0}', expected '<node>.outputs.<field>'")]
    InvalidReference(String),

    #[error("Reference '{0}' could not be resolved")]
    UnresolvedReference(String),

    #[error("{count} dangling reference(s), first: {first}")]
    DanglingReferences { count: usize, first: String },

    #[error("Invalid deployment document: {0}")]
    InvalidDocument(String),
}

/// Result type for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// A resource to provision, with its module parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceNode {
    /// Symbolic id, unique within the graph (e.g. `sseKeyVault`)
    pub id: String,
    /// Kind of resource
    pub kind: ResourceKind,
    /// Azure resource name (e.g. `kv-vmSse`)
    pub name: String,
    /// Flow this node belongs to (`ade` or `sse`)
    pub flow: String,
    /// Module that provisions it
    pub module: ModuleSource,
    /// Module parameters
    pub params: Param,
}

impl ResourceNode {
    pub fn new(
        id: impl Into<String>,
        kind: ResourceKind,
        name: impl Into<String>,
        flow: impl Into<String>,
        module: ModuleSource,
        params: Param,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            flow: flow.into(),
            module,
            params,
        }
    }

    /// Scope this node is deployed into: the referenced resource group node
    /// id, a literal resource group name, or `None` for subscription scope.
    pub fn scope(&self) -> Option<String> {
        match self.params.get("resourceGroupName")? {
            Param::Ref(r) => Some(r.node.clone()),
            Param::Str(s) => Some(s.clone()),
            _ => None,
        }
    }
}

/// An edge: the consumer's parameter at `param_path` reads the producer's
/// `output`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wire {
    pub output: String,
    pub param_path: String,
}

/// Why a reference could not be wired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DanglingReason {
    /// No node with that id exists
    UnknownNode,
    /// The node exists but its kind does not declare that output
    UndeclaredOutput,
}

/// A reference that did not become an edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DanglingRef {
    pub consumer: String,
    pub param_path: String,
    pub reference: OutputRef,
    pub reason: DanglingReason,
}

/// The dependency graph for a deployment
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    /// The underlying graph, edges point from producer to consumer
    graph: DiGraph<ResourceNode, Wire>,
    /// Map from node id to index, in insertion order
    node_indices: IndexMap<String, NodeIndex>,
    /// References that did not resolve to a declared output
    dangling: Vec<DanglingRef>,
}

impl ResourceGraph {
    /// Build a graph from nodes, deriving one edge per output reference.
    ///
    /// Only duplicate ids are fatal here. References to unknown nodes or
    /// undeclared outputs are kept in [`ResourceGraph::dangling`] so that a
    /// validator can report all of them at once.
    pub fn from_nodes(nodes: impl IntoIterator<Item = ResourceNode>) -> GraphResult<Self> {
        let mut graph = Self::default();

        for node in nodes {
            if graph.node_indices.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode(node.id));
            }
            let id = node.id.clone();
            let idx = graph.graph.add_node(node);
            graph.node_indices.insert(id, idx);
        }

        let mut edges = Vec::new();
        for &to_idx in graph.node_indices.values() {
            let consumer = &graph.graph[to_idx];
            for (param_path, reference) in consumer.params.refs() {
                match graph.node_indices.get(&reference.node) {
                    None => graph.dangling.push(DanglingRef {
                        consumer: consumer.id.clone(),
                        param_path,
                        reference: reference.clone(),
                        reason: DanglingReason::UnknownNode,
                    }),
                    Some(&from_idx) if !graph.graph[from_idx].kind.declares(reference.field()) => {
                        graph.dangling.push(DanglingRef {
                            consumer: consumer.id.clone(),
                            param_path,
                            reference: reference.clone(),
                            reason: DanglingReason::UndeclaredOutput,
                        })
                    }
                    Some(&from_idx) => edges.push((
                        from_idx,
                        to_idx,
                        Wire {
                            output: reference.output.clone(),
                            param_path,
                        },
                    )),
                }
            }
        }

        for (from, to, wire) in edges {
            graph.graph.add_edge(from, to, wire);
        }

        tracing::debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            dangling = graph.dangling.len(),
            "built resource graph"
        );

        Ok(graph)
    }

    /// Get a node by id
    pub fn node(&self, id: &str) -> Option<&ResourceNode> {
        self.node_indices.get(id).map(|idx| &self.graph[*idx])
    }

    /// Iterate nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.node_indices.values().map(move |idx| &self.graph[*idx])
    }

    /// Nodes of one kind, in insertion order
    pub fn nodes_of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &ResourceNode> {
        self.nodes().filter(move |n| n.kind == kind)
    }

    /// The node a reference points at, if it exists
    pub fn producer(&self, reference: &OutputRef) -> Option<&ResourceNode> {
        self.node(&reference.node)
    }

    /// References that did not become edges
    pub fn dangling(&self) -> &[DanglingRef] {
        &self.dangling
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of edges
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All edges as `(producer, consumer, wire)`
    pub fn edges(&self) -> Vec<(&str, &str, &Wire)> {
        self.graph
            .edge_references()
            .map(|e| {
                (
                    self.graph[e.source()].id.as_str(),
                    self.graph[e.target()].id.as_str(),
                    e.weight(),
                )
            })
            .collect()
    }

    /// Check for dependency cycles
    pub fn has_cycles(&self) -> bool {
        !self.cycles().is_empty()
    }

    /// Get all cycles in the graph
    pub fn cycles(&self) -> Vec<Vec<String>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0])
            })
            .map(|scc| scc.into_iter().map(|idx| self.graph[idx].id.clone()).collect())
            .collect()
    }

    /// Direct producers a node reads from, deduplicated, in insertion order
    pub fn dependencies(&self, id: &str) -> Vec<&str> {
        let Some(&idx) = self.node_indices.get(id) else {
            return Vec::new();
        };
        let producers: HashSet<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect();
        self.node_indices
            .iter()
            .filter(|(_, i)| producers.contains(i))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// All nodes that depend on a given node (direct and transitive)
    pub fn dependents(&self, id: &str) -> Vec<String> {
        let mut dependents = HashSet::new();
        let mut queue = VecDeque::new();

        if let Some(&start_idx) = self.node_indices.get(id) {
            queue.push_back(start_idx);

            while let Some(current) = queue.pop_front() {
                for neighbor in self.graph.neighbors_directed(current, Direction::Outgoing) {
                    if dependents.insert(neighbor) {
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        self.node_indices
            .iter()
            .filter(|(_, idx)| dependents.contains(idx))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Topological order of node ids, ties broken by insertion order
    pub fn execution_order(&self) -> GraphResult<Vec<String>> {
        Ok(self.waves()?.into_iter().flatten().collect())
    }

    /// Group nodes into waves: a node's wave is one past the latest wave of
    /// any of its producers. Nodes in the same wave have no dependency on
    /// each other.
    pub fn waves(&self) -> GraphResult<Vec<Vec<String>>> {
        if let Some(first) = self.dangling.first() {
            return Err(GraphError::DanglingReferences {
                count: self.dangling.len(),
                first: format!("{} -> {}", first.consumer, first.reference),
            });
        }

        let order = toposort(&self.graph, None).map_err(|_| {
            GraphError::DependencyCycle(self.cycles().into_iter().flatten().collect())
        })?;

        let mut level: HashMap<NodeIndex, usize> = HashMap::new();
        for idx in order {
            let depth = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter_map(|p| level.get(&p).map(|l| l + 1))
                .max()
                .unwrap_or(0);
            level.insert(idx, depth);
        }

        let depth = level.values().copied().max().map_or(0, |m| m + 1);
        let mut waves = vec![Vec::new(); depth];
        for (id, idx) in &self.node_indices {
            waves[level[idx]].push(id.clone());
        }
        Ok(waves)
    }

    /// What would be skipped if a node fails
    pub fn impact_analysis(&self, id: &str) -> ImpactAnalysis {
        let affected = self.dependents(id);
        ImpactAnalysis {
            node_id: id.to_string(),
            critical_path_length: self.critical_path_length(id),
            affected_node_ids: affected,
        }
    }

    /// Length of the longest dependency chain starting at a node
    fn critical_path_length(&self, id: &str) -> usize {
        fn depth(
            graph: &DiGraph<ResourceNode, Wire>,
            idx: NodeIndex,
            memo: &mut HashMap<NodeIndex, usize>,
            visiting: &mut HashSet<NodeIndex>,
        ) -> usize {
            if let Some(&d) = memo.get(&idx) {
                return d;
            }
            if !visiting.insert(idx) {
                return 0;
            }
            let d = graph
                .neighbors_directed(idx, Direction::Outgoing)
                .map(|n| depth(graph, n, memo, visiting) + 1)
                .max()
                .unwrap_or(0);
            visiting.remove(&idx);
            memo.insert(idx, d);
            d
        }

        self.node_indices.get(id).map_or(0, |&idx| {
            depth(&self.graph, idx, &mut HashMap::new(), &mut HashSet::new())
        })
    }

    /// Generate a DOT format representation for visualization
    pub fn to_dot(&self) -> String {
        let mut output = String::new();
        output.push_str("digraph deployment {\n");
        output.push_str("  rankdir=LR;\n");
        output.push_str("  node [shape=box];\n\n");

        let mut by_flow: IndexMap<&str, Vec<&ResourceNode>> = IndexMap::new();
        for node in self.nodes() {
            by_flow.entry(node.flow.as_str()).or_default().push(node);
        }

        for (flow, nodes) in by_flow {
            output.push_str(&format!("  subgraph \"cluster_{}\" {{\n", flow));
            output.push_str(&format!("    label=\"{}\";\n", flow));
            for node in nodes {
                output.push_str(&format!(
                    "    \"{}\" [label=\"{}\\n{}\"];\n",
                    node.id, node.name, node.kind
                ));
            }
            output.push_str("  }\n");
        }

        output.push('\n');

        for (source, target, wire) in self.edges() {
            output.push_str(&format!(
                "  \"{}\" -> \"{}\" [label=\"{}\"];\n",
                source, target, wire.output
            ));
        }

        for dangling in &self.dangling {
            output.push_str(&format!(
                "  \"{}\" -> \"{}\" [style=dashed, color=red];\n",
                dangling.reference.node, dangling.consumer
            ));
        }

        output.push_str("}\n");
        output
    }
}

/// Result of an impact analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactAnalysis {
    /// Node that was analyzed
    pub node_id: String,
    /// Nodes that cannot be applied if it fails
    pub affected_node_ids: Vec<String>,
    /// Length of the longest chain below it
    pub critical_path_length: usize,
}

impl ImpactAnalysis {
    /// Get the number of affected nodes
    pub fn affected_count(&self) -> usize {
        self.affected_node_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ModuleCatalog;

    fn node(id: &str, kind: ResourceKind, params: Param) -> ResourceNode {
        ResourceNode::new(
            id,
            kind,
            id,
            "test",
            ModuleCatalog::default().source(kind),
            params,
        )
    }

    fn chain() -> ResourceGraph {
        ResourceGraph::from_nodes([
            node("rg", ResourceKind::ResourceGroup, Param::default()),
            node(
                "kv",
                ResourceKind::KeyVault,
                Param::object([("resourceGroupName", Param::reference("rg", "name"))]),
            ),
            node(
                "des",
                ResourceKind::DiskEncryptionSet,
                Param::object([
                    ("resourceGroupName", Param::reference("rg", "name")),
                    ("keyVaultResourceId", Param::reference("kv", "resourceId")),
                ]),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_edges_follow_references() {
        let graph = chain();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.dependencies("des"), vec!["rg", "kv"]);
        assert!(graph.dangling().is_empty());
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let err = ResourceGraph::from_nodes([
            node("rg", ResourceKind::ResourceGroup, Param::default()),
            node("rg", ResourceKind::ResourceGroup, Param::default()),
        ])
        .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateNode(id) if id == "rg"));
    }

    #[test]
    fn test_waves() {
        let graph = chain();
        let waves = graph.waves().unwrap();
        assert_eq!(
            waves,
            vec![
                vec!["rg".to_string()],
                vec!["kv".to_string()],
                vec!["des".to_string()]
            ]
        );
    }

    #[test]
    fn test_dependents_and_impact() {
        let graph = chain();
        assert_eq!(graph.dependents("rg"), vec!["kv", "des"]);
        let impact = graph.impact_analysis("rg");
        assert_eq!(impact.affected_count(), 2);
        assert_eq!(impact.critical_path_length, 2);
        assert!(graph.dependents("des").is_empty());
    }

    #[test]
    fn test_dangling_references() {
        let graph = ResourceGraph::from_nodes([
            node("rg", ResourceKind::ResourceGroup, Param::default()),
            node(
                "vm",
                ResourceKind::VirtualMachine,
                Param::object([
                    ("resourceGroupName", Param::reference("rg", "principalId")),
                    ("diskEncryptionSet", Param::reference("missing", "resourceId")),
                ]),
            ),
        ])
        .unwrap();

        let reasons: Vec<_> = graph.dangling().iter().map(|d| d.reason).collect();
        assert_eq!(
            reasons,
            vec![DanglingReason::UndeclaredOutput, DanglingReason::UnknownNode]
        );
        assert!(matches!(
            graph.waves(),
            Err(GraphError::DanglingReferences { count: 2, .. })
        ));
    }

    #[test]
    fn test_cycle_detection() {
        let graph = ResourceGraph::from_nodes([
            node(
                "a",
                ResourceKind::KeyVault,
                Param::object([("x", Param::reference("b", "resourceId"))]),
            ),
            node(
                "b",
                ResourceKind::KeyVault,
                Param::object([("x", Param::reference("a", "resourceId"))]),
            ),
        ])
        .unwrap();

        assert!(graph.has_cycles());
        assert!(matches!(
            graph.execution_order(),
            Err(GraphError::DependencyCycle(_))
        ));
    }

    #[test]
    fn test_to_dot() {
        let dot = chain().to_dot();
        assert!(dot.contains("digraph deployment"));
        assert!(dot.contains("\"kv\" -> \"des\" [label=\"resourceId\"]"));
        assert!(dot.contains("cluster_test"));
    }
}
