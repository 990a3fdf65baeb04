//! Deployment flows
//!
//! A flow is a chain of resources wired together purely by output
//! references. Two flows exist, and they share only the location, subnet,
//! administrator password and key name:
//!
//! - [`ade`]: resource group, key vault, VM with the Azure Disk Encryption
//!   extension
//! - [`sse`]: resource group, managed identity, key vault, disk encryption
//!   set, VM with encryption at host
//!
//! [`Template`] composes the selected flows into one [`ResourceGraph`].

pub mod ade;
pub mod sse;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::{Config, NamingConfig};
use crate::error::Result;
use crate::graph::{ResourceGraph, ResourceNode};
use crate::params::{validate_key_vault_name, DeploymentParameters};
use crate::resources::{ModuleCatalog, ResourceKind};

/// Which flows a template renders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowSelection {
    #[default]
    All,
    Ade,
    Sse,
}

impl FlowSelection {
    pub fn includes_ade(&self) -> bool {
        matches!(self, FlowSelection::All | FlowSelection::Ade)
    }

    pub fn includes_sse(&self) -> bool {
        matches!(self, FlowSelection::All | FlowSelection::Sse)
    }
}

impl FromStr for FlowSelection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" | "both" => Ok(FlowSelection::All),
            "ade" => Ok(FlowSelection::Ade),
            "sse" | "cmk" => Ok(FlowSelection::Sse),
            other => Err(format!("unknown flow '{}', expected all, ade or sse", other)),
        }
    }
}

impl fmt::Display for FlowSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowSelection::All => write!(f, "all"),
            FlowSelection::Ade => write!(f, "ade"),
            FlowSelection::Sse => write!(f, "sse"),
        }
    }
}

/// Inputs shared by both flows
pub struct FlowContext<'a> {
    pub params: &'a DeploymentParameters,
    pub naming: &'a NamingConfig,
    pub modules: &'a ModuleCatalog,
    pub admin_password: &'a str,
}

impl FlowContext<'_> {
    fn module(&self, kind: ResourceKind) -> crate::resources::ModuleSource {
        self.modules.source(kind)
    }
}

/// The deployment template
#[derive(Debug, Clone)]
pub struct Template {
    params: DeploymentParameters,
    naming: NamingConfig,
    modules: ModuleCatalog,
    flows: FlowSelection,
}

impl Template {
    /// A template over `params`. A password is generated here when none was
    /// supplied, so every render of one template uses the same one.
    pub fn new(mut params: DeploymentParameters) -> Self {
        if !params.has_admin_password() {
            tracing::info!("no adminPassword supplied, generating one");
            params.ensure_admin_password();
        }
        Self {
            params,
            naming: NamingConfig::default(),
            modules: ModuleCatalog::default(),
            flows: FlowSelection::default(),
        }
    }

    /// Use the naming prefixes and module sources from `config`.
    pub fn with_config(mut self, config: &Config) -> Self {
        self.naming = config.naming.clone();
        self.modules = config.modules.clone();
        self
    }

    pub fn with_flows(mut self, flows: FlowSelection) -> Self {
        self.flows = flows;
        self
    }

    pub fn parameters(&self) -> &DeploymentParameters {
        &self.params
    }

    pub fn flows(&self) -> FlowSelection {
        self.flows
    }

    /// Build the resource graph of the selected flows.
    pub fn render(&self) -> Result<ResourceGraph> {
        self.params.validate()?;
        for root in self.roots() {
            validate_key_vault_name(&self.naming.key_vault(root))?;
        }

        let ctx = FlowContext {
            params: &self.params,
            naming: &self.naming,
            modules: &self.modules,
            admin_password: self.params.admin_password.as_deref().unwrap_or_default(),
        };

        let mut nodes: Vec<ResourceNode> = Vec::new();
        if self.flows.includes_ade() {
            nodes.extend(ade::build(&ctx));
        }
        if self.flows.includes_sse() {
            nodes.extend(sse::build(&ctx));
        }

        let graph = ResourceGraph::from_nodes(nodes)?;
        tracing::info!(
            flows = %self.flows,
            resources = graph.node_count(),
            wires = graph.edge_count(),
            "rendered template"
        );
        Ok(graph)
    }

    fn roots(&self) -> Vec<&str> {
        let mut roots = Vec::new();
        if self.flows.includes_ade() {
            roots.push(self.params.ade_name.as_str());
        }
        if self.flows.includes_sse() {
            roots.push(self.params.sse_name.as_str());
        }
        roots
    }
}
