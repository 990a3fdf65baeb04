//! # vmcrypt - Disk Encryption Deployment Planner for Azure VMs
//!
//! vmcrypt builds the resource graph for a deployment that provisions Windows
//! virtual machines with one of two disk encryption strategies:
//!
//! - **ADE**: Azure Disk Encryption. The in-guest agent encrypts the volumes
//!   with a key from a Key Vault.
//! - **SSE/CMK**: Server-Side Encryption with encryption at host, backed by a
//!   Disk Encryption Set that wraps a customer-managed key.
//!
//! Every resource is a node with declared output fields. Every parameter that
//! consumes an upstream output is an edge. The deployment order, the
//! validation rules and the rendered documents all derive from that graph.
//!
//! ## Core Concepts
//!
//! - **Parameters**: deployment inputs ([`params::DeploymentParameters`])
//! - **Flows**: the ADE and SSE wiring ([`flows`]), composed by [`flows::Template`]
//! - **Graph**: nodes, output references and waves ([`graph::ResourceGraph`])
//! - **Validation**: encryption invariant rules ([`validate`])
//! - **Provisioning**: the [`provision::Provisioner`] seam and the wave executor
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vmcrypt::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let params = DeploymentParameters::new("westeurope", subnet_id);
//!     let graph = Template::new(params).render()?;
//!
//!     validate(&graph).into_result()?;
//!
//!     let report = Deployer::new(Arc::new(SimulatedProvisioner::new()))
//!         .deploy(&graph)
//!         .await?;
//!     println!("{} resource(s) created", report.created_count());
//!     Ok(())
//! }
//! ```

// Re-export commonly used items in prelude
pub mod prelude {
    //! Common imports for working with vmcrypt.
    //!
    //! ```rust,ignore
    //! use vmcrypt::prelude::*;
    //! ```

    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::flows::{FlowSelection, Template};
    pub use crate::graph::{OutputRef, Param, ResourceGraph, ResourceNode};
    pub use crate::params::{DeploymentParameters, ParameterSet};
    pub use crate::provision::{
        DeploymentReport, Deployer, NodeStatus, Provisioner, SimulatedProvisioner,
    };
    pub use crate::render::DeploymentDocument;
    pub use crate::resources::{AdeKeyMode, ResourceKind};
    pub use crate::validate::{validate, ValidationReport, Validator};
}

/// Error types and result aliases.
pub mod error;

/// Layered configuration: system, user and project files plus environment.
pub mod config;

/// Deployment parameters, parameter files and `key=value` overrides.
pub mod params;

/// Parameter trees, output references and the resource graph.
pub mod graph;

/// Typed builders for each resource kind.
pub mod resources;

/// The ADE and SSE wiring flows.
pub mod flows;

/// Encryption invariant rules.
pub mod validate;

/// Deployment documents.
pub mod render;

/// Provisioner seam and wave executor.
pub mod provision;

pub use error::{Error, Result};

/// Version of the vmcrypt crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
