//! Subcommands module for vmcrypt CLI
//!
//! This module contains all the subcommand implementations.

pub mod apply;
pub mod graph;
pub mod plan;
pub mod render;
pub mod validate;

use crate::cli::output::OutputFormatter;
use crate::cli::OutputFormat;
use anyhow::{Context, Result};
use clap::ValueEnum;
use std::path::{Path, PathBuf};
use vmcrypt::config::Config;
use vmcrypt::flows::{FlowSelection, Template};
use vmcrypt::graph::ResourceGraph;
use vmcrypt::params::{DeploymentParameters, ParameterSet};
use vmcrypt::render::DeploymentDocument;

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration
    pub config: Config,
    /// Output formatter
    pub output: OutputFormatter,
    /// Parameter files, in the order given
    pub parameter_files: Vec<PathBuf>,
    /// `key=value` parameters
    pub params: Vec<String>,
    /// Flows to render
    pub flows: FlowSelection,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, config: Config) -> Self {
        let format = cli
            .output
            .or_else(|| OutputFormat::from_str(&config.defaults.output, true).ok())
            .unwrap_or_default();
        let use_color = !cli.no_color && config.colors.enabled;
        let output = OutputFormatter::new(use_color, format, cli.verbosity());

        Self {
            config,
            output,
            parameter_files: cli.parameter_files.clone(),
            params: cli.params.clone(),
            flows: cli.flow,
        }
    }

    /// Collect parameters from files, `-p` assignments and configured
    /// defaults, later sources overriding earlier ones.
    pub fn parameters(&self) -> Result<DeploymentParameters> {
        let mut set = ParameterSet::new();
        for path in &self.parameter_files {
            let file = ParameterSet::from_file(path)
                .map_err(vmcrypt::Error::from)
                .with_context(|| format!("Failed to load parameters from {}", path.display()))?;
            set.merge(file);
        }
        set.apply_overrides(self.params.iter().map(String::as_str))
            .map_err(vmcrypt::Error::from)?;
        if let Some(location) = &self.config.defaults.location {
            set.set_default("location", location.as_str());
        }
        Ok(set.build().map_err(vmcrypt::Error::from)?)
    }

    /// The template for the current parameters and configuration
    pub fn template(&self) -> Result<Template> {
        Ok(Template::new(self.parameters()?)
            .with_config(&self.config)
            .with_flows(self.flows))
    }

    /// Load a graph from a rendered document, or render one from the
    /// parameters when no document is given.
    pub fn graph(
        &self,
        document: Option<&Path>,
    ) -> Result<(ResourceGraph, Option<DeploymentParameters>)> {
        match document {
            Some(path) => {
                let document = DeploymentDocument::load(path)
                    .with_context(|| format!("Failed to load document {}", path.display()))?;
                let parameters = document.parameters.clone();
                Ok((document.into_graph()?, parameters))
            }
            None => {
                let template = self.template()?;
                let graph = template.render()?;
                Ok((graph, Some(template.parameters().clone())))
            }
        }
    }
}

/// Trait for runnable commands
#[async_trait::async_trait]
pub trait Runnable {
    /// Execute the command
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32>;
}


#[cfg(test)]
mod tests {
    use super::test_support::context;

    #[test]
    fn test_parameters_from_overrides() {
        let ctx = context(&["-p", "zone=2", "-p", "tags.env=dev"]);
        let params = ctx.parameters().unwrap();
        assert_eq!(params.location, "westeurope");
        assert_eq!(params.zone, 2);
        assert_eq!(params.tags.get("env").map(String::as_str), Some("dev"));
    }

    #[test]
    fn test_configured_location_is_a_default() {
        let mut ctx = context(&[]);
        ctx.config.defaults.location = Some("northeurope".to_string());
        assert_eq!(ctx.parameters().unwrap().location, "westeurope");
    }

    #[test]
    fn test_flow_selection() {
        let ctx = context(&["--flow", "ade"]);
        let (graph, parameters) = ctx.graph(None).unwrap();
        assert_eq!(graph.node_count(), 3);
        assert!(parameters.is_some());
    }
}
