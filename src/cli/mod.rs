//! CLI module for vmcrypt
//!
//! Argument parsing and subcommand dispatch. Parameters and configuration
//! are shared by every subcommand through global flags.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use vmcrypt::flows::FlowSelection;

/// vmcrypt - Disk encryption deployment planner for Azure VMs
///
/// Renders, validates, orders and simulates deployments of Windows VMs
/// encrypted with Azure Disk Encryption or with a customer-managed key.
#[derive(Parser, Debug, Clone)]
#[command(name = "vmcrypt")]
#[command(author = "vmcrypt Contributors")]
#[command(version)]
#[command(about = "Disk encryption deployment planner for Azure VMs", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (defaults to the configured one)
    #[arg(long, global = true)]
    pub output: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Parameter file (YAML or JSON), may be repeated
    #[arg(short = 'P', long = "parameters", global = true, action = clap::ArgAction::Append)]
    pub parameter_files: Vec<PathBuf>,

    /// Single parameter (key=value), applied after parameter files
    #[arg(short = 'p', long = "param", global = true, action = clap::ArgAction::Append)]
    pub params: Vec<String>,

    /// Flows to render: all, ade or sse
    #[arg(long, global = true, default_value = "all")]
    pub flow: FlowSelection,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Human,
    /// JSON output for scripting
    Json,
    /// YAML output
    Yaml,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Render the deployment document
    Render(commands::render::RenderArgs),

    /// Show the deployment waves
    Plan(commands::plan::PlanArgs),

    /// Check the encryption invariants
    Validate(commands::validate::ValidateArgs),

    /// Export the resource graph in DOT format
    Graph(commands::graph::GraphArgs),

    /// Apply the deployment through the simulated provisioner
    Apply(commands::apply::ApplyArgs),
}

impl Cli {
    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }
}
