//! Graph command
//!
//! Exports the resource graph in DOT format, or reports what a failure of
//! one resource would hold back.

use super::{CommandContext, Runnable};
use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

/// Arguments for the graph command
#[derive(Parser, Debug, Clone)]
pub struct GraphArgs {
    /// Export a rendered deployment document instead of the parameters
    #[arg(long, short = 'd')]
    pub document: Option<PathBuf>,

    /// Show the resources that depend on this resource id
    #[arg(long)]
    pub impact: Option<String>,
}

impl GraphArgs {
    /// Execute the graph command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let (graph, _) = ctx.graph(self.document.as_deref())?;

        for dangling in graph.dangling() {
            ctx.output.warning(&format!(
                "{} references {} ({:?})",
                dangling.consumer, dangling.reference, dangling.reason
            ));
        }

        let Some(id) = &self.impact else {
            print!("{}", graph.to_dot());
            return Ok(0);
        };

        if graph.node(id).is_none() {
            bail!("No resource with id '{}'", id);
        }
        let impact = graph.impact_analysis(id);
        if ctx.output.is_structured() {
            ctx.output.emit(&impact)?;
        } else {
            ctx.output.section(&format!("Impact of a failure of {}", id));
            for affected in &impact.affected_node_ids {
                println!("  - {}", affected);
            }
            println!(
                "\n{} resource(s) would be skipped, longest chain below: {}",
                impact.affected_count(),
                impact.critical_path_length
            );
        }
        Ok(0)
    }
}

#[async_trait::async_trait]
impl Runnable for GraphArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}
