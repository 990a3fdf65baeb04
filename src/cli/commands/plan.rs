//! Plan command
//!
//! Prints the deployment waves in the order they would be applied.

use super::{CommandContext, Runnable};
use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use vmcrypt::graph::ResourceGraph;
use vmcrypt::resources::ResourceKind;

/// Arguments for the plan command
#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    /// Plan a rendered deployment document instead of the parameters
    #[arg(long, short = 'd')]
    pub document: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlannedResource {
    id: String,
    kind: ResourceKind,
    name: String,
    flow: String,
    module: String,
    depends_on: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PlannedWave {
    wave: usize,
    resources: Vec<PlannedResource>,
}

fn plan_waves(graph: &ResourceGraph) -> Result<Vec<PlannedWave>> {
    Ok(graph
        .waves()?
        .into_iter()
        .enumerate()
        .map(|(wave, ids)| PlannedWave {
            wave,
            resources: ids
                .iter()
                .filter_map(|id| graph.node(id))
                .map(|node| PlannedResource {
                    id: node.id.clone(),
                    kind: node.kind,
                    name: node.name.clone(),
                    flow: node.flow.clone(),
                    module: node.module.to_string(),
                    depends_on: graph
                        .dependencies(&node.id)
                        .into_iter()
                        .map(String::from)
                        .collect(),
                })
                .collect(),
        })
        .collect())
}

impl PlanArgs {
    /// Execute the plan command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let (graph, _) = ctx.graph(self.document.as_deref())?;
        let waves = plan_waves(&graph)?;

        if ctx.output.is_structured() {
            ctx.output.emit(&waves)?;
            return Ok(0);
        }

        ctx.output.banner("DEPLOYMENT PLAN");
        for wave in &waves {
            ctx.output.section(&format!("Wave {}", wave.wave));
            let rows: Vec<Vec<String>> = wave
                .resources
                .iter()
                .map(|r| {
                    vec![
                        r.id.clone(),
                        r.kind.to_string(),
                        r.name.clone(),
                        r.depends_on.join(", "),
                    ]
                })
                .collect();
            ctx.output
                .table(&["Resource", "Kind", "Name", "Depends on"], &rows);
        }
        println!(
            "\nPlan: {} resource(s) in {} wave(s).",
            graph.node_count(),
            waves.len()
        );

        Ok(0)
    }
}

#[async_trait::async_trait]
impl Runnable for PlanArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}
