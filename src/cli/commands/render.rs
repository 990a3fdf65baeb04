//! Render command
//!
//! Writes the deployment document for the current parameters.

use super::{CommandContext, Runnable};
use crate::cli::OutputFormat;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use vmcrypt::render::{DeploymentDocument, DocumentFormat};

/// Arguments for the render command
#[derive(Parser, Debug, Clone)]
pub struct RenderArgs {
    /// Write the document to this file instead of stdout (format from the
    /// extension)
    #[arg(long, short = 'o')]
    pub out: Option<PathBuf>,

    /// Leave the parameters out of the document
    #[arg(long)]
    pub no_parameters: bool,
}

impl RenderArgs {
    /// Execute the render command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let template = ctx.template()?;
        let graph = template.render()?;
        let parameters = (!self.no_parameters).then(|| template.parameters());
        let document = DeploymentDocument::from_graph(&graph, parameters)?;

        match &self.out {
            Some(path) => {
                let content = document.to_format(DocumentFormat::from_path(path))?;
                std::fs::write(path, content)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                ctx.output.info(&format!(
                    "Wrote {} resource(s) to {}",
                    document.resources.len(),
                    path.display()
                ));
            }
            None => {
                let format = match ctx.output.format() {
                    OutputFormat::Yaml => DocumentFormat::Yaml,
                    OutputFormat::Json | OutputFormat::Human => DocumentFormat::Json,
                };
                println!("{}", document.to_format(format)?.trim_end());
            }
        }

        Ok(0)
    }
}

#[async_trait::async_trait]
impl Runnable for RenderArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}
