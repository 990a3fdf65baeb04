//! Apply command
//!
//! Validates the graph, then deploys it wave by wave through the simulated
//! provisioner.

use super::{CommandContext, Runnable};
use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use vmcrypt::provision::{Deployer, NodeReport, SimulatedProvisioner};
use vmcrypt::validate::Validator;

/// Arguments for the apply command
#[derive(Parser, Debug, Clone)]
pub struct ApplyArgs {
    /// Resolve the plan without provisioning anything
    #[arg(long = "check")]
    pub check_mode: bool,

    /// Make the provisioner fail this resource id (repeatable)
    #[arg(long, action = clap::ArgAction::Append)]
    pub fail_on: Vec<String>,

    /// Simulated time to create each resource, in milliseconds
    #[arg(long)]
    pub latency_ms: Option<u64>,
}

impl ApplyArgs {
    fn provisioner(&self, ctx: &CommandContext) -> SimulatedProvisioner {
        let mut provisioner = SimulatedProvisioner::new()
            .with_subscription_id(ctx.config.defaults.subscription_id.as_str());
        for id in &self.fail_on {
            provisioner = provisioner.fail_on(id.as_str());
        }
        if let Some(ms) = self.latency_ms {
            provisioner = provisioner.with_latency(Duration::from_millis(ms));
        }
        provisioner
    }

    /// Execute the apply command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let (graph, _) = ctx.graph(None)?;

        let validation = Validator::new().check(&graph);
        if !validation.is_clean() {
            ctx.output.validation(&validation);
            ctx.output
                .hint("Fix the findings above, or check a document with `vmcrypt validate`");
            validation.into_result()?;
        }

        if self.check_mode {
            ctx.output.banner("CHECK MODE - DRY RUN");
            ctx.output.warning("No resources will be provisioned");
        }

        let mut deployer = Deployer::new(Arc::new(self.provisioner(ctx))).check_mode(self.check_mode);
        let spinner = ctx.output.create_spinner("Deploying");
        if let Some(spinner) = spinner.clone() {
            deployer = deployer.on_progress(Arc::new(move |node: &NodeReport| {
                spinner.set_message(format!("{} {}", node.status, node.id));
            }));
        }

        let report = deployer.deploy(&graph).await?;
        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }

        if ctx.output.is_structured() {
            ctx.output.emit(&report)?;
        } else {
            for node in &report.nodes {
                ctx.output.node_result(node);
            }
            ctx.output.recap(&report);
        }
        ctx.output.flush();

        report.into_result()?;
        Ok(0)
    }
}

#[async_trait::async_trait]
impl Runnable for ApplyArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::context;
    use super::*;

    #[test]
    fn test_apply_args_parsing() {
        let args = ApplyArgs::try_parse_from(["apply", "--check", "--fail-on", "adeKeyVault"])
            .unwrap();
        assert!(args.check_mode);
        assert_eq!(args.fail_on, vec!["adeKeyVault"]);
    }

    #[tokio::test]
    async fn test_apply_reports_failure() {
        let args = ApplyArgs::try_parse_from(["apply", "--fail-on", "adeKeyVault"]).unwrap();
        let mut ctx = context(&[]);
        let err = args.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<vmcrypt::Error>(),
            Some(vmcrypt::Error::DeploymentFailed { failed: 1, skipped: 1 })
        ));
    }
}
