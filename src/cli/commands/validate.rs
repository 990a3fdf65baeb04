//! Validate command
//!
//! Runs the encryption rules against the rendered graph or a saved
//! document. Exits non-zero when any finding is an error.

use super::{CommandContext, Runnable};
use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use vmcrypt::validate::Validator;

/// Arguments for the validate command
#[derive(Parser, Debug, Clone)]
pub struct ValidateArgs {
    /// Validate a rendered deployment document instead of the parameters
    #[arg(long, short = 'd')]
    pub document: Option<PathBuf>,

    /// Treat warnings as errors
    #[arg(long)]
    pub warnings_as_errors: bool,

    /// Rule ids to skip
    #[arg(long, action = clap::ArgAction::Append)]
    pub skip: Vec<String>,
}

impl ValidateArgs {
    fn validator(&self) -> Result<Validator> {
        let mut validator = Validator::new().warnings_as_errors(self.warnings_as_errors);
        for id in &self.skip {
            if Validator::rule(id).is_none() {
                bail!("Unknown rule '{}'", id);
            }
            validator = validator.skip(id.as_str());
        }
        Ok(validator)
    }

    /// Execute the validate command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let validator = self.validator()?;
        let (graph, _) = ctx.graph(self.document.as_deref())?;
        let report = validator.check(&graph);

        if ctx.output.is_structured() {
            ctx.output.emit(&report)?;
        } else {
            ctx.output.validation(&report);
        }

        report.into_result()?;
        Ok(0)
    }
}

#[async_trait::async_trait]
impl Runnable for ValidateArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::context;
    use super::*;

    #[test]
    fn test_validate_args_parsing() {
        let args =
            ValidateArgs::try_parse_from(["validate", "--skip", "ENC004", "--warnings-as-errors"])
                .unwrap();
        assert_eq!(args.skip, vec!["ENC004"]);
        assert!(args.warnings_as_errors);
    }

    #[test]
    fn test_unknown_rule() {
        let args = ValidateArgs::try_parse_from(["validate", "--skip", "ENC999"]).unwrap();
        assert!(args.validator().is_err());
    }

    #[tokio::test]
    async fn test_pmk_warning_as_error() {
        let args = ValidateArgs::try_parse_from(["validate", "--warnings-as-errors"]).unwrap();
        let mut ctx = context(&["-p", "adeKeyMode=pmk"]);
        let err = args.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<vmcrypt::Error>(),
            Some(vmcrypt::Error::Validation { .. })
        ));
    }
}
