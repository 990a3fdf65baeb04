//! vmcrypt - Disk encryption deployment planner for Azure VMs
//!
//! This is the main entry point for the vmcrypt CLI.

mod cli;

use clap::Parser;
use cli::commands::{CommandContext, Runnable};
use cli::{Cli, Commands};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};
use vmcrypt::config::{Config, LoggingConfig};
use vmcrypt::params::ParamError;

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: Failed to load config: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(cli.verbosity(), &config.logging);
    tracing::debug!(version = VERSION, "vmcrypt starting");

    let mut ctx = CommandContext::new(&cli, config);

    // Execute the appropriate command
    let result = match &cli.command {
        Commands::Render(args) => args.run(&mut ctx).await,
        Commands::Plan(args) => args.run(&mut ctx).await,
        Commands::Validate(args) => args.run(&mut ctx).await,
        Commands::Graph(args) => args.run(&mut ctx).await,
        Commands::Apply(args) => args.run(&mut ctx).await,
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            ctx.output.error(&format!("{:#}", e));
            std::process::exit(exit_code(&e));
        }
    }
}

/// Map an error to the process exit status
fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| {
            cause
                .downcast_ref::<vmcrypt::Error>()
                .map(vmcrypt::Error::exit_code)
                .or_else(|| cause.downcast_ref::<ParamError>().map(|_| 4))
        })
        .unwrap_or(1)
}

/// Initialize logging from verbosity, `RUST_LOG` and the logging config
fn init_logging(verbosity: u8, logging: &LoggingConfig) {
    let env_filter = match verbosity {
        0 => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str())),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    // Logs go to stderr so structured output on stdout stays parseable.
    let layer: Box<dyn Layer<Registry> + Send + Sync> = if logging.is_json() {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else if logging.timestamp {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(verbosity >= 3)
            .boxed()
    } else {
        fmt::layer()
            .without_time()
            .with_writer(std::io::stderr)
            .with_target(verbosity >= 3)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let validation = anyhow::Error::new(vmcrypt::Error::validation(1, "ENC002"));
        assert_eq!(exit_code(&validation), 3);

        let params = anyhow::Error::new(ParamError::Missing("location".to_string()))
            .context("Failed to load parameters");
        assert_eq!(exit_code(&params), 4);

        assert_eq!(exit_code(&anyhow::anyhow!("boom")), 1);
    }
}
