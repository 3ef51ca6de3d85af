//! cloudup
//!
//! Reads a Cluster and its InstanceGroups, compiles them into a task graph
//! and applies it:
//! - directly against the cloud API (`--target direct --yes`)
//! - as a Terraform configuration or CloudFormation template
//! - as a dry-run report of what would change
//!
//! Exit codes: 0 success, 2 validation, 3 compile, 4 execution,
//! 5 an existing resource did not match.

mod cli;
mod error;
mod run;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    fi::featureflag::parse_flags_from_env();
    let features = fi::featureflag::snapshot();

    info!(cluster = %cli.cluster.display(), target = ?cli.effective_target(), "Starting cloudup");
    match run::run(&cli, features).await {
        Ok(summary) => print!("{}", summary.render(&cli)),
        Err(e) => {
            error!("{e:#}");
            std::process::exit(e.exit_code());
        }
    }
}
