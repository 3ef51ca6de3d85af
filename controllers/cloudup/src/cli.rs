use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use fi::executor::DEFAULT_CONCURRENCY;

/// Account id recorded by the local cloud backend when none is given
pub const DEFAULT_ACCOUNT_ID: &str = "000000000000";

/// Where the compiled changes go
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TargetKind {
    /// apply changes through the cloud API
    Direct,
    /// write a Terraform configuration to --out
    Terraform,
    /// write a CloudFormation template to --out
    #[value(name = "cloudformation")]
    CloudFormation,
    /// print what would change
    #[value(name = "dryrun")]
    DryRun,
}

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// multi-document YAML with one Cluster and its InstanceGroups
    #[arg(long, env = "CLOUDUP_CLUSTER")]
    pub cluster: PathBuf,
    #[arg(long, value_enum, default_value = "direct", env = "CLOUDUP_TARGET")]
    pub target: TargetKind,
    /// output directory for the terraform and cloudformation targets
    #[arg(long, default_value = "out", env = "CLOUDUP_OUT")]
    pub out: PathBuf,
    /// local directory standing in for object-store config bases
    #[arg(long, env = "CLOUDUP_STATE_STORE")]
    pub state_store: Option<PathBuf>,
    /// snapshot file of the cloud backend, loaded before and saved after a direct run
    #[arg(long, env = "CLOUDUP_CLOUD_STATE")]
    pub cloud_state: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_ACCOUNT_ID, env = "CLOUDUP_ACCOUNT_ID")]
    pub account_id: String,
    /// SSH public key installed on every instance
    #[arg(long, env = "CLOUDUP_SSH_PUBLIC_KEY")]
    pub ssh_public_key: Option<PathBuf>,
    /// tasks run at once
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY, env = "CLOUDUP_CONCURRENCY")]
    pub concurrency: usize,
    /// per-kind lifecycle overrides, e.g. `Vpc=ExistsAndWarnIfChanges,Keypair=Ignore`
    #[arg(long, env = "CLOUDUP_LIFECYCLE_OVERRIDES")]
    pub lifecycle_overrides: Option<String>,
    /// nodeup binary location baked into user data
    #[arg(long, env = "CLOUDUP_NODEUP_URL")]
    pub nodeup_url: Option<String>,
    /// sha256 of the nodeup binary
    #[arg(long, env = "CLOUDUP_NODEUP_HASH", requires = "nodeup_url")]
    pub nodeup_hash: Option<String>,
    /// apply changes; without it the direct target only reports them
    #[arg(short = 'y', long, env = "CLOUDUP_YES")]
    pub yes: bool,
}

impl Cli {
    /// Target actually used for the run
    pub fn effective_target(&self) -> TargetKind {
        match self.target {
            TargetKind::Direct if !self.yes => TargetKind::DryRun,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("cloudup").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_direct_without_yes_is_dry_run() {
        let cli = parse(&["--cluster", "cluster.yaml"]);
        assert_eq!(cli.target, TargetKind::Direct);
        assert_eq!(cli.effective_target(), TargetKind::DryRun);

        let cli = parse(&["--cluster", "cluster.yaml", "--yes"]);
        assert_eq!(cli.effective_target(), TargetKind::Direct);
    }

    #[test]
    fn test_output_targets_ignore_yes() {
        let cli = parse(&["--cluster", "c.yaml", "--target", "terraform", "--out", "tf"]);
        assert_eq!(cli.effective_target(), TargetKind::Terraform);
        assert_eq!(cli.out, PathBuf::from("tf"));

        let cli = parse(&["--cluster", "c.yaml", "--target", "cloudformation"]);
        assert_eq!(cli.effective_target(), TargetKind::CloudFormation);
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["--cluster", "c.yaml"]);
        assert_eq!(cli.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(cli.account_id, DEFAULT_ACCOUNT_ID);
        assert!(cli.state_store.is_none());
        assert!(cli.lifecycle_overrides.is_none());
    }

    #[test]
    fn test_rejects_unknown_target() {
        let result = Cli::try_parse_from(["cloudup", "--cluster", "c.yaml", "--target", "pulumi"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_nodeup_hash_requires_url() {
        let result = Cli::try_parse_from(["cloudup", "--cluster", "c.yaml", "--nodeup-hash", "abc"]);
        assert!(result.is_err());
    }
}
