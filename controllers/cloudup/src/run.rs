//! One cloudup run: load, validate, compile, execute

use std::sync::Arc;

use anyhow::Context;
use cloud_client::{CloudApi, MemoryCloud, RetryPolicy, RetryingCloud};
use crds::{load_documents, validate_cluster};
use fi::lifecycle::parse_overrides;
use fi::{
    CloudFormationTarget, DryRunTarget, Executor, FeatureFlags, RunContext, RunReport, Target, TaskOutcome,
    TerraformTarget,
};
use model::context::NodeupSource;
use model::{ModelContext, compile};
use tracing::{info, warn};
use vfs_store::VfsContext;

use crate::cli::{Cli, TargetKind};
use crate::error::CliError;

/// What a finished run produced
#[derive(Debug)]
pub struct Summary {
    pub cluster_name: String,
    pub target: TargetKind,
    pub report: RunReport,
    /// Rendered dry-run report, for dry runs
    pub dry_run: Option<String>,
}

impl Summary {
    /// Text printed to stdout when the run succeeds
    pub fn render(&self, cli: &Cli) -> String {
        if let Some(report) = &self.dry_run {
            let mut out = report.clone();
            if cli.target == TargetKind::Direct {
                out.push_str("\nMust specify --yes to apply changes\n");
            }
            return out;
        }
        match self.target {
            TargetKind::Terraform | TargetKind::CloudFormation => {
                format!("Wrote {} configuration to {}\n", self.cluster_name, cli.out.display())
            }
            _ => format!(
                "Cluster {} is up to date: {} created, {} updated, {} unchanged, {} deleted\n",
                self.cluster_name,
                self.report.with_outcome(TaskOutcome::Created).len(),
                self.report.with_outcome(TaskOutcome::Updated).len(),
                self.report.with_outcome(TaskOutcome::Unchanged).len(),
                self.report.deletions.len(),
            ),
        }
    }
}

async fn ssh_public_keys(cli: &Cli) -> anyhow::Result<Vec<String>> {
    let Some(path) = &cli.ssh_public_key else {
        return Ok(Vec::new());
    };
    let key = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading SSH public key {}", path.display()))?;
    Ok(vec![key.trim().to_string()])
}

/// Load the cluster documents and build the model context
async fn load_model(cli: &Cli, features: FeatureFlags) -> Result<ModelContext, CliError> {
    let input = tokio::fs::read_to_string(&cli.cluster)
        .await
        .with_context(|| format!("reading cluster file {}", cli.cluster.display()))?;
    let (cluster, groups) = load_documents(&input)?;
    validate_cluster(&cluster, &groups)?;
    info!(
        cluster = cluster.cluster_name(),
        instance_groups = groups.len(),
        "Cluster documents validated"
    );

    let keys = ssh_public_keys(cli).await?;
    let mut model = ModelContext::new(cluster, groups, keys, features)?;
    if let Some(url) = &cli.nodeup_url {
        model = model.with_nodeup(NodeupSource {
            url: url.clone(),
            hash: cli.nodeup_hash.clone().unwrap_or_default(),
        });
    }
    Ok(model)
}

fn target_for(kind: TargetKind, cli: &Cli, model: &ModelContext) -> Target {
    match kind {
        TargetKind::Direct => Target::Direct,
        TargetKind::DryRun => Target::DryRun(Arc::new(DryRunTarget::new())),
        TargetKind::Terraform => Target::Terraform(Arc::new(TerraformTarget::new(
            &cli.out,
            model.cluster_name(),
            model.region(),
        ))),
        TargetKind::CloudFormation => Target::CloudFormation(Arc::new(CloudFormationTarget::new(&cli.out))),
    }
}

/// Run cloudup end to end
///
/// # Errors
/// Load and validation errors, compile errors, task failures and I/O
/// failures around the run, each mapped to its exit code by [`CliError`]
pub async fn run(cli: &Cli, features: FeatureFlags) -> Result<Summary, CliError> {
    let model = load_model(cli, features.clone()).await?;
    let overrides =
        parse_overrides(cli.lifecycle_overrides.as_deref().unwrap_or_default()).map_err(CliError::Overrides)?;
    let (tasks, graph) = compile(&model, overrides)?;

    let kind = cli.effective_target();
    if kind != cli.target {
        warn!("--yes not given, reporting changes only");
    }

    let backend = match &cli.cloud_state {
        Some(path) => MemoryCloud::load(path, model.region(), &cli.account_id)
            .await
            .with_context(|| format!("loading cloud state {}", path.display()))?,
        None => MemoryCloud::new(model.region(), &cli.account_id),
    };
    let backend = Arc::new(backend);
    let inner: Arc<dyn CloudApi> = Arc::clone(&backend) as Arc<dyn CloudApi>;
    let cloud: Arc<dyn CloudApi> = Arc::new(RetryingCloud::new(inner, RetryPolicy::default()));

    let vfs = VfsContext::new(cli.state_store.clone());
    let config_base = model.config_base();
    let base = vfs
        .resolve(&config_base)
        .with_context(|| format!("resolving config base {config_base}"))?;

    let target = target_for(kind, cli, &model);
    let ctx = Arc::new(RunContext::new(
        model.cluster_name(),
        target.clone(),
        cloud,
        Arc::new(tasks),
        base,
        vfs,
        features,
    ));

    let cancel = ctx.cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, letting running tasks finish");
            cancel.cancel();
        }
    });

    info!(cluster = model.cluster_name(), target = %target, tasks = graph.order().len(), "Running");
    let result = Executor::new(cli.concurrency).run(Arc::clone(&ctx), &graph).await;
    interrupt.abort();
    let report = result?;

    if kind == TargetKind::Direct {
        if let Some(path) = &cli.cloud_state {
            backend
                .save(path)
                .await
                .with_context(|| format!("saving cloud state {}", path.display()))?;
            info!(path = %path.display(), "Cloud state saved");
        }
    }

    let dry_run = match &target {
        Target::DryRun(report) => Some(report.report()),
        _ => None,
    };
    Ok(Summary {
        cluster_name: model.cluster_name().to_string(),
        target: kind,
        report,
        dry_run,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use fi::error::{EXIT_COMPILE, EXIT_VALIDATION};
    use std::path::Path;

    const CLUSTER: &str = r#"
apiVersion: kops.k8s.io/v1alpha2
kind: Cluster
metadata:
  name: cli.example.com
spec:
  cloudProvider: aws
  configBase: memfs://clusters/cli.example.com
  kubernetesVersion: 1.29.0
  networking:
    networkCIDR: 172.20.0.0/16
    subnets:
    - name: us-test-1a
      zone: us-test-1a
      type: Public
      cidr: 172.20.32.0/19
  etcdClusters:
  - name: main
    etcdMembers:
    - name: a
      instanceGroup: master-us-test-1a
    backups:
      backupStore: memfs://backups/cli.example.com/main
---
apiVersion: kops.k8s.io/v1alpha2
kind: InstanceGroup
metadata:
  name: master-us-test-1a
spec:
  role: Master
  image: ami-12345678
  machineType: t3.medium
  subnets:
  - us-test-1a
"#;

    fn cli(dir: &Path, extra: &[&str]) -> Cli {
        let cluster = dir.join("cluster.yaml");
        std::fs::write(&cluster, CLUSTER).unwrap();
        let mut args = vec![
            "cloudup".to_string(),
            "--cluster".to_string(),
            cluster.display().to_string(),
        ];
        args.extend(extra.iter().map(ToString::to_string));
        Cli::try_parse_from(args).unwrap()
    }

    #[tokio::test]
    async fn test_direct_without_yes_reports_only() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("cloud.json");
        let state_arg = state.display().to_string();
        let cli = cli(dir.path(), &["--cloud-state", &state_arg]);

        let summary = run(&cli, FeatureFlags::defaults()).await.unwrap();
        assert_eq!(summary.target, TargetKind::DryRun);
        let rendered = summary.render(&cli);
        assert!(rendered.contains("Will create resources:"));
        assert!(rendered.contains("Must specify --yes"));
        assert!(!state.exists());
    }

    #[tokio::test]
    async fn test_direct_apply_saves_cloud_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("cloud.json");
        let state_arg = state.display().to_string();
        let cli = cli(dir.path(), &["--yes", "--cloud-state", &state_arg]);

        let summary = run(&cli, FeatureFlags::defaults()).await.unwrap();
        assert_eq!(summary.target, TargetKind::Direct);
        assert!(!summary.report.with_outcome(TaskOutcome::Created).is_empty());

        let snapshot: serde_json::Value = serde_json::from_slice(&std::fs::read(&state).unwrap()).unwrap();
        assert_eq!(snapshot["region"], "us-test-1");
        assert!(!snapshot["objects"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terraform_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("tf");
        let out_arg = out.display().to_string();
        let cli = cli(dir.path(), &["--target", "terraform", "--out", &out_arg]);

        let summary = run(&cli, FeatureFlags::defaults()).await.unwrap();
        assert_eq!(summary.target, TargetKind::Terraform);
        assert!(summary.dry_run.is_none());
        assert!(out.join("kubernetes.tf").exists());
        assert!(summary.render(&cli).starts_with("Wrote cli.example.com configuration"));
    }

    #[tokio::test]
    async fn test_invalid_documents_exit_with_validation_code() {
        let dir = tempfile::tempdir().unwrap();
        let mut cli = cli(dir.path(), &[]);
        let broken = dir.path().join("broken.yaml");
        std::fs::write(&broken, CLUSTER.replace("cidr: 172.20.32.0/19", "cidr: not-a-cidr")).unwrap();
        cli.cluster = broken;

        let err = run(&cli, FeatureFlags::defaults()).await.unwrap_err();
        assert_eq!(err.exit_code(), EXIT_VALIDATION);
    }

    #[tokio::test]
    async fn test_bad_overrides_exit_with_compile_code() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli(dir.path(), &["--lifecycle-overrides", "Vpc"]);
        let err = run(&cli, FeatureFlags::defaults()).await.unwrap_err();
        assert!(matches!(err, CliError::Overrides(_)));
        assert_eq!(err.exit_code(), EXIT_COMPILE);
    }

    #[tokio::test]
    async fn test_missing_cluster_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut cli = cli(dir.path(), &[]);
        cli.cluster = dir.path().join("missing.yaml");
        let err = run(&cli, FeatureFlags::defaults()).await.unwrap_err();
        assert!(matches!(err, CliError::Other(_)));
    }
}
