//! Task catalogue tests against the in-memory cloud and the memfs store

use std::collections::BTreeMap;
use std::sync::Arc;

use awstasks::{
    BootstrapScript, IamRole, InternetGateway, Keypair, ManagedFile, NodeupConfig, Secret, SecurityGroup,
    SecurityGroupRule, Subnet, Tags, Vpc,
};
use cloud_client::{CloudApi, MemoryCloud, ResourceKind};
use fi::featureflag::TERRAFORM_MANAGED_FILES;
use fi::pki::KeypairType;
use fi::{
    CloudupTask, Executor, FeatureFlags, Lifecycle, Link, ModelBuilderContext, Resource, RunContext, Target, TaskGraph,
    TaskKey, TaskMap, TaskOutcome, TerraformTarget,
};
use vfs_store::VfsContext;

const CLUSTER: &str = "minimal.example.com";

fn name_tags(name: &str) -> Tags {
    BTreeMap::from([
        ("Name".to_string(), name.to_string()),
        (format!("kubernetes.io/cluster/{CLUSTER}"), "owned".to_string()),
    ])
}

fn network(registry: &mut ModelBuilderContext) {
    let vpc = registry
        .add(Vpc {
            name: CLUSTER.to_string(),
            id: None,
            cidr: Some("172.20.0.0/16".to_string()),
            enable_dns_hostnames: Some(true),
            enable_dns_support: Some(true),
            tags: name_tags(CLUSTER),
            shared: false,
            lifecycle: Lifecycle::Sync,
        })
        .unwrap();
    registry
        .add(Subnet {
            name: format!("us-test-1a.{CLUSTER}"),
            id: None,
            vpc: vpc.clone(),
            availability_zone: Some("us-test-1a".to_string()),
            cidr: Some("172.20.32.0/19".to_string()),
            ipv6_cidr: None,
            tags: name_tags(&format!("us-test-1a.{CLUSTER}")),
            shared: false,
            lifecycle: Lifecycle::Sync,
        })
        .unwrap();
    registry
        .add(InternetGateway {
            name: CLUSTER.to_string(),
            id: None,
            vpc: vpc.clone(),
            tags: name_tags(CLUSTER),
            shared: false,
            lifecycle: Lifecycle::Sync,
        })
        .unwrap();
    let nodes = registry
        .add(SecurityGroup {
            name: format!("nodes.{CLUSTER}"),
            id: None,
            vpc,
            description: Some("Security group for nodes".to_string()),
            tags: name_tags(&format!("nodes.{CLUSTER}")),
            shared: false,
            lifecycle: Lifecycle::Sync,
        })
        .unwrap();
    registry
        .add(SecurityGroupRule {
            name: "from-nodes.minimal.example.com-ingress-all-0to0-nodes.minimal.example.com".to_string(),
            id: None,
            security_group: nodes.clone(),
            egress: false,
            protocol: None,
            from_port: None,
            to_port: None,
            cidr: None,
            ipv6_cidr: None,
            source_group: Some(nodes),
            tags: Tags::new(),
            lifecycle: Lifecycle::Sync,
        })
        .unwrap();
}

fn pki(registry: &mut ModelBuilderContext) {
    let ca = registry
        .add(Keypair::new("kubernetes-ca", "cn=kubernetes-ca", KeypairType::Ca))
        .unwrap();
    let mut kubelet = Keypair::new("kubelet", "o=system:nodes,cn=kubelet", KeypairType::Client);
    kubelet.issuer = Some(ca);
    registry.add(kubelet).unwrap();
}

fn bootstrap(registry: &mut ModelBuilderContext) {
    pki(registry);
    let config = NodeupConfig {
        cluster_name: CLUSTER.to_string(),
        instance_group_name: "nodes".to_string(),
        instance_group_role: "Node".to_string(),
        config_base: format!("memfs://clusters/{CLUSTER}"),
        ..Default::default()
    };
    let mut script = BootstrapScript::new("nodes", config);
    script.keypairs = vec![Link::new("kubernetes-ca"), Link::new("kubelet")];
    registry.add(script).unwrap();
    registry
        .add(ManagedFile::new(
            "nodeupconfig-nodes",
            "igconfig/node/nodes/nodeupconfig.yaml",
            Resource::task_output(BootstrapScript::key_for("nodes"), "nodeup_config"),
        ))
        .unwrap();
}

fn compile(build: impl FnOnce(&mut ModelBuilderContext)) -> (TaskMap, TaskGraph) {
    let mut registry = ModelBuilderContext::new();
    build(&mut registry);
    let tasks = registry.into_tasks();
    let graph = TaskGraph::build(&tasks).unwrap();
    (tasks, graph)
}

fn context(cloud: &MemoryCloud, vfs: &VfsContext, target: Target, tasks: TaskMap, features: FeatureFlags) -> Arc<RunContext> {
    let base = vfs.resolve(&format!("memfs://clusters/{CLUSTER}")).unwrap();
    Arc::new(RunContext::new(
        CLUSTER,
        target,
        Arc::new(cloud.clone()),
        Arc::new(tasks),
        base,
        vfs.clone(),
        features,
    ))
}

#[tokio::test]
async fn test_network_converges_on_second_run() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    let vfs = VfsContext::new(None);

    let (tasks, graph) = compile(network);
    let report = Executor::default()
        .run(context(&cloud, &vfs, Target::Direct, tasks, FeatureFlags::defaults()), &graph)
        .await
        .unwrap();
    assert_eq!(report.with_outcome(TaskOutcome::Created).len(), 5);

    let vpc = cloud.objects(ResourceKind::Vpc).pop().unwrap();
    let igw = cloud.objects(ResourceKind::InternetGateway).pop().unwrap();
    assert_eq!(igw.attr_str("vpc_id"), Some(vpc.id.clone()));
    let rule = cloud.objects(ResourceKind::SecurityGroupRule).pop().unwrap();
    let group = cloud.objects(ResourceKind::SecurityGroup).pop().unwrap();
    assert_eq!(rule.attr_str("referenced_group_id"), Some(group.id));

    cloud.clear_calls();
    let (tasks, graph) = compile(network);
    let report = Executor::default()
        .run(context(&cloud, &vfs, Target::Direct, tasks, FeatureFlags::defaults()), &graph)
        .await
        .unwrap();
    assert_eq!(report.with_outcome(TaskOutcome::Unchanged).len(), 5);
    assert!(cloud.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_network_renders_terraform_references() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    let vfs = VfsContext::new(None);
    let dir = tempfile::tempdir().unwrap();
    let tf = Arc::new(TerraformTarget::new(dir.path(), CLUSTER, "us-test-1"));

    let (tasks, graph) = compile(network);
    Executor::default()
        .run(
            context(&cloud, &vfs, Target::Terraform(Arc::clone(&tf)), tasks, FeatureFlags::defaults()),
            &graph,
        )
        .await
        .unwrap();

    assert!(cloud.mutating_calls().is_empty());
    let subnet = tf.resource("aws_subnet", &format!("us-test-1a.{CLUSTER}")).unwrap();
    assert_eq!(
        subnet.get("vpc_id").and_then(|v| v.as_str()),
        Some(TerraformTarget::reference("aws_vpc", CLUSTER, "id").as_str())
    );
    assert!(tf.resource("aws_internet_gateway", CLUSTER).is_some());
    assert!(tf.render().contains("aws_security_group_rule"));
}

#[tokio::test]
async fn test_keypairs_are_not_reissued() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    let vfs = VfsContext::new(None);

    let (tasks, graph) = compile(pki);
    let ctx = context(&cloud, &vfs, Target::Direct, tasks, FeatureFlags::defaults());
    Executor::default().run(Arc::clone(&ctx), &graph).await.unwrap();

    let kubelet = ctx.keystore.find_keyset("kubelet").await.unwrap().unwrap();
    assert_eq!(kubelet.items.len(), 1);
    let summary = fi::pki::parse_certificate("kubelet", &kubelet.primary().unwrap().certificate).unwrap();
    assert_eq!(summary.issuer_common_name, "kubernetes-ca");
    assert_eq!(summary.organizations, vec!["system:nodes"]);

    let (tasks, graph) = compile(pki);
    let report = Executor::default()
        .run(context(&cloud, &vfs, Target::Direct, tasks, FeatureFlags::defaults()), &graph)
        .await
        .unwrap();
    assert_eq!(report.with_outcome(TaskOutcome::Unchanged).len(), 2);
    let again = ctx.keystore.find_keyset("kubelet").await.unwrap().unwrap();
    assert_eq!(again, kubelet);
}

#[tokio::test]
async fn test_subject_change_appends_new_primary() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    let vfs = VfsContext::new(None);

    let (tasks, graph) = compile(pki);
    let ctx = context(&cloud, &vfs, Target::Direct, tasks, FeatureFlags::defaults());
    Executor::default().run(Arc::clone(&ctx), &graph).await.unwrap();

    let (tasks, graph) = compile(|registry| {
        let ca = registry
            .add(Keypair::new("kubernetes-ca", "cn=kubernetes-ca", KeypairType::Ca))
            .unwrap();
        let mut kubelet = Keypair::new("kubelet", "o=system:nodes,cn=kubelet-renamed", KeypairType::Client);
        kubelet.issuer = Some(ca);
        registry.add(kubelet).unwrap();
    });
    let report = Executor::default()
        .run(context(&cloud, &vfs, Target::Direct, tasks, FeatureFlags::defaults()), &graph)
        .await
        .unwrap();
    assert_eq!(report.outcomes[&TaskKey::new("Keypair", "kubelet")], TaskOutcome::Updated);

    let keyset = ctx.keystore.find_keyset("kubelet").await.unwrap().unwrap();
    assert_eq!(keyset.items.len(), 2);
    assert_eq!(keyset.primary_id, keyset.items[1].id);
}

#[tokio::test]
async fn test_secret_generated_once() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    let vfs = VfsContext::new(None);
    let build = |registry: &mut ModelBuilderContext| {
        registry.add(Secret::new("admin")).unwrap();
    };

    let (tasks, graph) = compile(build);
    let ctx = context(&cloud, &vfs, Target::Direct, tasks, FeatureFlags::defaults());
    Executor::default().run(Arc::clone(&ctx), &graph).await.unwrap();
    let first = ctx.secrets.find_secret("admin").await.unwrap().unwrap();
    assert_eq!(first.data.len(), awstasks::secret::SECRET_LENGTH);

    let (tasks, graph) = compile(build);
    Executor::default()
        .run(context(&cloud, &vfs, Target::Direct, tasks, FeatureFlags::defaults()), &graph)
        .await
        .unwrap();
    assert_eq!(ctx.secrets.find_secret("admin").await.unwrap().unwrap(), first);
}

#[tokio::test]
async fn test_bootstrap_config_carries_keyset_ids() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    let vfs = VfsContext::new(None);

    let (tasks, graph) = compile(bootstrap);
    let ctx = context(&cloud, &vfs, Target::Direct, tasks, FeatureFlags::defaults());
    Executor::default().run(Arc::clone(&ctx), &graph).await.unwrap();

    let written = ctx
        .config_base
        .join("igconfig/node/nodes/nodeupconfig.yaml")
        .read()
        .await
        .unwrap()
        .unwrap();
    let config: NodeupConfig = serde_yaml::from_slice(&written).unwrap();
    let ca = ctx.keystore.find_keyset("kubernetes-ca").await.unwrap().unwrap();
    let kubelet = ctx.keystore.find_keyset("kubelet").await.unwrap().unwrap();
    assert_eq!(config.keypair_ids["kubernetes-ca"], ca.primary_id);
    assert_eq!(config.keypair_ids["kubelet"], kubelet.primary_id);
    assert!(config.ca_certificates["kubernetes-ca"].contains("BEGIN CERTIFICATE"));
    assert!(!config.ca_certificates.contains_key("kubelet"));

    let user_data = ctx
        .outputs
        .get(&BootstrapScript::key_for("nodes"), "user_data")
        .unwrap();
    assert!(user_data.contains("NodeupConfigHash:"));
}

#[tokio::test]
async fn test_bootstrap_dry_run_without_keysets() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    let vfs = VfsContext::new(None);
    let report = Arc::new(fi::DryRunTarget::new());

    let (tasks, graph) = compile(bootstrap);
    let ctx = context(&cloud, &vfs, Target::DryRun(Arc::clone(&report)), tasks, FeatureFlags::defaults());
    Executor::default().run(Arc::clone(&ctx), &graph).await.unwrap();

    assert!(report.creates().contains(&TaskKey::new("Keypair", "kubernetes-ca")));
    assert!(ctx.keystore.find_keyset("kubernetes-ca").await.unwrap().is_none());
    assert!(
        ctx.config_base
            .join("igconfig/node/nodes/nodeupconfig.yaml")
            .read()
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_managed_file_terraform_flag() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    let dir = tempfile::tempdir().unwrap();
    let build = |registry: &mut ModelBuilderContext| {
        registry
            .add(ManagedFile::new("kops-version.txt", "kops-version.txt", Resource::from_string("1.0.0")))
            .unwrap();
    };

    let vfs = VfsContext::new(None);
    let tf = Arc::new(TerraformTarget::new(dir.path(), CLUSTER, "us-test-1"));
    let (tasks, graph) = compile(build);
    let ctx = context(
        &cloud,
        &vfs,
        Target::Terraform(tf),
        tasks,
        FeatureFlags::defaults().with(TERRAFORM_MANAGED_FILES, false),
    );
    Executor::default().run(Arc::clone(&ctx), &graph).await.unwrap();
    assert!(ctx.config_base.join("kops-version.txt").read().await.unwrap().is_none());

    let vfs = VfsContext::new(None);
    let tf = Arc::new(TerraformTarget::new(dir.path(), CLUSTER, "us-test-1"));
    let (tasks, graph) = compile(build);
    let ctx = context(
        &cloud,
        &vfs,
        Target::Terraform(tf),
        tasks,
        FeatureFlags::defaults().with(TERRAFORM_MANAGED_FILES, true),
    );
    Executor::default().run(Arc::clone(&ctx), &graph).await.unwrap();
    assert_eq!(
        ctx.config_base.join("kops-version.txt").read().await.unwrap().as_deref(),
        Some(&b"1.0.0"[..])
    );

    // the flag only concerns terraform; direct still writes the file
    let vfs = VfsContext::new(None);
    let (tasks, graph) = compile(build);
    let ctx = context(
        &cloud,
        &vfs,
        Target::Direct,
        tasks,
        FeatureFlags::defaults().with(TERRAFORM_MANAGED_FILES, false),
    );
    let report = Executor::default().run(Arc::clone(&ctx), &graph).await.unwrap();
    assert_eq!(
        report.outcomes[&TaskKey::new(ManagedFile::KIND, "kops-version.txt")],
        TaskOutcome::Created
    );
    assert_eq!(
        ctx.config_base.join("kops-version.txt").read().await.unwrap().as_deref(),
        Some(&b"1.0.0"[..])
    );
}

#[tokio::test]
async fn test_orphaned_owned_roles_deleted() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    let vfs = VfsContext::new(None);
    let policy = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Principal":{"Service":"ec2.amazonaws.com"},"Action":"sts:AssumeRole"}]}"#;

    let mut owned = Tags::new();
    owned.insert(format!("kubernetes.io/cluster/{CLUSTER}"), "owned".to_string());
    for name in [format!("nodes.{CLUSTER}"), format!("old.{CLUSTER}"), "unrelated".to_string()] {
        let mut attributes = serde_json::Map::new();
        attributes.insert("name".to_string(), serde_json::json!(name));
        attributes.insert("assume_role_policy_document".to_string(), serde_json::json!(policy));
        cloud
            .create(ResourceKind::IamRole, attributes, owned.clone())
            .await
            .unwrap();
    }

    let (tasks, graph) = compile(|registry| {
        let mut role = IamRole::new(format!("nodes.{CLUSTER}"), Resource::from_string(policy));
        role.tags = owned.clone();
        registry.add(role).unwrap();
    });
    let report = Executor::default()
        .run(context(&cloud, &vfs, Target::Direct, tasks, FeatureFlags::defaults()), &graph)
        .await
        .unwrap();

    assert_eq!(report.deletions, vec![("IAMRole".to_string(), format!("old.{CLUSTER}"))]);
    let remaining: Vec<String> = cloud.objects(ResourceKind::IamRole).into_iter().map(|o| o.id).collect();
    assert!(remaining.contains(&format!("nodes.{CLUSTER}")));
    assert!(remaining.contains(&"unrelated".to_string()));
    assert!(!remaining.contains(&format!("old.{CLUSTER}")));
}

#[test]
fn test_bootstrap_key_matches_task() {
    let script = BootstrapScript::new("nodes", NodeupConfig::default());
    assert_eq!(script.link().key(), BootstrapScript::key_for("nodes"));
}
