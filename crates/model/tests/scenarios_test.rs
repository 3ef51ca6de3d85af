//! Whole-model scenarios compiled from cluster documents

use std::collections::BTreeMap;
use std::sync::Arc;

use awstasks::{
    AutoscalingGroup, ClassicLoadBalancer, ElasticIp, InternetGateway, Keypair, LaunchConfiguration, ManagedFile,
    NatGateway, RouteTable, SecurityGroup, SecurityGroupRule, Vpc,
};
use cloud_client::MemoryCloud;
use crds::{load_documents, validate_cluster};
use fi::{
    CloudupTask, DryRunTarget, Executor, FeatureFlags, Link, RunContext, RunReport, Target, TaskKey, TaskMap, TaskOutcome,
};
use model::{ModelContext, compile};
use vfs_store::VfsContext;

const SSH_KEY: &str =
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIDiuKnN0WXZ3bd9w5Q8+JfhPb9U1OjpUSBVo1aTz4+4D admin@example";

const PRIVATE: &str = r#"
apiVersion: kops.k8s.io/v1alpha2
kind: Cluster
metadata:
  name: testcluster.test.com
spec:
  cloudProvider: aws
  configBase: memfs://state/testcluster.test.com
  kubernetesVersion: 1.29.0
  networking:
    networkCIDR: 172.20.0.0/16
    subnets:
    - name: us-mock-1a
      zone: us-mock-1a
      type: Private
      cidr: 172.20.32.0/19
    - name: utility-us-mock-1a
      zone: us-mock-1a
      type: Utility
      cidr: 172.20.4.0/22
  etcdClusters:
  - name: main
    etcdMembers:
    - name: a
      instanceGroup: master-us-mock-1a
    backups:
      backupStore: memfs://backups/testcluster.test.com/main
---
apiVersion: kops.k8s.io/v1alpha2
kind: InstanceGroup
metadata:
  name: master-us-mock-1a
spec:
  role: Master
  image: ami-12345678
  machineType: t3.medium
  subnets:
  - us-mock-1a
"#;

fn load(input: &str) -> ModelContext {
    let (cluster, groups) = load_documents(input).unwrap();
    validate_cluster(&cluster, &groups).unwrap();
    ModelContext::new(cluster, groups, vec![SSH_KEY.to_string()], FeatureFlags::defaults()).unwrap()
}

fn tasks_for(model: &ModelContext) -> TaskMap {
    compile(model, BTreeMap::new()).unwrap().0
}

#[test]
fn test_minimal_private_cluster() {
    let tasks = tasks_for(&load(PRIVATE));

    assert_eq!(tasks.of_kind::<Vpc>().len(), 1);
    assert_eq!(tasks.of_kind::<InternetGateway>().len(), 1);
    assert_eq!(tasks.of_kind::<NatGateway>().len(), 1);
    assert_eq!(tasks.of_kind::<ElasticIp>().len(), 1);

    let route_tables: Vec<&str> = tasks.of_kind::<RouteTable>().iter().map(|rt| rt.name.as_str()).collect();
    assert_eq!(route_tables.len(), 2);
    assert!(route_tables.contains(&"testcluster.test.com"));
    assert!(route_tables.contains(&"private-us-mock-1a.testcluster.test.com"));

    let name = "master-us-mock-1a.masters.testcluster.test.com";
    assert_eq!(tasks.of_kind::<LaunchConfiguration>().len(), 1);
    assert!(tasks.get_typed(&Link::<LaunchConfiguration>::new(name)).is_some());
    let asg = tasks.get_typed(&Link::<AutoscalingGroup>::new(name)).unwrap();
    assert_eq!(asg.subnets[0].name(), "us-mock-1a.testcluster.test.com");

    // the node group is emitted even without node instance groups
    let groups: Vec<&str> = tasks.of_kind::<SecurityGroup>().iter().map(|g| g.name.as_str()).collect();
    assert_eq!(groups.len(), 2);
    assert!(groups.contains(&"masters.testcluster.test.com"));
    assert!(groups.contains(&"nodes.testcluster.test.com"));
    assert!(tasks.of_kind::<ClassicLoadBalancer>().is_empty());

    assert!(tasks.get_typed(&Link::<Keypair>::new("kubernetes-ca")).is_some());
    assert!(tasks.get_typed(&Link::<ManagedFile>::new("cluster-completed.spec")).is_some());
}

#[test]
fn test_security_group_override_shared_by_groups() {
    let input = format!(
        "{PRIVATE}{}",
        r#"---
apiVersion: kops.k8s.io/v1alpha2
kind: InstanceGroup
metadata:
  name: nodes-a
spec:
  role: Node
  securityGroupOverride: sg-shared
  subnets:
  - us-mock-1a
---
apiVersion: kops.k8s.io/v1alpha2
kind: InstanceGroup
metadata:
  name: nodes-b
spec:
  role: Node
  securityGroupOverride: sg-shared
  subnets:
  - us-mock-1a
"#
    );
    let tasks = tasks_for(&load(&input));

    let node_groups: Vec<&SecurityGroup> = tasks
        .of_kind::<SecurityGroup>()
        .into_iter()
        .filter(|g| g.name.contains("node"))
        .collect();
    assert_eq!(node_groups.len(), 1);
    assert_eq!(node_groups[0].name, "sg-shared-node");
    assert!(node_groups[0].shared);

    let node_to_node = tasks
        .of_kind::<SecurityGroupRule>()
        .into_iter()
        .filter(|r| r.security_group.name() == "sg-shared-node")
        .any(|r| r.source_group.as_ref().is_some_and(|s| s.name() == "sg-shared-node"));
    assert!(node_to_node);

    for name in ["nodes-a.testcluster.test.com", "nodes-b.testcluster.test.com"] {
        let lc = tasks.get_typed(&Link::<LaunchConfiguration>::new(name)).unwrap();
        assert_eq!(lc.spec.security_groups[0].name(), "sg-shared-node");
    }
}

#[test]
fn test_public_api_load_balancer_uses_utility_subnet() {
    let input = PRIVATE.replace(
        "  cloudProvider: aws\n",
        "  cloudProvider: aws\n  api:\n    loadBalancer:\n      type: Public\n",
    );
    let tasks = tasks_for(&load(&input));

    let elb = tasks
        .get_typed(&Link::<ClassicLoadBalancer>::new("api.testcluster.test.com"))
        .unwrap();
    assert_eq!(elb.tags["Name"], "api.testcluster.test.com");
    assert_eq!(elb.subnets.len(), 1);
    assert_eq!(elb.subnets[0].name(), "utility-us-mock-1a.testcluster.test.com");
    assert_eq!(elb.listeners.len(), 1);
    assert_eq!(elb.listeners["443"].instance_port, 443);
    assert_eq!(elb.health_check.as_ref().unwrap().target, "TCP:443");

    let asg = tasks
        .get_typed(&Link::<AutoscalingGroup>::new("master-us-mock-1a.masters.testcluster.test.com"))
        .unwrap();
    assert_eq!(asg.load_balancers[0].name(), "api.testcluster.test.com");
}

#[test]
fn test_etcd_manager_with_cilium() {
    let mut extra = String::new();
    for name in ["events", "cilium"] {
        extra.push_str(&format!(
            "  - name: {name}\n    etcdMembers:\n    - name: a\n      instanceGroup: master-us-mock-1a\n    backups:\n      backupStore: memfs://backups/testcluster.test.com/{name}\n"
        ));
    }
    let input = PRIVATE
        .replace("---\napiVersion", &format!("{extra}---\napiVersion"))
        .replacen("    networkCIDR:", "    cilium:\n      etcdManaged: true\n    networkCIDR:", 1);
    let tasks = tasks_for(&load(&input));

    for name in ["main", "events", "cilium"] {
        assert!(
            tasks
                .get_typed(&Link::<ManagedFile>::new(format!("etcd-cluster-spec-{name}")))
                .is_some()
        );
        assert!(
            tasks
                .get_typed(&Link::<Keypair>::new(format!("etcd-manager-ca-{name}")))
                .is_some()
        );
    }
    assert!(tasks.get_typed(&Link::<Keypair>::new("etcd-clients-ca")).is_some());
    assert!(tasks.get_typed(&Link::<Keypair>::new("etcd-clients-ca-cilium")).is_some());

    let node_to_master: Vec<&SecurityGroupRule> = tasks
        .of_kind::<SecurityGroupRule>()
        .into_iter()
        .filter(|r| {
            r.security_group.name() == "masters.testcluster.test.com"
                && r.source_group.as_ref().is_some_and(|s| s.name() == "nodes.testcluster.test.com")
                && r.protocol.as_deref() == Some("tcp")
        })
        .collect();
    assert!(!node_to_master.is_empty());
    for rule in node_to_master {
        let (from, to) = (rule.from_port.unwrap(), rule.to_port.unwrap());
        assert!(!(from..=to).contains(&2382), "{} opens 2382", rule.name);
    }
}

#[test]
fn test_compile_is_deterministic() {
    let model = load(PRIVATE);
    let (first_tasks, first) = compile(&model, BTreeMap::new()).unwrap();
    let (second_tasks, second) = compile(&model, BTreeMap::new()).unwrap();
    assert_eq!(first.order(), second.order());
    let values = |tasks: &TaskMap| {
        tasks
            .iter()
            .map(|(key, task)| (key.clone(), task.to_value().unwrap()))
            .collect::<Vec<_>>()
    };
    assert_eq!(values(&first_tasks), values(&second_tasks));
}

#[tokio::test]
async fn test_dry_run_reports_creates() {
    let model = load(PRIVATE);
    let (tasks, graph) = compile(&model, BTreeMap::new()).unwrap();

    let vfs = VfsContext::new(None);
    let base = vfs.resolve(&model.config_base()).unwrap();
    let report = Arc::new(DryRunTarget::new());
    let ctx = Arc::new(RunContext::new(
        model.cluster_name(),
        Target::DryRun(Arc::clone(&report)),
        Arc::new(MemoryCloud::new("us-mock-1", "123456789012")),
        Arc::new(tasks),
        base,
        vfs,
        FeatureFlags::defaults(),
    ));
    Executor::default().run(Arc::clone(&ctx), &graph).await.unwrap();

    let creates = report.creates();
    assert!(creates.contains(&TaskKey::new(Vpc::KIND, "testcluster.test.com")));
    assert!(creates.contains(&TaskKey::new(Keypair::KIND, "kubernetes-ca")));
    assert!(ctx.keystore.find_keyset("kubernetes-ca").await.unwrap().is_none());
}

async fn apply(model: &ModelContext, cloud: &MemoryCloud, vfs: &VfsContext) -> RunReport {
    let (tasks, graph) = compile(model, BTreeMap::new()).unwrap();
    let base = vfs.resolve(&model.config_base()).unwrap();
    let ctx = Arc::new(RunContext::new(
        model.cluster_name(),
        Target::Direct,
        Arc::new(cloud.clone()),
        Arc::new(tasks),
        base,
        vfs.clone(),
        FeatureFlags::defaults(),
    ));
    Executor::default().run(ctx, &graph).await.unwrap()
}

async fn assert_second_apply_is_noop(input: &str) {
    let model = load(input);
    let cloud = MemoryCloud::new("us-mock-1", "123456789012");
    let vfs = VfsContext::new(None);

    let first = apply(&model, &cloud, &vfs).await;
    assert!(!first.with_outcome(TaskOutcome::Created).is_empty());

    let second = apply(&model, &cloud, &vfs).await;
    assert!(
        second.with_outcome(TaskOutcome::Created).is_empty(),
        "created on second run: {:?}",
        second.with_outcome(TaskOutcome::Created)
    );
    assert!(
        second.with_outcome(TaskOutcome::Updated).is_empty(),
        "updated on second run: {:?}",
        second.with_outcome(TaskOutcome::Updated)
    );
    assert!(second.deletions.is_empty());
}

#[tokio::test]
async fn test_direct_apply_converges_with_dns() {
    assert_second_apply_is_noop(PRIVATE).await;
}

#[tokio::test]
async fn test_direct_apply_converges_with_gossip() {
    assert_second_apply_is_noop(&PRIVATE.replace("testcluster.test.com", "testcluster.k8s.local")).await;
}
