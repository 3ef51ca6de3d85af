//! Engine tests: registry, graph compilation and execution against the
//! in-memory cloud with small purpose-built tasks

use std::collections::BTreeMap;
use std::sync::Arc;

use cloud_client::{CloudApi, CloudError, CloudObject, MemoryCloud, ResourceKind, Verb};
use fi::lifecycle::parse_overrides;
use fi::{
    Changes, CloudupTask, CompileError, Deletion, DryRunTarget, Executor, FeatureFlags, HclBody, Lifecycle, Link,
    ModelBuilderContext, Outputs, RunContext, RunError, Target, TaskError, TaskGraph, TaskKey, TaskMap, TaskOutcome,
    TerraformTarget,
};
use serde::Serialize;
use serde_json::{Map, json};
use vfs_store::VfsContext;

const OWNER_TAG: &str = "test.example.com/owner";

#[derive(Debug, Clone, Serialize)]
struct Network {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    cidr_block: Option<String>,
    #[serde(skip)]
    lifecycle: Lifecycle,
    #[serde(skip)]
    shared: bool,
}

fn network(name: &str, cidr: &str) -> Network {
    Network {
        name: name.to_string(),
        id: None,
        cidr_block: Some(cidr.to_string()),
        lifecycle: Lifecycle::Sync,
        shared: false,
    }
}

#[derive(Debug)]
struct StaleNetwork {
    id: String,
}

#[async_trait::async_trait]
impl Deletion for StaleNetwork {
    fn task_kind(&self) -> &str {
        "Network"
    }

    fn item(&self) -> String {
        self.id.clone()
    }

    async fn delete(&self, ctx: &RunContext) -> Result<(), TaskError> {
        ctx.cloud.delete(ResourceKind::Vpc, &self.id).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CloudupTask for Network {
    const KIND: &'static str = "Network";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn set_lifecycle(&mut self, lifecycle: Lifecycle) {
        self.lifecycle = lifecycle;
    }

    fn is_shared(&self) -> bool {
        self.shared
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let found = ctx.cloud.query(ResourceKind::Vpc, &[("tag:Name", &self.name)]).await?;
        Ok(found.into_iter().next().map(|o| Network {
            name: self.name.clone(),
            id: Some(o.id.clone()),
            cidr_block: o.attr_str("cidr_block"),
            lifecycle: self.lifecycle,
            shared: self.shared,
        }))
    }

    fn outputs(&self) -> Outputs {
        self.id.iter().map(|id| ("id".to_string(), id.clone())).collect()
    }

    async fn render_direct(
        &self,
        ctx: &RunContext,
        actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<Outputs, TaskError> {
        let mut attributes = Map::new();
        attributes.insert("cidr_block".to_string(), json!(self.cidr_block));
        let object = match actual.and_then(|a| a.id.clone()) {
            Some(id) => ctx.cloud.update(ResourceKind::Vpc, &id, attributes).await?,
            None => {
                let tags = BTreeMap::from([
                    ("Name".to_string(), self.name.clone()),
                    (OWNER_TAG.to_string(), ctx.cluster_name.clone()),
                ]);
                ctx.cloud.create(ResourceKind::Vpc, attributes, tags).await?
            }
        };
        Ok(Outputs::from([("id".to_string(), object.id)]))
    }

    async fn render_terraform(&self, _ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        tf.add_resource(
            "aws_vpc",
            &self.name,
            HclBody::new().opt_attr("cidr_block", self.cidr_block.clone()),
        )?;
        Ok(Outputs::from([(
            "id".to_string(),
            TerraformTarget::reference("aws_vpc", &self.name, "id"),
        )]))
    }

    async fn find_deletions(&self, ctx: &RunContext) -> Result<Vec<Arc<dyn Deletion>>, TaskError> {
        let owned = ctx
            .cloud
            .query(ResourceKind::Vpc, &[("tag:test.example.com/owner", &ctx.cluster_name)])
            .await?;
        let known: Vec<String> = ctx.tasks.of_kind::<Network>().iter().map(|n| n.name.clone()).collect();
        Ok(owned
            .into_iter()
            .filter(|o| o.name_tag().is_some_and(|n| !known.iter().any(|k| k == n)))
            .map(|o| Arc::new(StaleNetwork { id: o.id }) as Arc<dyn Deletion>)
            .collect())
    }
}

#[derive(Debug, Clone, Serialize)]
struct Zone {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    network: Link<Network>,
    cidr_block: String,
    #[serde(skip)]
    lifecycle: Lifecycle,
}

fn zone(name: &str, network: &str, cidr: &str) -> Zone {
    Zone {
        name: name.to_string(),
        id: None,
        network: Link::new(network),
        cidr_block: cidr.to_string(),
        lifecycle: Lifecycle::Sync,
    }
}

#[async_trait::async_trait]
impl CloudupTask for Zone {
    const KIND: &'static str = "Zone";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn set_lifecycle(&mut self, lifecycle: Lifecycle) {
        self.lifecycle = lifecycle;
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let found = ctx.cloud.query(ResourceKind::Subnet, &[("tag:Name", &self.name)]).await?;
        Ok(found.into_iter().next().map(|o| Zone {
            name: self.name.clone(),
            id: Some(o.id.clone()),
            network: self.network.clone(),
            cidr_block: o.attr_str("cidr_block").unwrap_or_default(),
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<(), TaskError> {
        if actual.is_some() {
            changes.check_immutable(&["cidr_block"])?;
        }
        Ok(())
    }

    async fn render_direct(
        &self,
        ctx: &RunContext,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<Outputs, TaskError> {
        let mut attributes = Map::new();
        attributes.insert("vpc_id".to_string(), json!(ctx.link_id(&self.network)?));
        attributes.insert("cidr_block".to_string(), json!(self.cidr_block));
        let tags = BTreeMap::from([("Name".to_string(), self.name.clone())]);
        let object = ctx.cloud.create(ResourceKind::Subnet, attributes, tags).await?;
        Ok(Outputs::from([("id".to_string(), object.id)]))
    }

    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        tf.add_resource(
            "aws_subnet",
            &self.name,
            HclBody::new()
                .attr("vpc_id", ctx.link_id(&self.network)?)
                .attr("cidr_block", self.cidr_block.clone()),
        )?;
        Ok(Outputs::new())
    }
}

/// Task that refers to another of its own kind, for cycle tests
#[derive(Debug, Clone, Serialize)]
struct Looped {
    name: String,
    next: Link<Looped>,
    #[serde(skip)]
    lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for Looped {
    const KIND: &'static str = "Looped";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn set_lifecycle(&mut self, lifecycle: Lifecycle) {
        self.lifecycle = lifecycle;
    }

    async fn find(&self, _ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        Ok(None)
    }

    async fn render_direct(
        &self,
        _ctx: &RunContext,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<Outputs, TaskError> {
        Err(TaskError::Invalid("looped tasks are never rendered".to_string()))
    }
}

fn compile(build: impl FnOnce(&mut ModelBuilderContext)) -> (TaskMap, TaskGraph) {
    let mut registry = ModelBuilderContext::new();
    build(&mut registry);
    let tasks = registry.into_tasks();
    let graph = TaskGraph::build(&tasks).unwrap();
    (tasks, graph)
}

fn two_tasks(registry: &mut ModelBuilderContext) {
    registry.add(network("example.com", "10.0.0.0/16")).unwrap();
    registry
        .add(zone("a.example.com", "example.com", "10.0.1.0/24"))
        .unwrap();
}

fn context(cloud: &MemoryCloud, target: Target, tasks: TaskMap) -> Arc<RunContext> {
    let vfs = VfsContext::new(None);
    let base = vfs.resolve("memfs://state/example.com").unwrap();
    Arc::new(RunContext::new(
        "example.com",
        target,
        Arc::new(cloud.clone()),
        Arc::new(tasks),
        base,
        vfs,
        FeatureFlags::defaults(),
    ))
}

#[test]
fn test_cycle_detected_before_render() {
    let mut registry = ModelBuilderContext::new();
    registry
        .add(Looped {
            name: "a".to_string(),
            next: Link::new("b"),
            lifecycle: Lifecycle::Sync,
        })
        .unwrap();
    registry
        .add(Looped {
            name: "b".to_string(),
            next: Link::new("a"),
            lifecycle: Lifecycle::Sync,
        })
        .unwrap();

    let err = TaskGraph::build(&registry.into_tasks()).unwrap_err();
    match &err {
        CompileError::CycleDetected { cycles } => {
            assert_eq!(cycles, &vec![vec![TaskKey::new("Looped", "a"), TaskKey::new("Looped", "b")]]);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.to_string().contains("Looped/a -> Looped/b"));
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn test_missing_reference_names_field() {
    let mut registry = ModelBuilderContext::new();
    registry.add(zone("a.example.com", "absent", "10.0.1.0/24")).unwrap();
    let err = TaskGraph::build(&registry.into_tasks()).unwrap_err();
    match err {
        CompileError::MissingReference { from, field, to } => {
            assert_eq!(from, TaskKey::new("Zone", "a.example.com"));
            assert_eq!(field, "network");
            assert_eq!(to, TaskKey::new("Network", "absent"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

/// Task whose fields cannot be expressed as JSON
#[derive(Debug, Clone, Serialize)]
struct Unserializable {
    name: String,
    by_range: BTreeMap<(u8, u8), String>,
    #[serde(skip)]
    lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for Unserializable {
    const KIND: &'static str = "Unserializable";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn set_lifecycle(&mut self, lifecycle: Lifecycle) {
        self.lifecycle = lifecycle;
    }

    async fn find(&self, _ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        Ok(None)
    }

    async fn render_direct(
        &self,
        _ctx: &RunContext,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<Outputs, TaskError> {
        Ok(Outputs::new())
    }
}

#[test]
fn test_serialization_failure_aborts_compile() {
    let mut registry = ModelBuilderContext::new();
    registry
        .add(Unserializable {
            name: "a".to_string(),
            by_range: BTreeMap::from([((0, 1), "x".to_string())]),
            lifecycle: Lifecycle::Sync,
        })
        .unwrap();

    let err = TaskGraph::build(&registry.into_tasks()).unwrap_err();
    match &err {
        CompileError::Serialize { key, source } => {
            assert_eq!(key, &TaskKey::new("Unserializable", "a"));
            assert!(matches!(source, TaskError::Serialization(_)));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn test_registry_deduplicates() {
    let mut registry = ModelBuilderContext::new();
    registry.add(network("example.com", "10.0.0.0/16")).unwrap();
    registry.add(network("example.com", "10.0.0.0/16")).unwrap();
    assert_eq!(registry.len(), 1);

    let err = registry.add(network("example.com", "10.1.0.0/16")).unwrap_err();
    assert!(matches!(err, CompileError::DuplicateTask { .. }));

    let mut shared = network("example.com", "10.2.0.0/16");
    shared.shared = true;
    registry.ensure(shared).unwrap();
    let canonical = registry.find(&Link::<Network>::new("example.com")).unwrap();
    assert_eq!(canonical.cidr_block.as_deref(), Some("10.0.0.0/16"));
}

#[test]
fn test_graph_orders_dependencies_first() {
    let (_, graph) = compile(two_tasks);
    let order = graph.order();
    let net = order.iter().position(|k| k.kind == "Network").unwrap();
    let zone = order.iter().position(|k| k.kind == "Zone").unwrap();
    assert!(net < zone);
    assert_eq!(
        graph.dependents_of(&TaskKey::new("Network", "example.com")),
        vec![TaskKey::new("Zone", "a.example.com")]
    );
}

#[tokio::test]
async fn test_direct_run_creates_then_converges() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");

    let (tasks, graph) = compile(two_tasks);
    let report = Executor::default()
        .run(context(&cloud, Target::Direct, tasks), &graph)
        .await
        .unwrap();
    assert_eq!(report.with_outcome(TaskOutcome::Created).len(), 2);

    let vpc = cloud.objects(ResourceKind::Vpc).pop().unwrap();
    let subnet = cloud.objects(ResourceKind::Subnet).pop().unwrap();
    assert_eq!(subnet.attr_str("vpc_id"), Some(vpc.id.clone()));

    cloud.clear_calls();
    let (tasks, graph) = compile(two_tasks);
    let report = Executor::default()
        .run(context(&cloud, Target::Direct, tasks), &graph)
        .await
        .unwrap();
    assert_eq!(report.with_outcome(TaskOutcome::Unchanged).len(), 2);
    assert!(cloud.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_update_in_place_and_immutable_fields() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    let (tasks, graph) = compile(two_tasks);
    Executor::default()
        .run(context(&cloud, Target::Direct, tasks), &graph)
        .await
        .unwrap();

    let (tasks, graph) = compile(|registry| {
        registry.add(network("example.com", "10.9.0.0/16")).unwrap();
    });
    let report = Executor::default()
        .run(context(&cloud, Target::Direct, tasks), &graph)
        .await
        .unwrap();
    assert_eq!(
        report.outcomes[&TaskKey::new("Network", "example.com")],
        TaskOutcome::Updated
    );

    let (tasks, graph) = compile(|registry| {
        registry.add(network("example.com", "10.9.0.0/16")).unwrap();
        registry
            .add(zone("a.example.com", "example.com", "10.9.2.0/24"))
            .unwrap();
    });
    let err = Executor::default()
        .run(context(&cloud, Target::Direct, tasks), &graph)
        .await
        .unwrap_err();
    match err {
        RunError::Failed { failures, .. } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].1.field(), Some("cidr_block"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_dry_run_reports_without_mutation() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    let report = Arc::new(DryRunTarget::new());
    let (tasks, graph) = compile(two_tasks);

    Executor::default()
        .run(context(&cloud, Target::DryRun(Arc::clone(&report)), tasks), &graph)
        .await
        .unwrap();

    assert!(cloud.mutating_calls().is_empty());
    assert_eq!(
        report.creates(),
        vec![TaskKey::new("Network", "example.com"), TaskKey::new("Zone", "a.example.com")]
    );
    let text = report.report();
    assert!(text.starts_with("Will create resources:"));
    assert!(text.contains("name:Network/example.com"));
}

#[tokio::test]
async fn test_exists_and_validates_mismatch_exit_code() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    let mut attributes = Map::new();
    attributes.insert("cidr_block".to_string(), json!("10.5.0.0/16"));
    cloud.insert(CloudObject {
        id: "vpc-existing".to_string(),
        kind: ResourceKind::Vpc,
        attributes,
        tags: BTreeMap::from([("Name".to_string(), "example.com".to_string())]),
    });

    let mut registry =
        ModelBuilderContext::with_lifecycle_overrides(parse_overrides("Network=ExistsAndValidates").unwrap());
    registry.add(network("example.com", "10.0.0.0/16")).unwrap();
    let tasks = registry.into_tasks();
    let graph = TaskGraph::build(&tasks).unwrap();

    let err = Executor::default()
        .run(context(&cloud, Target::Direct, tasks), &graph)
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 5);
    assert!(cloud.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_exists_and_validates_missing_is_not_found() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    let mut registry =
        ModelBuilderContext::with_lifecycle_overrides(parse_overrides("Network=ExistsAndValidates").unwrap());
    registry.add(network("example.com", "10.0.0.0/16")).unwrap();
    let tasks = registry.into_tasks();
    let graph = TaskGraph::build(&tasks).unwrap();

    let err = Executor::default()
        .run(context(&cloud, Target::Direct, tasks), &graph)
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 4);
    match err {
        RunError::Failed { failures, .. } => assert!(matches!(failures[0].1, TaskError::NotFound(_))),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_ignore_lifecycle_skips_render() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    let mut registry = ModelBuilderContext::with_lifecycle_overrides(parse_overrides("Network=Ignore").unwrap());
    registry.add(network("example.com", "10.0.0.0/16")).unwrap();
    let tasks = registry.into_tasks();
    let graph = TaskGraph::build(&tasks).unwrap();

    let report = Executor::default()
        .run(context(&cloud, Target::Direct, tasks), &graph)
        .await
        .unwrap();
    assert_eq!(report.with_outcome(TaskOutcome::Skipped).len(), 1);
    assert_eq!(cloud.count(ResourceKind::Vpc), 0);
}

#[tokio::test]
async fn test_missing_shared_task_fails() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    let (tasks, graph) = compile(|registry| {
        let mut shared = network("vpc-shared", "10.0.0.0/16");
        shared.shared = true;
        registry.add(shared).unwrap();
    });
    let err = Executor::default()
        .run(context(&cloud, Target::Direct, tasks), &graph)
        .await
        .unwrap_err();
    match err {
        RunError::Failed { failures, .. } => assert!(matches!(failures[0].1, TaskError::NotFound(_))),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(cloud.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_failure_stops_dependants() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    cloud.inject_failure(Verb::Create, Some(ResourceKind::Vpc), 1, || {
        CloudError::Api("quota exceeded".to_string())
    });
    let (tasks, graph) = compile(two_tasks);

    let err = Executor::new(4)
        .run(context(&cloud, Target::Direct, tasks), &graph)
        .await
        .unwrap_err();
    match &err {
        RunError::Failed { failures, not_started } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].0, TaskKey::new("Network", "example.com"));
            assert_eq!(*not_started, 1);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.to_string().contains("quota exceeded"));
    assert_eq!(cloud.count(ResourceKind::Subnet), 0);
}

#[tokio::test]
async fn test_cancelled_run_starts_nothing() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    let (tasks, graph) = compile(two_tasks);
    let ctx = context(&cloud, Target::Direct, tasks);
    ctx.cancel.cancel();

    let err = Executor::default().run(ctx, &graph).await.unwrap_err();
    assert!(matches!(err, RunError::Cancelled));
    assert!(cloud.calls().is_empty());
}

#[tokio::test]
async fn test_deletions_applied_and_reported() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    cloud
        .create(
            ResourceKind::Vpc,
            Map::new(),
            BTreeMap::from([
                ("Name".to_string(), "stale.example.com".to_string()),
                (OWNER_TAG.to_string(), "example.com".to_string()),
            ]),
        )
        .await
        .unwrap();

    let report = Arc::new(DryRunTarget::new());
    let (tasks, graph) = compile(two_tasks);
    let run = Executor::default()
        .run(context(&cloud, Target::DryRun(Arc::clone(&report)), tasks), &graph)
        .await
        .unwrap();
    assert_eq!(run.deletions.len(), 1);
    assert!(report.report().contains("Will delete items:"));
    assert_eq!(cloud.count(ResourceKind::Vpc), 1);

    let (tasks, graph) = compile(two_tasks);
    let run = Executor::default()
        .run(context(&cloud, Target::Direct, tasks), &graph)
        .await
        .unwrap();
    assert_eq!(run.deletions.len(), 1);
    let names: Vec<_> = cloud
        .objects(ResourceKind::Vpc)
        .iter()
        .filter_map(|o| o.name_tag().map(ToString::to_string))
        .collect();
    assert_eq!(names, vec!["example.com".to_string()]);
}

#[tokio::test]
async fn test_terraform_render_links_by_reference() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    let dir = tempfile::tempdir().unwrap();
    let tf = Arc::new(TerraformTarget::new(dir.path(), "example.com", "us-test-1"));
    let (tasks, graph) = compile(two_tasks);

    let report = Executor::default()
        .run(context(&cloud, Target::Terraform(Arc::clone(&tf)), tasks), &graph)
        .await
        .unwrap();
    assert!(report.deletions.is_empty());
    assert!(cloud.calls().is_empty());

    let text = std::fs::read_to_string(dir.path().join("kubernetes.tf")).unwrap();
    assert!(text.contains("resource \"aws_subnet\" \"a-example-com\""));
    assert!(text.contains("vpc_id     = \"${aws_vpc.example-com.id}\""));
}
