//! Integration tests for the in-memory backend and the retry wrapper

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use cloud_client::{CloudApi, CloudError, MemoryCloud, ResourceKind, RetryPolicy, RetryingCloud, Verb};
use serde_json::{Map, Value, json};

fn attrs(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        call_timeout: Duration::from_millis(200),
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn test_query_by_tag_and_attribute() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    let tags = BTreeMap::from([("Name".to_string(), "minimal.example.com".to_string())]);
    let vpc = cloud
        .create(ResourceKind::Vpc, attrs(json!({"cidr_block": "172.20.0.0/16"})), tags)
        .await
        .unwrap();
    cloud
        .create(
            ResourceKind::Subnet,
            attrs(json!({"vpc_id": vpc.id, "cidr_block": "172.20.32.0/19"})),
            BTreeMap::new(),
        )
        .await
        .unwrap();

    let found = cloud
        .query(ResourceKind::Vpc, &[("tag:Name", "minimal.example.com")])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);

    let subnets = cloud
        .query(ResourceKind::Subnet, &[("vpc_id", vpc.id.as_str())])
        .await
        .unwrap();
    assert_eq!(subnets.len(), 1);
}

#[tokio::test]
async fn test_subnet_requires_existing_vpc() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    let result = cloud
        .create(ResourceKind::Subnet, attrs(json!({"vpc_id": "vpc-missing"})), BTreeMap::new())
        .await;
    assert!(matches!(result, Err(CloudError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_derived_attributes() {
    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    let elb = cloud
        .create(ResourceKind::ClassicLoadBalancer, attrs(json!({"name": "api-minimal"})), BTreeMap::new())
        .await
        .unwrap();
    assert!(elb.attr_str("dns_name").unwrap().starts_with("api-minimal-"));
    assert!(elb.attr_str("hosted_zone_id").is_some());

    let queue = cloud
        .create(ResourceKind::SqsQueue, attrs(json!({"name": "minimal-nth"})), BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(
        queue.attr_str("arn").as_deref(),
        Some("arn:aws:sqs:us-test-1:123456789012:minimal-nth")
    );

    let template = cloud
        .create(ResourceKind::LaunchTemplate, attrs(json!({"name": "nodes"})), BTreeMap::new())
        .await
        .unwrap();
    let updated = cloud
        .update(ResourceKind::LaunchTemplate, &template.id, attrs(json!({"image_id": "ami-2"})))
        .await
        .unwrap();
    assert_eq!(updated.attr_i64("latest_version"), Some(2));
}

#[tokio::test]
async fn test_snapshot_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("cloud.json");

    let cloud = MemoryCloud::new("us-test-1", "123456789012");
    let vpc = cloud
        .create(ResourceKind::Vpc, attrs(json!({"cidr_block": "10.0.0.0/16"})), BTreeMap::new())
        .await
        .unwrap();
    cloud.save(&path).await.unwrap();

    let loaded = MemoryCloud::load(&path, "ignored", "ignored").await.unwrap();
    assert_eq!(loaded.region(), "us-test-1");
    assert_eq!(loaded.objects(ResourceKind::Vpc)[0].id, vpc.id);

    // ids keep increasing after a reload
    let second = loaded
        .create(ResourceKind::Vpc, attrs(json!({"cidr_block": "10.1.0.0/16"})), BTreeMap::new())
        .await
        .unwrap();
    assert_ne!(second.id, vpc.id);
}

#[tokio::test]
async fn test_missing_snapshot_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let cloud = MemoryCloud::load(&dir.path().join("none.json"), "us-test-1", "1")
        .await
        .unwrap();
    assert!(cloud.all_objects().is_empty());
}

#[tokio::test]
async fn test_retry_recovers_from_throttling() {
    let memory = MemoryCloud::new("us-test-1", "123456789012");
    memory.inject_failure(Verb::Query, None, 2, || CloudError::Throttled("Rate exceeded".to_string()));
    let cloud = RetryingCloud::new(Arc::new(memory.clone()), fast_policy());

    let result = cloud.query(ResourceKind::Vpc, &[]).await;
    assert!(result.is_ok());
    assert_eq!(memory.calls().len(), 3);
}

#[tokio::test]
async fn test_retry_gives_up_after_attempts() {
    let memory = MemoryCloud::new("us-test-1", "123456789012");
    memory.inject_failure(Verb::Get, None, 10, || CloudError::Throttled("Rate exceeded".to_string()));
    let cloud = RetryingCloud::new(Arc::new(memory.clone()), fast_policy());

    let result = cloud.get(ResourceKind::Vpc, "vpc-1").await;
    assert!(matches!(result, Err(CloudError::Throttled(_))));
    assert_eq!(memory.calls().len(), 3);
}

#[tokio::test]
async fn test_create_is_not_retried() {
    let memory = MemoryCloud::new("us-test-1", "123456789012");
    memory.inject_failure(Verb::Create, None, 1, || CloudError::Throttled("Rate exceeded".to_string()));
    let cloud = RetryingCloud::new(Arc::new(memory.clone()), fast_policy());

    let result = cloud
        .create(ResourceKind::Vpc, attrs(json!({"cidr_block": "10.0.0.0/16"})), BTreeMap::new())
        .await;
    assert!(result.is_err());
    assert_eq!(memory.calls().len(), 1);
    assert_eq!(memory.count(ResourceKind::Vpc), 0);
}

#[tokio::test]
async fn test_non_retryable_error_returned_immediately() {
    let memory = MemoryCloud::new("us-test-1", "123456789012");
    let cloud = RetryingCloud::new(Arc::new(memory.clone()), fast_policy());

    let result = cloud.delete(ResourceKind::Vpc, "vpc-missing").await;
    assert!(matches!(result, Err(CloudError::NotFound(_))));
    assert_eq!(memory.calls().len(), 1);
}

#[tokio::test]
async fn test_call_deadline_enforced() {
    let memory = MemoryCloud::new("us-test-1", "123456789012");
    memory.set_latency(Some(Duration::from_secs(5)));
    let policy = RetryPolicy {
        attempts: 1,
        call_timeout: Duration::from_millis(20),
        ..fast_policy()
    };
    let cloud = RetryingCloud::new(Arc::new(memory), policy);
    let result = cloud.query(ResourceKind::Vpc, &[]).await;
    assert!(matches!(result, Err(CloudError::Timeout(_))));
}
