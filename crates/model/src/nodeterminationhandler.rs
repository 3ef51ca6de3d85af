//! Event plumbing for the node termination handler in queue mode

use std::sync::Arc;

use awstasks::{EventBridgeRule, EventBridgeTarget, SqsQueue};
use awstasks::sqs::DEFAULT_MESSAGE_RETENTION;
use fi::{Lifecycle, ModelBuilderContext, Resource, ResourceResolver, RunContext, TaskError};
use serde_json::json;

use crate::ModelBuilder;
use crate::context::ModelContext;
use crate::error::ModelError;
use crate::policy::{PolicyDocument, Statement, StringOrList};

/// Tag marking autoscaling groups the handler may drain
pub const DEFAULT_MANAGED_ASG_TAG: &str = "aws-node-termination-handler/managed";

/// Rule suffixes and the events they match
const EVENT_RULES: [(&str, &str); 5] = [
    (
        "ASGLifecycle",
        r#"{"source":["aws.autoscaling"],"detail-type":["EC2 Instance-terminate Lifecycle Action"]}"#,
    ),
    (
        "SpotInterruption",
        r#"{"source":["aws.ec2"],"detail-type":["EC2 Spot Instance Interruption Warning"]}"#,
    ),
    (
        "RebalanceRecommendation",
        r#"{"source":["aws.ec2"],"detail-type":["EC2 Instance Rebalance Recommendation"]}"#,
    ),
    (
        "InstanceStateChange",
        r#"{"source":["aws.ec2"],"detail-type":["EC2 Instance State-change Notification"]}"#,
    ),
    (
        "InstanceScheduledChange",
        r#"{"source":["aws.health"],"detail-type":["AWS Health Event"],"detail":{"service":["EC2"],"eventTypeCategory":["scheduledChange"]}}"#,
    ),
];

/// Queue mode: the handler is enabled and drains from SQS
pub fn queue_mode_enabled(model: &ModelContext) -> bool {
    model
        .cluster
        .spec
        .node_termination_handler
        .as_ref()
        .is_some_and(|nth| nth.enabled.unwrap_or(false) && nth.enable_sqs_termination_draining.unwrap_or(false))
}

/// Tag put on the groups the handler manages
pub fn managed_asg_tag(model: &ModelContext) -> String {
    model
        .cluster
        .spec
        .node_termination_handler
        .as_ref()
        .and_then(|nth| nth.managed_asg_tag.clone())
        .unwrap_or_else(|| DEFAULT_MANAGED_ASG_TAG.to_string())
}

/// `<cluster-with-dashes>-nth`
pub fn queue_name(model: &ModelContext) -> String {
    format!("{}-nth", model.cluster_name().replace('.', "-"))
}

/// Queue policy letting EventBridge deliver to the queue, built once the account is known
#[derive(Debug)]
pub struct QueuePolicyResolver {
    pub queue: String,
}

impl QueuePolicyResolver {
    /// Policy document for a queue in `region` of `account`
    pub fn document(&self, partition: &str, region: &str, account: &str) -> PolicyDocument {
        PolicyDocument::new(vec![Statement {
            sid: None,
            effect: "Allow".to_string(),
            principal: Some(json!({ "Service": ["events.amazonaws.com", "sqs.amazonaws.com"] })),
            action: StringOrList::from_sorted(["sqs:SendMessage"]),
            resource: Some(StringOrList::from_sorted([format!(
                "arn:{partition}:sqs:{region}:{account}:{}",
                self.queue
            )])),
            condition: None,
        }])
    }
}

#[async_trait::async_trait]
impl ResourceResolver for QueuePolicyResolver {
    async fn resolve(&self, ctx: &RunContext) -> Result<Vec<u8>, TaskError> {
        let document = self.document(ctx.cloud.partition(), ctx.cloud.region(), ctx.cloud.account_id());
        Ok(document.to_json()?.into_bytes())
    }

    fn describe(&self) -> String {
        format!("sqs-policy:{}", self.queue)
    }
}

/// Emits the queue, the event rules and their targets
#[derive(Debug, Default)]
pub struct NodeTerminationHandlerBuilder;

impl ModelBuilder for NodeTerminationHandlerBuilder {
    fn build(&self, model: &ModelContext, c: &mut ModelBuilderContext) -> Result<(), ModelError> {
        if !queue_mode_enabled(model) {
            return Ok(());
        }
        let name = queue_name(model);
        let queue = c.add(SqsQueue {
            name: name.clone(),
            message_retention_period: DEFAULT_MESSAGE_RETENTION,
            policy: Resource::lazy(Arc::new(QueuePolicyResolver { queue: name.clone() }), Vec::new()),
            tags: model.cloud_tags(&name, false),
            url: None,
            arn: None,
            lifecycle: Lifecycle::Sync,
        })?;

        let cluster = model.cluster_name();
        for (suffix, pattern) in EVENT_RULES {
            let rule_name = format!("{cluster}-{suffix}");
            let rule = c.add(EventBridgeRule {
                name: rule_name.clone(),
                event_pattern: pattern.to_string(),
                tags: model.cloud_tags(&rule_name, false),
                arn: None,
                lifecycle: Lifecycle::Sync,
            })?;
            c.add(EventBridgeTarget {
                name: format!("{rule_name}-Target"),
                rule,
                sqs_queue: queue.clone(),
                lifecycle: Lifecycle::Sync,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{minimal_cluster, model_for};
    use crds::NodeTerminationHandlerSpec;
    use fi::Link;

    fn queue_cluster() -> crds::Cluster {
        let mut cluster = minimal_cluster();
        cluster.spec.node_termination_handler = Some(NodeTerminationHandlerSpec {
            enabled: Some(true),
            enable_sqs_termination_draining: Some(true),
            managed_asg_tag: None,
        });
        cluster
    }

    #[test]
    fn test_disabled_without_queue_mode() {
        let mut cluster = queue_cluster();
        if let Some(nth) = cluster.spec.node_termination_handler.as_mut() {
            nth.enable_sqs_termination_draining = Some(false);
        }
        let model = model_for(cluster);
        let mut c = ModelBuilderContext::new();
        NodeTerminationHandlerBuilder.build(&model, &mut c).unwrap();
        assert!(c.is_empty());
    }

    #[test]
    fn test_queue_rules_and_targets() {
        let model = model_for(queue_cluster());
        let mut c = ModelBuilderContext::new();
        NodeTerminationHandlerBuilder.build(&model, &mut c).unwrap();

        let queue = c.find(&Link::<SqsQueue>::new("minimal-example-com-nth")).unwrap();
        assert!(queue.policy.predecessors().is_empty());
        assert_eq!(managed_asg_tag(&model), DEFAULT_MANAGED_ASG_TAG);

        let tasks = c.into_tasks();
        assert_eq!(tasks.of_kind::<EventBridgeRule>().len(), 5);
        let targets = tasks.of_kind::<EventBridgeTarget>();
        assert_eq!(targets.len(), 5);
        assert!(targets.iter().all(|t| t.sqs_queue.name() == "minimal-example-com-nth"));
        assert!(tasks
            .of_kind::<EventBridgeRule>()
            .iter()
            .any(|r| r.name == "minimal.example.com-InstanceScheduledChange"));
    }

    #[test]
    fn test_event_patterns_are_json() {
        for (_, pattern) in EVENT_RULES {
            let value: serde_json::Value = serde_json::from_str(pattern).unwrap();
            assert!(value.get("source").is_some());
        }
    }

    #[test]
    fn test_queue_policy() {
        let resolver = QueuePolicyResolver {
            queue: "minimal-example-com-nth".to_string(),
        };
        let text = resolver.document("aws", "us-test-1", "123456789012").to_json().unwrap();
        assert!(text.contains("arn:aws:sqs:us-test-1:123456789012:minimal-example-com-nth"));
        assert!(text.contains("events.amazonaws.com"));
    }
}
