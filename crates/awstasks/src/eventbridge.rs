//! EventBridge rules forwarding instance events to a queue

use cloud_client::ResourceKind;
use fi::{
    Changes, CloudFormationTarget, CloudupTask, HclBody, Lifecycle, Link, Outputs, RunContext, TaskError, TaskKey, TaskMap,
    TerraformTarget,
};
use serde::Serialize;
use serde_json::{Value, json};

use crate::iam::canonical_policy;
use crate::sqs::SqsQueue;
use crate::util::{Tags, attributes, cf_link, cf_tags, create_or_update, find_one, id_output, task_identity, tf_tags};

/// An EventBridge rule matching an event pattern
#[derive(Debug, Clone, Serialize)]
pub struct EventBridgeRule {
    pub name: String,
    pub event_pattern: String,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(skip)]
    pub arn: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for EventBridgeRule {
    const KIND: &'static str = "EventBridgeRule";

    task_identity!();

    /// CloudFormation renders targets inline, so their queues come first
    fn dependencies(&self, tasks: &TaskMap) -> Vec<TaskKey> {
        tasks
            .of_kind::<EventBridgeTarget>()
            .into_iter()
            .filter(|t| t.rule.name() == self.name)
            .map(|t| t.sqs_queue.key())
            .collect()
    }

    async fn normalize(&self, _ctx: &RunContext) -> Result<Self, TaskError> {
        Ok(EventBridgeRule {
            event_pattern: canonical_policy(&self.event_pattern)?,
            ..self.clone()
        })
    }

    fn outputs(&self) -> Outputs {
        let mut outputs = id_output(self.name.clone());
        if let Some(arn) = &self.arn {
            outputs.insert("arn".to_string(), arn.clone());
        }
        outputs
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let Some(o) = ctx.cloud.get(ResourceKind::EventRule, &self.name).await? else {
            return Ok(None);
        };
        Ok(Some(EventBridgeRule {
            name: self.name.clone(),
            event_pattern: o
                .attr_str("event_pattern")
                .map(|p| canonical_policy(&p))
                .transpose()?
                .unwrap_or_default(),
            tags: o.tags.clone(),
            arn: o.attr_str("arn"),
            lifecycle: self.lifecycle,
        }))
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([("name", json!(self.name)), ("event_pattern", json!(self.event_pattern))]);
        let o = create_or_update(
            ctx,
            ResourceKind::EventRule,
            actual.map(|a| a.name.as_str()),
            attrs,
            &self.tags,
            changes,
        )
        .await?;
        let mut outputs = id_output(o.id.clone());
        if let Some(arn) = o.attr_str("arn") {
            outputs.insert("arn".to_string(), arn);
        }
        Ok(outputs)
    }

    async fn render_terraform(&self, _ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        let pattern = tf.add_file(
            "aws_cloudwatch_event_rule",
            &self.name,
            "event_pattern",
            self.event_pattern.as_bytes(),
        );
        tf.add_resource(
            "aws_cloudwatch_event_rule",
            &self.name,
            HclBody::new()
                .attr("name", self.name.clone())
                .attr("event_pattern", pattern)
                .attr("tags", tf_tags(&self.tags)),
        )?;
        Ok(Outputs::from([
            (
                "id".to_string(),
                TerraformTarget::reference("aws_cloudwatch_event_rule", &self.name, "id"),
            ),
            (
                "arn".to_string(),
                TerraformTarget::reference("aws_cloudwatch_event_rule", &self.name, "arn"),
            ),
        ]))
    }

    /// Targets are rendered inline from the EventBridgeTarget tasks naming this rule
    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        const TYPE: &str = "AWS::Events::Rule";
        let targets = ctx
            .tasks
            .of_kind::<EventBridgeTarget>()
            .into_iter()
            .filter(|t| t.rule.name() == self.name)
            .map(|t| -> Result<Value, TaskError> {
                Ok(json!({
                    "Id": t.name,
                    "Arn": cf_link(ctx, &t.sqs_queue, "arn")?,
                }))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let pattern: Value = serde_json::from_str(&self.event_pattern)?;
        cf.add_resource(
            TYPE,
            &self.name,
            json!({
                "Name": self.name,
                "EventPattern": pattern,
                "Targets": targets,
                "Tags": cf_tags(&self.tags),
            }),
        )?;
        Ok(Outputs::from([
            ("id".to_string(), CloudFormationTarget::ref_output(TYPE, &self.name)),
            ("arn".to_string(), CloudFormationTarget::get_att_output(TYPE, &self.name, "Arn")),
        ]))
    }
}

/// Delivery of a rule's events to an SQS queue
#[derive(Debug, Clone, Serialize)]
pub struct EventBridgeTarget {
    pub name: String,
    pub rule: Link<EventBridgeRule>,
    pub sqs_queue: Link<SqsQueue>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for EventBridgeTarget {
    const KIND: &'static str = "EventBridgeTarget";

    task_identity!();

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let (Some(rule), Some(queue_arn)) = (
            ctx.try_link_id(&self.rule),
            ctx.outputs.get(&self.sqs_queue.key(), "arn"),
        ) else {
            return Ok(None);
        };
        let found = find_one(
            ctx,
            ResourceKind::EventTarget,
            &[("rule_name", &rule), ("target_arn", &queue_arn)],
        )
        .await?;
        Ok(found.map(|_| self.clone()))
    }

    async fn render_direct(&self, ctx: &RunContext, _actual: Option<&Self>, _changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([
            ("rule_name", json!(ctx.link_id(&self.rule)?)),
            ("target_id", json!(self.name)),
            ("target_arn", json!(ctx.link_output(&self.sqs_queue, "arn")?)),
        ]);
        ctx.cloud.create(ResourceKind::EventTarget, attrs, Tags::new()).await?;
        Ok(Outputs::new())
    }

    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        tf.add_resource(
            "aws_cloudwatch_event_target",
            &self.name,
            HclBody::new()
                .attr("rule", ctx.link_id(&self.rule)?)
                .attr("arn", ctx.link_output(&self.sqs_queue, "arn")?),
        )?;
        Ok(Outputs::new())
    }

    /// Rendered as part of the rule
    async fn render_cloudformation(&self, _ctx: &RunContext, _cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        Ok(Outputs::new())
    }
}
