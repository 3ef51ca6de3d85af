//! SQS queue receiving instance lifecycle events

use cloud_client::ResourceKind;
use fi::{Changes, CloudFormationTarget, CloudupTask, HclBody, Lifecycle, Outputs, Resource, RunContext, TaskError, TerraformTarget};
use serde::Serialize;
use serde_json::{Value, json};

use crate::iam::canonical_policy;
use crate::util::{Tags, attributes, cf_tags, create_or_update, task_identity, tf_tags};

/// Default retention of queued events, in seconds
pub const DEFAULT_MESSAGE_RETENTION: i64 = 300;

/// An SQS queue
#[derive(Debug, Clone, Serialize)]
pub struct SqsQueue {
    pub name: String,
    pub message_retention_period: i64,
    pub policy: Resource,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(skip)]
    pub url: Option<String>,
    #[serde(skip)]
    pub arn: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl SqsQueue {
    fn policy_text(&self) -> Result<String, TaskError> {
        self.policy
            .as_text()
            .ok_or_else(|| TaskError::Invalid(format!("policy of queue {} has not been materialized", self.name)))
    }
}

#[async_trait::async_trait]
impl CloudupTask for SqsQueue {
    const KIND: &'static str = "SQSQueue";

    task_identity!();

    async fn normalize(&self, ctx: &RunContext) -> Result<Self, TaskError> {
        let policy = self.policy.materialize(ctx).await?;
        let policy = match policy.as_text() {
            Some(text) => Resource::from_string(canonical_policy(&text)?),
            None => policy,
        };
        Ok(SqsQueue { policy, ..self.clone() })
    }

    fn outputs(&self) -> Outputs {
        let mut outputs = Outputs::new();
        if let Some(url) = &self.url {
            outputs.insert("id".to_string(), url.clone());
        }
        if let Some(arn) = &self.arn {
            outputs.insert("arn".to_string(), arn.clone());
        }
        outputs
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let Some(o) = ctx.cloud.get(ResourceKind::SqsQueue, &self.name).await? else {
            return Ok(None);
        };
        let policy = o
            .attr_str("policy")
            .map(|p| canonical_policy(&p))
            .transpose()?
            .unwrap_or_default();
        Ok(Some(SqsQueue {
            name: self.name.clone(),
            message_retention_period: o.attr_i64("message_retention_period").unwrap_or_default(),
            policy: Resource::from_string(policy),
            tags: o.tags.clone(),
            url: o.attr_str("url"),
            arn: o.attr_str("arn"),
            lifecycle: self.lifecycle,
        }))
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([
            ("name", json!(self.name)),
            ("message_retention_period", json!(self.message_retention_period)),
            ("policy", json!(self.policy_text()?)),
        ]);
        let o = create_or_update(
            ctx,
            ResourceKind::SqsQueue,
            actual.map(|a| a.name.as_str()),
            attrs,
            &self.tags,
            changes,
        )
        .await?;
        let mut outputs = Outputs::new();
        for (output, attribute) in [("id", "url"), ("arn", "arn")] {
            if let Some(value) = o.attr_str(attribute) {
                outputs.insert(output.to_string(), value);
            }
        }
        Ok(outputs)
    }

    async fn render_terraform(&self, _ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        let policy = tf.add_file("aws_sqs_queue", &self.name, "policy", self.policy_text()?.as_bytes());
        tf.add_resource(
            "aws_sqs_queue",
            &self.name,
            HclBody::new()
                .attr("name", self.name.clone())
                .attr("message_retention_seconds", self.message_retention_period)
                .attr("policy", policy)
                .attr("tags", tf_tags(&self.tags)),
        )?;
        Ok(Outputs::from([
            ("id".to_string(), TerraformTarget::reference("aws_sqs_queue", &self.name, "id")),
            ("arn".to_string(), TerraformTarget::reference("aws_sqs_queue", &self.name, "arn")),
        ]))
    }

    async fn render_cloudformation(&self, _ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        const TYPE: &str = "AWS::SQS::Queue";
        cf.add_resource(
            TYPE,
            &self.name,
            json!({
                "QueueName": self.name,
                "MessageRetentionPeriod": self.message_retention_period,
                "Tags": cf_tags(&self.tags),
            }),
        )?;
        let document: Value = serde_json::from_str(&self.policy_text()?)?;
        cf.add_resource(
            "AWS::SQS::QueuePolicy",
            &self.name,
            json!({
                "PolicyDocument": document,
                "Queues": [{ "Ref": CloudFormationTarget::logical_id(TYPE, &self.name) }],
            }),
        )?;
        Ok(Outputs::from([
            ("id".to_string(), CloudFormationTarget::ref_output(TYPE, &self.name)),
            ("arn".to_string(), CloudFormationTarget::get_att_output(TYPE, &self.name, "Arn")),
        ]))
    }
}
