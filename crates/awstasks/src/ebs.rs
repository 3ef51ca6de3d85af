//! EBS volumes for etcd members

use cloud_client::ResourceKind;
use fi::{Changes, CloudFormationTarget, CloudupTask, HclBody, Lifecycle, Outputs, RunContext, TaskError, TerraformTarget};
use serde::Serialize;
use serde_json::json;

use crate::util::{Tags, attributes, cf_id_output, cf_tags, create_or_update, find_by_id_or_name, id_output, task_identity, tf_tags};

/// An EBS volume
#[derive(Debug, Clone, Serialize)]
pub struct EbsVolume {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub availability_zone: String,
    pub size_gb: i64,
    pub volume_type: String,
    pub iops: Option<i64>,
    pub throughput: Option<i64>,
    pub encrypted: Option<bool>,
    pub kms_key_id: Option<String>,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for EbsVolume {
    const KIND: &'static str = "EBSVolume";

    task_identity!();

    fn outputs(&self) -> Outputs {
        self.id.clone().map(id_output).unwrap_or_default()
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let found = find_by_id_or_name(ctx, ResourceKind::EbsVolume, self.id.as_deref(), &self.name).await?;
        Ok(found.map(|o| EbsVolume {
            name: self.name.clone(),
            id: Some(o.id.clone()),
            availability_zone: o.attr_str("availability_zone").unwrap_or_default(),
            size_gb: o.attr_i64("size").unwrap_or_default(),
            volume_type: o.attr_str("volume_type").unwrap_or_default(),
            iops: o.attr_i64("iops"),
            throughput: o.attr_i64("throughput"),
            encrypted: o.attr_bool("encrypted"),
            kms_key_id: o.attr_str("kms_key_id"),
            tags: o.tags.clone(),
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<(), TaskError> {
        changes.check_immutable(&["availability_zone", "encrypted", "kms_key_id"])?;
        if let Some(actual) = actual {
            if self.size_gb < actual.size_gb {
                return Err(TaskError::Invalid(format!(
                    "volume {} cannot shrink from {} to {} GiB",
                    self.name, actual.size_gb, self.size_gb
                )));
            }
        }
        Ok(())
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([
            ("availability_zone", json!(self.availability_zone)),
            ("size", json!(self.size_gb)),
            ("volume_type", json!(self.volume_type)),
            ("iops", json!(self.iops)),
            ("throughput", json!(self.throughput)),
            ("encrypted", json!(self.encrypted)),
            ("kms_key_id", json!(self.kms_key_id)),
        ]);
        let o = create_or_update(
            ctx,
            ResourceKind::EbsVolume,
            actual.and_then(|a| a.id.as_deref()),
            attrs,
            &self.tags,
            changes,
        )
        .await?;
        Ok(id_output(o.id))
    }

    async fn render_terraform(&self, _ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        tf.add_resource(
            "aws_ebs_volume",
            &self.name,
            HclBody::new()
                .attr("availability_zone", self.availability_zone.clone())
                .attr("size", self.size_gb)
                .attr("type", self.volume_type.clone())
                .opt_attr("iops", self.iops)
                .opt_attr("throughput", self.throughput)
                .opt_attr("encrypted", self.encrypted)
                .opt_attr("kms_key_id", self.kms_key_id.clone())
                .attr("tags", tf_tags(&self.tags)),
        )?;
        Ok(id_output(TerraformTarget::reference("aws_ebs_volume", &self.name, "id")))
    }

    async fn render_cloudformation(&self, _ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        const TYPE: &str = "AWS::EC2::Volume";
        cf.add_resource(
            TYPE,
            &self.name,
            json!({
                "AvailabilityZone": self.availability_zone,
                "Size": self.size_gb,
                "VolumeType": self.volume_type,
                "Iops": self.iops,
                "Throughput": self.throughput,
                "Encrypted": self.encrypted,
                "KmsKeyId": self.kms_key_id,
                "Tags": cf_tags(&self.tags),
            }),
        )?;
        Ok(cf_id_output(TYPE, &self.name))
    }
}
