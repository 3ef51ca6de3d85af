//! Subnets

use cloud_client::ResourceKind;
use fi::{
    Changes, CloudFormationTarget, CloudupTask, HclBody, Lifecycle, Link, Outputs, RunContext, TaskError,
    TerraformTarget,
};
use serde::Serialize;
use serde_json::json;

use crate::util::{
    Tags, attributes, cf_id_output, cf_link, cf_tags, create_or_update, find_by_id_or_name, id_output, relink,
    task_identity, tf_tags,
};
use crate::vpc::Vpc;

/// A subnet in one availability zone
#[derive(Debug, Clone, Serialize)]
pub struct Subnet {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub vpc: Link<Vpc>,
    pub availability_zone: Option<String>,
    pub cidr: Option<String>,
    pub ipv6_cidr: Option<String>,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(skip)]
    pub shared: bool,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for Subnet {
    const KIND: &'static str = "Subnet";

    task_identity!();

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn outputs(&self) -> Outputs {
        self.id.clone().map(id_output).unwrap_or_default()
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let found = find_by_id_or_name(ctx, ResourceKind::Subnet, self.id.as_deref(), &self.name).await?;
        Ok(found.map(|o| Subnet {
            name: self.name.clone(),
            id: Some(o.id.clone()),
            vpc: relink(ctx, &self.vpc, o.attr_str("vpc_id").as_deref()),
            availability_zone: o.attr_str("availability_zone"),
            cidr: o.attr_str("cidr_block"),
            ipv6_cidr: o.attr_str("ipv6_cidr_block"),
            tags: o.tags,
            shared: self.shared,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<(), TaskError> {
        match actual {
            Some(_) => changes.check_immutable(&["vpc", "availability_zone", "cidr", "ipv6_cidr"]),
            None if self.cidr.is_none() && self.ipv6_cidr.is_none() => Err(TaskError::Invalid(format!(
                "subnet {} needs a CIDR",
                self.name
            ))),
            None => Ok(()),
        }
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([
            ("vpc_id", json!(ctx.link_id(&self.vpc)?)),
            ("availability_zone", json!(self.availability_zone)),
            ("cidr_block", json!(self.cidr)),
            ("ipv6_cidr_block", json!(self.ipv6_cidr)),
        ]);
        let o = create_or_update(
            ctx,
            ResourceKind::Subnet,
            actual.and_then(|a| a.id.as_deref()),
            attrs,
            &self.tags,
            changes,
        )
        .await?;
        Ok(id_output(o.id))
    }

    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        tf.add_resource(
            "aws_subnet",
            &self.name,
            HclBody::new()
                .attr("vpc_id", ctx.link_id(&self.vpc)?)
                .opt_attr("cidr_block", self.cidr.clone())
                .opt_attr("ipv6_cidr_block", self.ipv6_cidr.clone())
                .opt_attr("availability_zone", self.availability_zone.clone())
                .attr("tags", tf_tags(&self.tags)),
        )?;
        let id = TerraformTarget::reference("aws_subnet", &self.name, "id");
        tf.add_output("subnet_ids", id.clone());
        Ok(id_output(id))
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        cf.add_resource(
            "AWS::EC2::Subnet",
            &self.name,
            json!({
                "VpcId": cf_link(ctx, &self.vpc, "id")?,
                "CidrBlock": self.cidr,
                "Ipv6CidrBlock": self.ipv6_cidr,
                "AvailabilityZone": self.availability_zone,
                "Tags": cf_tags(&self.tags),
            }),
        )?;
        Ok(cf_id_output("AWS::EC2::Subnet", &self.name))
    }
}
