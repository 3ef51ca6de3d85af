//! Internet, egress-only and NAT gateways, and elastic IPs

use cloud_client::ResourceKind;
use fi::{
    Changes, CloudFormationTarget, CloudupTask, HclBody, Lifecycle, Link, Outputs, RunContext, TaskError,
    TerraformTarget,
};
use serde::Serialize;
use serde_json::json;

use crate::subnet::Subnet;
use crate::util::{
    Tags, attributes, cf_id_output, cf_link, cf_tags, create_or_update, find_by_id_or_name, find_one, id_output,
    opt_link_id, relink, relink_opt, task_identity, tf_tags,
};
use crate::vpc::Vpc;

/// An internet gateway attached to a VPC
#[derive(Debug, Clone, Serialize)]
pub struct InternetGateway {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub vpc: Link<Vpc>,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(skip)]
    pub shared: bool,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for InternetGateway {
    const KIND: &'static str = "InternetGateway";

    task_identity!();

    fn is_shared(&self) -> bool {
        self.shared
    }

    /// A shared gateway without a known id is looked up through its VPC,
    /// whatever the target.
    fn check_existing(&self) -> bool {
        self.shared && self.id.is_none()
    }

    fn outputs(&self) -> Outputs {
        self.id.clone().map(id_output).unwrap_or_default()
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let found = if self.shared && self.id.is_none() {
            match ctx.try_link_id(&self.vpc) {
                Some(vpc_id) => find_one(ctx, ResourceKind::InternetGateway, &[("vpc_id", &vpc_id)]).await?,
                None => None,
            }
        } else {
            find_by_id_or_name(ctx, ResourceKind::InternetGateway, self.id.as_deref(), &self.name).await?
        };
        Ok(found.map(|o| InternetGateway {
            name: self.name.clone(),
            id: Some(o.id.clone()),
            vpc: relink(ctx, &self.vpc, o.attr_str("vpc_id").as_deref()),
            tags: o.tags,
            shared: self.shared,
            lifecycle: self.lifecycle,
        }))
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([("vpc_id", json!(ctx.link_id(&self.vpc)?))]);
        let o = create_or_update(
            ctx,
            ResourceKind::InternetGateway,
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
            "aws_internet_gateway",
            &self.name,
            HclBody::new()
                .attr("vpc_id", ctx.link_id(&self.vpc)?)
                .attr("tags", tf_tags(&self.tags)),
        )?;
        Ok(id_output(TerraformTarget::reference("aws_internet_gateway", &self.name, "id")))
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        cf.add_resource(
            "AWS::EC2::InternetGateway",
            &self.name,
            json!({ "Tags": cf_tags(&self.tags) }),
        )?;
        cf.add_resource(
            "AWS::EC2::VPCGatewayAttachment",
            &self.name,
            json!({
                "VpcId": cf_link(ctx, &self.vpc, "id")?,
                "InternetGatewayId": { "Ref": CloudFormationTarget::logical_id("AWS::EC2::InternetGateway", &self.name) },
            }),
        )?;
        Ok(cf_id_output("AWS::EC2::InternetGateway", &self.name))
    }
}

/// An egress-only internet gateway for IPv6 traffic
#[derive(Debug, Clone, Serialize)]
pub struct EgressOnlyInternetGateway {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub vpc: Link<Vpc>,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(skip)]
    pub shared: bool,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for EgressOnlyInternetGateway {
    const KIND: &'static str = "EgressOnlyInternetGateway";

    task_identity!();

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn outputs(&self) -> Outputs {
        self.id.clone().map(id_output).unwrap_or_default()
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let found =
            find_by_id_or_name(ctx, ResourceKind::EgressOnlyInternetGateway, self.id.as_deref(), &self.name).await?;
        Ok(found.map(|o| EgressOnlyInternetGateway {
            name: self.name.clone(),
            id: Some(o.id.clone()),
            vpc: relink(ctx, &self.vpc, o.attr_str("vpc_id").as_deref()),
            tags: o.tags,
            shared: self.shared,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<(), TaskError> {
        if actual.is_some() {
            changes.check_immutable(&["vpc"])?;
        }
        Ok(())
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([("vpc_id", json!(ctx.link_id(&self.vpc)?))]);
        let o = create_or_update(
            ctx,
            ResourceKind::EgressOnlyInternetGateway,
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
            "aws_egress_only_internet_gateway",
            &self.name,
            HclBody::new()
                .attr("vpc_id", ctx.link_id(&self.vpc)?)
                .attr("tags", tf_tags(&self.tags)),
        )?;
        Ok(id_output(TerraformTarget::reference(
            "aws_egress_only_internet_gateway",
            &self.name,
            "id",
        )))
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        cf.add_resource(
            "AWS::EC2::EgressOnlyInternetGateway",
            &self.name,
            json!({ "VpcId": cf_link(ctx, &self.vpc, "id")? }),
        )?;
        Ok(cf_id_output("AWS::EC2::EgressOnlyInternetGateway", &self.name))
    }
}

/// An elastic IP allocation
#[derive(Debug, Clone, Serialize)]
pub struct ElasticIp {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    /// Address, known once allocated
    #[serde(skip)]
    pub public_ip: Option<String>,
    #[serde(skip)]
    pub shared: bool,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for ElasticIp {
    const KIND: &'static str = "ElasticIP";

    task_identity!();

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn outputs(&self) -> Outputs {
        let mut outputs = self.id.clone().map(id_output).unwrap_or_default();
        if let Some(ip) = &self.public_ip {
            outputs.insert("public_ip".to_string(), ip.clone());
        }
        outputs
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let found = find_by_id_or_name(ctx, ResourceKind::ElasticIp, self.id.as_deref(), &self.name).await?;
        Ok(found.map(|o| ElasticIp {
            name: self.name.clone(),
            id: Some(o.id.clone()),
            public_ip: o.attr_str("public_ip"),
            tags: o.tags,
            shared: self.shared,
            lifecycle: self.lifecycle,
        }))
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([("domain", json!("vpc"))]);
        let o = create_or_update(
            ctx,
            ResourceKind::ElasticIp,
            actual.and_then(|a| a.id.as_deref()),
            attrs,
            &self.tags,
            changes,
        )
        .await?;
        let mut outputs = id_output(o.id.clone());
        if let Some(ip) = o.attr_str("public_ip") {
            outputs.insert("public_ip".to_string(), ip);
        }
        Ok(outputs)
    }

    async fn render_terraform(&self, _ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        tf.add_resource(
            "aws_eip",
            &self.name,
            HclBody::new().attr("domain", "vpc").attr("tags", tf_tags(&self.tags)),
        )?;
        Ok(Outputs::from([
            ("id".to_string(), TerraformTarget::reference("aws_eip", &self.name, "id")),
            ("public_ip".to_string(), TerraformTarget::reference("aws_eip", &self.name, "public_ip")),
        ]))
    }

    async fn render_cloudformation(&self, _ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        cf.add_resource(
            "AWS::EC2::EIP",
            &self.name,
            json!({ "Domain": "vpc", "Tags": cf_tags(&self.tags) }),
        )?;
        Ok(Outputs::from([
            (
                "id".to_string(),
                CloudFormationTarget::get_att_output("AWS::EC2::EIP", &self.name, "AllocationId"),
            ),
            ("public_ip".to_string(), CloudFormationTarget::ref_output("AWS::EC2::EIP", &self.name)),
        ]))
    }
}

/// A NAT gateway in a public subnet
#[derive(Debug, Clone, Serialize)]
pub struct NatGateway {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub subnet: Option<Link<Subnet>>,
    pub elastic_ip: Option<Link<ElasticIp>>,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(skip)]
    pub shared: bool,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for NatGateway {
    const KIND: &'static str = "NatGateway";

    task_identity!();

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn outputs(&self) -> Outputs {
        self.id.clone().map(id_output).unwrap_or_default()
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let found = find_by_id_or_name(ctx, ResourceKind::NatGateway, self.id.as_deref(), &self.name).await?;
        Ok(found.map(|o| NatGateway {
            name: self.name.clone(),
            id: Some(o.id.clone()),
            subnet: relink_opt(ctx, self.subnet.as_ref(), o.attr_str("subnet_id").as_deref()),
            elastic_ip: relink_opt(ctx, self.elastic_ip.as_ref(), o.attr_str("allocation_id").as_deref()),
            tags: o.tags,
            shared: self.shared,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<(), TaskError> {
        match actual {
            Some(_) => changes.check_immutable(&["subnet", "elastic_ip"]),
            None if self.subnet.is_none() || self.elastic_ip.is_none() => Err(TaskError::Invalid(format!(
                "NAT gateway {} needs a subnet and an elastic IP",
                self.name
            ))),
            None => Ok(()),
        }
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([
            ("subnet_id", json!(opt_link_id(ctx, self.subnet.as_ref())?)),
            ("allocation_id", json!(opt_link_id(ctx, self.elastic_ip.as_ref())?)),
        ]);
        let o = create_or_update(
            ctx,
            ResourceKind::NatGateway,
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
            "aws_nat_gateway",
            &self.name,
            HclBody::new()
                .opt_attr("allocation_id", opt_link_id(ctx, self.elastic_ip.as_ref())?)
                .opt_attr("subnet_id", opt_link_id(ctx, self.subnet.as_ref())?)
                .attr("tags", tf_tags(&self.tags)),
        )?;
        Ok(id_output(TerraformTarget::reference("aws_nat_gateway", &self.name, "id")))
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        let allocation = self.elastic_ip.as_ref().map(|l| cf_link(ctx, l, "id")).transpose()?;
        let subnet = self.subnet.as_ref().map(|l| cf_link(ctx, l, "id")).transpose()?;
        cf.add_resource(
            "AWS::EC2::NatGateway",
            &self.name,
            json!({
                "AllocationId": allocation,
                "SubnetId": subnet,
                "Tags": cf_tags(&self.tags),
            }),
        )?;
        Ok(cf_id_output("AWS::EC2::NatGateway", &self.name))
    }
}
