//! VPC and its CIDR and DHCP associations

use cloud_client::ResourceKind;
use fi::{
    Changes, CloudFormationTarget, CloudupTask, HclBody, Lifecycle, Link, Outputs, RunContext, TaskError,
    TerraformTarget,
};
use serde::Serialize;
use serde_json::json;

use crate::util::{
    Tags, attributes, cf_id_output, cf_link, cf_tags, create_or_update, find_by_id_or_name, find_one, id_output,
    relink, task_identity, tf_tags,
};

/// A VPC
#[derive(Debug, Clone, Serialize)]
pub struct Vpc {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub cidr: Option<String>,
    pub enable_dns_hostnames: Option<bool>,
    pub enable_dns_support: Option<bool>,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(skip)]
    pub shared: bool,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for Vpc {
    const KIND: &'static str = "VPC";

    task_identity!();

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn outputs(&self) -> Outputs {
        self.id.clone().map(id_output).unwrap_or_default()
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let Some(o) = find_by_id_or_name(ctx, ResourceKind::Vpc, self.id.as_deref(), &self.name).await? else {
            return Ok(None);
        };
        Ok(Some(Vpc {
            name: self.name.clone(),
            id: Some(o.id.clone()),
            cidr: o.attr_str("cidr_block"),
            enable_dns_hostnames: o.attr_bool("enable_dns_hostnames"),
            enable_dns_support: o.attr_bool("enable_dns_support"),
            tags: o.tags,
            shared: self.shared,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<(), TaskError> {
        if actual.is_some() {
            changes.check_immutable(&["cidr"])?;
        } else if self.cidr.is_none() {
            return Err(TaskError::Invalid(format!("VPC {} needs a CIDR", self.name)));
        }
        Ok(())
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([
            ("cidr_block", json!(self.cidr)),
            ("enable_dns_hostnames", json!(self.enable_dns_hostnames)),
            ("enable_dns_support", json!(self.enable_dns_support)),
        ]);
        let o = create_or_update(
            ctx,
            ResourceKind::Vpc,
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
            "aws_vpc",
            &self.name,
            HclBody::new()
                .opt_attr("cidr_block", self.cidr.clone())
                .opt_attr("enable_dns_hostnames", self.enable_dns_hostnames)
                .opt_attr("enable_dns_support", self.enable_dns_support)
                .attr("tags", tf_tags(&self.tags)),
        )?;
        let id = TerraformTarget::reference("aws_vpc", &self.name, "id");
        tf.add_output("vpc_id", id.clone());
        tf.add_output("vpc_cidr_block", TerraformTarget::reference("aws_vpc", &self.name, "cidr_block"));
        Ok(id_output(id))
    }

    async fn render_cloudformation(&self, _ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        cf.add_resource(
            "AWS::EC2::VPC",
            &self.name,
            json!({
                "CidrBlock": self.cidr,
                "EnableDnsHostnames": self.enable_dns_hostnames,
                "EnableDnsSupport": self.enable_dns_support,
                "Tags": cf_tags(&self.tags),
            }),
        )?;
        Ok(cf_id_output("AWS::EC2::VPC", &self.name))
    }
}

/// A secondary IPv4 CIDR of a VPC
#[derive(Debug, Clone, Serialize)]
pub struct VpcCidrBlock {
    pub name: String,
    pub vpc: Link<Vpc>,
    pub cidr_block: String,
    #[serde(skip)]
    pub shared: bool,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for VpcCidrBlock {
    const KIND: &'static str = "VPCCIDRBlock";

    task_identity!();

    fn is_shared(&self) -> bool {
        self.shared
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let Some(vpc_id) = ctx.try_link_id(&self.vpc) else {
            return Ok(None);
        };
        let found = find_one(
            ctx,
            ResourceKind::VpcCidrBlock,
            &[("vpc_id", &vpc_id), ("cidr_block", &self.cidr_block)],
        )
        .await?;
        Ok(found.map(|_| self.clone()))
    }

    async fn render_direct(&self, ctx: &RunContext, _actual: Option<&Self>, _changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([
            ("vpc_id", json!(ctx.link_id(&self.vpc)?)),
            ("cidr_block", json!(self.cidr_block)),
        ]);
        let o = ctx.cloud.create(ResourceKind::VpcCidrBlock, attrs, Tags::new()).await?;
        Ok(id_output(o.id))
    }

    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        tf.add_resource(
            "aws_vpc_ipv4_cidr_block_association",
            &self.name,
            HclBody::new()
                .attr("vpc_id", ctx.link_id(&self.vpc)?)
                .attr("cidr_block", self.cidr_block.clone()),
        )?;
        Ok(id_output(TerraformTarget::reference(
            "aws_vpc_ipv4_cidr_block_association",
            &self.name,
            "id",
        )))
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        cf.add_resource(
            "AWS::EC2::VPCCidrBlock",
            &self.name,
            json!({
                "VpcId": cf_link(ctx, &self.vpc, "id")?,
                "CidrBlock": self.cidr_block,
            }),
        )?;
        Ok(cf_id_output("AWS::EC2::VPCCidrBlock", &self.name))
    }
}

/// The Amazon-provided IPv6 block of a VPC
#[derive(Debug, Clone, Serialize)]
pub struct VpcAmazonIpv6CidrBlock {
    pub name: String,
    pub vpc: Link<Vpc>,
    #[serde(skip)]
    pub shared: bool,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for VpcAmazonIpv6CidrBlock {
    const KIND: &'static str = "VPCAmazonIPv6CIDRBlock";

    task_identity!();

    fn is_shared(&self) -> bool {
        self.shared
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let Some(vpc_id) = ctx.try_link_id(&self.vpc) else {
            return Ok(None);
        };
        let found = find_one(
            ctx,
            ResourceKind::VpcIpv6CidrBlock,
            &[("vpc_id", &vpc_id), ("amazon_provided", "true")],
        )
        .await?;
        Ok(found.map(|_| self.clone()))
    }

    async fn render_direct(&self, ctx: &RunContext, _actual: Option<&Self>, _changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([
            ("vpc_id", json!(ctx.link_id(&self.vpc)?)),
            ("amazon_provided", json!(true)),
        ]);
        let o = ctx.cloud.create(ResourceKind::VpcIpv6CidrBlock, attrs, Tags::new()).await?;
        Ok(id_output(o.id))
    }

    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        tf.add_resource(
            "aws_vpc_ipv6_cidr_block_association",
            &self.name,
            HclBody::new()
                .attr("vpc_id", ctx.link_id(&self.vpc)?)
                .attr("amazon_provided_ipv6_cidr_block", true),
        )?;
        Ok(id_output(TerraformTarget::reference(
            "aws_vpc_ipv6_cidr_block_association",
            &self.name,
            "id",
        )))
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        cf.add_resource(
            "AWS::EC2::VPCCidrBlock",
            &self.name,
            json!({
                "VpcId": cf_link(ctx, &self.vpc, "id")?,
                "AmazonProvidedIpv6CidrBlock": true,
            }),
        )?;
        Ok(cf_id_output("AWS::EC2::VPCCidrBlock", &self.name))
    }
}

/// A DHCP options set
#[derive(Debug, Clone, Serialize)]
pub struct DhcpOptions {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub domain_name: Option<String>,
    pub domain_name_servers: Option<String>,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(skip)]
    pub shared: bool,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for DhcpOptions {
    const KIND: &'static str = "DHCPOptions";

    task_identity!();

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn outputs(&self) -> Outputs {
        self.id.clone().map(id_output).unwrap_or_default()
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let found = find_by_id_or_name(ctx, ResourceKind::DhcpOptions, self.id.as_deref(), &self.name).await?;
        Ok(found.map(|o| DhcpOptions {
            name: self.name.clone(),
            id: Some(o.id.clone()),
            domain_name: o.attr_str("domain_name"),
            domain_name_servers: o.attr_str("domain_name_servers"),
            tags: o.tags,
            shared: self.shared,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<(), TaskError> {
        if actual.is_some() {
            changes.check_immutable(&["domain_name", "domain_name_servers"])?;
        }
        Ok(())
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([
            ("domain_name", json!(self.domain_name)),
            ("domain_name_servers", json!(self.domain_name_servers)),
        ]);
        let o = create_or_update(
            ctx,
            ResourceKind::DhcpOptions,
            actual.and_then(|a| a.id.as_deref()),
            attrs,
            &self.tags,
            changes,
        )
        .await?;
        Ok(id_output(o.id))
    }

    async fn render_terraform(&self, _ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        let servers: Option<Vec<String>> = self
            .domain_name_servers
            .as_ref()
            .map(|s| s.split(',').map(|v| v.trim().to_string()).collect());
        tf.add_resource(
            "aws_vpc_dhcp_options",
            &self.name,
            HclBody::new()
                .opt_attr("domain_name", self.domain_name.clone())
                .opt_attr("domain_name_servers", servers)
                .attr("tags", tf_tags(&self.tags)),
        )?;
        Ok(id_output(TerraformTarget::reference("aws_vpc_dhcp_options", &self.name, "id")))
    }

    async fn render_cloudformation(&self, _ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        let servers: Option<Vec<String>> = self
            .domain_name_servers
            .as_ref()
            .map(|s| s.split(',').map(|v| v.trim().to_string()).collect());
        cf.add_resource(
            "AWS::EC2::DHCPOptions",
            &self.name,
            json!({
                "DomainName": self.domain_name,
                "DomainNameServers": servers,
                "Tags": cf_tags(&self.tags),
            }),
        )?;
        Ok(cf_id_output("AWS::EC2::DHCPOptions", &self.name))
    }
}

/// Attaches a DHCP options set to a VPC
#[derive(Debug, Clone, Serialize)]
pub struct VpcDhcpOptionsAssociation {
    pub name: String,
    pub vpc: Link<Vpc>,
    pub dhcp_options: Link<DhcpOptions>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for VpcDhcpOptionsAssociation {
    const KIND: &'static str = "VPCDHCPOptionsAssociation";

    task_identity!();

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let Some(vpc_id) = ctx.try_link_id(&self.vpc) else {
            return Ok(None);
        };
        let Some(vpc) = ctx.cloud.get(ResourceKind::Vpc, &vpc_id).await? else {
            return Ok(None);
        };
        let Some(current) = vpc.attr_str("dhcp_options_id") else {
            return Ok(None);
        };
        Ok(Some(VpcDhcpOptionsAssociation {
            name: self.name.clone(),
            vpc: self.vpc.clone(),
            dhcp_options: relink(ctx, &self.dhcp_options, Some(&current)),
            lifecycle: self.lifecycle,
        }))
    }

    async fn render_direct(&self, ctx: &RunContext, _actual: Option<&Self>, _changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([("dhcp_options_id", json!(ctx.link_id(&self.dhcp_options)?))]);
        ctx.cloud.update(ResourceKind::Vpc, &ctx.link_id(&self.vpc)?, attrs).await?;
        Ok(Outputs::new())
    }

    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        tf.add_resource(
            "aws_vpc_dhcp_options_association",
            &self.name,
            HclBody::new()
                .attr("vpc_id", ctx.link_id(&self.vpc)?)
                .attr("dhcp_options_id", ctx.link_id(&self.dhcp_options)?),
        )?;
        Ok(Outputs::new())
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        cf.add_resource(
            "AWS::EC2::VPCDHCPOptionsAssociation",
            &self.name,
            json!({
                "VpcId": cf_link(ctx, &self.vpc, "id")?,
                "DhcpOptionsId": cf_link(ctx, &self.dhcp_options, "id")?,
            }),
        )?;
        Ok(Outputs::new())
    }
}
