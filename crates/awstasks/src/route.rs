//! Route tables, their subnet associations and routes

use cloud_client::ResourceKind;
use fi::{
    Changes, CloudFormationTarget, CloudupTask, HclBody, Lifecycle, Link, Outputs, RunContext, TaskError,
    TerraformTarget,
};
use serde::Serialize;
use serde_json::json;

use crate::gateway::{EgressOnlyInternetGateway, InternetGateway, NatGateway};
use crate::subnet::Subnet;
use crate::util::{
    Tags, attributes, cf_id_output, cf_link, cf_tags, create_or_update, find_by_id_or_name, find_one, id_output,
    opt_link_id, relink, relink_opt, task_identity, tf_tags,
};
use crate::vpc::Vpc;

/// A route table
#[derive(Debug, Clone, Serialize)]
pub struct RouteTable {
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
impl CloudupTask for RouteTable {
    const KIND: &'static str = "RouteTable";

    task_identity!();

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn outputs(&self) -> Outputs {
        self.id.clone().map(id_output).unwrap_or_default()
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let found = find_by_id_or_name(ctx, ResourceKind::RouteTable, self.id.as_deref(), &self.name).await?;
        Ok(found.map(|o| RouteTable {
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
            ResourceKind::RouteTable,
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
            "aws_route_table",
            &self.name,
            HclBody::new()
                .attr("vpc_id", ctx.link_id(&self.vpc)?)
                .attr("tags", tf_tags(&self.tags)),
        )?;
        Ok(id_output(TerraformTarget::reference("aws_route_table", &self.name, "id")))
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        cf.add_resource(
            "AWS::EC2::RouteTable",
            &self.name,
            json!({
                "VpcId": cf_link(ctx, &self.vpc, "id")?,
                "Tags": cf_tags(&self.tags),
            }),
        )?;
        Ok(cf_id_output("AWS::EC2::RouteTable", &self.name))
    }
}

/// Associates a subnet with a route table
#[derive(Debug, Clone, Serialize)]
pub struct RouteTableAssociation {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub route_table: Link<RouteTable>,
    pub subnet: Link<Subnet>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for RouteTableAssociation {
    const KIND: &'static str = "RouteTableAssociation";

    task_identity!();

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let Some(subnet_id) = ctx.try_link_id(&self.subnet) else {
            return Ok(None);
        };
        let found = find_one(ctx, ResourceKind::RouteTableAssociation, &[("subnet_id", &subnet_id)]).await?;
        Ok(found.map(|o| RouteTableAssociation {
            name: self.name.clone(),
            id: Some(o.id.clone()),
            route_table: relink(ctx, &self.route_table, o.attr_str("route_table_id").as_deref()),
            subnet: self.subnet.clone(),
            lifecycle: self.lifecycle,
        }))
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([
            ("route_table_id", json!(ctx.link_id(&self.route_table)?)),
            ("subnet_id", json!(ctx.link_id(&self.subnet)?)),
        ]);
        let o = create_or_update(
            ctx,
            ResourceKind::RouteTableAssociation,
            actual.and_then(|a| a.id.as_deref()),
            attrs,
            &Tags::new(),
            changes,
        )
        .await?;
        Ok(id_output(o.id))
    }

    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        tf.add_resource(
            "aws_route_table_association",
            &self.name,
            HclBody::new()
                .attr("route_table_id", ctx.link_id(&self.route_table)?)
                .attr("subnet_id", ctx.link_id(&self.subnet)?),
        )?;
        Ok(Outputs::new())
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        cf.add_resource(
            "AWS::EC2::SubnetRouteTableAssociation",
            &self.name,
            json!({
                "RouteTableId": cf_link(ctx, &self.route_table, "id")?,
                "SubnetId": cf_link(ctx, &self.subnet, "id")?,
            }),
        )?;
        Ok(Outputs::new())
    }
}

/// A route in a route table
///
/// Exactly one target is set: a gateway task, or a transit gateway, instance
/// or peering connection id.
#[derive(Debug, Clone, Serialize)]
pub struct Route {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub route_table: Link<RouteTable>,
    pub cidr: Option<String>,
    pub ipv6_cidr: Option<String>,
    pub internet_gateway: Option<Link<InternetGateway>>,
    pub egress_only_internet_gateway: Option<Link<EgressOnlyInternetGateway>>,
    pub nat_gateway: Option<Link<NatGateway>>,
    pub transit_gateway_id: Option<String>,
    pub instance_id: Option<String>,
    pub vpc_peering_connection_id: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl Route {
    fn target_count(&self) -> usize {
        [
            self.internet_gateway.is_some(),
            self.egress_only_internet_gateway.is_some(),
            self.nat_gateway.is_some(),
            self.transit_gateway_id.is_some(),
            self.instance_id.is_some(),
            self.vpc_peering_connection_id.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    fn destination(&self) -> Result<(&'static str, &str), TaskError> {
        match (&self.cidr, &self.ipv6_cidr) {
            (Some(cidr), None) => Ok(("destination_cidr_block", cidr)),
            (None, Some(cidr)) => Ok(("destination_ipv6_cidr_block", cidr)),
            _ => Err(TaskError::Invalid(format!(
                "route {} needs exactly one of an IPv4 or IPv6 destination",
                self.name
            ))),
        }
    }
}

#[async_trait::async_trait]
impl CloudupTask for Route {
    const KIND: &'static str = "Route";

    task_identity!();

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let Some(table_id) = ctx.try_link_id(&self.route_table) else {
            return Ok(None);
        };
        let (field, destination) = self.destination()?;
        let found = find_one(ctx, ResourceKind::Route, &[("route_table_id", &table_id), (field, destination)]).await?;
        Ok(found.map(|o| Route {
            name: self.name.clone(),
            id: Some(o.id.clone()),
            route_table: self.route_table.clone(),
            cidr: o.attr_str("destination_cidr_block"),
            ipv6_cidr: o.attr_str("destination_ipv6_cidr_block"),
            internet_gateway: relink_opt(ctx, self.internet_gateway.as_ref(), o.attr_str("gateway_id").as_deref()),
            egress_only_internet_gateway: relink_opt(
                ctx,
                self.egress_only_internet_gateway.as_ref(),
                o.attr_str("egress_only_gateway_id").as_deref(),
            ),
            nat_gateway: relink_opt(ctx, self.nat_gateway.as_ref(), o.attr_str("nat_gateway_id").as_deref()),
            transit_gateway_id: o.attr_str("transit_gateway_id"),
            instance_id: o.attr_str("instance_id"),
            vpc_peering_connection_id: o.attr_str("vpc_peering_connection_id"),
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, _actual: Option<&Self>, _changes: &Changes) -> Result<(), TaskError> {
        self.destination()?;
        if self.target_count() != 1 {
            return Err(TaskError::Invalid(format!("route {} needs exactly one target", self.name)));
        }
        Ok(())
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let (field, destination) = self.destination()?;
        // Replacing a route clears the previous target.
        let attrs = attributes([
            ("route_table_id", json!(ctx.link_id(&self.route_table)?)),
            (field, json!(destination)),
            ("gateway_id", json!(opt_link_id(ctx, self.internet_gateway.as_ref())?)),
            (
                "egress_only_gateway_id",
                json!(opt_link_id(ctx, self.egress_only_internet_gateway.as_ref())?),
            ),
            ("nat_gateway_id", json!(opt_link_id(ctx, self.nat_gateway.as_ref())?)),
            ("transit_gateway_id", json!(self.transit_gateway_id)),
            ("instance_id", json!(self.instance_id)),
            ("vpc_peering_connection_id", json!(self.vpc_peering_connection_id)),
        ]);
        match actual.and_then(|a| a.id.as_deref()) {
            Some(id) => {
                let mut cleared = attrs.clone();
                for key in [
                    "gateway_id",
                    "egress_only_gateway_id",
                    "nat_gateway_id",
                    "transit_gateway_id",
                    "instance_id",
                    "vpc_peering_connection_id",
                ] {
                    cleared.entry(key).or_insert(serde_json::Value::Null);
                }
                ctx.cloud.update(ResourceKind::Route, id, cleared).await?;
                Ok(id_output(id))
            }
            None => {
                let o = create_or_update(ctx, ResourceKind::Route, None, attrs, &Tags::new(), changes).await?;
                Ok(id_output(o.id))
            }
        }
    }

    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        tf.add_resource(
            "aws_route",
            &self.name,
            HclBody::new()
                .attr("route_table_id", ctx.link_id(&self.route_table)?)
                .opt_attr("destination_cidr_block", self.cidr.clone())
                .opt_attr("destination_ipv6_cidr_block", self.ipv6_cidr.clone())
                .opt_attr("gateway_id", opt_link_id(ctx, self.internet_gateway.as_ref())?)
                .opt_attr(
                    "egress_only_gateway_id",
                    opt_link_id(ctx, self.egress_only_internet_gateway.as_ref())?,
                )
                .opt_attr("nat_gateway_id", opt_link_id(ctx, self.nat_gateway.as_ref())?)
                .opt_attr("transit_gateway_id", self.transit_gateway_id.clone())
                .opt_attr("instance_id", self.instance_id.clone())
                .opt_attr("vpc_peering_connection_id", self.vpc_peering_connection_id.clone()),
        )?;
        Ok(Outputs::new())
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        let link = |l: Option<&Link<InternetGateway>>| l.map(|l| cf_link(ctx, l, "id")).transpose();
        cf.add_resource(
            "AWS::EC2::Route",
            &self.name,
            json!({
                "RouteTableId": cf_link(ctx, &self.route_table, "id")?,
                "DestinationCidrBlock": self.cidr,
                "DestinationIpv6CidrBlock": self.ipv6_cidr,
                "GatewayId": link(self.internet_gateway.as_ref())?,
                "EgressOnlyInternetGatewayId": self
                    .egress_only_internet_gateway
                    .as_ref()
                    .map(|l| cf_link(ctx, l, "id"))
                    .transpose()?,
                "NatGatewayId": self.nat_gateway.as_ref().map(|l| cf_link(ctx, l, "id")).transpose()?,
                "TransitGatewayId": self.transit_gateway_id,
                "InstanceId": self.instance_id,
                "VpcPeeringConnectionId": self.vpc_peering_connection_id,
            }),
        )?;
        Ok(Outputs::new())
    }
}
