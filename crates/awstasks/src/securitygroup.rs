//! Security groups and their rules

use cloud_client::{CloudObject, ResourceKind};
use fi::{
    Changes, CloudFormationTarget, CloudupTask, HclBody, Lifecycle, Link, Outputs, RunContext, TaskError,
    TerraformTarget,
};
use serde::Serialize;
use serde_json::{Value, json};

use crate::util::{
    Tags, attributes, cf_id_output, cf_link, cf_tags, create_or_update, find_by_id_or_name, id_output,
    opt_link_id, relink, task_identity, tf_tags,
};
use crate::vpc::Vpc;

/// Protocol value meaning every protocol
pub const PROTOCOL_ALL: &str = "-1";

/// A security group
#[derive(Debug, Clone, Serialize)]
pub struct SecurityGroup {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub vpc: Link<Vpc>,
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(skip)]
    pub shared: bool,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for SecurityGroup {
    const KIND: &'static str = "SecurityGroup";

    task_identity!();

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn outputs(&self) -> Outputs {
        self.id.clone().map(id_output).unwrap_or_default()
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let found = match (&self.id, ctx.try_link_id(&self.vpc)) {
            (None, Some(vpc_id)) => ctx
                .cloud
                .query(ResourceKind::SecurityGroup, &[("name", &self.name), ("vpc_id", &vpc_id)])
                .await?
                .into_iter()
                .next(),
            (id, _) => find_by_id_or_name(ctx, ResourceKind::SecurityGroup, id.as_deref(), &self.name).await?,
        };
        Ok(found.map(|o| SecurityGroup {
            name: self.name.clone(),
            id: Some(o.id.clone()),
            vpc: relink(ctx, &self.vpc, o.attr_str("vpc_id").as_deref()),
            description: o.attr_str("description"),
            tags: o.tags,
            shared: self.shared,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<(), TaskError> {
        if actual.is_some() {
            changes.check_immutable(&["vpc", "description"])?;
        }
        Ok(())
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([
            ("name", json!(self.name)),
            ("vpc_id", json!(ctx.link_id(&self.vpc)?)),
            ("description", json!(self.description)),
        ]);
        let o = create_or_update(
            ctx,
            ResourceKind::SecurityGroup,
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
            "aws_security_group",
            &self.name,
            HclBody::new()
                .attr("name", self.name.clone())
                .attr("vpc_id", ctx.link_id(&self.vpc)?)
                .opt_attr("description", self.description.clone())
                .attr("tags", tf_tags(&self.tags)),
        )?;
        Ok(id_output(TerraformTarget::reference("aws_security_group", &self.name, "id")))
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        cf.add_resource(
            "AWS::EC2::SecurityGroup",
            &self.name,
            json!({
                "GroupName": self.name,
                "VpcId": cf_link(ctx, &self.vpc, "id")?,
                "GroupDescription": self.description,
                "Tags": cf_tags(&self.tags),
            }),
        )?;
        Ok(cf_id_output("AWS::EC2::SecurityGroup", &self.name))
    }
}

/// An ingress or egress rule
///
/// Rules are never changed in place: a rule whose match fields differ is a
/// different rule.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityGroupRule {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub security_group: Link<SecurityGroup>,
    pub egress: bool,
    /// `tcp`, `udp`, `icmp`, `icmpv6`, a protocol number, or `None` for all
    pub protocol: Option<String>,
    pub from_port: Option<i64>,
    pub to_port: Option<i64>,
    pub cidr: Option<String>,
    pub ipv6_cidr: Option<String>,
    pub source_group: Option<Link<SecurityGroup>>,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl SecurityGroupRule {
    fn protocol_value(&self) -> &str {
        self.protocol.as_deref().unwrap_or(PROTOCOL_ALL)
    }

    fn ports(&self) -> (i64, i64) {
        (self.from_port.unwrap_or(0), self.to_port.unwrap_or(0))
    }

    fn matches(&self, o: &CloudObject, source_id: Option<&str>) -> bool {
        o.attr_str("protocol").as_deref() == Some(self.protocol_value())
            && (o.attr_i64("from_port").unwrap_or(0), o.attr_i64("to_port").unwrap_or(0)) == self.ports()
            && o.attr_str("cidr_ipv4") == self.cidr
            && o.attr_str("cidr_ipv6") == self.ipv6_cidr
            && o.attr_str("referenced_group_id").as_deref() == source_id
    }

    fn direction(&self) -> &'static str {
        if self.egress { "egress" } else { "ingress" }
    }
}

#[async_trait::async_trait]
impl CloudupTask for SecurityGroupRule {
    const KIND: &'static str = "SecurityGroupRule";

    task_identity!();

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let Some(group_id) = ctx.try_link_id(&self.security_group) else {
            return Ok(None);
        };
        let source_id = match &self.source_group {
            Some(link) => match ctx.try_link_id(link) {
                Some(id) => Some(id),
                None => return Ok(None),
            },
            None => None,
        };
        let egress = self.egress.to_string();
        let candidates = ctx
            .cloud
            .query(
                ResourceKind::SecurityGroupRule,
                &[("security_group_id", &group_id), ("egress", &egress)],
            )
            .await?;
        let found = candidates.into_iter().find(|o| self.matches(o, source_id.as_deref()));
        Ok(found.map(|o| SecurityGroupRule {
            id: Some(o.id.clone()),
            tags: o.tags,
            ..self.clone()
        }))
    }

    fn check_changes(&self, _actual: Option<&Self>, _changes: &Changes) -> Result<(), TaskError> {
        let sources = [self.cidr.is_some(), self.ipv6_cidr.is_some(), self.source_group.is_some()];
        if sources.into_iter().filter(|s| *s).count() != 1 {
            return Err(TaskError::Invalid(format!(
                "security group rule {} needs exactly one of cidr, ipv6 cidr or source group",
                self.name
            )));
        }
        Ok(())
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let (from, to) = self.ports();
        let attrs = attributes([
            ("security_group_id", json!(ctx.link_id(&self.security_group)?)),
            ("egress", json!(self.egress)),
            ("protocol", json!(self.protocol_value())),
            ("from_port", json!(from)),
            ("to_port", json!(to)),
            ("cidr_ipv4", json!(self.cidr)),
            ("cidr_ipv6", json!(self.ipv6_cidr)),
            ("referenced_group_id", json!(opt_link_id(ctx, self.source_group.as_ref())?)),
        ]);
        let o = create_or_update(
            ctx,
            ResourceKind::SecurityGroupRule,
            actual.and_then(|a| a.id.as_deref()),
            attrs,
            &self.tags,
            changes,
        )
        .await?;
        Ok(id_output(o.id))
    }

    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        let (from, to) = self.ports();
        tf.add_resource(
            "aws_security_group_rule",
            &self.name,
            HclBody::new()
                .attr("type", self.direction())
                .attr("security_group_id", ctx.link_id(&self.security_group)?)
                .attr("protocol", self.protocol_value())
                .attr("from_port", from)
                .attr("to_port", to)
                .opt_attr("cidr_blocks", self.cidr.clone().map(|c| vec![c]))
                .opt_attr("ipv6_cidr_blocks", self.ipv6_cidr.clone().map(|c| vec![c]))
                .opt_attr("source_security_group_id", opt_link_id(ctx, self.source_group.as_ref())?),
        )?;
        Ok(Outputs::new())
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        let (from, to) = self.ports();
        let source = self
            .source_group
            .as_ref()
            .map(|l| cf_link(ctx, l, "id"))
            .transpose()?;
        let (resource_type, peer_key) = if self.egress {
            ("AWS::EC2::SecurityGroupEgress", "DestinationSecurityGroupId")
        } else {
            ("AWS::EC2::SecurityGroupIngress", "SourceSecurityGroupId")
        };
        let mut properties = json!({
            "GroupId": cf_link(ctx, &self.security_group, "id")?,
            "IpProtocol": self.protocol_value(),
            "FromPort": from,
            "ToPort": to,
            "CidrIp": self.cidr,
            "CidrIpv6": self.ipv6_cidr,
        });
        if let (Some(source), Value::Object(map)) = (source, &mut properties) {
            map.insert(peer_key.to_string(), source);
        }
        cf.add_resource(resource_type, &self.name, properties)?;
        Ok(Outputs::new())
    }
}
