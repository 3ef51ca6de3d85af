//! Route53 hosted zones and alias records

use cloud_client::ResourceKind;
use fi::{Changes, CloudFormationTarget, CloudupTask, HclBody, Lifecycle, Link, Outputs, RunContext, TaskError, TerraformTarget};
use serde::Serialize;
use serde_json::{Value, json};

use crate::loadbalancer::{ClassicLoadBalancer, NetworkLoadBalancer};
use crate::util::{Tags, attributes, cf_id_output, cf_link, create_or_update, find_one, id_output, opt_link_id, task_identity};
use crate::vpc::Vpc;

fn trim_dot(name: &str) -> &str {
    name.trim_end_matches('.')
}

/// A Route53 hosted zone
///
/// A zone with a known `zone_id` already exists and is used as is.
#[derive(Debug, Clone, Serialize)]
pub struct DnsZone {
    pub name: String,
    pub dns_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    pub private: bool,
    pub private_vpc: Option<Link<Vpc>>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for DnsZone {
    const KIND: &'static str = "DNSZone";

    task_identity!();

    fn is_shared(&self) -> bool {
        self.zone_id.is_some()
    }

    fn outputs(&self) -> Outputs {
        self.zone_id.clone().map(id_output).unwrap_or_default()
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let found = match &self.zone_id {
            Some(id) => ctx.cloud.get(ResourceKind::HostedZone, id).await?,
            None => {
                let dns_name = trim_dot(&self.dns_name);
                let private = self.private.to_string();
                let mut filters = vec![("name", dns_name), ("private_zone", private.as_str())];
                let vpc_id = self.private_vpc.as_ref().and_then(|l| ctx.try_link_id(l));
                if let Some(vpc_id) = &vpc_id {
                    filters.push(("vpc_id", vpc_id));
                }
                find_one(ctx, ResourceKind::HostedZone, &filters).await?
            }
        };
        Ok(found.map(|o| DnsZone {
            name: self.name.clone(),
            dns_name: o.attr_str("name").unwrap_or_default(),
            zone_id: Some(o.id.clone()),
            private: o.attr_bool("private_zone").unwrap_or(false),
            private_vpc: self.private_vpc.clone(),
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, _actual: Option<&Self>, changes: &Changes) -> Result<(), TaskError> {
        changes.check_immutable(&["dns_name", "private"])?;
        if self.private && self.private_vpc.is_none() {
            return Err(TaskError::Invalid(format!("private zone {} needs a VPC", self.dns_name)));
        }
        Ok(())
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([
            ("name", json!(trim_dot(&self.dns_name))),
            ("private_zone", json!(self.private)),
            ("vpc_id", json!(opt_link_id(ctx, self.private_vpc.as_ref())?)),
        ]);
        let o = create_or_update(
            ctx,
            ResourceKind::HostedZone,
            actual.and_then(|a| a.zone_id.as_deref()),
            attrs,
            &Tags::new(),
            changes,
        )
        .await?;
        Ok(id_output(o.id))
    }

    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        let mut body = HclBody::new().attr("name", trim_dot(&self.dns_name).to_string());
        if let Some(vpc) = &self.private_vpc {
            body = body.block("vpc", HclBody::new().attr("vpc_id", ctx.link_id(vpc)?));
        }
        tf.add_resource("aws_route53_zone", &self.name, body)?;
        Ok(id_output(TerraformTarget::reference("aws_route53_zone", &self.name, "zone_id")))
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        const TYPE: &str = "AWS::Route53::HostedZone";
        let vpcs = match &self.private_vpc {
            Some(vpc) => json!([{ "VPCId": cf_link(ctx, vpc, "id")?, "VPCRegion": ctx.cloud.region() }]),
            None => Value::Null,
        };
        cf.add_resource(
            TYPE,
            &self.name,
            json!({
                "Name": trim_dot(&self.dns_name),
                "VPCs": vpcs,
            }),
        )?;
        Ok(cf_id_output(TYPE, &self.name))
    }
}

/// Load balancer an alias record resolves to
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasTarget {
    ClassicLoadBalancer(Link<ClassicLoadBalancer>),
    NetworkLoadBalancer(Link<NetworkLoadBalancer>),
}

impl AliasTarget {
    fn output(&self, ctx: &RunContext, attribute: &str) -> Result<String, TaskError> {
        match self {
            AliasTarget::ClassicLoadBalancer(link) => ctx.link_output(link, attribute),
            AliasTarget::NetworkLoadBalancer(link) => ctx.link_output(link, attribute),
        }
    }
}

/// An alias record in a hosted zone
#[derive(Debug, Clone, Serialize)]
pub struct DnsName {
    pub name: String,
    pub zone: Link<DnsZone>,
    pub record_type: String,
    pub target: AliasTarget,
    /// DNS name of the target, filled in from its outputs
    pub alias_dns_name: Option<String>,
    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl DnsName {
    pub fn alias(name: impl Into<String>, zone: Link<DnsZone>, target: AliasTarget) -> Self {
        Self {
            name: name.into(),
            zone,
            record_type: "A".to_string(),
            target,
            alias_dns_name: None,
            id: None,
            lifecycle: Lifecycle::Sync,
        }
    }
}

#[async_trait::async_trait]
impl CloudupTask for DnsName {
    const KIND: &'static str = "DNSName";

    task_identity!();

    async fn normalize(&self, ctx: &RunContext) -> Result<Self, TaskError> {
        Ok(DnsName {
            alias_dns_name: Some(self.target.output(ctx, "dns_name")?),
            ..self.clone()
        })
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let Some(zone_id) = ctx.try_link_id(&self.zone) else {
            return Ok(None);
        };
        let found = find_one(
            ctx,
            ResourceKind::ResourceRecordSet,
            &[
                ("hosted_zone_id", &zone_id),
                ("name", trim_dot(&self.name)),
                ("type", &self.record_type),
            ],
        )
        .await?;
        Ok(found.map(|o| DnsName {
            name: self.name.clone(),
            zone: self.zone.clone(),
            record_type: self.record_type.clone(),
            target: self.target.clone(),
            alias_dns_name: o.attr_str("alias_dns_name"),
            id: Some(o.id.clone()),
            lifecycle: self.lifecycle,
        }))
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([
            ("hosted_zone_id", json!(ctx.link_id(&self.zone)?)),
            ("name", json!(trim_dot(&self.name))),
            ("type", json!(self.record_type)),
            ("alias_dns_name", json!(self.target.output(ctx, "dns_name")?)),
            ("alias_hosted_zone_id", json!(self.target.output(ctx, "hosted_zone_id")?)),
        ]);
        create_or_update(
            ctx,
            ResourceKind::ResourceRecordSet,
            actual.and_then(|a| a.id.as_deref()),
            attrs,
            &Tags::new(),
            changes,
        )
        .await?;
        Ok(Outputs::new())
    }

    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        tf.add_resource(
            "aws_route53_record",
            &self.name,
            HclBody::new()
                .attr("name", trim_dot(&self.name).to_string())
                .attr("type", self.record_type.clone())
                .attr("zone_id", ctx.link_id(&self.zone)?)
                .block(
                    "alias",
                    HclBody::new()
                        .attr("name", self.target.output(ctx, "dns_name")?)
                        .attr("zone_id", self.target.output(ctx, "hosted_zone_id")?)
                        .attr("evaluate_target_health", false),
                ),
        )?;
        Ok(Outputs::new())
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        cf.add_resource(
            "AWS::Route53::RecordSet",
            &self.name,
            json!({
                "Name": trim_dot(&self.name),
                "Type": self.record_type,
                "HostedZoneId": cf_link(ctx, &self.zone, "id")?,
                "AliasTarget": {
                    "DNSName": CloudFormationTarget::value_of(&self.target.output(ctx, "dns_name")?),
                    "HostedZoneId": CloudFormationTarget::value_of(&self.target.output(ctx, "hosted_zone_id")?),
                    "EvaluateTargetHealth": false,
                },
            }),
        )?;
        Ok(Outputs::new())
    }
}
