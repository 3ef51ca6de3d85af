//! Classic and network load balancers and target groups

use std::collections::BTreeMap;

use cloud_client::ResourceKind;
use fi::{
    Changes, CloudFormationTarget, CloudupTask, HclBody, Lifecycle, Link, Outputs, RunContext, TaskError, TaskKey,
    TerraformTarget,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::securitygroup::SecurityGroup;
use crate::subnet::Subnet;
use crate::util::{
    Tags, attributes, cf_link, cf_links, cf_tags, create_or_update, find_one, is_placeholder, link_ids, relink,
    relink_all, task_identity, tf_tags,
};
use crate::vpc::Vpc;

/// A listener of a classic load balancer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassicListener {
    pub instance_port: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_certificate_id: Option<String>,
}

impl ClassicListener {
    fn protocol(&self) -> &'static str {
        if self.ssl_certificate_id.is_some() { "SSL" } else { "TCP" }
    }
}

/// Health check of a classic load balancer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassicHealthCheck {
    /// `TCP:443`, `SSL:443`, ...
    pub target: String,
    pub healthy_threshold: i64,
    pub unhealthy_threshold: i64,
    pub interval: i64,
    pub timeout: i64,
}

/// Addresses recorded in `output`, skipping render-time references
fn rendered_addresses(ctx: &RunContext, key: &TaskKey, output: &str) -> Vec<String> {
    ctx.outputs
        .get(key, output)
        .filter(|v| !is_placeholder(v))
        .into_iter()
        .collect()
}

/// A classic ELB
#[derive(Debug, Clone, Serialize)]
pub struct ClassicLoadBalancer {
    pub name: String,
    /// Name of the load balancer itself, at most 32 characters
    pub load_balancer_name: String,
    pub subnets: Vec<Link<Subnet>>,
    pub security_groups: Vec<Link<SecurityGroup>>,
    /// Listeners keyed by load balancer port
    pub listeners: BTreeMap<String, ClassicListener>,
    pub scheme: Option<String>,
    pub health_check: Option<ClassicHealthCheck>,
    pub idle_timeout: Option<i64>,
    pub connection_draining_timeout: Option<i64>,
    pub cross_zone_load_balancing: Option<bool>,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(skip)]
    pub dns_name: Option<String>,
    #[serde(skip)]
    pub hosted_zone_id: Option<String>,
    /// Addresses of this load balancer are API server endpoints
    #[serde(skip)]
    pub for_api_server: bool,
    #[serde(skip)]
    pub shared: bool,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for ClassicLoadBalancer {
    const KIND: &'static str = "ClassicLoadBalancer";

    task_identity!();

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn has_address(&self) -> bool {
        true
    }

    fn is_for_api_server(&self) -> bool {
        self.for_api_server
    }

    async fn find_addresses(&self, ctx: &RunContext) -> Result<Vec<String>, TaskError> {
        Ok(rendered_addresses(ctx, &TaskKey::new(Self::KIND, &self.name), "dns_name"))
    }

    fn outputs(&self) -> Outputs {
        let mut outputs = Outputs::from([("id".to_string(), self.load_balancer_name.clone())]);
        if let Some(dns) = &self.dns_name {
            outputs.insert("dns_name".to_string(), dns.clone());
        }
        if let Some(zone) = &self.hosted_zone_id {
            outputs.insert("hosted_zone_id".to_string(), zone.clone());
        }
        outputs
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let Some(o) = ctx
            .cloud
            .get(ResourceKind::ClassicLoadBalancer, &self.load_balancer_name)
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(ClassicLoadBalancer {
            name: self.name.clone(),
            load_balancer_name: o.id.clone(),
            subnets: relink_all(ctx, &self.subnets, &o.attr_strings("subnet_ids")),
            security_groups: relink_all(ctx, &self.security_groups, &o.attr_strings("security_group_ids")),
            listeners: o.attr("listeners").unwrap_or_default(),
            scheme: o.attr_str("scheme"),
            health_check: o.attr("health_check"),
            idle_timeout: o.attr_i64("idle_timeout"),
            connection_draining_timeout: o.attr_i64("connection_draining_timeout"),
            cross_zone_load_balancing: o.attr_bool("cross_zone_load_balancing"),
            dns_name: o.attr_str("dns_name"),
            hosted_zone_id: o.attr_str("hosted_zone_id"),
            tags: o.tags,
            for_api_server: self.for_api_server,
            shared: self.shared,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<(), TaskError> {
        if actual.is_some() {
            changes.check_immutable(&["scheme"])?;
        }
        if self.load_balancer_name.len() > 32 {
            return Err(TaskError::Invalid(format!(
                "load balancer name {} is longer than 32 characters",
                self.load_balancer_name
            )));
        }
        Ok(())
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([
            ("name", json!(self.load_balancer_name)),
            ("subnet_ids", json!(link_ids(ctx, &self.subnets)?)),
            ("security_group_ids", json!(link_ids(ctx, &self.security_groups)?)),
            ("listeners", serde_json::to_value(&self.listeners)?),
            ("scheme", json!(self.scheme)),
            ("health_check", serde_json::to_value(&self.health_check)?),
            ("idle_timeout", json!(self.idle_timeout)),
            ("connection_draining_timeout", json!(self.connection_draining_timeout)),
            ("cross_zone_load_balancing", json!(self.cross_zone_load_balancing)),
        ]);
        let o = create_or_update(
            ctx,
            ResourceKind::ClassicLoadBalancer,
            actual.map(|a| a.load_balancer_name.as_str()),
            attrs,
            &self.tags,
            changes,
        )
        .await?;
        let mut outputs = Outputs::from([("id".to_string(), o.id.clone())]);
        for key in ["dns_name", "hosted_zone_id"] {
            if let Some(v) = o.attr_str(key) {
                outputs.insert(key.to_string(), v);
            }
        }
        Ok(outputs)
    }

    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        let mut body = HclBody::new()
            .attr("name", self.load_balancer_name.clone())
            .attr("subnets", link_ids(ctx, &self.subnets)?)
            .attr("security_groups", link_ids(ctx, &self.security_groups)?);
        for (port, listener) in &self.listeners {
            let lb_port: i64 = port
                .parse()
                .map_err(|_| TaskError::Invalid(format!("listener port {port} is not a number")))?;
            body = body.block(
                "listener",
                HclBody::new()
                    .attr("instance_port", listener.instance_port)
                    .attr("instance_protocol", listener.protocol())
                    .attr("lb_port", lb_port)
                    .attr("lb_protocol", listener.protocol())
                    .opt_attr("ssl_certificate_id", listener.ssl_certificate_id.clone()),
            );
        }
        if let Some(hc) = &self.health_check {
            body = body.block(
                "health_check",
                HclBody::new()
                    .attr("target", hc.target.clone())
                    .attr("healthy_threshold", hc.healthy_threshold)
                    .attr("unhealthy_threshold", hc.unhealthy_threshold)
                    .attr("interval", hc.interval)
                    .attr("timeout", hc.timeout),
            );
        }
        body = body
            .opt_attr("idle_timeout", self.idle_timeout)
            .opt_attr("connection_draining", self.connection_draining_timeout.map(|_| true))
            .opt_attr("connection_draining_timeout", self.connection_draining_timeout)
            .opt_attr("cross_zone_load_balancing", self.cross_zone_load_balancing)
            .opt_attr("internal", self.scheme.as_deref().map(|s| s == "internal"))
            .attr("tags", tf_tags(&self.tags));
        tf.add_resource("aws_elb", &self.name, body)?;
        Ok(Outputs::from([
            ("id".to_string(), TerraformTarget::reference("aws_elb", &self.name, "id")),
            ("dns_name".to_string(), TerraformTarget::reference("aws_elb", &self.name, "dns_name")),
            ("hosted_zone_id".to_string(), TerraformTarget::reference("aws_elb", &self.name, "zone_id")),
        ]))
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        const TYPE: &str = "AWS::ElasticLoadBalancing::LoadBalancer";
        let listeners: Vec<Value> = self
            .listeners
            .iter()
            .map(|(port, l)| {
                json!({
                    "InstancePort": l.instance_port.to_string(),
                    "InstanceProtocol": l.protocol(),
                    "LoadBalancerPort": port,
                    "Protocol": l.protocol(),
                    "SSLCertificateId": l.ssl_certificate_id,
                })
            })
            .collect();
        let health_check = self.health_check.as_ref().map(|hc| {
            json!({
                "Target": hc.target,
                "HealthyThreshold": hc.healthy_threshold.to_string(),
                "UnhealthyThreshold": hc.unhealthy_threshold.to_string(),
                "Interval": hc.interval.to_string(),
                "Timeout": hc.timeout.to_string(),
            })
        });
        cf.add_resource(
            TYPE,
            &self.name,
            json!({
                "LoadBalancerName": self.load_balancer_name,
                "Subnets": cf_links(ctx, &self.subnets)?,
                "SecurityGroups": cf_links(ctx, &self.security_groups)?,
                "Listeners": listeners,
                "HealthCheck": health_check,
                "ConnectionSettings": self.idle_timeout.map(|t| json!({ "IdleTimeout": t })),
                "ConnectionDrainingPolicy": self
                    .connection_draining_timeout
                    .map(|t| json!({ "Enabled": true, "Timeout": t })),
                "CrossZone": self.cross_zone_load_balancing,
                "Scheme": self.scheme,
                "Tags": cf_tags(&self.tags),
            }),
        )?;
        Ok(Outputs::from([
            ("id".to_string(), CloudFormationTarget::ref_output(TYPE, &self.name)),
            (
                "dns_name".to_string(),
                CloudFormationTarget::get_att_output(TYPE, &self.name, "DNSName"),
            ),
            (
                "hosted_zone_id".to_string(),
                CloudFormationTarget::get_att_output(TYPE, &self.name, "CanonicalHostedZoneNameID"),
            ),
        ]))
    }
}

/// A target group for a network load balancer
#[derive(Debug, Clone, Serialize)]
pub struct TargetGroup {
    pub name: String,
    /// ARN, known for existing groups
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    /// Name of the group itself, at most 32 characters
    pub target_group_name: Option<String>,
    pub vpc: Option<Link<Vpc>>,
    pub protocol: Option<String>,
    pub port: Option<i64>,
    pub healthy_threshold: Option<i64>,
    pub unhealthy_threshold: Option<i64>,
    pub interval: Option<i64>,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(skip)]
    pub shared: bool,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl TargetGroup {
    fn arn_outputs(arn: impl Into<String>) -> Outputs {
        let arn = arn.into();
        Outputs::from([("id".to_string(), arn.clone()), ("arn".to_string(), arn)])
    }
}

#[async_trait::async_trait]
impl CloudupTask for TargetGroup {
    const KIND: &'static str = "TargetGroup";

    task_identity!();

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn outputs(&self) -> Outputs {
        self.arn.clone().map(Self::arn_outputs).unwrap_or_default()
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let found = match (&self.arn, &self.target_group_name) {
            (Some(arn), _) => find_one(ctx, ResourceKind::TargetGroup, &[("arn", arn)]).await?,
            (None, Some(name)) => find_one(ctx, ResourceKind::TargetGroup, &[("name", name)]).await?,
            (None, None) => None,
        };
        Ok(found.map(|o| TargetGroup {
            name: self.name.clone(),
            arn: o.attr_str("arn"),
            target_group_name: o.attr_str("name"),
            vpc: self
                .vpc
                .as_ref()
                .map(|v| relink(ctx, v, o.attr_str("vpc_id").as_deref())),
            protocol: o.attr_str("protocol"),
            port: o.attr_i64("port"),
            healthy_threshold: o.attr_i64("healthy_threshold"),
            unhealthy_threshold: o.attr_i64("unhealthy_threshold"),
            interval: o.attr_i64("interval"),
            tags: o.tags,
            shared: self.shared,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<(), TaskError> {
        if actual.is_some() {
            changes.check_immutable(&["target_group_name", "vpc", "protocol", "port"])?;
        }
        Ok(())
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let vpc_id = self.vpc.as_ref().map(|v| ctx.link_id(v)).transpose()?;
        let attrs = attributes([
            ("name", json!(self.target_group_name)),
            ("vpc_id", json!(vpc_id)),
            ("protocol", json!(self.protocol)),
            ("port", json!(self.port)),
            ("healthy_threshold", json!(self.healthy_threshold)),
            ("unhealthy_threshold", json!(self.unhealthy_threshold)),
            ("interval", json!(self.interval)),
        ]);
        let existing = match actual {
            Some(a) => find_one(ctx, ResourceKind::TargetGroup, &[("arn", a.arn.as_deref().unwrap_or_default())])
                .await?
                .map(|o| o.id),
            None => None,
        };
        let o = create_or_update(ctx, ResourceKind::TargetGroup, existing.as_deref(), attrs, &self.tags, changes).await?;
        let arn = o
            .attr_str("arn")
            .ok_or_else(|| TaskError::NotFound(format!("ARN of target group {}", self.name)))?;
        Ok(Self::arn_outputs(arn))
    }

    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        let vpc_id = self.vpc.as_ref().map(|v| ctx.link_id(v)).transpose()?;
        tf.add_resource(
            "aws_lb_target_group",
            &self.name,
            HclBody::new()
                .opt_attr("name", self.target_group_name.clone())
                .opt_attr("port", self.port)
                .opt_attr("protocol", self.protocol.clone())
                .opt_attr("vpc_id", vpc_id)
                .block(
                    "health_check",
                    HclBody::new()
                        .opt_attr("healthy_threshold", self.healthy_threshold)
                        .opt_attr("unhealthy_threshold", self.unhealthy_threshold)
                        .opt_attr("interval", self.interval)
                        .opt_attr("protocol", self.protocol.clone()),
                )
                .attr("tags", tf_tags(&self.tags)),
        )?;
        Ok(Self::arn_outputs(TerraformTarget::reference("aws_lb_target_group", &self.name, "id")))
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        const TYPE: &str = "AWS::ElasticLoadBalancingV2::TargetGroup";
        let vpc = self.vpc.as_ref().map(|v| cf_link(ctx, v, "id")).transpose()?;
        cf.add_resource(
            TYPE,
            &self.name,
            json!({
                "Name": self.target_group_name,
                "Port": self.port,
                "Protocol": self.protocol,
                "VpcId": vpc,
                "HealthyThresholdCount": self.healthy_threshold,
                "UnhealthyThresholdCount": self.unhealthy_threshold,
                "HealthCheckIntervalSeconds": self.interval,
                "Tags": cf_tags(&self.tags),
            }),
        )?;
        Ok(Self::arn_outputs(CloudFormationTarget::ref_output(TYPE, &self.name)))
    }
}

/// A listener of a network load balancer, forwarding to one target group
#[derive(Debug, Clone, Serialize)]
pub struct NetworkListener {
    pub port: i64,
    pub target_group: Link<TargetGroup>,
    pub ssl_certificate_id: Option<String>,
}

impl NetworkListener {
    fn protocol(&self) -> &'static str {
        if self.ssl_certificate_id.is_some() { "TLS" } else { "TCP" }
    }
}

/// A network load balancer
#[derive(Debug, Clone, Serialize)]
pub struct NetworkLoadBalancer {
    pub name: String,
    pub load_balancer_name: String,
    pub subnets: Vec<Link<Subnet>>,
    pub listeners: Vec<NetworkListener>,
    pub scheme: Option<String>,
    pub cross_zone_load_balancing: Option<bool>,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(skip)]
    pub arn: Option<String>,
    #[serde(skip)]
    pub dns_name: Option<String>,
    #[serde(skip)]
    pub hosted_zone_id: Option<String>,
    #[serde(skip)]
    pub for_api_server: bool,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for NetworkLoadBalancer {
    const KIND: &'static str = "NetworkLoadBalancer";

    task_identity!();

    fn has_address(&self) -> bool {
        true
    }

    fn is_for_api_server(&self) -> bool {
        self.for_api_server
    }

    async fn find_addresses(&self, ctx: &RunContext) -> Result<Vec<String>, TaskError> {
        Ok(rendered_addresses(ctx, &TaskKey::new(Self::KIND, &self.name), "dns_name"))
    }

    fn outputs(&self) -> Outputs {
        [
            ("id", &self.arn),
            ("dns_name", &self.dns_name),
            ("hosted_zone_id", &self.hosted_zone_id),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.clone().map(|v| (k.to_string(), v)))
        .collect()
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let Some(o) = find_one(ctx, ResourceKind::NetworkLoadBalancer, &[("name", &self.load_balancer_name)]).await?
        else {
            return Ok(None);
        };
        let stored: Vec<Value> = o.attr("listeners").unwrap_or_default();
        let listeners = stored
            .iter()
            .filter_map(|l| {
                let port = l.get("port").and_then(Value::as_i64)?;
                let arn = l.get("target_group_arn").and_then(Value::as_str);
                let expected = self.listeners.iter().find(|e| e.port == port);
                let target_group = match expected {
                    Some(e) => relink(ctx, &e.target_group, arn),
                    None => Link::new(arn.unwrap_or_default()),
                };
                Some(NetworkListener {
                    port,
                    target_group,
                    ssl_certificate_id: l.get("ssl_certificate_id").and_then(Value::as_str).map(str::to_string),
                })
            })
            .collect();
        Ok(Some(NetworkLoadBalancer {
            name: self.name.clone(),
            load_balancer_name: self.load_balancer_name.clone(),
            subnets: relink_all(ctx, &self.subnets, &o.attr_strings("subnet_ids")),
            listeners,
            scheme: o.attr_str("scheme"),
            cross_zone_load_balancing: o.attr_bool("cross_zone_load_balancing"),
            arn: o.attr_str("arn"),
            dns_name: o.attr_str("dns_name"),
            hosted_zone_id: o.attr_str("hosted_zone_id"),
            tags: o.tags,
            for_api_server: self.for_api_server,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<(), TaskError> {
        if actual.is_some() {
            changes.check_immutable(&["scheme"])?;
        }
        Ok(())
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let listeners = self
            .listeners
            .iter()
            .map(|l| {
                Ok(json!({
                    "port": l.port,
                    "protocol": l.protocol(),
                    "target_group_arn": ctx.link_output(&l.target_group, "arn")?,
                    "ssl_certificate_id": l.ssl_certificate_id,
                }))
            })
            .collect::<Result<Vec<_>, TaskError>>()?;
        let attrs = attributes([
            ("name", json!(self.load_balancer_name)),
            ("type", json!("network")),
            ("subnet_ids", json!(link_ids(ctx, &self.subnets)?)),
            ("listeners", Value::Array(listeners)),
            ("scheme", json!(self.scheme)),
            ("cross_zone_load_balancing", json!(self.cross_zone_load_balancing)),
        ]);
        let existing = match actual {
            Some(_) => find_one(ctx, ResourceKind::NetworkLoadBalancer, &[("name", &self.load_balancer_name)])
                .await?
                .map(|o| o.id),
            None => None,
        };
        let o = create_or_update(
            ctx,
            ResourceKind::NetworkLoadBalancer,
            existing.as_deref(),
            attrs,
            &self.tags,
            changes,
        )
        .await?;
        Ok(["arn", "dns_name", "hosted_zone_id"]
            .into_iter()
            .filter_map(|k| o.attr_str(k).map(|v| (if k == "arn" { "id" } else { k }.to_string(), v)))
            .collect())
    }

    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        tf.add_resource(
            "aws_lb",
            &self.name,
            HclBody::new()
                .attr("name", self.load_balancer_name.clone())
                .attr("load_balancer_type", "network")
                .opt_attr("internal", self.scheme.as_deref().map(|s| s == "internal"))
                .attr("subnets", link_ids(ctx, &self.subnets)?)
                .opt_attr("enable_cross_zone_load_balancing", self.cross_zone_load_balancing)
                .attr("tags", tf_tags(&self.tags)),
        )?;
        let arn = TerraformTarget::reference("aws_lb", &self.name, "id");
        for listener in &self.listeners {
            tf.add_resource(
                "aws_lb_listener",
                &format!("{}-{}", self.name, listener.port),
                HclBody::new()
                    .attr("load_balancer_arn", arn.clone())
                    .attr("port", listener.port)
                    .attr("protocol", listener.protocol())
                    .opt_attr("certificate_arn", listener.ssl_certificate_id.clone())
                    .block(
                        "default_action",
                        HclBody::new()
                            .attr("type", "forward")
                            .attr("target_group_arn", ctx.link_output(&listener.target_group, "arn")?),
                    ),
            )?;
        }
        Ok(Outputs::from([
            ("id".to_string(), arn),
            ("dns_name".to_string(), TerraformTarget::reference("aws_lb", &self.name, "dns_name")),
            ("hosted_zone_id".to_string(), TerraformTarget::reference("aws_lb", &self.name, "zone_id")),
        ]))
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        const TYPE: &str = "AWS::ElasticLoadBalancingV2::LoadBalancer";
        cf.add_resource(
            TYPE,
            &self.name,
            json!({
                "Name": self.load_balancer_name,
                "Type": "network",
                "Scheme": self.scheme,
                "Subnets": cf_links(ctx, &self.subnets)?,
                "LoadBalancerAttributes": self.cross_zone_load_balancing.map(|enabled| json!([{
                    "Key": "load_balancing.cross_zone.enabled",
                    "Value": enabled.to_string(),
                }])),
                "Tags": cf_tags(&self.tags),
            }),
        )?;
        for listener in &self.listeners {
            cf.add_resource(
                "AWS::ElasticLoadBalancingV2::Listener",
                &format!("{}-{}", self.name, listener.port),
                json!({
                    "LoadBalancerArn": { "Ref": CloudFormationTarget::logical_id(TYPE, &self.name) },
                    "Port": listener.port,
                    "Protocol": listener.protocol(),
                    "Certificates": listener
                        .ssl_certificate_id
                        .as_ref()
                        .map(|arn| json!([{ "CertificateArn": arn }])),
                    "DefaultActions": [{
                        "Type": "forward",
                        "TargetGroupArn": cf_link(ctx, &listener.target_group, "arn")?,
                    }],
                }),
            )?;
        }
        Ok(Outputs::from([
            ("id".to_string(), CloudFormationTarget::ref_output(TYPE, &self.name)),
            (
                "dns_name".to_string(),
                CloudFormationTarget::get_att_output(TYPE, &self.name, "DNSName"),
            ),
            (
                "hosted_zone_id".to_string(),
                CloudFormationTarget::get_att_output(TYPE, &self.name, "CanonicalHostedZoneID"),
            ),
        ]))
    }
}
