//! Autoscaling groups, lifecycle hooks and external load balancer attachments

use cloud_client::ResourceKind;
use fi::{
    Changes, CloudFormationTarget, CloudupTask, HclBody, Lifecycle, Link, Outputs, RunContext, TaskError,
    TerraformTarget,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::launch::{LaunchConfiguration, LaunchTemplate};
use crate::loadbalancer::{ClassicLoadBalancer, TargetGroup};
use crate::subnet::Subnet;
use crate::util::{
    Tags, attributes, cf_link, cf_links, create_or_update, find_one, id_output, link_ids, relink_all, relink_opt,
    task_identity,
};

/// Mixed on-demand and spot capacity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixedInstancesPolicy {
    pub instance_types: Vec<String>,
    pub on_demand_base: Option<i64>,
    pub on_demand_above_base: Option<i64>,
    pub spot_allocation_strategy: Option<String>,
}

/// An autoscaling group
#[derive(Debug, Clone, Serialize)]
pub struct AutoscalingGroup {
    pub name: String,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    pub subnets: Vec<Link<Subnet>>,
    pub launch_configuration: Option<Link<LaunchConfiguration>>,
    pub launch_template: Option<Link<LaunchTemplate>>,
    pub mixed_instances_policy: Option<MixedInstancesPolicy>,
    pub load_balancers: Vec<Link<ClassicLoadBalancer>>,
    pub target_groups: Vec<Link<TargetGroup>>,
    pub suspend_processes: Vec<String>,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl AutoscalingGroup {
    /// Classic load balancer names and target group ARNs attached by
    /// [`ExternalLoadBalancerAttachment`] and [`ExternalTargetGroupAttachment`] tasks
    fn external_attachments(&self, ctx: &RunContext) -> (Vec<String>, Vec<String>) {
        let load_balancers = ctx
            .tasks
            .of_kind::<ExternalLoadBalancerAttachment>()
            .into_iter()
            .filter(|a| a.autoscaling_group.name() == self.name)
            .map(|a| a.load_balancer_name.clone())
            .collect();
        let target_groups = ctx
            .tasks
            .of_kind::<ExternalTargetGroupAttachment>()
            .into_iter()
            .filter(|a| a.autoscaling_group.name() == self.name)
            .map(|a| a.target_group_arn.clone())
            .collect();
        (load_balancers, target_groups)
    }

    fn target_group_arns(&self, ctx: &RunContext) -> Result<Vec<String>, TaskError> {
        self.target_groups
            .iter()
            .map(|l| ctx.link_output(l, "arn"))
            .collect()
    }
}

#[async_trait::async_trait]
impl CloudupTask for AutoscalingGroup {
    const KIND: &'static str = "AutoscalingGroup";

    task_identity!();

    fn outputs(&self) -> Outputs {
        id_output(self.name.clone())
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let Some(o) = ctx.cloud.get(ResourceKind::AutoscalingGroup, &self.name).await? else {
            return Ok(None);
        };
        Ok(Some(AutoscalingGroup {
            name: self.name.clone(),
            min_size: o.attr_i64("min_size"),
            max_size: o.attr_i64("max_size"),
            subnets: relink_all(ctx, &self.subnets, &o.attr_strings("subnet_ids")),
            launch_configuration: relink_opt(
                ctx,
                self.launch_configuration.as_ref(),
                o.attr_str("launch_configuration_name").as_deref(),
            ),
            launch_template: relink_opt(
                ctx,
                self.launch_template.as_ref(),
                o.attr_str("launch_template_id").as_deref(),
            ),
            mixed_instances_policy: o.attr("mixed_instances_policy"),
            load_balancers: relink_all(ctx, &self.load_balancers, &o.attr_strings("load_balancer_names")),
            target_groups: relink_all(ctx, &self.target_groups, &o.attr_strings("target_group_ids")),
            suspend_processes: o.attr_strings("suspended_processes"),
            tags: o.tags,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, _actual: Option<&Self>, _changes: &Changes) -> Result<(), TaskError> {
        if self.launch_configuration.is_some() == self.launch_template.is_some() {
            return Err(TaskError::Invalid(format!(
                "autoscaling group {} needs exactly one of a launch configuration or a launch template",
                self.name
            )));
        }
        if self.mixed_instances_policy.is_some() && self.launch_template.is_none() {
            return Err(TaskError::Invalid(format!(
                "autoscaling group {} uses a mixed instances policy without a launch template",
                self.name
            )));
        }
        Ok(())
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let launch_configuration = self
            .launch_configuration
            .as_ref()
            .map(|l| ctx.link_id(l))
            .transpose()?;
        let launch_template = self.launch_template.as_ref().map(|l| ctx.link_id(l)).transpose()?;
        let attrs = attributes([
            ("name", json!(self.name)),
            ("min_size", json!(self.min_size)),
            ("max_size", json!(self.max_size)),
            ("subnet_ids", json!(link_ids(ctx, &self.subnets)?)),
            ("launch_configuration_name", json!(launch_configuration)),
            ("launch_template_id", json!(launch_template)),
            ("launch_template_version", json!(launch_template.as_ref().map(|_| "$Latest"))),
            ("mixed_instances_policy", serde_json::to_value(&self.mixed_instances_policy)?),
            ("load_balancer_names", json!(link_ids(ctx, &self.load_balancers)?)),
            ("target_group_ids", json!(link_ids(ctx, &self.target_groups)?)),
            ("suspended_processes", json!(self.suspend_processes)),
        ]);
        let o = create_or_update(
            ctx,
            ResourceKind::AutoscalingGroup,
            actual.map(|a| a.name.as_str()),
            attrs,
            &self.tags,
            changes,
        )
        .await?;
        Ok(id_output(o.id))
    }

    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        let mut body = HclBody::new()
            .attr("name", self.name.clone())
            .opt_attr("min_size", self.min_size)
            .opt_attr("max_size", self.max_size)
            .attr("vpc_zone_identifier", link_ids(ctx, &self.subnets)?);
        if let Some(lc) = &self.launch_configuration {
            body = body.attr("launch_configuration", ctx.link_id(lc)?);
        }
        if let Some(lt) = &self.launch_template {
            let template = HclBody::new()
                .attr("id", ctx.link_id(lt)?)
                .attr("version", ctx.link_output(lt, "latest_version")?);
            match &self.mixed_instances_policy {
                Some(policy) => {
                    let mut launch = HclBody::new().block("launch_template_specification", template);
                    for instance_type in &policy.instance_types {
                        launch = launch.block("override", HclBody::new().attr("instance_type", instance_type.clone()));
                    }
                    body = body.block(
                        "mixed_instances_policy",
                        HclBody::new().block("launch_template", launch).block(
                            "instances_distribution",
                            HclBody::new()
                                .opt_attr("on_demand_base_capacity", policy.on_demand_base)
                                .opt_attr(
                                    "on_demand_percentage_above_base_capacity",
                                    policy.on_demand_above_base,
                                )
                                .opt_attr("spot_allocation_strategy", policy.spot_allocation_strategy.clone()),
                        ),
                    );
                }
                None => body = body.block("launch_template", template),
            }
        }
        if !self.load_balancers.is_empty() {
            body = body.attr("load_balancers", link_ids(ctx, &self.load_balancers)?);
        }
        if !self.target_groups.is_empty() {
            body = body.attr("target_group_arns", self.target_group_arns(ctx)?);
        }
        if !self.suspend_processes.is_empty() {
            body = body.attr("suspended_processes", self.suspend_processes.clone());
        }
        for (key, value) in &self.tags {
            body = body.block(
                "tag",
                HclBody::new()
                    .attr("key", key.clone())
                    .attr("value", value.clone())
                    .attr("propagate_at_launch", true),
            );
        }
        tf.add_resource("aws_autoscaling_group", &self.name, body)?;
        Ok(id_output(TerraformTarget::reference("aws_autoscaling_group", &self.name, "id")))
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        const TYPE: &str = "AWS::AutoScaling::AutoScalingGroup";
        let (external_lbs, external_tgs) = self.external_attachments(ctx);

        let mut load_balancers = match cf_links(ctx, &self.load_balancers)? {
            Value::Array(items) => items,
            _ => Vec::new(),
        };
        load_balancers.extend(external_lbs.into_iter().map(Value::String));
        let mut target_groups = self
            .target_groups
            .iter()
            .map(|l| cf_link(ctx, l, "arn"))
            .collect::<Result<Vec<_>, _>>()?;
        target_groups.extend(external_tgs.into_iter().map(Value::String));

        let template = self
            .launch_template
            .as_ref()
            .map(|lt| -> Result<Value, TaskError> {
                Ok(json!({
                    "LaunchTemplateId": cf_link(ctx, lt, "id")?,
                    "Version": cf_link(ctx, lt, "latest_version")?,
                }))
            })
            .transpose()?;
        let (launch_template, mixed) = match (&self.mixed_instances_policy, template) {
            (Some(policy), Some(template)) => (
                None,
                Some(json!({
                    "LaunchTemplate": {
                        "LaunchTemplateSpecification": template,
                        "Overrides": policy
                            .instance_types
                            .iter()
                            .map(|t| json!({ "InstanceType": t }))
                            .collect::<Vec<_>>(),
                    },
                    "InstancesDistribution": {
                        "OnDemandBaseCapacity": policy.on_demand_base,
                        "OnDemandPercentageAboveBaseCapacity": policy.on_demand_above_base,
                        "SpotAllocationStrategy": policy.spot_allocation_strategy,
                    },
                })),
            ),
            (_, template) => (template, None),
        };
        let launch_configuration = self
            .launch_configuration
            .as_ref()
            .map(|l| cf_link(ctx, l, "id"))
            .transpose()?;
        let tags: Vec<Value> = self
            .tags
            .iter()
            .map(|(k, v)| json!({ "Key": k, "Value": v, "PropagateAtLaunch": true }))
            .collect();

        cf.add_resource(
            TYPE,
            &self.name,
            json!({
                "AutoScalingGroupName": self.name,
                "MinSize": self.min_size.map(|n| n.to_string()),
                "MaxSize": self.max_size.map(|n| n.to_string()),
                "VPCZoneIdentifier": cf_links(ctx, &self.subnets)?,
                "LaunchConfigurationName": launch_configuration,
                "LaunchTemplate": launch_template,
                "MixedInstancesPolicy": mixed,
                "LoadBalancerNames": (!load_balancers.is_empty()).then_some(load_balancers),
                "TargetGroupARNs": (!target_groups.is_empty()).then_some(target_groups),
                "Tags": tags,
            }),
        )?;
        Ok(id_output(CloudFormationTarget::ref_output(TYPE, &self.name)))
    }
}

/// A lifecycle hook on an autoscaling group
#[derive(Debug, Clone, Serialize)]
pub struct AutoscalingLifecycleHook {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub autoscaling_group: Link<AutoscalingGroup>,
    pub hook_name: String,
    pub lifecycle_transition: String,
    pub default_result: Option<String>,
    pub heartbeat_timeout: Option<i64>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for AutoscalingLifecycleHook {
    const KIND: &'static str = "AutoscalingLifecycleHook";

    task_identity!();

    fn outputs(&self) -> Outputs {
        self.id.clone().map(id_output).unwrap_or_default()
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let group = self.autoscaling_group.name();
        let found = find_one(
            ctx,
            ResourceKind::LifecycleHook,
            &[("autoscaling_group_name", group), ("hook_name", &self.hook_name)],
        )
        .await?;
        Ok(found.map(|o| AutoscalingLifecycleHook {
            name: self.name.clone(),
            id: Some(o.id.clone()),
            autoscaling_group: self.autoscaling_group.clone(),
            hook_name: self.hook_name.clone(),
            lifecycle_transition: o.attr_str("lifecycle_transition").unwrap_or_default(),
            default_result: o.attr_str("default_result"),
            heartbeat_timeout: o.attr_i64("heartbeat_timeout"),
            lifecycle: self.lifecycle,
        }))
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([
            ("autoscaling_group_name", json!(ctx.link_id(&self.autoscaling_group)?)),
            ("hook_name", json!(self.hook_name)),
            ("lifecycle_transition", json!(self.lifecycle_transition)),
            ("default_result", json!(self.default_result)),
            ("heartbeat_timeout", json!(self.heartbeat_timeout)),
        ]);
        let o = create_or_update(
            ctx,
            ResourceKind::LifecycleHook,
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
            "aws_autoscaling_lifecycle_hook",
            &self.name,
            HclBody::new()
                .attr("name", self.hook_name.clone())
                .attr("autoscaling_group_name", ctx.link_id(&self.autoscaling_group)?)
                .opt_attr("default_result", self.default_result.clone())
                .opt_attr("heartbeat_timeout", self.heartbeat_timeout)
                .attr("lifecycle_transition", self.lifecycle_transition.clone()),
        )?;
        Ok(Outputs::new())
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        cf.add_resource(
            "AWS::AutoScaling::LifecycleHook",
            &self.name,
            json!({
                "LifecycleHookName": self.hook_name,
                "AutoScalingGroupName": cf_link(ctx, &self.autoscaling_group, "id")?,
                "DefaultResult": self.default_result,
                "HeartbeatTimeout": self.heartbeat_timeout,
                "LifecycleTransition": self.lifecycle_transition,
            }),
        )?;
        Ok(Outputs::new())
    }
}

/// Registers an autoscaling group with an existing classic load balancer
#[derive(Debug, Clone, Serialize)]
pub struct ExternalLoadBalancerAttachment {
    pub name: String,
    pub autoscaling_group: Link<AutoscalingGroup>,
    pub load_balancer_name: String,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for ExternalLoadBalancerAttachment {
    const KIND: &'static str = "ExternalLoadBalancerAttachment";

    task_identity!();

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let found = find_one(
            ctx,
            ResourceKind::LoadBalancerAttachment,
            &[
                ("autoscaling_group_name", self.autoscaling_group.name()),
                ("load_balancer_name", &self.load_balancer_name),
            ],
        )
        .await?;
        Ok(found.map(|_| self.clone()))
    }

    async fn render_direct(&self, ctx: &RunContext, _actual: Option<&Self>, _changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([
            ("autoscaling_group_name", json!(ctx.link_id(&self.autoscaling_group)?)),
            ("load_balancer_name", json!(self.load_balancer_name)),
        ]);
        ctx.cloud
            .create(ResourceKind::LoadBalancerAttachment, attrs, Tags::new())
            .await?;
        Ok(Outputs::new())
    }

    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        tf.add_resource(
            "aws_autoscaling_attachment",
            &self.name,
            HclBody::new()
                .attr("autoscaling_group_name", ctx.link_id(&self.autoscaling_group)?)
                .attr("elb", self.load_balancer_name.clone()),
        )?;
        Ok(Outputs::new())
    }

    /// Rendered as part of the autoscaling group
    async fn render_cloudformation(&self, _ctx: &RunContext, _cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        Ok(Outputs::new())
    }
}

/// Registers an autoscaling group with an existing target group
#[derive(Debug, Clone, Serialize)]
pub struct ExternalTargetGroupAttachment {
    pub name: String,
    pub autoscaling_group: Link<AutoscalingGroup>,
    pub target_group_arn: String,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for ExternalTargetGroupAttachment {
    const KIND: &'static str = "ExternalTargetGroupAttachment";

    task_identity!();

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let found = find_one(
            ctx,
            ResourceKind::TargetGroupAttachment,
            &[
                ("autoscaling_group_name", self.autoscaling_group.name()),
                ("target_group_arn", &self.target_group_arn),
            ],
        )
        .await?;
        Ok(found.map(|_| self.clone()))
    }

    async fn render_direct(&self, ctx: &RunContext, _actual: Option<&Self>, _changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([
            ("autoscaling_group_name", json!(ctx.link_id(&self.autoscaling_group)?)),
            ("target_group_arn", json!(self.target_group_arn)),
        ]);
        ctx.cloud
            .create(ResourceKind::TargetGroupAttachment, attrs, Tags::new())
            .await?;
        Ok(Outputs::new())
    }

    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        tf.add_resource(
            "aws_autoscaling_attachment",
            &self.name,
            HclBody::new()
                .attr("autoscaling_group_name", ctx.link_id(&self.autoscaling_group)?)
                .attr("lb_target_group_arn", self.target_group_arn.clone()),
        )?;
        Ok(Outputs::new())
    }

    /// Rendered as part of the autoscaling group
    async fn render_cloudformation(&self, _ctx: &RunContext, _cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        Ok(Outputs::new())
    }
}
