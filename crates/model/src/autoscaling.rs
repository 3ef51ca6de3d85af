//! Launch configurations or templates plus the autoscaling groups that use them

use awstasks::autoscaling::MixedInstancesPolicy;
use awstasks::{
    AutoscalingGroup, AutoscalingLifecycleHook, BootstrapScript, ExternalLoadBalancerAttachment,
    ExternalTargetGroupAttachment, LaunchConfiguration, LaunchTemplate, MachineSpec, RootVolume, SecurityGroup,
};
use crds::validation::check_gp3;
use crds::{InstanceGroup, InstanceGroupRole, InstanceManager};
use fi::featureflag::{ENABLE_LAUNCH_TEMPLATES, SPOTINST};
use fi::{Lifecycle, Link, ModelBuilderContext, Resource};
use tracing::{info, warn};

use crate::ModelBuilder;
use crate::bastion::BastionBuilder;
use crate::context::{ModelContext, TAG_INSTANCE_GROUP};
use crate::error::ModelError;
use crate::firewall::ensure_external_group;
use crate::nodeterminationhandler::{managed_asg_tag, queue_mode_enabled};
use crate::sshkey::SshKeyBuilder;

const DEFAULT_VOLUME_TYPE: &str = "gp2";
const DEFAULT_GP3_IOPS: i32 = 3000;
const DEFAULT_GP3_THROUGHPUT: i32 = 125;
const DEFAULT_PROVISIONED_IOPS: i32 = 100;

/// Lifecycle hook the node termination handler waits on
pub const NTH_HOOK_NAME: &str = "kops-nth-lifecycle-hook";
const NTH_HEARTBEAT_TIMEOUT: i64 = 300;

/// Default root volume size in GiB
fn default_volume_size(role: InstanceGroupRole) -> i32 {
    match role {
        InstanceGroupRole::ControlPlane => 64,
        InstanceGroupRole::Bastion => 32,
        InstanceGroupRole::Node | InstanceGroupRole::ApiServer => 128,
    }
}

/// `(min, max)` when the group leaves them unset
fn default_sizes(role: InstanceGroupRole) -> (i32, i32) {
    match role {
        InstanceGroupRole::Node => (2, 2),
        _ => (1, 1),
    }
}

/// Target group name from its ARN (`...:targetgroup/<name>/<id>`)
fn target_group_name(arn: &str) -> &str {
    arn.split_once("targetgroup/")
        .and_then(|(_, rest)| rest.split('/').next())
        .unwrap_or(arn)
}

/// Emits the compute of every cloud-managed instance group
#[derive(Debug, Default)]
pub struct AutoscalingGroupBuilder;

impl AutoscalingGroupBuilder {
    fn root_volume(ig: &InstanceGroup, path: &str) -> Result<RootVolume, ModelError> {
        let spec = ig.spec.root_volume.clone().unwrap_or_default();
        let volume_type = spec.volume_type.unwrap_or_else(|| DEFAULT_VOLUME_TYPE.to_string());
        let size = spec.size.unwrap_or_else(|| default_volume_size(ig.spec.role));
        let (iops, throughput) = match volume_type.as_str() {
            "gp3" => (
                Some(spec.iops.unwrap_or(DEFAULT_GP3_IOPS)),
                Some(spec.throughput.unwrap_or(DEFAULT_GP3_THROUGHPUT)),
            ),
            "io1" | "io2" => (Some(spec.iops.unwrap_or(DEFAULT_PROVISIONED_IOPS)), None),
            _ => (None, None),
        };
        check_gp3(Some(&volume_type), Some(size), iops, throughput)
            .map_err(|message| ModelError::invalid(format!("{path}.rootVolume"), message))?;
        Ok(RootVolume {
            size: Some(i64::from(size)),
            volume_type: Some(volume_type),
            iops: iops.map(i64::from),
            throughput: throughput.map(i64::from),
            encrypted: spec.encryption,
            encryption_key: spec.encryption_key,
        })
    }

    fn security_groups(
        model: &ModelContext,
        c: &mut ModelBuilderContext,
        ig: &InstanceGroup,
    ) -> Result<Vec<Link<SecurityGroup>>, ModelError> {
        let mut groups = vec![model.link_to_security_group_for(ig)];
        for id in &ig.spec.additional_security_groups {
            groups.push(ensure_external_group(model, c, id)?);
        }
        Ok(groups)
    }

    fn machine_spec(
        model: &ModelContext,
        c: &mut ModelBuilderContext,
        ig: &InstanceGroup,
        path: &str,
    ) -> Result<MachineSpec, ModelError> {
        let subnets = model.gather_subnets(ig)?;
        let associate_public_ip = ig
            .spec
            .associate_public_ip
            .unwrap_or_else(|| subnets.first().is_some_and(|s| !s.subnet_type.is_private()));

        let (ssh_key, ssh_key_name) = match SshKeyBuilder::key_name(model)? {
            Some(name) if SshKeyBuilder::is_managed(model) => (Some(Link::new(name)), None),
            Some(name) => (None, Some(name)),
            None => (None, None),
        };

        let user_data = (ig.spec.role != InstanceGroupRole::Bastion)
            .then(|| Resource::task_output(BootstrapScript::key_for(ig.group_name()), "user_data"));
        let metadata = ig.spec.instance_metadata.clone().unwrap_or_default();

        Ok(MachineSpec {
            image_id: ig.spec.image.clone(),
            instance_type: ig.spec.machine_type.clone(),
            ssh_key,
            ssh_key_name,
            security_groups: Self::security_groups(model, c, ig)?,
            associate_public_ip: Some(associate_public_ip),
            iam_instance_profile: Some(model.link_to_iam_instance_profile(ig)?),
            root_volume: Some(Self::root_volume(ig, path)?),
            user_data,
            spot_price: ig.spec.max_price.clone(),
            instance_monitoring: ig.spec.detailed_instance_monitoring,
            http_tokens: metadata.http_tokens,
            http_put_response_hop_limit: metadata.http_put_response_hop_limit,
        })
    }

    /// Classic load balancers and target groups the group registers with
    fn load_balancers(
        model: &ModelContext,
        ig: &InstanceGroup,
        asg: &mut AutoscalingGroup,
    ) -> Result<(), ModelError> {
        match ig.spec.role {
            InstanceGroupRole::ControlPlane | InstanceGroupRole::ApiServer if model.use_load_balancer_for_api() => {
                if model.use_network_load_balancer() {
                    asg.target_groups.extend(model.api_target_groups()?);
                } else {
                    asg.load_balancers.push(model.link_to_api_classic_load_balancer());
                }
            }
            InstanceGroupRole::Bastion => {
                asg.load_balancers.push(BastionBuilder::link_to_load_balancer(model));
            }
            _ => {}
        }
        Ok(())
    }

    fn external_attachments(
        c: &mut ModelBuilderContext,
        ig: &InstanceGroup,
        asg: &Link<AutoscalingGroup>,
    ) -> Result<(), ModelError> {
        for external in &ig.spec.external_load_balancers {
            if let Some(lb) = &external.load_balancer_name {
                c.add(ExternalLoadBalancerAttachment {
                    name: format!("extlb-{lb}-{}", ig.group_name()),
                    autoscaling_group: asg.clone(),
                    load_balancer_name: lb.clone(),
                    lifecycle: Lifecycle::Sync,
                })?;
            }
            if let Some(arn) = &external.target_group_arn {
                c.add(ExternalTargetGroupAttachment {
                    name: format!("exttg-{}-{}", target_group_name(arn), ig.group_name()),
                    autoscaling_group: asg.clone(),
                    target_group_arn: arn.clone(),
                    lifecycle: Lifecycle::Sync,
                })?;
            }
        }
        Ok(())
    }

    fn build_group(
        model: &ModelContext,
        c: &mut ModelBuilderContext,
        index: usize,
        ig: &InstanceGroup,
    ) -> Result<(), ModelError> {
        let path = format!("instanceGroups[{index}].spec");
        let name = model.autoscaling_group_name(ig);
        let spec = Self::machine_spec(model, c, ig, &path)?;

        let mut tags = model.cloud_tags(&name, false);
        tags.extend(model.cloud_tags_for_instance_group(ig));
        tags.insert(TAG_INSTANCE_GROUP.to_string(), ig.group_name().to_string());
        if queue_mode_enabled(model) {
            tags.insert(managed_asg_tag(model), String::new());
        }

        let use_template =
            ig.spec.mixed_instances_policy.is_some() || model.features.enabled(ENABLE_LAUNCH_TEMPLATES);
        let (launch_configuration, launch_template) = if use_template {
            let template = c.add(LaunchTemplate {
                name: name.clone(),
                spec,
                tags: tags.clone(),
                id: None,
                latest_version: None,
                lifecycle: Lifecycle::Sync,
            })?;
            (None, Some(template))
        } else {
            let configuration = c.add(LaunchConfiguration {
                name: name.clone(),
                spec,
                id: None,
                lifecycle: Lifecycle::Sync,
            })?;
            (Some(configuration), None)
        };

        let (default_min, default_max) = default_sizes(ig.spec.role);
        let subnets = model.gather_subnets(ig)?;
        let mut asg = AutoscalingGroup {
            name: name.clone(),
            min_size: Some(i64::from(ig.spec.min_size.unwrap_or(default_min))),
            max_size: Some(i64::from(ig.spec.max_size.unwrap_or(default_max))),
            subnets: subnets.iter().map(|s| model.link_to_subnet(s)).collect(),
            launch_configuration,
            launch_template,
            mixed_instances_policy: ig.spec.mixed_instances_policy.as_ref().map(|p| MixedInstancesPolicy {
                instance_types: p.instances.clone(),
                on_demand_base: p.on_demand_base,
                on_demand_above_base: p.on_demand_above_base,
                spot_allocation_strategy: p.spot_allocation_strategy.clone(),
            }),
            load_balancers: Vec::new(),
            target_groups: Vec::new(),
            suspend_processes: ig.spec.suspend_processes.clone(),
            tags,
            lifecycle: Lifecycle::Sync,
        };
        Self::load_balancers(model, ig, &mut asg)?;
        let asg = c.add(asg)?;

        Self::external_attachments(c, ig, &asg)?;

        if queue_mode_enabled(model) {
            c.add(AutoscalingLifecycleHook {
                name: format!("{}-NTHLifecycleHook", ig.group_name()),
                id: None,
                autoscaling_group: asg,
                hook_name: NTH_HOOK_NAME.to_string(),
                lifecycle_transition: "autoscaling:EC2_INSTANCE_TERMINATING".to_string(),
                default_result: Some("CONTINUE".to_string()),
                heartbeat_timeout: Some(NTH_HEARTBEAT_TIMEOUT),
                lifecycle: Lifecycle::Sync,
            })?;
        }
        Ok(())
    }
}

impl ModelBuilder for AutoscalingGroupBuilder {
    fn build(&self, model: &ModelContext, c: &mut ModelBuilderContext) -> Result<(), ModelError> {
        for (index, ig) in model.instance_groups.iter().enumerate() {
            if ig.spec.manager == InstanceManager::Spotinst {
                if model.features.enabled(SPOTINST) {
                    info!(group = ig.group_name(), "Skipping group managed by Spotinst");
                    continue;
                }
                warn!(group = ig.group_name(), "Spotinst manager requested without the Spotinst flag");
            }
            Self::build_group(model, c, index, ig)?;
        }
        Ok(())
    }
}
