//! Load balancer in front of the Kubernetes API

use std::collections::BTreeMap;

use awstasks::{
    ClassicHealthCheck, ClassicListener, ClassicLoadBalancer, NetworkListener, NetworkLoadBalancer, SecurityGroup,
    Subnet, TargetGroup,
};
use crds::{InstanceGroupRole, LoadBalancerAccessSpec, LoadBalancerClass};
use fi::{Lifecycle, Link, ModelBuilderContext};
use tracing::debug;

use crate::ModelBuilder;
use crate::context::{ModelContext, SecurityGroupInfo};
use crate::error::ModelError;
use crate::firewall::{
    add_directional_rule, add_full_egress, add_named_rule, add_pmtu_rule, ensure_external_group, from_cidr,
    from_group, with_ports,
};

const HTTPS_PORT: i64 = 443;
const SECONDARY_PORT: i64 = 8443;
const DEFAULT_IDLE_TIMEOUT: i64 = 300;
const CONNECTION_DRAINING_TIMEOUT: i64 = 300;

/// Emits the API load balancer, its security group and target group
#[derive(Debug, Default)]
pub struct ApiLoadBalancerBuilder;

impl ApiLoadBalancerBuilder {
    fn subnets(model: &ModelContext, spec: &LoadBalancerAccessSpec) -> Result<Vec<Link<Subnet>>, ModelError> {
        if spec.subnets.is_empty() {
            let internal = model.api_load_balancer_is_internal();
            return Ok(model
                .load_balancer_subnets(internal)
                .into_iter()
                .map(|s| model.link_to_subnet(s))
                .collect());
        }
        spec.subnets
            .iter()
            .enumerate()
            .map(|(i, wanted)| {
                model
                    .find_subnet(&wanted.name)
                    .map(|s| model.link_to_subnet(s))
                    .ok_or_else(|| {
                        ModelError::invalid(
                            format!("spec.api.loadBalancer.subnets[{i}].name"),
                            format!("subnet {:?} not found in cluster subnets", wanted.name),
                        )
                    })
            })
            .collect()
    }

    /// The load balancer's own group, or the shared group it is pinned to
    fn security_group(model: &ModelContext, spec: &LoadBalancerAccessSpec) -> SecurityGroup {
        match &spec.security_group_override {
            Some(id) => SecurityGroup {
                name: id.clone(),
                id: Some(id.clone()),
                vpc: model.link_to_vpc(),
                description: None,
                tags: Default::default(),
                shared: true,
                lifecycle: Lifecycle::Sync,
            },
            None => {
                let name = format!("api-elb.{}", model.cluster_name());
                SecurityGroup {
                    name: name.clone(),
                    id: None,
                    vpc: model.link_to_vpc(),
                    description: Some("Security group for api ELB".to_string()),
                    tags: model.cloud_tags(&name, false),
                    shared: false,
                    lifecycle: Lifecycle::Sync,
                }
            }
        }
    }

    /// Groups serving the API, each with the suffix its fixed-name rules carry
    fn api_groups(model: &ModelContext) -> Vec<(String, SecurityGroupInfo)> {
        let mut groups: Vec<(String, SecurityGroupInfo)> = model
            .security_groups(InstanceGroupRole::ControlPlane)
            .into_iter()
            .map(|g| (g.suffix.clone(), g))
            .collect();
        if !model.instance_groups_with_role(InstanceGroupRole::ApiServer).is_empty() {
            groups.extend(
                model
                    .security_groups(InstanceGroupRole::ApiServer)
                    .into_iter()
                    .map(|g| (format!("-apiserver{}", g.suffix), g)),
            );
        }
        groups
    }

    fn build_classic(
        model: &ModelContext,
        c: &mut ModelBuilderContext,
        spec: &LoadBalancerAccessSpec,
        subnets: Vec<Link<Subnet>>,
        for_api_server: bool,
    ) -> Result<(), ModelError> {
        let lb_group = Self::security_group(model, spec);
        let lb_group_link = c.ensure(lb_group.clone())?;
        add_full_egress(c, &lb_group)?;
        for cidr in &model.cluster.spec.kubernetes_api_access {
            let rule = with_ports(from_cidr(&lb_group, cidr), "tcp", HTTPS_PORT, HTTPS_PORT);
            add_directional_rule(c, &lb_group, rule)?;
            add_pmtu_rule(c, &lb_group, "api-elb", cidr)?;
        }
        for (suffix, group) in Self::api_groups(model) {
            let rule = with_ports(from_group(&group.task, &lb_group), "tcp", HTTPS_PORT, HTTPS_PORT);
            add_named_rule(c, &group.task, format!("https-elb-to-master{suffix}"), rule)?;
        }

        let mut security_groups = vec![lb_group_link];
        for id in &spec.additional_security_groups {
            security_groups.push(ensure_external_group(model, c, id)?);
        }

        let certificate = spec.ssl_certificate.clone();
        let health_target = if certificate.is_some() { "SSL" } else { "TCP" };
        let link = model.link_to_api_classic_load_balancer();
        c.add(ClassicLoadBalancer {
            name: link.name().to_string(),
            load_balancer_name: model.elb_name32("api")?,
            subnets,
            security_groups,
            listeners: BTreeMap::from([(
                HTTPS_PORT.to_string(),
                ClassicListener {
                    instance_port: HTTPS_PORT,
                    ssl_certificate_id: certificate,
                },
            )]),
            scheme: model.api_load_balancer_is_internal().then(|| "internal".to_string()),
            health_check: Some(ClassicHealthCheck {
                target: format!("{health_target}:{HTTPS_PORT}"),
                healthy_threshold: 2,
                unhealthy_threshold: 2,
                interval: 10,
                timeout: 5,
            }),
            idle_timeout: Some(spec.idle_timeout_seconds.unwrap_or(DEFAULT_IDLE_TIMEOUT)),
            connection_draining_timeout: Some(CONNECTION_DRAINING_TIMEOUT),
            cross_zone_load_balancing: Some(spec.cross_zone_load_balancing.unwrap_or(false)),
            tags: model.cloud_tags(link.name(), false),
            dns_name: None,
            hosted_zone_id: None,
            for_api_server,
            shared: false,
            lifecycle: Lifecycle::Sync,
        })?;
        Ok(())
    }

    fn target_group(model: &ModelContext, name: String, protocol: &str, port: i64) -> TargetGroup {
        TargetGroup {
            tags: model.cloud_tags(&name, false),
            name: name.clone(),
            arn: None,
            target_group_name: Some(name),
            vpc: Some(model.link_to_vpc()),
            protocol: Some(protocol.to_string()),
            port: Some(port),
            healthy_threshold: Some(2),
            unhealthy_threshold: Some(2),
            interval: Some(10),
            shared: false,
            lifecycle: Lifecycle::Sync,
        }
    }

    fn build_network(
        model: &ModelContext,
        c: &mut ModelBuilderContext,
        spec: &LoadBalancerAccessSpec,
        subnets: Vec<Link<Subnet>>,
        for_api_server: bool,
    ) -> Result<(), ModelError> {
        let groups = Self::api_groups(model);
        for cidr in &model.cluster.spec.kubernetes_api_access {
            for (suffix, group) in &groups {
                let rule = with_ports(from_cidr(&group.task, cidr), "tcp", HTTPS_PORT, HTTPS_PORT);
                add_directional_rule(c, &group.task, rule)?;
                add_pmtu_rule(c, &group.task, &format!("api-elb{suffix}"), cidr)?;
                if spec.ssl_certificate.is_some() {
                    let rule = with_ports(from_cidr(&group.task, cidr), "tcp", SECONDARY_PORT, SECONDARY_PORT);
                    add_named_rule(c, &group.task, format!("tcp-api{suffix}-{cidr}"), rule)?;
                }
            }
        }
        // Network load balancers keep the client address, so the VPC ranges are opened instead of a group
        let mut vpc_cidrs: Vec<&String> = model.cluster.spec.networking.network_cidr.iter().collect();
        vpc_cidrs.extend(&model.cluster.spec.networking.additional_network_cidrs);
        for (suffix, group) in &groups {
            for (i, cidr) in vpc_cidrs.iter().enumerate() {
                let name = if i == 0 {
                    format!("https-elb-to-master{suffix}")
                } else {
                    format!("https-lb-to-master{suffix}-{cidr}")
                };
                let rule = with_ports(from_cidr(&group.task, cidr), "tcp", HTTPS_PORT, HTTPS_PORT);
                add_named_rule(c, &group.task, name, rule)?;
            }
        }

        let tcp = c.add(Self::target_group(
            model,
            model.api_target_group_name()?,
            "TCP",
            HTTPS_PORT,
        ))?;
        let mut listeners = Vec::new();
        match &spec.ssl_certificate {
            Some(certificate) => {
                let tls = c.add(Self::target_group(
                    model,
                    model.api_tls_target_group_name()?,
                    "TLS",
                    HTTPS_PORT,
                ))?;
                listeners.push(NetworkListener {
                    port: HTTPS_PORT,
                    target_group: tls,
                    ssl_certificate_id: Some(certificate.clone()),
                });
                listeners.push(NetworkListener {
                    port: SECONDARY_PORT,
                    target_group: tcp,
                    ssl_certificate_id: None,
                });
            }
            None => listeners.push(NetworkListener {
                port: HTTPS_PORT,
                target_group: tcp,
                ssl_certificate_id: None,
            }),
        }

        let link = model.link_to_api_network_load_balancer();
        c.add(NetworkLoadBalancer {
            name: link.name().to_string(),
            load_balancer_name: model.elb_name32("api")?,
            subnets,
            listeners,
            scheme: model.api_load_balancer_is_internal().then(|| "internal".to_string()),
            cross_zone_load_balancing: Some(spec.cross_zone_load_balancing.unwrap_or(false)),
            tags: model.cloud_tags(link.name(), false),
            arn: None,
            dns_name: None,
            hosted_zone_id: None,
            for_api_server,
            lifecycle: Lifecycle::Sync,
        })?;
        Ok(())
    }
}

impl ModelBuilder for ApiLoadBalancerBuilder {
    fn build(&self, model: &ModelContext, c: &mut ModelBuilderContext) -> Result<(), ModelError> {
        let Some(spec) = model.cluster.spec.api.as_ref().and_then(|a| a.load_balancer.as_ref()) else {
            return Ok(());
        };
        let subnets = Self::subnets(model, spec)?;
        // Without an alias record the certificate has to name the load balancer itself
        let for_api_server = model.is_gossip() || model.use_private_dns();
        debug!(class = ?spec.class, subnets = subnets.len(), for_api_server, "Building API load balancer");
        match spec.class {
            LoadBalancerClass::Classic => Self::build_classic(model, c, spec, subnets, for_api_server),
            LoadBalancerClass::Network => Self::build_network(model, c, spec, subnets, for_api_server),
        }
    }
}
