//! SSH bastion hosts behind a classic load balancer

use std::collections::BTreeMap;

use awstasks::{AliasTarget, ClassicHealthCheck, ClassicListener, ClassicLoadBalancer, DnsName, SecurityGroup};
use crds::{ClusterSubnetSpec, InstanceGroupRole};
use fi::{Lifecycle, Link, ModelBuilderContext};
use tracing::warn;

use crate::ModelBuilder;
use crate::context::{ModelContext, SecurityGroupInfo};
use crate::error::ModelError;
use crate::firewall::{
    add_directional_rule, add_full_egress, add_pmtu_rule, ensure_external_group, from_cidr, from_group, with_ports,
};

const SSH_PORT: i64 = 22;
const DEFAULT_IDLE_TIMEOUT: i64 = 300;

/// Emits the bastion security groups, load balancer and DNS record
#[derive(Debug, Default)]
pub struct BastionBuilder;

impl BastionBuilder {
    /// Task name of the bastion load balancer
    pub fn load_balancer_name(model: &ModelContext) -> String {
        format!("bastion.{}", model.cluster_name())
    }

    /// Link to the bastion load balancer
    pub fn link_to_load_balancer(model: &ModelContext) -> Link<ClassicLoadBalancer> {
        Link::new(Self::load_balancer_name(model))
    }

    /// One public or utility subnet per zone a bastion runs in
    fn subnets(model: &ModelContext) -> Result<Vec<&ClusterSubnetSpec>, ModelError> {
        let mut zones = Vec::new();
        for ig in model.instance_groups_with_role(InstanceGroupRole::Bastion) {
            zones.extend(model.zones_for(ig)?);
        }
        zones.sort();
        zones.dedup();

        let mut chosen = Vec::new();
        for zone in &zones {
            let in_zone: Vec<&ClusterSubnetSpec> = model
                .cluster
                .spec
                .networking
                .subnets
                .iter()
                .filter(|s| &s.zone == zone)
                .collect();
            let public: Vec<&ClusterSubnetSpec> =
                in_zone.iter().copied().filter(|s| !s.subnet_type.is_private()).collect();
            let candidates = if public.is_empty() { in_zone } else { public };
            if let Some(subnet) = model.choose_subnet_for_zone(zone, &candidates, false) {
                chosen.push(subnet);
            }
        }
        Ok(chosen)
    }

    fn elb_security_group(model: &ModelContext) -> SecurityGroup {
        let name = format!("bastion-elb.{}", model.cluster_name());
        SecurityGroup {
            name: name.clone(),
            id: None,
            vpc: model.link_to_vpc(),
            description: Some("Security group for bastion ELB".to_string()),
            tags: model.cloud_tags(&name, false),
            shared: false,
            lifecycle: Lifecycle::Sync,
        }
    }

    fn ssh_between(
        c: &mut ModelBuilderContext,
        sources: &[SecurityGroupInfo],
        dests: &[SecurityGroupInfo],
    ) -> Result<(), ModelError> {
        for src in sources {
            for dest in dests {
                let rule = with_ports(from_group(&dest.task, &src.task), "tcp", SSH_PORT, SSH_PORT);
                add_directional_rule(c, &dest.task, rule)?;
            }
        }
        Ok(())
    }
}

impl ModelBuilder for BastionBuilder {
    fn build(&self, model: &ModelContext, c: &mut ModelBuilderContext) -> Result<(), ModelError> {
        if model.instance_groups_with_role(InstanceGroupRole::Bastion).is_empty() {
            return Ok(());
        }
        let bastions = model.security_groups(InstanceGroupRole::Bastion);
        for group in &bastions {
            c.add(group.task.clone())?;
            add_full_egress(c, &group.task)?;
        }

        let elb_group = Self::elb_security_group(model);
        c.add(elb_group.clone())?;
        add_full_egress(c, &elb_group)?;
        for cidr in &model.cluster.spec.ssh_access {
            let rule = with_ports(from_cidr(&elb_group, cidr), "tcp", SSH_PORT, SSH_PORT);
            add_directional_rule(c, &elb_group, rule)?;
            add_pmtu_rule(c, &elb_group, "ssh-elb", cidr)?;
        }
        for group in &bastions {
            let rule = with_ports(from_group(&group.task, &elb_group), "tcp", SSH_PORT, SSH_PORT);
            add_directional_rule(c, &group.task, rule)?;
        }
        Self::ssh_between(c, &bastions, &model.security_groups(InstanceGroupRole::ControlPlane))?;
        Self::ssh_between(c, &bastions, &model.security_groups(InstanceGroupRole::Node))?;

        let topology = model.cluster.spec.topology.bastion.as_ref();
        let name = Self::load_balancer_name(model);
        let mut security_groups = vec![Link::new(elb_group.name.clone())];
        if let Some(bastion) = topology {
            for id in &bastion.additional_security_groups {
                security_groups.push(ensure_external_group(model, c, id)?);
            }
        }
        let elb = ClassicLoadBalancer {
            name: name.clone(),
            load_balancer_name: model.elb_name32("bastion")?,
            subnets: Self::subnets(model)?.into_iter().map(|s| model.link_to_subnet(s)).collect(),
            security_groups,
            listeners: BTreeMap::from([(
                SSH_PORT.to_string(),
                ClassicListener {
                    instance_port: SSH_PORT,
                    ssl_certificate_id: None,
                },
            )]),
            scheme: None,
            health_check: Some(ClassicHealthCheck {
                target: format!("TCP:{SSH_PORT}"),
                healthy_threshold: 2,
                unhealthy_threshold: 2,
                interval: 10,
                timeout: 5,
            }),
            idle_timeout: Some(
                topology
                    .and_then(|b| b.idle_timeout_seconds)
                    .unwrap_or(DEFAULT_IDLE_TIMEOUT),
            ),
            connection_draining_timeout: None,
            cross_zone_load_balancing: None,
            tags: model.cloud_tags(&name, false),
            dns_name: None,
            hosted_zone_id: None,
            for_api_server: false,
            shared: false,
            lifecycle: Lifecycle::Sync,
        };
        let elb = c.add(elb)?;

        if let Some(public_name) = topology.and_then(|b| b.public_name.as_deref()) {
            if model.is_gossip() {
                warn!(public_name, "Bastion public name ignored, cluster has no hosted zone");
            } else {
                c.add(DnsName::alias(
                    public_name,
                    model.link_to_dns_zone(),
                    AliasTarget::ClassicLoadBalancer(elb),
                ))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{group, minimal_cluster, model_with, utility_subnet};
    use awstasks::SecurityGroupRule;
    use crds::BastionSpec;

    fn bastion_model() -> ModelContext {
        let mut cluster = minimal_cluster();
        cluster.spec.networking.subnets.push(utility_subnet("utility-us-test-1a", "us-test-1a"));
        cluster.spec.topology.bastion = Some(BastionSpec {
            public_name: Some("bastion.minimal.example.com".to_string()),
            idle_timeout_seconds: Some(1200),
            additional_security_groups: vec![],
        });
        model_with(
            cluster,
            vec![
                group("master-us-test-1a", InstanceGroupRole::ControlPlane, &["us-test-1a"]),
                group("nodes", InstanceGroupRole::Node, &["us-test-1a"]),
                group("bastions", InstanceGroupRole::Bastion, &["utility-us-test-1a"]),
            ],
        )
    }

    #[test]
    fn test_no_bastion_group() {
        let model = crate::test_support::model_for(minimal_cluster());
        let mut c = ModelBuilderContext::new();
        BastionBuilder.build(&model, &mut c).unwrap();
        assert!(c.is_empty());
    }

    #[test]
    fn test_bastion_load_balancer() {
        let model = bastion_model();
        let mut c = ModelBuilderContext::new();
        BastionBuilder.build(&model, &mut c).unwrap();

        let elb = c.find(&BastionBuilder::link_to_load_balancer(&model)).unwrap();
        assert_eq!(elb.listeners["22"].instance_port, 22);
        assert_eq!(elb.health_check.as_ref().unwrap().target, "TCP:22");
        assert_eq!(elb.idle_timeout, Some(1200));
        assert!(elb.load_balancer_name.len() <= 32);
        assert_eq!(elb.subnets.len(), 1);
        // both candidates score 1, the lower name wins
        assert_eq!(elb.subnets[0].name(), "us-test-1a.minimal.example.com");

        assert!(c.find(&Link::<DnsName>::new("bastion.minimal.example.com")).is_some());

        let tasks = c.into_tasks();
        let rules: Vec<&str> = tasks
            .of_kind::<SecurityGroupRule>()
            .into_iter()
            .map(|r| r.name.as_str())
            .collect();
        for expected in [
            "from-0.0.0.0/0-ingress-tcp-22to22-bastion-elb.minimal.example.com",
            "from-bastion-elb.minimal.example.com-ingress-tcp-22to22-bastions.minimal.example.com",
            "from-bastions.minimal.example.com-ingress-tcp-22to22-masters.minimal.example.com",
            "from-bastions.minimal.example.com-ingress-tcp-22to22-nodes.minimal.example.com",
            "from-bastions.minimal.example.com-egress-all-0to0-0.0.0.0/0",
        ] {
            assert!(rules.contains(&expected), "missing {expected}");
        }
    }
}
