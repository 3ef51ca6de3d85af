//! Security groups and the rules between roles

use std::collections::BTreeSet;

use awstasks::{SecurityGroup, SecurityGroupRule};
use crds::InstanceGroupRole;
use fi::{CloudupTask, Lifecycle, Link, ModelBuilderContext};
use tracing::trace;

use crate::ModelBuilder;
use crate::context::{ModelContext, SecurityGroupInfo};
use crate::error::ModelError;

/// IP-in-IP, used by calico and kube-router overlays
pub const PROTOCOL_IPIP: &str = "4";

const ETCD_PORTS: [i64; 4] = [2380, 2381, 4001, 4002];
const CILIUM_ETCD_PEER_PORT: i64 = 2382;

/// Emits the per-role security groups and the rules between them
#[derive(Debug, Default)]
pub struct FirewallBuilder;

/// An ingress rule on `security_group` with every optional field unset
pub fn ingress(security_group: &SecurityGroup) -> SecurityGroupRule {
    SecurityGroupRule {
        name: String::new(),
        id: None,
        security_group: security_group.link(),
        egress: false,
        protocol: None,
        from_port: None,
        to_port: None,
        cidr: None,
        ipv6_cidr: None,
        source_group: None,
        tags: Default::default(),
        lifecycle: Lifecycle::Sync,
    }
}

/// Ingress from another group
pub fn from_group(security_group: &SecurityGroup, source: &SecurityGroup) -> SecurityGroupRule {
    SecurityGroupRule {
        source_group: Some(source.link()),
        ..ingress(security_group)
    }
}

/// Ingress from a CIDR, routed to the v4 or v6 field by its family
pub fn from_cidr(security_group: &SecurityGroup, cidr: &str) -> SecurityGroupRule {
    let mut rule = ingress(security_group);
    if cidr.contains(':') {
        rule.ipv6_cidr = Some(cidr.to_string());
    } else {
        rule.cidr = Some(cidr.to_string());
    }
    rule
}

/// Restricts a rule to one protocol and port range
pub fn with_ports(rule: SecurityGroupRule, protocol: &str, from: i64, to: i64) -> SecurityGroupRule {
    SecurityGroupRule {
        protocol: Some(protocol.to_string()),
        from_port: Some(from),
        to_port: Some(to),
        ..rule
    }
}

/// `from-<src>-<ingress|egress>-<proto>-<from>to<to>-<dst>`
///
/// The target is the source group, else the CIDR, else the IPv6 CIDR.
pub fn rule_name(rule: &SecurityGroupRule) -> String {
    let target = rule
        .source_group
        .as_ref()
        .map(|g| g.name().to_string())
        .or_else(|| rule.cidr.clone())
        .or_else(|| rule.ipv6_cidr.clone())
        .unwrap_or_else(|| "0.0.0.0/0".to_string());
    let proto = rule.protocol.as_deref().filter(|p| !p.is_empty()).unwrap_or("all");
    let group = rule.security_group.name();
    let (src, direction, dst) = if rule.egress {
        (group, "egress", target.as_str())
    } else {
        (target.as_str(), "ingress", group)
    };
    format!(
        "from-{src}-{direction}-{proto}-{}to{}-{dst}",
        rule.from_port.unwrap_or(0),
        rule.to_port.unwrap_or(0)
    )
}

/// Names the rule, copies the group's tags onto it and registers it
pub fn add_directional_rule(
    c: &mut ModelBuilderContext,
    security_group: &SecurityGroup,
    rule: SecurityGroupRule,
) -> Result<Link<SecurityGroupRule>, ModelError> {
    let name = rule_name(&rule);
    add_named_rule(c, security_group, name, rule)
}

/// Registers a rule under a fixed name with the group's tags
pub fn add_named_rule(
    c: &mut ModelBuilderContext,
    security_group: &SecurityGroup,
    name: String,
    mut rule: SecurityGroupRule,
) -> Result<Link<SecurityGroupRule>, ModelError> {
    rule.name = name;
    rule.tags = security_group.tags.clone();
    rule.tags.insert("Name".to_string(), rule.name.clone());
    trace!(rule = %rule.name, "Adding rule");
    Ok(c.add(rule)?)
}

/// ICMP rule letting path MTU discovery through from a CIDR
pub fn add_pmtu_rule(
    c: &mut ModelBuilderContext,
    security_group: &SecurityGroup,
    prefix: &str,
    cidr: &str,
) -> Result<Link<SecurityGroupRule>, ModelError> {
    let (name, rule) = if cidr.contains(':') {
        (
            format!("icmpv6-pmtu-{prefix}-{cidr}"),
            with_ports(from_cidr(security_group, cidr), "icmpv6", -1, -1),
        )
    } else {
        (
            format!("icmp-pmtu-{prefix}-{cidr}"),
            with_ports(from_cidr(security_group, cidr), "icmp", 3, 4),
        )
    };
    add_named_rule(c, security_group, name, rule)
}

/// Full v4 and v6 egress for a group
pub fn add_full_egress(c: &mut ModelBuilderContext, security_group: &SecurityGroup) -> Result<(), ModelError> {
    for cidr in ["0.0.0.0/0", "::/0"] {
        let rule = SecurityGroupRule {
            egress: true,
            ..from_cidr(security_group, cidr)
        };
        add_directional_rule(c, security_group, rule)?;
    }
    Ok(())
}

/// Registers an existing group by id as a shared task and links to it
pub fn ensure_external_group(
    model: &ModelContext,
    c: &mut ModelBuilderContext,
    id: &str,
) -> Result<Link<SecurityGroup>, ModelError> {
    Ok(c.ensure(SecurityGroup {
        name: id.to_string(),
        id: Some(id.to_string()),
        vpc: model.link_to_vpc(),
        description: None,
        tags: Default::default(),
        shared: true,
        lifecycle: Lifecycle::Sync,
    })?)
}

/// Contiguous TCP ranges over 1-65535 that skip the blocked ports
fn open_ranges(blocked: &BTreeSet<i64>) -> Vec<(i64, i64)> {
    let mut ranges = Vec::new();
    let mut start = 1;
    for &port in blocked {
        if port > start {
            ranges.push((start, port - 1));
        }
        start = port + 1;
    }
    if start <= 65535 {
        ranges.push((start, 65535));
    }
    ranges
}

impl FirewallBuilder {
    fn add_groups(c: &mut ModelBuilderContext, groups: &[SecurityGroupInfo]) -> Result<(), ModelError> {
        for group in groups {
            c.add(group.task.clone())?;
            add_full_egress(c, &group.task)?;
        }
        Ok(())
    }

    fn all_between(
        c: &mut ModelBuilderContext,
        sources: &[SecurityGroupInfo],
        dests: &[SecurityGroupInfo],
    ) -> Result<(), ModelError> {
        for src in sources {
            for dest in dests {
                add_directional_rule(c, &dest.task, from_group(&dest.task, &src.task))?;
            }
        }
        Ok(())
    }

    fn node_to_master(
        model: &ModelContext,
        c: &mut ModelBuilderContext,
        nodes: &[SecurityGroupInfo],
        masters: &[SecurityGroupInfo],
    ) -> Result<(), ModelError> {
        let networking = &model.cluster.spec.networking;
        let mut blocked: BTreeSet<i64> = ETCD_PORTS.into_iter().collect();
        if model.cluster.cilium_etcd_managed() {
            blocked.insert(CILIUM_ETCD_PEER_PORT);
        }
        let tcp_ranges = open_ranges(&blocked);
        let mut protocols = Vec::new();
        if networking.calico.is_some() {
            protocols.push(PROTOCOL_IPIP);
        }
        if networking.kube_router.is_some() {
            protocols.push(PROTOCOL_IPIP);
        }
        protocols.dedup();

        for master in masters {
            for node in nodes {
                let base = from_group(&master.task, &node.task);
                add_directional_rule(c, &master.task, with_ports(base.clone(), "udp", 1, 65535))?;
                for &(from, to) in &tcp_ranges {
                    add_directional_rule(c, &master.task, with_ports(base.clone(), "tcp", from, to))?;
                }
                for protocol in &protocols {
                    let rule = SecurityGroupRule {
                        protocol: Some((*protocol).to_string()),
                        ..base.clone()
                    };
                    add_directional_rule(c, &master.task, rule)?;
                }
            }
        }

        if networking.amazon_vpc.is_some() {
            Self::all_between(c, nodes, masters)?;
        }
        Ok(())
    }
}

impl ModelBuilder for FirewallBuilder {
    fn build(&self, model: &ModelContext, c: &mut ModelBuilderContext) -> Result<(), ModelError> {
        let mut nodes = model.security_groups(InstanceGroupRole::Node);
        if !model.instance_groups_with_role(InstanceGroupRole::ApiServer).is_empty() {
            nodes.extend(model.security_groups(InstanceGroupRole::ApiServer));
        }
        let masters = model.security_groups(InstanceGroupRole::ControlPlane);

        Self::add_groups(c, &nodes)?;
        Self::all_between(c, &nodes, &nodes)?;

        Self::add_groups(c, &masters)?;
        Self::all_between(c, &masters, &masters)?;
        Self::all_between(c, &masters, &nodes)?;

        Self::node_to_master(model, c, &nodes, &masters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{group, minimal_cluster, model_for, model_with};
    use crds::CiliumNetworkingSpec;

    fn rule_names(c: ModelBuilderContext) -> Vec<String> {
        c.into_tasks()
            .of_kind::<SecurityGroupRule>()
            .into_iter()
            .map(|r| r.name.clone())
            .collect()
    }

    #[test]
    fn test_open_ranges() {
        let blocked: BTreeSet<i64> = ETCD_PORTS.into_iter().collect();
        assert_eq!(open_ranges(&blocked), vec![(1, 2379), (2382, 4000), (4003, 65535)]);
        let mut cilium = blocked.clone();
        cilium.insert(CILIUM_ETCD_PEER_PORT);
        assert_eq!(open_ranges(&cilium), vec![(1, 2379), (2383, 4000), (4003, 65535)]);
    }

    #[test]
    fn test_rule_names() {
        let model = model_for(minimal_cluster());
        let mut c = ModelBuilderContext::new();
        FirewallBuilder.build(&model, &mut c).unwrap();
        let names = rule_names(c);
        for expected in [
            "from-masters.minimal.example.com-egress-all-0to0-0.0.0.0/0",
            "from-nodes.minimal.example.com-egress-all-0to0-::/0",
            "from-nodes.minimal.example.com-ingress-all-0to0-nodes.minimal.example.com",
            "from-masters.minimal.example.com-ingress-all-0to0-nodes.minimal.example.com",
            "from-nodes.minimal.example.com-ingress-udp-1to65535-masters.minimal.example.com",
            "from-nodes.minimal.example.com-ingress-tcp-1to2379-masters.minimal.example.com",
            "from-nodes.minimal.example.com-ingress-tcp-2382to4000-masters.minimal.example.com",
            "from-nodes.minimal.example.com-ingress-tcp-4003to65535-masters.minimal.example.com",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
        assert!(!names.iter().any(|n| n.contains("-4-")));
    }

    #[test]
    fn test_rule_tags_copy_group_tags() {
        let model = model_for(minimal_cluster());
        let mut c = ModelBuilderContext::new();
        FirewallBuilder.build(&model, &mut c).unwrap();
        let rule = c
            .find(&Link::<SecurityGroupRule>::new(
                "from-masters.minimal.example.com-egress-all-0to0-0.0.0.0/0",
            ))
            .unwrap();
        assert_eq!(rule.tags["KubernetesCluster"], "minimal.example.com");
        assert_eq!(rule.tags["Name"], rule.name);
    }

    #[test]
    fn test_cilium_and_calico() {
        let mut cluster = minimal_cluster();
        cluster.spec.networking.cilium = Some(CiliumNetworkingSpec { etcd_managed: true });
        cluster.spec.networking.calico = Some(Default::default());
        let model = model_for(cluster);
        let mut c = ModelBuilderContext::new();
        FirewallBuilder.build(&model, &mut c).unwrap();
        let names = rule_names(c);
        assert!(names.iter().any(|n| n.ends_with("-ingress-tcp-2383to4000-masters.minimal.example.com")));
        assert!(names.iter().any(|n| n.ends_with("-ingress-4-0to0-masters.minimal.example.com")));
    }

    #[test]
    fn test_security_group_override() {
        let mut a = group("nodes-a", InstanceGroupRole::Node, &["us-test-1a"]);
        a.spec.security_group_override = Some("sg-shared".to_string());
        let mut b = group("nodes-b", InstanceGroupRole::Node, &["us-test-1a"]);
        b.spec.security_group_override = Some("sg-shared".to_string());
        let master = group("master-us-test-1a", InstanceGroupRole::ControlPlane, &["us-test-1a"]);
        let model = model_with(minimal_cluster(), vec![a, b, master]);
        let mut c = ModelBuilderContext::new();
        FirewallBuilder.build(&model, &mut c).unwrap();
        let tasks = c.into_tasks();
        let groups: Vec<&SecurityGroup> = tasks.of_kind::<SecurityGroup>();
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert!(names.contains(&"sg-shared-node"));
        assert!(!names.contains(&"nodes.minimal.example.com"));
        let shared = groups.iter().find(|g| g.name == "sg-shared-node").unwrap();
        assert!(shared.shared);
        assert_eq!(shared.id.as_deref(), Some("sg-shared"));
    }
}
