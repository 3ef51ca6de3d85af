//! VPC, subnets, gateways and routing

use std::collections::BTreeMap;

use awstasks::{
    DhcpOptions, EgressOnlyInternetGateway, ElasticIp, InternetGateway, NatGateway, Route, RouteTable,
    RouteTableAssociation, Subnet, Vpc, VpcAmazonIpv6CidrBlock, VpcCidrBlock, VpcDhcpOptionsAssociation,
};
use crds::validation::{EgressKind, check_zone_egress, classify_egress};
use crds::{ClusterSubnetSpec, RouteSpec, SubnetType};
use fi::{Lifecycle, Link, ModelBuilderContext};
use tracing::{debug, trace, warn};

use crate::ModelBuilder;
use crate::context::{ModelContext, TAG_KOPS_ROLE};
use crate::error::ModelError;

/// Name of the Amazon-provided IPv6 block association
pub const AMAZON_IPV6_BLOCK: &str = "AmazonIPv6";

const TAG_SUBNET_PUBLIC_ELB: &str = "kubernetes.io/role/elb";
const TAG_SUBNET_INTERNAL_ELB: &str = "kubernetes.io/role/internal-elb";

/// Emits the network the cluster runs in
#[derive(Debug, Default)]
pub struct NetworkBuilder;

#[derive(Debug, Default)]
struct ZoneInfo<'a> {
    private_subnets: Vec<&'a ClusterSubnetSpec>,
}

fn route(name: impl Into<String>, route_table: Link<RouteTable>) -> Route {
    Route {
        name: name.into(),
        id: None,
        route_table,
        cidr: None,
        ipv6_cidr: None,
        internet_gateway: None,
        egress_only_internet_gateway: None,
        nat_gateway: None,
        transit_gateway_id: None,
        instance_id: None,
        vpc_peering_connection_id: None,
        lifecycle: Lifecycle::Sync,
    }
}

fn is_unmanaged(subnet: &ClusterSubnetSpec) -> bool {
    subnet.egress.as_deref() == Some("External")
}

impl NetworkBuilder {
    fn build_vpc(model: &ModelContext, c: &mut ModelBuilderContext) -> Result<(), ModelError> {
        let shared = model.cluster.shared_vpc();
        let name = model.cluster_name().to_string();
        let networking = &model.cluster.spec.networking;

        c.add(Vpc {
            name: name.clone(),
            id: networking.network_id.clone(),
            cidr: networking.network_cidr.clone(),
            enable_dns_hostnames: (!shared).then_some(true),
            enable_dns_support: Some(true),
            tags: if shared { Default::default() } else { model.cloud_tags(&name, false) },
            shared,
            lifecycle: Lifecycle::Sync,
        })?;

        if shared {
            debug!(vpc = ?networking.network_id, "Using shared VPC");
            return Ok(());
        }

        if model.is_ipv6_capable() {
            c.add(VpcAmazonIpv6CidrBlock {
                name: AMAZON_IPV6_BLOCK.to_string(),
                vpc: model.link_to_vpc(),
                shared: false,
                lifecycle: Lifecycle::Sync,
            })?;
        }

        for cidr in &networking.additional_network_cidrs {
            c.add(VpcCidrBlock {
                name: cidr.clone(),
                vpc: model.link_to_vpc(),
                cidr_block: cidr.clone(),
                shared: false,
                lifecycle: Lifecycle::Sync,
            })?;
        }

        let domain_name = if model.region() == "us-east-1" {
            "ec2.internal".to_string()
        } else {
            format!("{}.compute.internal", model.region())
        };
        let dhcp = c.add(DhcpOptions {
            name: name.clone(),
            id: None,
            domain_name: Some(domain_name),
            domain_name_servers: Some("AmazonProvidedDNS".to_string()),
            tags: model.cloud_tags(&name, false),
            shared: false,
            lifecycle: Lifecycle::Sync,
        })?;
        c.add(VpcDhcpOptionsAssociation {
            name,
            vpc: model.link_to_vpc(),
            dhcp_options: dhcp,
            lifecycle: Lifecycle::Sync,
        })?;
        Ok(())
    }

    fn subnet_tags(model: &ModelContext, subnet: &ClusterSubnetSpec) -> awstasks::Tags {
        if model.cluster.spec.networking.tag_subnets == Some(false) {
            trace!(subnet = %subnet.name, "Skipping subnet tags");
            return awstasks::Tags::new();
        }
        let name = model.subnet_task_name(subnet);
        let mut tags = model.cloud_tags(&name, subnet.id.is_some());
        tags.insert("SubnetType".to_string(), subnet.subnet_type.as_str().to_string());
        let elb_tag = match subnet.subnet_type {
            SubnetType::Public | SubnetType::Utility => TAG_SUBNET_PUBLIC_ELB,
            SubnetType::Private | SubnetType::DualStack => TAG_SUBNET_INTERNAL_ELB,
        };
        tags.insert(elb_tag.to_string(), "1".to_string());
        for ig in &model.instance_groups {
            if ig.spec.subnets.iter().any(|s| s == &subnet.name) {
                tags.insert(format!("kops.k8s.io/instance-group/{}", ig.group_name()), "true".to_string());
            }
        }
        tags
    }

    /// Utility (or failing that, public) subnet hosting the zone's NAT gateway
    fn egress_subnet(model: &ModelContext, zone: &str) -> Option<Link<Subnet>> {
        let subnets = &model.cluster.spec.networking.subnets;
        let pick = |subnet_type: SubnetType| {
            subnets
                .iter()
                .filter(|s| s.zone == zone && s.subnet_type == subnet_type)
                .min_by(|a, b| a.name.cmp(&b.name))
        };
        match pick(SubnetType::Utility).or_else(|| pick(SubnetType::Public)) {
            Some(subnet) => Some(model.link_to_subnet(subnet)),
            None => {
                warn!(zone, "No utility subnet in zone; NAT gateway is created without a subnet");
                None
            }
        }
    }

    fn build_additional_routes(
        model: &ModelContext,
        c: &mut ModelBuilderContext,
        subnet: &ClusterSubnetSpec,
        routes: &[RouteSpec],
        route_table: &Link<RouteTable>,
    ) -> Result<(), ModelError> {
        for spec in routes {
            let mut r = route(format!("{}.{}", subnet.name, spec.cidr), route_table.clone());
            r.cidr = Some(spec.cidr.clone());
            let target = spec.target.as_str();
            if target.starts_with("pcx-") {
                r.vpc_peering_connection_id = Some(target.to_string());
            } else if target.starts_with("i-") {
                r.instance_id = Some(target.to_string());
            } else if target.starts_with("tgw-") {
                r.transit_gateway_id = Some(target.to_string());
            } else if target.starts_with("nat-") {
                r.nat_gateway = Some(c.ensure(NatGateway {
                    name: target.to_string(),
                    id: Some(target.to_string()),
                    subnet: None,
                    elastic_ip: None,
                    tags: Default::default(),
                    shared: true,
                    lifecycle: Lifecycle::Sync,
                })?);
            } else if target.starts_with("igw-") {
                r.internet_gateway = Some(c.ensure(InternetGateway {
                    name: target.to_string(),
                    id: Some(target.to_string()),
                    vpc: model.link_to_vpc(),
                    tags: Default::default(),
                    shared: true,
                    lifecycle: Lifecycle::Sync,
                })?);
            } else if target.starts_with("eigw-") {
                r.egress_only_internet_gateway = Some(c.ensure(EgressOnlyInternetGateway {
                    name: target.to_string(),
                    id: Some(target.to_string()),
                    vpc: model.link_to_vpc(),
                    tags: Default::default(),
                    shared: true,
                    lifecycle: Lifecycle::Sync,
                })?);
            } else {
                return Err(ModelError::invalid(
                    format!("spec.networking.subnets[{}].additionalRoutes", subnet.name),
                    format!("unsupported route target {target:?}"),
                ));
            }
            c.add(r)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines, reason = "one pass over the zone's egress options")]
    fn build_zone_egress(
        model: &ModelContext,
        c: &mut ModelBuilderContext,
        zone: &str,
        info: &ZoneInfo<'_>,
        all_shared_in_zone: bool,
        eigw: Option<&Link<EgressOnlyInternetGateway>>,
    ) -> Result<(), ModelError> {
        let Some(first) = info.private_subnets.first() else {
            return Ok(());
        };
        let egress = first.egress.as_deref();
        let public_ip = first.public_ip.as_deref().filter(|ip| !ip.is_empty());
        let egress_name = model.name_for_zone_egress(zone);
        let field = format!("spec.networking.subnets[{}].egress", first.name);
        let kind = classify_egress(egress).map_err(|message| ModelError::invalid(&field, message))?;

        let mut nat_gateway = None;
        let mut transit_gateway_id = None;
        let mut instance_id = None;
        match kind {
            EgressKind::NatGateway => {
                nat_gateway = Some(c.add(NatGateway {
                    name: egress_name.clone(),
                    id: egress.map(ToString::to_string),
                    subnet: None,
                    elastic_ip: None,
                    tags: model.cloud_tags(&egress_name, true),
                    shared: true,
                    lifecycle: Lifecycle::Sync,
                })?);
            }
            EgressKind::ElasticIp => {
                let eip = c.add(ElasticIp {
                    name: egress_name.clone(),
                    id: egress.map(ToString::to_string),
                    tags: model.cloud_tags(&egress_name, true),
                    public_ip: None,
                    shared: true,
                    lifecycle: Lifecycle::Sync,
                })?;
                nat_gateway = Some(c.add(NatGateway {
                    name: egress_name.clone(),
                    id: None,
                    subnet: Self::egress_subnet(model, zone),
                    elastic_ip: Some(eip),
                    tags: model.cloud_tags(&egress_name, false),
                    shared: false,
                    lifecycle: Lifecycle::Sync,
                })?);
            }
            EgressKind::Instance => instance_id = egress.map(ToString::to_string),
            EgressKind::TransitGateway => transit_gateway_id = egress.map(ToString::to_string),
            EgressKind::External => {
                debug!(zone, "Egress handled externally");
            }
            EgressKind::Default => {
                let eip = c.add(ElasticIp {
                    name: egress_name.clone(),
                    id: None,
                    tags: model.cloud_tags(&egress_name, public_ip.is_some()),
                    public_ip: public_ip.map(ToString::to_string),
                    shared: public_ip.is_some(),
                    lifecycle: Lifecycle::Sync,
                })?;
                nat_gateway = Some(c.add(NatGateway {
                    name: egress_name.clone(),
                    id: None,
                    subnet: Self::egress_subnet(model, zone),
                    elastic_ip: Some(eip),
                    tags: model.cloud_tags(&egress_name, false),
                    shared: false,
                    lifecycle: Lifecycle::Sync,
                })?);
            }
        }

        let rt_name = model.name_private_route_table_in_zone(zone);
        let mut rt_tags = model.cloud_tags(&rt_name, all_shared_in_zone);
        rt_tags.insert(TAG_KOPS_ROLE.to_string(), format!("private-{zone}"));
        let rt = c.add(RouteTable {
            name: rt_name,
            id: None,
            vpc: model.link_to_vpc(),
            tags: rt_tags,
            shared: all_shared_in_zone,
            lifecycle: Lifecycle::Sync,
        })?;

        if kind != EgressKind::External {
            let mut default_route = route(format!("private-{zone}-0.0.0.0/0"), rt.clone());
            default_route.cidr = Some("0.0.0.0/0".to_string());
            default_route.nat_gateway = nat_gateway.clone();
            default_route.transit_gateway_id = transit_gateway_id.clone();
            default_route.instance_id = instance_id;
            c.add(default_route)?;
        }

        if model.is_ipv6_only() {
            if nat_gateway.is_some() || transit_gateway_id.is_some() {
                let mut nat64 = route(format!("private-{zone}-64:ff9b::/96"), rt.clone());
                nat64.ipv6_cidr = Some("64:ff9b::/96".to_string());
                nat64.nat_gateway = nat_gateway;
                nat64.transit_gateway_id = transit_gateway_id;
                c.add(nat64)?;
            }
            if let Some(eigw) = eigw {
                let mut v6 = route(format!("private-{zone}-::/0"), rt.clone());
                v6.ipv6_cidr = Some("::/0".to_string());
                v6.egress_only_internet_gateway = Some(eigw.clone());
                c.add(v6)?;
            }
        }

        for subnet in &info.private_subnets {
            Self::build_additional_routes(model, c, subnet, &subnet.additional_routes, &rt)?;
        }
        Ok(())
    }
}

impl ModelBuilder for NetworkBuilder {
    #[allow(clippy::too_many_lines, reason = "subnets, gateways and route tables are built together")]
    fn build(&self, model: &ModelContext, c: &mut ModelBuilderContext) -> Result<(), ModelError> {
        let subnets = &model.cluster.spec.networking.subnets;
        if let Err((zone, message)) = check_zone_egress(subnets) {
            return Err(ModelError::invalid(format!("spec.networking.subnets[zone={zone}]"), message));
        }

        Self::build_vpc(model, c)?;
        let shared_vpc = model.cluster.shared_vpc();
        let cluster_name = model.cluster_name().to_string();

        let all_unmanaged = subnets.iter().all(is_unmanaged);
        let all_private_unmanaged = subnets
            .iter()
            .filter(|s| s.subnet_type.is_private())
            .all(is_unmanaged);
        let all_shared = subnets.iter().all(|s| s.id.is_some());
        let mut all_shared_in_zone: BTreeMap<&str, bool> = BTreeMap::new();
        for subnet in subnets {
            let entry = all_shared_in_zone.entry(subnet.zone.as_str()).or_insert(true);
            *entry &= subnet.id.is_some();
        }

        let mut public_route_table = None;
        if !all_unmanaged {
            let igw = c.add(InternetGateway {
                name: cluster_name.clone(),
                id: None,
                vpc: model.link_to_vpc(),
                tags: model.cloud_tags(&cluster_name, shared_vpc),
                shared: shared_vpc,
                lifecycle: Lifecycle::Sync,
            })?;

            if !all_shared {
                let mut tags = model.cloud_tags(&cluster_name, false);
                tags.insert(TAG_KOPS_ROLE.to_string(), "public".to_string());
                let rt = c.add(RouteTable {
                    name: cluster_name.clone(),
                    id: None,
                    vpc: model.link_to_vpc(),
                    tags,
                    shared: false,
                    lifecycle: Lifecycle::Sync,
                })?;

                let mut v4 = route("0.0.0.0/0", rt.clone());
                v4.cidr = Some("0.0.0.0/0".to_string());
                v4.internet_gateway = Some(igw.clone());
                c.add(v4)?;

                let mut v6 = route("::/0", rt.clone());
                v6.ipv6_cidr = Some("::/0".to_string());
                v6.internet_gateway = Some(igw);
                c.add(v6)?;

                public_route_table = Some(rt);
            }
        }

        let mut zones: BTreeMap<&str, ZoneInfo<'_>> = BTreeMap::new();
        for spec in subnets {
            let shared_subnet = spec.id.is_some();
            let subnet = c.add(Subnet {
                name: model.subnet_task_name(spec),
                id: spec.id.clone(),
                vpc: model.link_to_vpc(),
                availability_zone: Some(spec.zone.clone()),
                cidr: spec.cidr.clone(),
                ipv6_cidr: spec.ipv6_cidr.clone(),
                tags: Self::subnet_tags(model, spec),
                shared: shared_subnet,
                lifecycle: Lifecycle::Sync,
            })?;

            if shared_subnet || is_unmanaged(spec) {
                continue;
            }

            if spec.subnet_type.is_private() {
                c.add(RouteTableAssociation {
                    name: format!("private-{}.{cluster_name}", spec.name),
                    id: None,
                    route_table: Link::new(model.name_private_route_table_in_zone(&spec.zone)),
                    subnet,
                    lifecycle: Lifecycle::Sync,
                })?;
                zones.entry(spec.zone.as_str()).or_default().private_subnets.push(spec);
            } else if let Some(rt) = &public_route_table {
                c.add(RouteTableAssociation {
                    name: format!("{}.{cluster_name}", spec.name),
                    id: None,
                    route_table: rt.clone(),
                    subnet,
                    lifecycle: Lifecycle::Sync,
                })?;
            }
        }

        let eigw = if !all_private_unmanaged && model.is_ipv6_only() {
            Some(c.add(EgressOnlyInternetGateway {
                name: cluster_name.clone(),
                id: None,
                vpc: model.link_to_vpc(),
                tags: model.cloud_tags(&cluster_name, shared_vpc),
                shared: shared_vpc,
                lifecycle: Lifecycle::Sync,
            })?)
        } else {
            None
        };

        for (zone, info) in &zones {
            let shared_in_zone = all_shared_in_zone.get(zone).copied().unwrap_or(false);
            Self::build_zone_egress(model, c, zone, info, shared_in_zone, eigw.as_ref())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{cluster_with_subnets, model_for, private_subnet, utility_subnet};
    use awstasks::{NatGateway, Route, RouteTable, Subnet};
    use fi::CloudupTask;

    fn compile(model: &ModelContext) -> ModelBuilderContext {
        let mut c = ModelBuilderContext::new();
        NetworkBuilder.build(model, &mut c).unwrap();
        c
    }

    #[test]
    fn test_private_topology() {
        let model = model_for(cluster_with_subnets(vec![
            private_subnet("us-test-1a", "us-test-1a"),
            utility_subnet("utility-us-test-1a", "us-test-1a"),
        ]));
        let c = compile(&model);

        let nat = c.find(&Link::<NatGateway>::new("us-test-1a.minimal.example.com")).unwrap();
        assert_eq!(nat.subnet.as_ref().unwrap().name(), "utility-us-test-1a.minimal.example.com");

        let rt = c
            .find(&Link::<RouteTable>::new("private-us-test-1a.minimal.example.com"))
            .unwrap();
        assert_eq!(rt.tags[TAG_KOPS_ROLE], "private-us-test-1a");

        let default_route = c.find(&Link::<Route>::new("private-us-test-1a-0.0.0.0/0")).unwrap();
        assert_eq!(default_route.nat_gateway.as_ref().unwrap().name(), "us-test-1a.minimal.example.com");

        let subnet = c.find(&Link::<Subnet>::new("us-test-1a.minimal.example.com")).unwrap();
        assert_eq!(subnet.tags["SubnetType"], "Private");
        assert_eq!(subnet.tags["kubernetes.io/role/internal-elb"], "1");
        assert!(c.find(&Link::<RouteTableAssociation>::new("private-us-test-1a.minimal.example.com")).is_some());
        assert!(c.find(&Link::<RouteTableAssociation>::new("utility-us-test-1a.minimal.example.com")).is_some());
    }

    #[test]
    fn test_transit_gateway_only_on_private_route() {
        let mut private = private_subnet("us-test-1a", "us-test-1a");
        private.egress = Some("tgw-0123".to_string());
        let model = model_for(cluster_with_subnets(vec![private, utility_subnet("utility-a", "us-test-1a")]));
        let c = compile(&model);

        let default_route = c.find(&Link::<Route>::new("private-us-test-1a-0.0.0.0/0")).unwrap();
        assert_eq!(default_route.transit_gateway_id.as_deref(), Some("tgw-0123"));
        assert!(default_route.nat_gateway.is_none());
        let public = c.find(&Link::<Route>::new("0.0.0.0/0")).unwrap();
        assert!(public.transit_gateway_id.is_none());
        assert!(c.find(&Link::<NatGateway>::new("us-test-1a.minimal.example.com")).is_none());
    }

    #[test]
    fn test_existing_nat_gateway_is_shared() {
        let mut private = private_subnet("us-test-1a", "us-test-1a");
        private.egress = Some("nat-0abc".to_string());
        let model = model_for(cluster_with_subnets(vec![private]));
        let c = compile(&model);
        let nat = c.find(&Link::<NatGateway>::new("us-test-1a.minimal.example.com")).unwrap();
        assert!(nat.is_shared());
        assert_eq!(nat.id.as_deref(), Some("nat-0abc"));
    }

    #[test]
    fn test_unsupported_egress_rejected() {
        let mut private = private_subnet("us-test-1a", "us-test-1a");
        private.egress = Some("vpce-1".to_string());
        let model = model_for(cluster_with_subnets(vec![private]));
        let err = NetworkBuilder.build(&model, &mut ModelBuilderContext::new()).unwrap_err();
        assert!(matches!(err, ModelError::Validation(_)));
    }

    #[test]
    fn test_mixed_egress_rejected() {
        let a = private_subnet("a", "us-test-1a");
        let mut b = private_subnet("b", "us-test-1a");
        b.egress = Some("nat-1".to_string());
        let model = model_for(cluster_with_subnets(vec![a, b]));
        let err = NetworkBuilder.build(&model, &mut ModelBuilderContext::new()).unwrap_err();
        assert!(
            err.to_string()
                .contains("cannot mix egress values in private or IPv6-capable subnets")
        );
    }

    #[test]
    fn test_shared_vpc_skips_dhcp_and_tags() {
        let mut cluster = cluster_with_subnets(vec![private_subnet("us-test-1a", "us-test-1a")]);
        cluster.spec.networking.network_id = Some("vpc-123".to_string());
        let model = model_for(cluster);
        let mut c = ModelBuilderContext::new();
        NetworkBuilder.build(&model, &mut c).unwrap();
        let vpc = c.find(&model.link_to_vpc()).unwrap();
        assert!(vpc.shared);
        assert!(vpc.tags.is_empty());
        assert!(c.find(&Link::<DhcpOptions>::new("minimal.example.com")).is_none());
        let igw = c.find(&Link::<InternetGateway>::new("minimal.example.com")).unwrap();
        assert!(igw.shared);
    }

    #[test]
    fn test_additional_routes() {
        let mut private = private_subnet("us-test-1a", "us-test-1a");
        private.additional_routes = vec![
            RouteSpec {
                cidr: "10.1.0.0/16".to_string(),
                target: "pcx-1".to_string(),
            },
            RouteSpec {
                cidr: "10.2.0.0/16".to_string(),
                target: "nat-2".to_string(),
            },
        ];
        let model = model_for(cluster_with_subnets(vec![private, utility_subnet("utility-a", "us-test-1a")]));
        let c = compile(&model);
        let peering = c.find(&Link::<Route>::new("us-test-1a.10.1.0.0/16")).unwrap();
        assert_eq!(peering.vpc_peering_connection_id.as_deref(), Some("pcx-1"));
        let nat = c.find(&Link::<NatGateway>::new("nat-2")).unwrap();
        assert!(nat.shared);
    }
}
