//! Pre-compile validation of a Cluster and its InstanceGroups
//!
//! Every problem found is collected so the user sees the full list at once.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use ipnet::IpNet;
use thiserror::Error;

use crate::cluster::{CloudProvider, Cluster, ClusterSubnetSpec};
use crate::instance_group::{InstanceGroup, InstanceGroupRole};

/// Etcd cluster names with known port assignments
pub const KNOWN_ETCD_CLUSTERS: [&str; 3] = ["main", "events", "cilium"];

/// A single invalid field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Path of the offending field, e.g. `spec.networking.subnets[0].egress`
    pub field: String,
    /// What is wrong with it
    pub message: String,
}

impl FieldError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validation failure carrying every field error found
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("validation failed: {}", join_errors(.0))]
pub struct ValidationError(pub Vec<FieldError>);

fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    /// Single-field error
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self(vec![FieldError::new(field, message)])
    }

    /// Errors found
    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }
}

/// Egress value kinds accepted on private subnets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EgressKind {
    /// Allocate a new EIP and NAT gateway
    Default,
    /// Existing NAT gateway (`nat-`)
    NatGateway,
    /// Existing elastic IP for a new NAT gateway (`eipalloc-`)
    ElasticIp,
    /// NAT instance (`i-`)
    Instance,
    /// Transit gateway (`tgw-`)
    TransitGateway,
    /// Egress handled outside the cluster
    External,
}

/// Classifies a subnet egress value
pub fn classify_egress(egress: Option<&str>) -> Result<EgressKind, String> {
    match egress.unwrap_or_default() {
        "" => Ok(EgressKind::Default),
        "External" => Ok(EgressKind::External),
        e if e.starts_with("nat-") => Ok(EgressKind::NatGateway),
        e if e.starts_with("eipalloc-") => Ok(EgressKind::ElasticIp),
        e if e.starts_with("i-") => Ok(EgressKind::Instance),
        e if e.starts_with("tgw-") => Ok(EgressKind::TransitGateway),
        e => Err(format!(
            "egress must reference a NAT gateway, elastic IP, NAT instance or transit gateway, got {e:?}"
        )),
    }
}

/// Checks that private and IPv6-capable subnets in one zone agree on egress and public IP
///
/// # Returns
/// The first mixing error found, keyed by zone
pub fn check_zone_egress(subnets: &[ClusterSubnetSpec]) -> Result<(), (String, String)> {
    let mut egress: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut public_ip: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for subnet in subnets {
        if !subnet.subnet_type.is_private() {
            continue;
        }
        egress
            .entry(subnet.zone.as_str())
            .or_default()
            .insert(subnet.egress.as_deref().unwrap_or_default());
        public_ip
            .entry(subnet.zone.as_str())
            .or_default()
            .insert(subnet.public_ip.as_deref().unwrap_or_default());
    }
    for (zone, values) in &egress {
        if values.len() > 1 {
            return Err((
                (*zone).to_string(),
                "cannot mix egress values in private or IPv6-capable subnets".to_string(),
            ));
        }
    }
    for (zone, values) in &public_ip {
        if values.len() > 1 {
            return Err((
                (*zone).to_string(),
                "cannot mix public IP values in private or IPv6-capable subnets".to_string(),
            ));
        }
    }
    Ok(())
}

/// Validates a cluster together with its instance groups
///
/// # Arguments
/// * `cluster` - The cluster description
/// * `groups` - All instance groups of the cluster
///
/// # Returns
/// `Ok(())` or every field error found
pub fn validate_cluster(cluster: &Cluster, groups: &[InstanceGroup]) -> Result<(), ValidationError> {
    let mut errors = Vec::new();
    let spec = &cluster.spec;

    if cluster.cluster_name().is_empty() {
        errors.push(FieldError::new("metadata.name", "cluster name is required"));
    }
    if spec.cloud_provider != CloudProvider::Aws {
        errors.push(FieldError::new(
            "spec.cloudProvider",
            format!("cloud provider {:?} is not supported by this model", spec.cloud_provider),
        ));
    }

    let networking = &spec.networking;
    match (&networking.network_cidr, &networking.network_id) {
        (Some(cidr), _) => {
            if cidr.parse::<IpNet>().is_err() {
                errors.push(FieldError::new("spec.networking.networkCIDR", format!("invalid CIDR {cidr:?}")));
            }
        }
        (None, None) => errors.push(FieldError::new(
            "spec.networking.networkCIDR",
            "networkCIDR is required when the VPC is not shared",
        )),
        (None, Some(_)) => {}
    }
    for (i, cidr) in networking.additional_network_cidrs.iter().enumerate() {
        if cidr.parse::<IpNet>().is_err() {
            errors.push(FieldError::new(
                format!("spec.networking.additionalNetworkCIDRs[{i}]"),
                format!("invalid CIDR {cidr:?}"),
            ));
        }
    }

    if networking.subnets.is_empty() {
        errors.push(FieldError::new("spec.networking.subnets", "at least one subnet is required"));
    }
    let mut subnet_names = HashSet::new();
    for (i, subnet) in networking.subnets.iter().enumerate() {
        let path = format!("spec.networking.subnets[{i}]");
        if !subnet_names.insert(subnet.name.as_str()) {
            errors.push(FieldError::new(format!("{path}.name"), format!("duplicate subnet name {:?}", subnet.name)));
        }
        if subnet.zone.is_empty() {
            errors.push(FieldError::new(format!("{path}.zone"), "zone is required"));
        }
        if let Some(cidr) = &subnet.cidr {
            if cidr.parse::<IpNet>().is_err() {
                errors.push(FieldError::new(format!("{path}.cidr"), format!("invalid CIDR {cidr:?}")));
            }
        } else if subnet.id.is_none() && subnet.ipv6_cidr.is_none() {
            errors.push(FieldError::new(format!("{path}.cidr"), "cidr is required for owned subnets"));
        }
        if let Err(message) = classify_egress(subnet.egress.as_deref()) {
            errors.push(FieldError::new(format!("{path}.egress"), message));
        }
        if subnet.egress.is_some() && !subnet.subnet_type.is_private() {
            errors.push(FieldError::new(
                format!("{path}.egress"),
                "egress can only be specified for private subnets",
            ));
        }
    }
    if let Err((zone, message)) = check_zone_egress(&networking.subnets) {
        errors.push(FieldError::new(format!("spec.networking.subnets[zone={zone}]"), message));
    }

    for (i, cidr) in spec.ssh_access.iter().enumerate() {
        if cidr.parse::<IpNet>().is_err() {
            errors.push(FieldError::new(format!("spec.sshAccess[{i}]"), format!("invalid CIDR {cidr:?}")));
        }
    }
    for (i, cidr) in spec.kubernetes_api_access.iter().enumerate() {
        if cidr.parse::<IpNet>().is_err() {
            errors.push(FieldError::new(
                format!("spec.kubernetesApiAccess[{i}]"),
                format!("invalid CIDR {cidr:?}"),
            ));
        }
    }

    let mut group_names = HashSet::new();
    for group in groups {
        let name = group.group_name();
        let path = format!("instanceGroup[{name}]");
        if !group_names.insert(name) {
            errors.push(FieldError::new(path.clone(), "duplicate instance group name"));
        }
        if group.spec.subnets.is_empty() {
            errors.push(FieldError::new(format!("{path}.spec.subnets"), "at least one subnet is required"));
        }
        let mut types = BTreeSet::new();
        for subnet_name in &group.spec.subnets {
            match networking.subnets.iter().find(|s| &s.name == subnet_name) {
                Some(subnet) => {
                    types.insert(subnet.subnet_type);
                }
                None => errors.push(FieldError::new(
                    format!("{path}.spec.subnets"),
                    format!("subnet {subnet_name:?} not found in cluster subnets"),
                )),
            }
        }
        if group.is_control_plane() && types.len() > 1 {
            errors.push(FieldError::new(
                format!("{path}.spec.subnets"),
                "control-plane subnets must all share one type",
            ));
        }
        if let (Some(min), Some(max)) = (group.spec.min_size, group.spec.max_size) {
            if min > max {
                errors.push(FieldError::new(
                    format!("{path}.spec.minSize"),
                    format!("minSize {min} is greater than maxSize {max}"),
                ));
            }
        }
        if let Some(volume) = &group.spec.root_volume {
            if let Err(message) = check_gp3(
                volume.volume_type.as_deref(),
                volume.size,
                volume.iops,
                volume.throughput,
            ) {
                errors.push(FieldError::new(format!("{path}.spec.rootVolume"), message));
            }
        }
    }

    validate_etcd(cluster, groups, &mut errors);

    if let Some(iam) = &spec.iam {
        for (i, sa) in iam.service_account_external_permissions.iter().enumerate() {
            if sa.name.contains('*') {
                errors.push(FieldError::new(
                    format!("spec.iam.serviceAccountExternalPermissions[{i}].name"),
                    format!("service account name cannot contain a wildcard {}", sa.name),
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError(errors))
    }
}

fn validate_etcd(cluster: &Cluster, groups: &[InstanceGroup], errors: &mut Vec<FieldError>) {
    for (i, etcd) in cluster.spec.etcd_clusters.iter().enumerate() {
        let path = format!("spec.etcdClusters[{i}]");
        if !KNOWN_ETCD_CLUSTERS.contains(&etcd.name.as_str()) {
            errors.push(FieldError::new(format!("{path}.name"), format!("unknown etcd cluster {:?}", etcd.name)));
        }
        if etcd.members.is_empty() {
            errors.push(FieldError::new(format!("{path}.etcdMembers"), "at least one member is required"));
        }
        let mut member_names = HashSet::new();
        for member in &etcd.members {
            let member_path = format!("{path}.etcdMembers[{}]", member.name);
            if !member_names.insert(member.name.as_str()) {
                errors.push(FieldError::new(member_path.clone(), "duplicate member name"));
            }
            match groups.iter().find(|g| g.group_name() == member.instance_group) {
                None => errors.push(FieldError::new(
                    format!("{member_path}.instanceGroup"),
                    format!("instance group {:?} not found", member.instance_group),
                )),
                Some(group) => {
                    if group.spec.role != InstanceGroupRole::ControlPlane {
                        errors.push(FieldError::new(
                            format!("{member_path}.instanceGroup"),
                            format!("instance group {:?} is not a control-plane group", member.instance_group),
                        ));
                    }
                    let zones: BTreeSet<&str> = group
                        .spec
                        .subnets
                        .iter()
                        .filter_map(|name| cluster.spec.networking.subnets.iter().find(|s| &s.name == name))
                        .map(|s| s.zone.as_str())
                        .collect();
                    if zones.len() != 1 {
                        errors.push(FieldError::new(
                            format!("{member_path}.instanceGroup"),
                            format!(
                                "instance group {:?} must be in exactly one zone, found {}",
                                member.instance_group,
                                zones.len()
                            ),
                        ));
                    }
                }
            }
            if let Err(message) = check_gp3(
                member.volume_type.as_deref(),
                member.volume_size,
                member.volume_iops,
                member.volume_throughput,
            ) {
                errors.push(FieldError::new(member_path, message));
            }
        }
    }
}

/// Checks gp3 IOPS and throughput ratios (`iops <= 500 * size`, `throughput <= 0.25 * iops`)
pub fn check_gp3(
    volume_type: Option<&str>,
    size: Option<i32>,
    iops: Option<i32>,
    throughput: Option<i32>,
) -> Result<(), String> {
    if volume_type != Some("gp3") {
        if throughput.is_some() {
            return Err("throughput is only supported for gp3 volumes".to_string());
        }
        return Ok(());
    }
    let iops = i64::from(iops.unwrap_or(3000));
    let throughput = i64::from(throughput.unwrap_or(125));
    if iops < 3000 {
        return Err(format!("gp3 iops must be at least 3000, got {iops}"));
    }
    if let Some(size) = size {
        if iops > 500 * i64::from(size) {
            return Err(format!("gp3 iops {iops} exceeds 500 per GiB for a {size} GiB volume"));
        }
    }
    if throughput < 125 {
        return Err(format!("gp3 throughput must be at least 125, got {throughput}"));
    }
    if throughput * 4 > iops {
        return Err(format!("gp3 throughput {throughput} exceeds 0.25 MiB/s per provisioned IOPS ({iops})"));
    }
    Ok(())
}
