//! Fixtures shared by the builder tests

use crds::{
    Cluster, ClusterSpec, ClusterSubnetSpec, EtcdBackupSpec, EtcdClusterSpec, EtcdMemberSpec, InstanceGroup,
    InstanceGroupRole, InstanceGroupSpec, NetworkingSpec, SubnetType,
};
use fi::FeatureFlags;

use crate::ModelContext;

pub const CLUSTER: &str = "minimal.example.com";
pub const SSH_KEY: &str =
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIDiuKnN0WXZ3bd9w5Q8+JfhPb9U1OjpUSBVo1aTz4+4D admin@example";

fn subnet(name: &str, zone: &str, subnet_type: SubnetType, cidr: &str) -> ClusterSubnetSpec {
    ClusterSubnetSpec {
        name: name.to_string(),
        zone: zone.to_string(),
        subnet_type,
        cidr: Some(cidr.to_string()),
        ..Default::default()
    }
}

pub fn public_subnet(name: &str, zone: &str) -> ClusterSubnetSpec {
    subnet(name, zone, SubnetType::Public, "172.20.32.0/19")
}

pub fn private_subnet(name: &str, zone: &str) -> ClusterSubnetSpec {
    subnet(name, zone, SubnetType::Private, "172.20.64.0/19")
}

pub fn utility_subnet(name: &str, zone: &str) -> ClusterSubnetSpec {
    subnet(name, zone, SubnetType::Utility, "172.20.4.0/22")
}

fn etcd_cluster(name: &str, zone: &str) -> EtcdClusterSpec {
    EtcdClusterSpec {
        name: name.to_string(),
        version: Some("3.5.9".to_string()),
        members: vec![EtcdMemberSpec {
            name: "a".to_string(),
            instance_group: format!("master-{zone}"),
            ..Default::default()
        }],
        backups: Some(EtcdBackupSpec {
            backup_store: format!("memfs://state/{CLUSTER}/backups/etcd/{name}"),
        }),
        ..Default::default()
    }
}

pub fn cluster_with_subnets(subnets: Vec<ClusterSubnetSpec>) -> Cluster {
    let zone = subnets.first().map(|s| s.zone.clone()).unwrap_or_default();
    Cluster::new(
        CLUSTER,
        ClusterSpec {
            kubernetes_version: Some("1.29.0".to_string()),
            config_base: Some(format!("memfs://state/{CLUSTER}")),
            networking: NetworkingSpec {
                network_cidr: Some("172.20.0.0/16".to_string()),
                non_masquerade_cidr: Some("100.64.0.0/10".to_string()),
                service_cluster_ip_range: Some("100.64.0.0/13".to_string()),
                subnets,
                ..Default::default()
            },
            etcd_clusters: vec![etcd_cluster("main", &zone), etcd_cluster("events", &zone)],
            ssh_access: vec!["0.0.0.0/0".to_string()],
            kubernetes_api_access: vec!["0.0.0.0/0".to_string()],
            ..Default::default()
        },
    )
}

/// Single public zone
pub fn minimal_cluster() -> Cluster {
    cluster_with_subnets(vec![public_subnet("us-test-1a", "us-test-1a")])
}

pub fn group(name: &str, role: InstanceGroupRole, subnets: &[&str]) -> InstanceGroup {
    InstanceGroup::new(
        name,
        InstanceGroupSpec {
            role,
            image: Some("ami-12345678".to_string()),
            machine_type: Some("t3.medium".to_string()),
            subnets: subnets.iter().map(ToString::to_string).collect(),
            ..Default::default()
        },
    )
}

/// A control-plane and a node group in the first subnet of the cluster
pub fn default_groups(cluster: &Cluster) -> Vec<InstanceGroup> {
    let Some(first) = cluster.spec.networking.subnets.first() else {
        return Vec::new();
    };
    vec![
        group(&format!("master-{}", first.zone), InstanceGroupRole::ControlPlane, &[&first.name]),
        group("nodes", InstanceGroupRole::Node, &[&first.name]),
    ]
}

pub fn model_with(cluster: Cluster, groups: Vec<InstanceGroup>) -> ModelContext {
    ModelContext::new(cluster, groups, vec![SSH_KEY.to_string()], FeatureFlags::defaults()).unwrap()
}

pub fn model_for(cluster: Cluster) -> ModelContext {
    let groups = default_groups(&cluster);
    model_with(cluster, groups)
}
