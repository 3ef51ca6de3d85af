//! Loading and validation tests for cluster documents

use crds::{InstanceGroupRole, SubnetType, load_documents, validate_cluster};

const MINIMAL: &str = r#"
apiVersion: kops.k8s.io/v1alpha2
kind: Cluster
metadata:
  name: minimal.example.com
spec:
  cloudProvider: aws
  networking:
    networkCIDR: 172.20.0.0/16
    subnets:
    - name: us-test-1a
      zone: us-test-1a
      type: Private
      cidr: 172.20.32.0/19
    - name: utility-us-test-1a
      zone: us-test-1a
      type: Utility
      cidr: 172.20.4.0/22
  etcdClusters:
  - name: main
    etcdMembers:
    - name: a
      instanceGroup: master-us-test-1a
    backups:
      backupStore: memfs://backups/minimal.example.com/main
---
apiVersion: kops.k8s.io/v1alpha2
kind: InstanceGroup
metadata:
  name: master-us-test-1a
spec:
  role: Master
  subnets:
  - us-test-1a
---
apiVersion: kops.k8s.io/v1alpha2
kind: InstanceGroup
metadata:
  name: nodes
spec:
  role: Node
  subnets:
  - us-test-1a
"#;

#[test]
fn test_load_minimal_cluster() {
    let (cluster, groups) = load_documents(MINIMAL).unwrap();
    assert_eq!(cluster.cluster_name(), "minimal.example.com");
    assert_eq!(cluster.region().as_deref(), Some("us-test-1"));
    assert_eq!(cluster.spec.networking.subnets[1].subnet_type, SubnetType::Utility);
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].spec.role, InstanceGroupRole::ControlPlane);
    assert!(validate_cluster(&cluster, &groups).is_ok());
}

#[test]
fn test_load_requires_cluster() {
    let err = load_documents("apiVersion: kops.k8s.io/v1alpha2\nkind: InstanceGroup\nmetadata:\n  name: x\nspec:\n  role: Node\n").unwrap_err();
    assert!(matches!(err, crds::LoadError::MissingCluster));
}

#[test]
fn test_unknown_subnet_reported() {
    let (cluster, mut groups) = load_documents(MINIMAL).unwrap();
    groups[1].spec.subnets = vec!["does-not-exist".to_string()];
    let err = validate_cluster(&cluster, &groups).unwrap_err();
    assert!(err.errors().iter().any(|e| e.message.contains("does-not-exist")));
}

#[test]
fn test_mixed_egress_in_zone_rejected() {
    let (mut cluster, groups) = load_documents(MINIMAL).unwrap();
    let mut second = cluster.spec.networking.subnets[0].clone();
    second.name = "us-test-1a-b".to_string();
    second.cidr = Some("172.20.64.0/19".to_string());
    second.egress = Some("nat-0123456789".to_string());
    cluster.spec.networking.subnets.push(second);

    let err = validate_cluster(&cluster, &groups).unwrap_err();
    assert!(
        err.errors()
            .iter()
            .any(|e| e.message == "cannot mix egress values in private or IPv6-capable subnets")
    );
}

#[test]
fn test_etcd_member_must_be_control_plane() {
    let (mut cluster, groups) = load_documents(MINIMAL).unwrap();
    cluster.spec.etcd_clusters[0].members[0].instance_group = "nodes".to_string();
    let err = validate_cluster(&cluster, &groups).unwrap_err();
    assert!(err.errors().iter().any(|e| e.message.contains("not a control-plane group")));
}

#[test]
fn test_unsupported_egress_prefix() {
    let (mut cluster, groups) = load_documents(MINIMAL).unwrap();
    cluster.spec.networking.subnets[0].egress = Some("vpce-123".to_string());
    let err = validate_cluster(&cluster, &groups).unwrap_err();
    assert!(err.errors().iter().any(|e| e.field.ends_with(".egress")));
}

#[test]
fn test_gp3_ratio_validated() {
    assert!(crds::validation::check_gp3(Some("gp3"), Some(20), Some(3000), Some(125)).is_ok());
    assert!(crds::validation::check_gp3(Some("gp3"), Some(5), Some(3000), None).is_err());
    assert!(crds::validation::check_gp3(Some("gp3"), Some(20), Some(3000), Some(1000)).is_err());
    assert!(crds::validation::check_gp3(Some("gp2"), Some(20), None, None).is_ok());
}
