//! EBS volumes backing etcd members

use awstasks::EbsVolume;
use crds::validation::check_gp3;
use crds::{EtcdClusterSpec, EtcdMemberSpec};
use fi::{Lifecycle, ModelBuilderContext};

use crate::ModelBuilder;
use crate::context::{ModelContext, TAG_ROLE_PREFIX};
use crate::error::ModelError;

const DEFAULT_VOLUME_SIZE: i32 = 20;
const DEFAULT_VOLUME_TYPE: &str = "gp3";
const DEFAULT_GP3_IOPS: i32 = 3000;
const DEFAULT_GP3_THROUGHPUT: i32 = 125;
const DEFAULT_PROVISIONED_IOPS: i32 = 100;

/// Tag prefix etcd-manager uses to find the volumes of a cluster
pub const TAG_ETCD_PREFIX: &str = "k8s.io/etcd/";

/// Emits one volume per etcd member
#[derive(Debug, Default)]
pub struct MasterVolumeBuilder;

/// `<member>.etcd-<cluster>.<clusterName>`
pub fn volume_name(model: &ModelContext, etcd: &EtcdClusterSpec, member: &EtcdMemberSpec) -> String {
    format!("{}.etcd-{}.{}", member.name, etcd.name, model.cluster_name())
}

impl MasterVolumeBuilder {
    fn zone(model: &ModelContext, path: &str, member: &EtcdMemberSpec) -> Result<String, ModelError> {
        let ig = model.find_instance_group(&member.instance_group).ok_or_else(|| {
            ModelError::invalid(
                format!("{path}.instanceGroup"),
                format!("instance group {:?} not found", member.instance_group),
            )
        })?;
        let zones = model.zones_for(ig)?;
        match zones.as_slice() {
            [zone] => Ok(zone.clone()),
            _ => Err(ModelError::invalid(
                format!("{path}.instanceGroup"),
                format!(
                    "etcd member instance group {:?} must span exactly one zone, found {}",
                    member.instance_group,
                    zones.len()
                ),
            )),
        }
    }

    fn volume(
        model: &ModelContext,
        etcd: &EtcdClusterSpec,
        index: (usize, usize),
        member: &EtcdMemberSpec,
    ) -> Result<EbsVolume, ModelError> {
        let path = format!("spec.etcdClusters[{}].etcdMembers[{}]", index.0, index.1);
        let zone = Self::zone(model, &path, member)?;

        let volume_type = member.volume_type.clone().unwrap_or_else(|| DEFAULT_VOLUME_TYPE.to_string());
        let size = member.volume_size.unwrap_or(DEFAULT_VOLUME_SIZE);
        let (iops, throughput) = match volume_type.as_str() {
            "gp3" => (
                Some(member.volume_iops.unwrap_or(DEFAULT_GP3_IOPS)),
                Some(member.volume_throughput.unwrap_or(DEFAULT_GP3_THROUGHPUT)),
            ),
            "io1" | "io2" => (Some(member.volume_iops.unwrap_or(DEFAULT_PROVISIONED_IOPS)), None),
            _ => (member.volume_iops, member.volume_throughput),
        };
        check_gp3(Some(&volume_type), Some(size), iops, throughput)
            .map_err(|message| ModelError::invalid(path.clone(), message))?;

        let name = volume_name(model, etcd, member);
        let mut peers: Vec<&str> = etcd.members.iter().map(|m| m.name.as_str()).collect();
        peers.sort_unstable();
        let mut tags = model.cloud_tags(&name, false);
        tags.insert(
            format!("{TAG_ETCD_PREFIX}{}", etcd.name),
            format!("{}/{}", member.name, peers.join(",")),
        );
        tags.insert(format!("{TAG_ROLE_PREFIX}control-plane"), "1".to_string());
        tags.insert(format!("{TAG_ROLE_PREFIX}master"), "1".to_string());

        Ok(EbsVolume {
            name,
            id: None,
            availability_zone: zone,
            size_gb: i64::from(size),
            volume_type,
            iops: iops.map(i64::from),
            throughput: throughput.map(i64::from),
            encrypted: Some(member.encrypted_volume.unwrap_or(false)),
            kms_key_id: member.kms_key_id.clone(),
            tags,
            lifecycle: Lifecycle::Sync,
        })
    }
}

impl ModelBuilder for MasterVolumeBuilder {
    fn build(&self, model: &ModelContext, c: &mut ModelBuilderContext) -> Result<(), ModelError> {
        for (i, etcd) in model.cluster.spec.etcd_clusters.iter().enumerate() {
            for (j, member) in etcd.members.iter().enumerate() {
                c.add(Self::volume(model, etcd, (i, j), member)?)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{minimal_cluster, model_for};
    use fi::Link;

    #[test]
    fn test_default_volumes() {
        let model = model_for(minimal_cluster());
        let mut c = ModelBuilderContext::new();
        MasterVolumeBuilder.build(&model, &mut c).unwrap();
        assert_eq!(c.len(), 2);

        let volume = c
            .find(&Link::<EbsVolume>::new("a.etcd-main.minimal.example.com"))
            .unwrap();
        assert_eq!(volume.availability_zone, "us-test-1a");
        assert_eq!(volume.size_gb, 20);
        assert_eq!(volume.volume_type, "gp3");
        assert_eq!(volume.iops, Some(3000));
        assert_eq!(volume.throughput, Some(125));
        assert_eq!(volume.tags["k8s.io/etcd/main"], "a/a");
        assert_eq!(volume.tags["k8s.io/role/control-plane"], "1");
        assert_eq!(volume.tags["k8s.io/role/master"], "1");
        assert_eq!(volume.tags["kubernetes.io/cluster/minimal.example.com"], "owned");
        assert_eq!(volume.tags["Name"], "a.etcd-main.minimal.example.com");
    }

    #[test]
    fn test_peer_tag_lists_sorted_members() {
        let mut cluster = minimal_cluster();
        let main = &mut cluster.spec.etcd_clusters[0];
        let mut second = main.members[0].clone();
        second.name = "0".to_string();
        main.members.push(second);
        let model = model_for(cluster);
        let mut c = ModelBuilderContext::new();
        MasterVolumeBuilder.build(&model, &mut c).unwrap();
        let volume = c
            .find(&Link::<EbsVolume>::new("a.etcd-main.minimal.example.com"))
            .unwrap();
        assert_eq!(volume.tags["k8s.io/etcd/main"], "a/0,a");
    }

    #[test]
    fn test_gp3_ratio_rejected() {
        let mut cluster = minimal_cluster();
        let member = &mut cluster.spec.etcd_clusters[0].members[0];
        member.volume_size = Some(5);
        member.volume_iops = Some(4000);
        let model = model_for(cluster);
        let mut c = ModelBuilderContext::new();
        let err = MasterVolumeBuilder.build(&model, &mut c).unwrap_err();
        assert!(matches!(err, ModelError::Validation(_)));
    }

    #[test]
    fn test_unknown_instance_group() {
        let mut cluster = minimal_cluster();
        cluster.spec.etcd_clusters[0].members[0].instance_group = "nope".to_string();
        let model = model_for(cluster);
        let mut c = ModelBuilderContext::new();
        assert!(MasterVolumeBuilder.build(&model, &mut c).is_err());
    }
}
