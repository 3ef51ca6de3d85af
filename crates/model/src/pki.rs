//! Certificate authorities, certificates and legacy tokens

use std::net::IpAddr;

use awstasks::{Keypair, MirrorKeystore, MirrorSecrets, Secret};
use fi::pki::KeypairType;
use fi::{CloudupTask, Link, ModelBuilderContext};
use ipnet::IpNet;

use crate::ModelBuilder;
use crate::context::ModelContext;
use crate::error::ModelError;

/// Cluster root CA
pub const KUBERNETES_CA: &str = "kubernetes-ca";
/// API server serving certificate
pub const KUBERNETES_MASTER: &str = "kubernetes-master";
/// Service account signing key
pub const SERVICE_ACCOUNT: &str = "service-account";
/// CA shared by every etcd client
pub const ETCD_CLIENTS_CA: &str = "etcd-clients-ca";

const DEFAULT_SERVICE_CLUSTER_IP_RANGE: &str = "100.64.0.0/13";

/// Tokens kept for components that still authenticate with static tokens
pub const LEGACY_TOKENS: [&str; 9] = [
    "admin",
    "kube",
    "kube-proxy",
    "kubelet",
    "system:controller_manager",
    "system:dns",
    "system:logging",
    "system:monitoring",
    "system:scheduler",
];

/// Emits every keypair and secret the cluster needs
#[derive(Debug, Default)]
pub struct PkiBuilder;

/// First address of the service range, which the `kubernetes` service takes
pub fn first_service_ip(range: &str) -> Result<IpAddr, ModelError> {
    let net: IpNet = range.parse().map_err(|e| {
        ModelError::invalid("spec.networking.serviceClusterIPRange", format!("invalid CIDR {range:?}: {e}"))
    })?;
    let ip = match net {
        IpNet::V4(v4) => u32::from(v4.network())
            .checked_add(1)
            .map(|n| IpAddr::from(n.to_be_bytes())),
        IpNet::V6(v6) => u128::from(v6.network())
            .checked_add(1)
            .map(|n| IpAddr::from(n.to_be_bytes())),
    };
    ip.ok_or_else(|| {
        ModelError::invalid(
            "spec.networking.serviceClusterIPRange",
            format!("service range {range:?} has no address after its network address"),
        )
    })
}

fn ca(name: &str) -> Keypair {
    Keypair::new(name, format!("cn={name}"), KeypairType::Ca)
}

fn signed(name: &str, subject: &str, keypair_type: KeypairType, issuer: &Link<Keypair>) -> Keypair {
    Keypair {
        issuer: Some(issuer.clone()),
        ..Keypair::new(name, subject, keypair_type)
    }
}

impl PkiBuilder {
    fn master_alternate_names(model: &ModelContext) -> Result<Vec<String>, ModelError> {
        let range = model
            .cluster
            .spec
            .networking
            .service_cluster_ip_range
            .as_deref()
            .unwrap_or(DEFAULT_SERVICE_CLUSTER_IP_RANGE);
        let domain = model.cluster.cluster_dns_domain();
        let mut names = vec![
            "kubernetes".to_string(),
            "kubernetes.default".to_string(),
            "kubernetes.default.svc".to_string(),
            format!("kubernetes.default.svc.{domain}"),
            model.api_public_name(),
            model.api_internal_name(),
            first_service_ip(range)?.to_string(),
        ];
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn build_etcd(model: &ModelContext, c: &mut ModelBuilderContext) -> Result<(), ModelError> {
        let clusters = &model.cluster.spec.etcd_clusters;
        if clusters.is_empty() {
            return Ok(());
        }
        for etcd in clusters {
            c.add(ca(&format!("etcd-manager-ca-{}", etcd.name)))?;
            c.add(ca(&format!("etcd-peers-ca-{}", etcd.name)))?;
        }
        c.add(ca(ETCD_CLIENTS_CA))?;

        if model.cluster.cilium_etcd_managed() {
            let cilium_ca = c.add(ca("etcd-clients-ca-cilium"))?;
            c.add(signed("etcd-client-cilium", "cn=cilium", KeypairType::Client, &cilium_ca))?;
        }
        Ok(())
    }

    fn build_mirrors(model: &ModelContext, c: &mut ModelBuilderContext) -> Result<(), ModelError> {
        let Some(store) = &model.cluster.spec.config_store else {
            return Ok(());
        };
        if let Some(path) = &store.keypairs {
            c.add(MirrorKeystore {
                name: "mirror-keystore".to_string(),
                mirror_path: path.clone(),
                lifecycle: fi::Lifecycle::Sync,
            })?;
        }
        if let Some(path) = &store.secrets {
            c.add(MirrorSecrets {
                name: "mirror-secrets".to_string(),
                mirror_path: path.clone(),
                lifecycle: fi::Lifecycle::Sync,
            })?;
        }
        Ok(())
    }
}

impl ModelBuilder for PkiBuilder {
    fn build(&self, model: &ModelContext, c: &mut ModelBuilderContext) -> Result<(), ModelError> {
        let kubernetes_ca = c.add(ca(KUBERNETES_CA))?;
        c.add(ca("apiserver-aggregator-ca"))?;
        c.add(ca(SERVICE_ACCOUNT))?;

        c.add(Keypair {
            alternate_names: Self::master_alternate_names(model)?,
            include_api_server_addresses: true,
            ..signed(KUBERNETES_MASTER, "cn=kubernetes-master", KeypairType::Server, &kubernetes_ca)
        })?;
        c.add(signed("kubelet", "cn=kubelet,o=system:nodes", KeypairType::Client, &kubernetes_ca))?;
        c.add(signed("kube-proxy", "cn=system:kube-proxy", KeypairType::Client, &kubernetes_ca))?;
        c.add(signed("kops", "cn=kops,o=system:masters", KeypairType::Client, &kubernetes_ca))?;

        Self::build_etcd(model, c)?;

        for token in LEGACY_TOKENS {
            c.add(Secret::new(token))?;
        }

        Self::build_mirrors(model, c)
    }
}

/// Link to the keypair of a well-known identity
pub fn link_to_keypair(name: &str) -> Link<Keypair> {
    Link::new(name)
}

/// Task key of the keypair of a well-known identity
pub fn keypair_key(name: &str) -> fi::TaskKey {
    fi::TaskKey::new(Keypair::KIND, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{minimal_cluster, model_for};
    use crds::{CiliumNetworkingSpec, ConfigStoreSpec, EtcdClusterSpec};

    fn build(model: &ModelContext) -> ModelBuilderContext {
        let mut c = ModelBuilderContext::new();
        PkiBuilder.build(model, &mut c).unwrap();
        c
    }

    #[test]
    fn test_first_service_ip() {
        assert_eq!(first_service_ip("100.64.0.0/13").unwrap().to_string(), "100.64.0.1");
        assert_eq!(first_service_ip("fd00:10:96::/112").unwrap().to_string(), "fd00:10:96::1");
        assert!(first_service_ip("not-a-cidr").is_err());
        assert!(matches!(
            first_service_ip("255.255.255.255/32"),
            Err(ModelError::Validation(_))
        ));
        assert!(first_service_ip("ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff/128").is_err());
    }

    #[test]
    fn test_master_certificate() {
        let model = model_for(minimal_cluster());
        let c = build(&model);
        let master = c.find(&link_to_keypair(KUBERNETES_MASTER)).unwrap();
        assert_eq!(master.issuer.as_ref().unwrap().name(), KUBERNETES_CA);
        assert!(master.include_api_server_addresses);
        for name in [
            "kubernetes",
            "kubernetes.default.svc.cluster.local",
            "api.minimal.example.com",
            "api.internal.minimal.example.com",
            "100.64.0.1",
        ] {
            assert!(master.alternate_names.iter().any(|n| n == name), "missing {name}");
        }
        assert!(c.find(&Link::<Secret>::new("system:scheduler")).is_some());
    }

    #[test]
    fn test_etcd_cas() {
        let mut cluster = minimal_cluster();
        cluster.spec.networking.cilium = Some(CiliumNetworkingSpec { etcd_managed: true });
        cluster.spec.etcd_clusters.push(EtcdClusterSpec {
            name: "cilium".to_string(),
            ..Default::default()
        });
        let model = model_for(cluster);
        let tasks = build(&model).into_tasks();
        let names: Vec<&str> = tasks.of_kind::<Keypair>().into_iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names.iter().filter(|n| n.starts_with("etcd-manager-ca-")).count(), 3);
        assert_eq!(names.iter().filter(|n| n.starts_with("etcd-peers-ca-")).count(), 3);
        assert_eq!(names.iter().filter(|n| **n == ETCD_CLIENTS_CA).count(), 1);
        assert!(names.contains(&"etcd-clients-ca-cilium"));
        assert!(names.contains(&"etcd-client-cilium"));
    }

    #[test]
    fn test_mirrors() {
        let mut cluster = minimal_cluster();
        cluster.spec.config_store = Some(ConfigStoreSpec {
            keypairs: Some("memfs://mirror/pki".to_string()),
            secrets: None,
        });
        let c = build(&model_for(cluster));
        assert!(c.find(&Link::<MirrorKeystore>::new("mirror-keystore")).is_some());
        assert!(c.find(&Link::<MirrorSecrets>::new("mirror-secrets")).is_none());
    }
}
