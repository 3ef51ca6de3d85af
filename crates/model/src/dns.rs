//! Hosted zone and API alias records

use awstasks::{AliasTarget, DnsName, DnsZone};
use fi::{Lifecycle, ModelBuilderContext};

use crate::ModelBuilder;
use crate::context::ModelContext;
use crate::error::ModelError;

/// Emits the hosted zone and the API records unless discovery is gossip based
#[derive(Debug, Default)]
pub struct DnsBuilder;

/// Hosted zone ids carry no dots, zone names always do
fn looks_like_zone_id(zone: &str) -> bool {
    !zone.trim_end_matches('.').contains('.')
}

impl DnsBuilder {
    fn zone(model: &ModelContext) -> DnsZone {
        let configured = model.cluster.dns_zone();
        let private = model.use_private_dns();
        let (dns_name, zone_id) = if looks_like_zone_id(&configured) {
            (model.cluster_name().to_string(), Some(configured.clone()))
        } else {
            (configured.trim_end_matches('.').to_string(), None)
        };
        DnsZone {
            name: model.name_for_dns_zone(),
            dns_name,
            zone_id,
            private,
            private_vpc: private.then(|| model.link_to_vpc()),
            lifecycle: Lifecycle::Sync,
        }
    }

    fn api_target(model: &ModelContext) -> AliasTarget {
        if model.use_network_load_balancer() {
            AliasTarget::NetworkLoadBalancer(model.link_to_api_network_load_balancer())
        } else {
            AliasTarget::ClassicLoadBalancer(model.link_to_api_classic_load_balancer())
        }
    }
}

impl ModelBuilder for DnsBuilder {
    fn build(&self, model: &ModelContext, c: &mut ModelBuilderContext) -> Result<(), ModelError> {
        if model.is_gossip() {
            return Ok(());
        }
        let zone = c.add(Self::zone(model))?;

        if model.use_load_balancer_for_api() {
            for name in [model.api_public_name(), model.api_internal_name()] {
                c.add(DnsName::alias(name, zone.clone(), Self::api_target(model)))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{minimal_cluster, model_for};
    use crds::{ApiSpec, DnsType, LoadBalancerAccessSpec, LoadBalancerClass};
    use fi::Link;

    fn build(cluster: crds::Cluster) -> ModelBuilderContext {
        let model = model_for(cluster);
        let mut c = ModelBuilderContext::new();
        DnsBuilder.build(&model, &mut c).unwrap();
        c
    }

    #[test]
    fn test_gossip_has_no_zone() {
        let mut cluster = minimal_cluster();
        cluster.metadata.name = Some("minimal.k8s.local".to_string());
        assert!(build(cluster).is_empty());
    }

    #[test]
    fn test_public_zone_without_load_balancer() {
        let c = build(minimal_cluster());
        let zone = c.find(&Link::<DnsZone>::new("minimal.example.com")).unwrap();
        assert_eq!(zone.dns_name, "minimal.example.com");
        assert!(!zone.private);
        assert!(zone.private_vpc.is_none());
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_private_zone_by_id() {
        let mut cluster = minimal_cluster();
        cluster.spec.dns_zone = Some("Z1AFAKE1ZON3YO".to_string());
        cluster.spec.topology.dns = DnsType::Private;
        let c = build(cluster);
        let zone = c.find(&Link::<DnsZone>::new("Z1AFAKE1ZON3YO")).unwrap();
        assert_eq!(zone.zone_id.as_deref(), Some("Z1AFAKE1ZON3YO"));
        assert_eq!(zone.dns_name, "minimal.example.com");
        assert!(zone.private);
        assert_eq!(zone.private_vpc.as_ref().unwrap().name(), "minimal.example.com");
    }

    #[test]
    fn test_api_records() {
        let mut cluster = minimal_cluster();
        cluster.spec.api = Some(ApiSpec {
            load_balancer: Some(LoadBalancerAccessSpec {
                class: LoadBalancerClass::Network,
                ..Default::default()
            }),
            public_name: None,
        });
        let c = build(cluster);
        for name in ["api.minimal.example.com", "api.internal.minimal.example.com"] {
            let record = c.find(&Link::<DnsName>::new(name)).unwrap();
            assert_eq!(record.record_type, "A");
            assert!(matches!(record.target, AliasTarget::NetworkLoadBalancer(_)));
        }
    }
}
