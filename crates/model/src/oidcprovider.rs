//! IAM trust for the service account issuer

use awstasks::IamOidcProvider;
use fi::{Lifecycle, ModelBuilderContext};

use crate::ModelBuilder;
use crate::context::ModelContext;
use crate::error::ModelError;

/// Audience AWS STS presents when exchanging web identity tokens
pub const STS_AUDIENCE: &str = "amazonaws.com";

/// Registers the issuer as an IAM OIDC provider when enabled
#[derive(Debug, Default)]
pub struct OidcProviderBuilder;

impl ModelBuilder for OidcProviderBuilder {
    fn build(&self, model: &ModelContext, c: &mut ModelBuilderContext) -> Result<(), ModelError> {
        let Some(discovery) = model
            .cluster
            .spec
            .service_account_issuer_discovery
            .as_ref()
            .filter(|d| d.enable_aws_oidc_provider)
        else {
            return Ok(());
        };

        let mut client_ids = vec![STS_AUDIENCE.to_string()];
        client_ids.extend(discovery.additional_audiences.iter().cloned());
        client_ids.sort();
        client_ids.dedup();

        let mut thumbprints = discovery.thumbprints.clone();
        thumbprints.sort();
        thumbprints.dedup();

        let name = model.cluster_name().to_string();
        c.add(IamOidcProvider {
            tags: model.cloud_tags(&name, false),
            name,
            url: model.cluster.service_account_issuer(),
            client_ids,
            thumbprints,
            arn: None,
            lifecycle: Lifecycle::Sync,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{minimal_cluster, model_for};
    use crds::ServiceAccountIssuerDiscoveryConfig;
    use fi::Link;

    #[test]
    fn test_disabled_by_default() {
        let model = model_for(minimal_cluster());
        let mut c = ModelBuilderContext::new();
        OidcProviderBuilder.build(&model, &mut c).unwrap();
        assert!(c.is_empty());
    }

    #[test]
    fn test_provider_audiences() {
        let mut cluster = minimal_cluster();
        cluster.spec.service_account_issuer_discovery = Some(ServiceAccountIssuerDiscoveryConfig {
            discovery_store: Some("s3://oidc-bucket/minimal.example.com".to_string()),
            enable_aws_oidc_provider: true,
            additional_audiences: vec!["sts.example".to_string(), "amazonaws.com".to_string()],
            thumbprints: vec!["f".repeat(40), "a".repeat(40)],
        });
        let model = model_for(cluster);
        let mut c = ModelBuilderContext::new();
        OidcProviderBuilder.build(&model, &mut c).unwrap();

        let provider = c
            .find(&Link::<IamOidcProvider>::new("minimal.example.com"))
            .unwrap();
        assert_eq!(provider.url, "https://api.internal.minimal.example.com");
        assert_eq!(provider.client_ids, vec!["amazonaws.com", "sts.example"]);
        assert_eq!(provider.thumbprints[0], "a".repeat(40));
        assert_eq!(provider.tags["Name"], "minimal.example.com");
    }
}
