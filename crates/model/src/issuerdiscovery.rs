//! Public OIDC discovery documents for the service account issuer

use std::sync::Arc;

use awstasks::ManagedFile;
use fi::{ModelBuilderContext, Resource, ResourceResolver, RunContext, TaskError};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::ModelBuilder;
use crate::context::ModelContext;
use crate::error::ModelError;
use crate::pki::{SERVICE_ACCOUNT, keypair_key};

pub const DISCOVERY_LOCATION: &str = ".well-known/openid-configuration";
pub const JWKS_LOCATION: &str = "openid/v1/jwks";

/// Document served at `.well-known/openid-configuration`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub jwks_uri: String,
    pub authorization_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub claims_supported: Vec<String>,
}

impl DiscoveryDocument {
    pub fn for_issuer(issuer: &str) -> Self {
        let issuer = issuer.trim_end_matches('/');
        Self {
            issuer: issuer.to_string(),
            jwks_uri: format!("{issuer}/{JWKS_LOCATION}"),
            authorization_endpoint: "urn:kubernetes:programmatic_authorization".to_string(),
            response_types_supported: vec!["id_token".to_string()],
            subject_types_supported: vec!["public".to_string()],
            id_token_signing_alg_values_supported: vec!["ES256".to_string()],
            claims_supported: vec!["sub".to_string(), "iss".to_string()],
        }
    }
}

/// Public keys of every trusted service-account signing key
#[derive(Debug, Default)]
pub struct JwksResolver;

impl JwksResolver {
    fn keys(keyset: &vfs_store::Keyset) -> Result<Vec<Value>, TaskError> {
        keyset
            .items
            .iter()
            .filter(|item| item.distrust_timestamp.is_none())
            .filter_map(|item| item.private_key.as_deref())
            .map(|pem| fi::pki::public_jwk(&keyset.name, pem))
            .collect()
    }
}

#[async_trait::async_trait]
impl ResourceResolver for JwksResolver {
    async fn resolve(&self, ctx: &RunContext) -> Result<Vec<u8>, TaskError> {
        let keys = match ctx.keystore.find_keyset(SERVICE_ACCOUNT).await? {
            Some(keyset) => Self::keys(&keyset)?,
            // not issued yet; a dry run never writes it
            None if ctx.target.is_dry_run() => {
                debug!("Service account keyset not issued yet");
                Vec::new()
            }
            None => {
                return Err(TaskError::Keyset {
                    name: SERVICE_ACCOUNT.to_string(),
                    message: "keyset not found".to_string(),
                });
            }
        };
        Ok(serde_json::to_vec_pretty(&json!({ "keys": keys }))?)
    }

    fn describe(&self) -> String {
        format!("jwks:{SERVICE_ACCOUNT}")
    }
}

/// Publishes the discovery document and key set to the discovery store
#[derive(Debug, Default)]
pub struct IssuerDiscoveryBuilder;

impl ModelBuilder for IssuerDiscoveryBuilder {
    fn build(&self, model: &ModelContext, c: &mut ModelBuilderContext) -> Result<(), ModelError> {
        let Some(store) = model
            .cluster
            .spec
            .service_account_issuer_discovery
            .as_ref()
            .and_then(|d| d.discovery_store.clone())
        else {
            return Ok(());
        };

        let document = DiscoveryDocument::for_issuer(&model.cluster.service_account_issuer());
        let text = serde_json::to_string_pretty(&document).map_err(|source| ModelError::Encode {
            what: "discovery document".to_string(),
            source,
        })?;

        let mut discovery = ManagedFile::new("discovery.json", DISCOVERY_LOCATION, Resource::from_string(text));
        discovery.base = Some(store.clone());
        discovery.public = true;
        c.add(discovery)?;

        let jwks = Resource::lazy(Arc::new(JwksResolver), vec![keypair_key(SERVICE_ACCOUNT)]);
        let mut keys = ManagedFile::new("keys.json", JWKS_LOCATION, jwks);
        keys.base = Some(store);
        keys.public = true;
        c.add(keys)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{minimal_cluster, model_for};
    use cloud_client::MemoryCloud;
    use crds::{KubeApiServerConfig, ServiceAccountIssuerDiscoveryConfig};
    use fi::pki::{CertificateRequest, KeypairType};
    use fi::DryRunTarget;
    use fi::{FeatureFlags, Link, Target};
    use vfs_store::{Keyset, VfsContext};

    fn discovery_cluster() -> crds::Cluster {
        let mut cluster = minimal_cluster();
        cluster.spec.service_account_issuer_discovery = Some(ServiceAccountIssuerDiscoveryConfig {
            discovery_store: Some("memfs://discovery/minimal.example.com".to_string()),
            ..Default::default()
        });
        cluster.spec.kube_api_server = Some(KubeApiServerConfig {
            service_account_issuer: Some("https://discovery.example.com/minimal.example.com".to_string()),
            ..Default::default()
        });
        cluster
    }

    fn run_context(target: Target) -> RunContext {
        let vfs = VfsContext::new(None);
        let base = vfs.resolve("memfs://clusters/minimal.example.com").unwrap();
        RunContext::new(
            "minimal.example.com",
            target,
            Arc::new(MemoryCloud::new("us-test-1", "123456789012")),
            Arc::new(ModelBuilderContext::new().into_tasks()),
            base,
            vfs,
            FeatureFlags::defaults(),
        )
    }

    #[test]
    fn test_nothing_without_store() {
        let model = model_for(minimal_cluster());
        let mut c = ModelBuilderContext::new();
        IssuerDiscoveryBuilder.build(&model, &mut c).unwrap();
        assert!(c.is_empty());
    }

    #[test]
    fn test_public_documents() {
        let model = model_for(discovery_cluster());
        let mut c = ModelBuilderContext::new();
        IssuerDiscoveryBuilder.build(&model, &mut c).unwrap();

        let discovery = c.find(&Link::<ManagedFile>::new("discovery.json")).unwrap();
        assert!(discovery.public);
        assert_eq!(discovery.base.as_deref(), Some("memfs://discovery/minimal.example.com"));
        let text = discovery.contents.as_text().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["issuer"], "https://discovery.example.com/minimal.example.com");
        assert_eq!(
            value["jwks_uri"],
            "https://discovery.example.com/minimal.example.com/openid/v1/jwks"
        );

        let keys = c.find(&Link::<ManagedFile>::new("keys.json")).unwrap();
        assert_eq!(keys.location, JWKS_LOCATION);
        assert_eq!(keys.contents.predecessors(), &[keypair_key(SERVICE_ACCOUNT)]);
    }

    #[tokio::test]
    async fn test_jwks_dry_run_without_keyset() {
        let ctx = run_context(Target::DryRun(Arc::new(DryRunTarget::new())));
        let bytes = JwksResolver.resolve(&ctx).await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["keys"], json!([]));
    }

    #[tokio::test]
    async fn test_jwks_missing_keyset_fails() {
        let ctx = run_context(Target::Direct);
        let err = JwksResolver.resolve(&ctx).await.unwrap_err();
        assert!(matches!(err, TaskError::Keyset { .. }));
    }

    #[tokio::test]
    async fn test_jwks_skips_distrusted_items() {
        let ctx = run_context(Target::Direct);
        let request = CertificateRequest {
            common_name: SERVICE_ACCOUNT.to_string(),
            organizations: Vec::new(),
            alternate_names: Vec::new(),
            keypair_type: KeypairType::Ca,
        };
        let trusted = fi::pki::issue(SERVICE_ACCOUNT, &request, None).unwrap();
        let mut distrusted = fi::pki::issue(SERVICE_ACCOUNT, &request, None).unwrap();
        distrusted.distrust_timestamp = Some(chrono::Utc::now());
        let keyset = Keyset {
            name: SERVICE_ACCOUNT.to_string(),
            primary_id: trusted.id.clone(),
            items: vec![trusted, distrusted],
            legacy: false,
        };
        ctx.keystore.store_keyset(&keyset).await.unwrap();

        let bytes = JwksResolver.resolve(&ctx).await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        let keys = value["keys"].as_array().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0]["kty"], "EC");
    }
}
