//! Certificate keypairs kept in the cluster keystore
//!
//! A keypair is identified by its subject, issuer, alternate names and type.
//! It is reissued only when one of those changes; a new item is appended to
//! the keyset and becomes primary, so earlier items stay trusted.

use fi::pki::{self, CertificateRequest, KeypairType};
use fi::{CloudFormationTarget, CloudupTask, Changes, Lifecycle, Link, Outputs, RunContext, TaskError, TaskKey, TerraformTarget};
use serde::Serialize;
use tracing::{debug, info, warn};
use vfs_store::Keyset;

use crate::util::{id_output, is_placeholder, task_identity};

/// Split `o=system:nodes,cn=kubelet` into the common name and organizations
pub fn parse_subject(subject: &str) -> Result<(String, Vec<String>), TaskError> {
    let mut common_name = None;
    let mut organizations = Vec::new();
    for part in subject.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| TaskError::Invalid(format!("malformed subject component {part:?}")))?;
        match key.trim().to_ascii_lowercase().as_str() {
            "cn" => common_name = Some(value.trim().to_string()),
            "o" => organizations.push(value.trim().to_string()),
            other => {
                return Err(TaskError::Invalid(format!("unsupported subject component {other:?}")));
            }
        }
    }
    let common_name = common_name.ok_or_else(|| TaskError::Invalid(format!("subject {subject:?} has no cn")))?;
    organizations.sort();
    Ok((common_name, organizations))
}

/// Canonical subject string: sorted organizations, then the common name
pub fn format_subject(common_name: &str, organizations: &[String]) -> String {
    let mut parts: Vec<String> = organizations.iter().map(|o| format!("o={o}")).collect();
    parts.push(format!("cn={common_name}"));
    parts.join(",")
}

/// A certificate and private key in the keystore
#[derive(Debug, Clone, Serialize)]
pub struct Keypair {
    pub name: String,
    pub subject: String,
    pub issuer: Option<Link<Keypair>>,
    /// Sorted and deduplicated during normalization
    pub alternate_names: Vec<String>,
    #[serde(rename = "type")]
    pub keypair_type: KeypairType,
    /// Add the addresses of API server load balancers to the alternate names
    #[serde(skip)]
    pub include_api_server_addresses: bool,
    #[serde(skip)]
    pub primary_id: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl Keypair {
    pub fn new(name: impl Into<String>, subject: impl Into<String>, keypair_type: KeypairType) -> Self {
        Self {
            name: name.into(),
            subject: subject.into(),
            issuer: None,
            alternate_names: Vec::new(),
            keypair_type,
            include_api_server_addresses: false,
            primary_id: None,
            lifecycle: Lifecycle::Sync,
        }
    }

    fn request(&self) -> Result<CertificateRequest, TaskError> {
        let (common_name, organizations) = parse_subject(&self.subject)?;
        Ok(CertificateRequest {
            common_name,
            organizations,
            alternate_names: self.alternate_names.clone(),
            keypair_type: self.keypair_type,
        })
    }

    /// Issue a new item and make it primary, keeping earlier items
    async fn issue_and_store(&self, ctx: &RunContext) -> Result<Outputs, TaskError> {
        let signer = match &self.issuer {
            Some(issuer) => {
                let keyset = ctx
                    .keystore
                    .find_keyset(issuer.name())
                    .await?
                    .ok_or_else(|| TaskError::Keyset {
                        name: self.name.clone(),
                        message: format!("issuer keyset {} not found", issuer.name()),
                    })?;
                let primary = keyset.primary().cloned().ok_or_else(|| TaskError::Keyset {
                    name: self.name.clone(),
                    message: format!("issuer keyset {} has no primary item", issuer.name()),
                })?;
                Some(primary)
            }
            None => None,
        };

        let item = pki::issue(&self.name, &self.request()?, signer.as_ref())?;
        let keyset = match ctx.keystore.find_keyset(&self.name).await? {
            Some(mut keyset) => {
                keyset.primary_id = item.id.clone();
                keyset.items.push(item);
                keyset.legacy = false;
                keyset
            }
            None => Keyset {
                name: self.name.clone(),
                primary_id: item.id.clone(),
                items: vec![item],
                legacy: false,
            },
        };
        ctx.keystore.store_keyset(&keyset).await?;
        info!(keyset = %self.name, id = %keyset.primary_id, items = keyset.items.len(), "Issued keypair");
        Ok(id_output(keyset.primary_id))
    }
}

#[async_trait::async_trait]
impl CloudupTask for Keypair {
    const KIND: &'static str = "Keypair";

    task_identity!();

    fn dependencies(&self, tasks: &fi::TaskMap) -> Vec<TaskKey> {
        if self.include_api_server_addresses {
            tasks.api_server_address_sources()
        } else {
            Vec::new()
        }
    }

    fn check_existing(&self) -> bool {
        true
    }

    async fn normalize(&self, ctx: &RunContext) -> Result<Self, TaskError> {
        let (common_name, organizations) = parse_subject(&self.subject)?;
        let mut alternate_names = self.alternate_names.clone();
        if self.include_api_server_addresses {
            for key in ctx.tasks.api_server_address_sources() {
                if let Some(task) = ctx.tasks.get(&key) {
                    alternate_names.extend(
                        task.find_addresses(ctx)
                            .await?
                            .into_iter()
                            .filter(|a| !is_placeholder(a)),
                    );
                }
            }
        }
        alternate_names.sort();
        alternate_names.dedup();
        Ok(Keypair {
            subject: format_subject(&common_name, &organizations),
            alternate_names,
            ..self.clone()
        })
    }

    fn outputs(&self) -> Outputs {
        self.primary_id.clone().map(id_output).unwrap_or_default()
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let Some(keyset) = ctx.keystore.find_keyset(&self.name).await? else {
            return Ok(None);
        };
        let Some(primary) = keyset.primary() else {
            return Ok(None);
        };
        let summary = pki::parse_certificate(&self.name, &primary.certificate)?;

        let issuer = match &self.issuer {
            Some(link) => {
                let expected_cn = parse_subject(&ctx.task(link)?.subject)?.0;
                if summary.issuer_common_name == expected_cn {
                    Some(link.clone())
                } else {
                    Some(Link::new(summary.issuer_common_name.clone()))
                }
            }
            None if summary.issuer_common_name == summary.common_name => None,
            None => Some(Link::new(summary.issuer_common_name.clone())),
        };
        // Client and server certificates are told apart by usage, which is not compared
        let keypair_type = match (summary.is_ca, self.keypair_type) {
            (true, _) => KeypairType::Ca,
            (false, KeypairType::Ca) => KeypairType::Client,
            (false, expected) => expected,
        };

        if keyset.legacy {
            if ctx.target.is_dry_run() {
                debug!(keyset = %self.name, "Keyset is in the legacy format");
            } else {
                warn!(keyset = %self.name, "Rewriting legacy keyset in the current format");
                ctx.keystore.store_keyset(&Keyset { legacy: false, ..keyset.clone() }).await?;
            }
        }

        Ok(Some(Keypair {
            name: self.name.clone(),
            subject: format_subject(&summary.common_name, &summary.organizations),
            issuer,
            alternate_names: summary.alternate_names,
            keypair_type,
            include_api_server_addresses: self.include_api_server_addresses,
            primary_id: Some(keyset.primary_id.clone()),
            lifecycle: self.lifecycle,
        }))
    }

    async fn render_direct(&self, ctx: &RunContext, _actual: Option<&Self>, _changes: &Changes) -> Result<Outputs, TaskError> {
        self.issue_and_store(ctx).await
    }

    async fn render_terraform(&self, ctx: &RunContext, _tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        self.issue_and_store(ctx).await
    }

    async fn render_cloudformation(&self, ctx: &RunContext, _cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        self.issue_and_store(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_round_trip() {
        let (cn, orgs) = parse_subject("cn=kubelet, o=system:nodes").unwrap();
        assert_eq!(cn, "kubelet");
        assert_eq!(orgs, vec!["system:nodes"]);
        assert_eq!(format_subject(&cn, &orgs), "o=system:nodes,cn=kubelet");
    }

    #[test]
    fn test_subject_requires_common_name() {
        assert!(parse_subject("o=system:masters").is_err());
        assert!(parse_subject("cn").is_err());
        assert!(parse_subject("ou=x,cn=y").is_err());
    }
}
