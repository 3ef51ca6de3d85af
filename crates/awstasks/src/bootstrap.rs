//! Instance bootstrap user data
//!
//! The script for an instance group is assembled during the run, once the
//! API server addresses and the keysets it names are known. Those values are
//! hashed into the nodeup config so that a rotated CA or a new load balancer
//! address changes the user data and rolls the group.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use fi::pki::KeypairType;
use fi::{
    Changes, CloudFormationTarget, CloudupTask, Lifecycle, Link, Outputs, RunContext, TaskError, TaskKey, TaskMap,
    TerraformTarget,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::keypair::Keypair;
use crate::util::{is_placeholder, task_identity};

/// Boundary of the multipart user data when extra parts are present
pub const MIME_BOUNDARY: &str = "MIMEBOUNDARY";

/// Bootstrap shell template
pub const NODEUP_TEMPLATE: &str = r#"#!/bin/bash
set -o errexit
set -o nounset
set -o pipefail

NODEUP_URL={{NodeUpSource}}
NODEUP_HASH={{NodeUpSourceHash}}

{{BeforeInstall}}

mkdir -p /opt/cloudup/conf
cat > /opt/cloudup/conf/kube_env.yaml << '__EOF_KUBE_ENV'
{{KubeEnv}}
__EOF_KUBE_ENV

download-and-run "${NODEUP_URL}" "${NODEUP_HASH}" --conf=/opt/cloudup/conf/kube_env.yaml

{{AfterInstall}}
"#;

/// Configuration handed to nodeup on the instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeupConfig {
    pub cluster_name: String,
    pub instance_group_name: String,
    pub instance_group_role: String,
    pub config_base: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,
    #[serde(default)]
    pub api_server_addresses: Vec<String>,
    /// PEM bundle of trusted items, per CA keyset
    #[serde(default)]
    pub ca_certificates: BTreeMap<String, String>,
    /// Primary item id, per keyset
    #[serde(default)]
    pub keypair_ids: BTreeMap<String, String>,
    #[serde(default)]
    pub node_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<String>,
    /// Etcd manifests the instance should fetch
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub etcd_manifests: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_manifest_base: Option<String>,
}

/// Extra MIME part appended to the script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDataPart {
    pub name: String,
    pub content_type: String,
    pub content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct KubeEnv<'a> {
    cluster_name: &'a str,
    config_base: &'a str,
    instance_group_name: &'a str,
    instance_group_role: &'a str,
    nodeup_config_hash: &'a str,
}

/// User data of one instance group
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapScript {
    /// Instance group name
    pub name: String,
    /// Keysets whose ids and CA bundles are baked into the config
    pub keypairs: Vec<Link<Keypair>>,
    pub template: String,
    pub nodeup_source: String,
    pub nodeup_source_hash: String,
    pub before_install: String,
    pub after_install: String,
    pub config: NodeupConfig,
    pub additional_user_data: Vec<UserDataPart>,
    #[serde(skip)]
    pub include_api_server_addresses: bool,
    #[serde(skip)]
    pub user_data: Option<String>,
    #[serde(skip)]
    pub nodeup_config: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl BootstrapScript {
    /// Script with the default template and no hooks
    pub fn new(name: impl Into<String>, config: NodeupConfig) -> Self {
        Self {
            name: name.into(),
            keypairs: Vec::new(),
            template: NODEUP_TEMPLATE.to_string(),
            nodeup_source: String::new(),
            nodeup_source_hash: String::new(),
            before_install: String::new(),
            after_install: String::new(),
            config,
            additional_user_data: Vec::new(),
            include_api_server_addresses: false,
            user_data: None,
            nodeup_config: None,
            lifecycle: Lifecycle::Sync,
        }
    }

    /// Key of the script for an instance group
    pub fn key_for(group: &str) -> TaskKey {
        TaskKey::new(Self::KIND, group)
    }

    async fn resolve_config(&self, ctx: &RunContext) -> Result<NodeupConfig, TaskError> {
        let mut config = self.config.clone();

        if self.include_api_server_addresses {
            let mut addresses = Vec::new();
            for key in ctx.tasks.api_server_address_sources() {
                if let Some(task) = ctx.tasks.get(&key) {
                    addresses.extend(
                        task.find_addresses(ctx)
                            .await?
                            .into_iter()
                            .filter(|a| !is_placeholder(a)),
                    );
                }
            }
            addresses.sort();
            addresses.dedup();
            config.api_server_addresses = addresses;
        }

        for link in &self.keypairs {
            config
                .keypair_ids
                .insert(link.name().to_string(), ctx.link_id(link)?);

            if ctx.task(link)?.keypair_type != KeypairType::Ca {
                continue;
            }
            match ctx.keystore.find_keyset(link.name()).await? {
                Some(keyset) => {
                    let bundle: String = keyset
                        .items
                        .iter()
                        .filter(|item| item.distrust_timestamp.is_none())
                        .map(|item| item.certificate.as_str())
                        .collect();
                    config.ca_certificates.insert(link.name().to_string(), bundle);
                }
                None if ctx.target.is_dry_run() => {
                    debug!(keyset = %link.name(), group = %self.name, "CA keyset not yet issued");
                }
                None => {
                    return Err(TaskError::Keyset {
                        name: link.name().to_string(),
                        message: format!("needed by the bootstrap script of {}", self.name),
                    });
                }
            }
        }

        Ok(config)
    }

    fn render_user_data(&self, config: &NodeupConfig, nodeup_config: &str) -> Result<String, TaskError> {
        let hash = STANDARD.encode(Sha256::digest(nodeup_config.as_bytes()));
        let kube_env = serde_yaml::to_string(&KubeEnv {
            cluster_name: &config.cluster_name,
            config_base: &config.config_base,
            instance_group_name: &config.instance_group_name,
            instance_group_role: &config.instance_group_role,
            nodeup_config_hash: &hash,
        })?;

        let script = self
            .template
            .replace("{{NodeUpSource}}", &self.nodeup_source)
            .replace("{{NodeUpSourceHash}}", &self.nodeup_source_hash)
            .replace("{{BeforeInstall}}", self.before_install.trim_end())
            .replace("{{KubeEnv}}", kube_env.trim_end())
            .replace("{{AfterInstall}}", self.after_install.trim_end());

        if self.additional_user_data.is_empty() {
            return Ok(script);
        }
        Ok(multipart(&script, &self.additional_user_data))
    }
}

/// Wrap the script and extra parts as `multipart/mixed`
fn multipart(script: &str, parts: &[UserDataPart]) -> String {
    let mut out = format!("Content-Type: multipart/mixed; boundary=\"{MIME_BOUNDARY}\"\nMIME-Version: 1.0\n\n");
    let mut push = |name: &str, content_type: &str, body: &str| {
        out.push_str(&format!("--{MIME_BOUNDARY}\n"));
        out.push_str(&format!("Content-Disposition: attachment; filename=\"{name}\"\n"));
        out.push_str(&format!("Content-Type: {content_type}; charset=\"us-ascii\"\n"));
        out.push_str("Content-Transfer-Encoding: 7bit\nMIME-Version: 1.0\n\n");
        out.push_str(body);
        if !body.ends_with('\n') {
            out.push('\n');
        }
        out.push('\n');
    };
    push("nodeup.sh", "text/x-shellscript", script);
    for part in parts {
        push(&part.name, &part.content_type, &part.content);
    }
    out.push_str(&format!("--{MIME_BOUNDARY}--\n"));
    out
}

#[async_trait::async_trait]
impl CloudupTask for BootstrapScript {
    const KIND: &'static str = "BootstrapScript";

    task_identity!();

    fn dependencies(&self, tasks: &TaskMap) -> Vec<TaskKey> {
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
        let config = self.resolve_config(ctx).await?;
        let nodeup_config = serde_yaml::to_string(&config)?;
        let user_data = self.render_user_data(&config, &nodeup_config)?;
        Ok(BootstrapScript {
            config,
            user_data: Some(user_data),
            nodeup_config: Some(nodeup_config),
            ..self.clone()
        })
    }

    fn outputs(&self) -> Outputs {
        let mut outputs = Outputs::new();
        if let Some(user_data) = &self.user_data {
            outputs.insert("user_data".to_string(), user_data.clone());
        }
        if let Some(nodeup_config) = &self.nodeup_config {
            outputs.insert("nodeup_config".to_string(), nodeup_config.clone());
        }
        outputs
    }

    // Nothing lives in the cloud; the normalized value is always current
    async fn find(&self, _ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        Ok(Some(self.clone()))
    }

    async fn render_direct(&self, _ctx: &RunContext, _actual: Option<&Self>, _changes: &Changes) -> Result<Outputs, TaskError> {
        Ok(self.outputs())
    }

    async fn render_terraform(&self, _ctx: &RunContext, _tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        Ok(self.outputs())
    }

    async fn render_cloudformation(&self, _ctx: &RunContext, _cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        Ok(self.outputs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script() -> BootstrapScript {
        let config = NodeupConfig {
            cluster_name: "minimal.example.com".to_string(),
            instance_group_name: "nodes".to_string(),
            instance_group_role: "Node".to_string(),
            config_base: "memfs://clusters/minimal.example.com".to_string(),
            ..Default::default()
        };
        let mut script = BootstrapScript::new("nodes", config);
        script.nodeup_source = "https://artifacts.example.com/nodeup".to_string();
        script.nodeup_source_hash = "abc123".to_string();
        script.before_install = "echo before\n".to_string();
        script
    }

    #[test]
    fn test_template_placeholders_replaced() {
        let script = script();
        let rendered = script.render_user_data(&script.config, "clusterName: x\n").unwrap();
        assert!(rendered.contains("NODEUP_URL=https://artifacts.example.com/nodeup"));
        assert!(rendered.contains("NODEUP_HASH=abc123"));
        assert!(rendered.contains("echo before"));
        assert!(rendered.contains("InstanceGroupName: nodes"));
        assert!(rendered.contains("NodeupConfigHash:"));
        assert!(!rendered.contains("{{"));
    }

    #[test]
    fn test_config_hash_tracks_content() {
        let script = script();
        let a = script.render_user_data(&script.config, "a: 1\n").unwrap();
        let b = script.render_user_data(&script.config, "a: 2\n").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, script.render_user_data(&script.config, "a: 1\n").unwrap());
    }

    #[test]
    fn test_additional_parts_make_multipart() {
        let mut script = script();
        script.additional_user_data.push(UserDataPart {
            name: "extra.sh".to_string(),
            content_type: "text/x-shellscript".to_string(),
            content: "echo extra".to_string(),
        });
        let rendered = script.render_user_data(&script.config, "a: 1\n").unwrap();
        assert!(rendered.starts_with("Content-Type: multipart/mixed; boundary=\"MIMEBOUNDARY\""));
        assert!(rendered.contains("filename=\"nodeup.sh\""));
        assert!(rendered.contains("filename=\"extra.sh\""));
        assert!(rendered.trim_end().ends_with("--MIMEBOUNDARY--"));
    }
}
