//! Per-group bootstrap scripts and the nodeup configs they point at

use awstasks::bootstrap::UserDataPart;
use awstasks::{BootstrapScript, Keypair, ManagedFile, NodeupConfig};
use crds::{HookPhase, HookSpec, InstanceGroup, InstanceGroupRole};
use fi::{Link, ModelBuilderContext, Resource};

use crate::ModelBuilder;
use crate::context::ModelContext;
use crate::error::ModelError;
use crate::etcdmanager::manifests_for_group;
use crate::pki::{ETCD_CLIENTS_CA, KUBERNETES_CA, SERVICE_ACCOUNT, link_to_keypair};

/// Emits a BootstrapScript and its nodeup config file per non-bastion group
#[derive(Debug, Default)]
pub struct BootstrapScriptBuilder;

/// `igconfig/<role>/<ig>/nodeupconfig.yaml`
pub fn nodeup_config_location(group: &InstanceGroup) -> String {
    format!(
        "igconfig/{}/{}/nodeupconfig.yaml",
        group.spec.role.config_path_segment(),
        group.group_name()
    )
}

fn applies_to(hook: &HookSpec, role: InstanceGroupRole) -> bool {
    hook.roles.is_empty() || hook.roles.contains(&role)
}

impl BootstrapScriptBuilder {
    fn keypairs(model: &ModelContext, role: InstanceGroupRole) -> Vec<Link<Keypair>> {
        let mut names = vec![KUBERNETES_CA.to_string()];
        if role == InstanceGroupRole::ControlPlane {
            names.push("apiserver-aggregator-ca".to_string());
            names.push(SERVICE_ACCOUNT.to_string());
            if !model.cluster.spec.etcd_clusters.is_empty() {
                names.push(ETCD_CLIENTS_CA.to_string());
            }
            for etcd in &model.cluster.spec.etcd_clusters {
                names.push(format!("etcd-manager-ca-{}", etcd.name));
                names.push(format!("etcd-peers-ca-{}", etcd.name));
            }
        } else {
            names.push("kubelet".to_string());
            names.push("kube-proxy".to_string());
        }
        names.iter().map(|name| link_to_keypair(name)).collect()
    }

    /// Cluster hooks first, then the group's own, joined per phase
    fn hooks(model: &ModelContext, group: &InstanceGroup, phase: HookPhase) -> String {
        let role = group.spec.role;
        model
            .cluster
            .spec
            .hooks
            .iter()
            .chain(&group.spec.hooks)
            .filter(|hook| hook.phase == phase && applies_to(hook, role))
            .map(|hook| format!("# hook: {}\n{}\n", hook.name, hook.script.trim_end()))
            .collect()
    }

    fn script(model: &ModelContext, group: &InstanceGroup) -> BootstrapScript {
        let role = group.spec.role;
        let control_plane = role == InstanceGroupRole::ControlPlane;
        let config = NodeupConfig {
            cluster_name: model.cluster_name().to_string(),
            instance_group_name: group.group_name().to_string(),
            instance_group_role: role.config_path_segment().to_string(),
            config_base: model.config_base(),
            kubernetes_version: model.cluster.spec.kubernetes_version.clone(),
            node_labels: group.spec.node_labels.clone(),
            taints: group.spec.taints.clone(),
            etcd_manifests: if control_plane {
                manifests_for_group(model, group.group_name())
            } else {
                Vec::new()
            },
            static_manifest_base: control_plane.then(|| format!("{}/manifests/static", model.config_base())),
            ..NodeupConfig::default()
        };

        let mut script = BootstrapScript::new(group.group_name(), config);
        script.keypairs = Self::keypairs(model, role);
        script.nodeup_source = model.nodeup.url.clone();
        script.nodeup_source_hash = model.nodeup.hash.clone();
        script.before_install = Self::hooks(model, group, HookPhase::BeforeInstall);
        script.after_install = Self::hooks(model, group, HookPhase::AfterInstall);
        script.additional_user_data = group
            .spec
            .additional_user_data
            .iter()
            .map(|part| UserDataPart {
                name: part.name.clone(),
                content_type: part.content_type.clone(),
                content: part.content.clone(),
            })
            .collect();
        // control-plane instances serve the API themselves
        script.include_api_server_addresses = !control_plane;
        script
    }
}

impl ModelBuilder for BootstrapScriptBuilder {
    fn build(&self, model: &ModelContext, c: &mut ModelBuilderContext) -> Result<(), ModelError> {
        for group in &model.instance_groups {
            if group.spec.role == InstanceGroupRole::Bastion {
                continue;
            }
            c.add(Self::script(model, group))?;
            c.add(ManagedFile::new(
                format!("nodeupconfig-{}", group.group_name()),
                nodeup_config_location(group),
                Resource::task_output(BootstrapScript::key_for(group.group_name()), "nodeup_config"),
            ))?;
        }
        Ok(())
    }
}
