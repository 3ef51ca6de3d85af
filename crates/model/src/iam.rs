//! IAM roles, policies and instance profiles

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use awstasks::{DnsZone, IamInstanceProfile, IamInstanceProfileRole, IamRole, IamRolePolicy};
use crds::{InstanceGroupRole, ServiceAccountExternalPermission};
use fi::{CloudupTask, Lifecycle, Link, ModelBuilderContext, Resource, TaskKey};
use tracing::debug;

use crate::ModelBuilder;
use crate::context::ModelContext;
use crate::error::ModelError;
use crate::policy::{
    NodePolicy, NodePolicyResolver, PolicyDocument, S3Location, ServiceAccountTrustResolver, ec2_assume_role_policy,
};

const MAX_ROLE_NAME: usize = 64;

/// Tag naming the service account a role belongs to
pub const TAG_SERVICE_ACCOUNT_NAME: &str = "service-account.kops.k8s.io/name";
/// Tag naming the namespace of that service account
pub const TAG_SERVICE_ACCOUNT_NAMESPACE: &str = "service-account.kops.k8s.io/namespace";

/// A Kubernetes service account that assumes an IAM role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccount {
    pub namespace: String,
    pub name: String,
}

impl ServiceAccount {
    /// `<namespace>-<name>`, lowercased, with `*` spelled out
    pub fn role_key(&self) -> String {
        format!("{}-{}", self.namespace, self.name)
            .replace('*', "wildcard")
            .to_lowercase()
    }
}

/// Emits one role per managed instance group role plus service account roles
#[derive(Debug, Default)]
pub struct IamBuilder;

fn to_json(what: &str, document: &PolicyDocument) -> Result<String, ModelError> {
    document.to_json().map_err(|source| ModelError::Encode {
        what: what.to_string(),
        source,
    })
}

fn parse_policy(field: String, text: &str) -> Result<PolicyDocument, ModelError> {
    PolicyDocument::parse_statements(text)
        .map_err(|e| ModelError::invalid(field, format!("policy is not a valid statement list: {e}")))
}

fn truncate(name: &str, max: usize) -> &str {
    let mut end = name.len().min(max);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Registers the role, trust policy and inline policy of a service account
///
/// The role is `<namespace>-<name>.sa.<cluster>`, capped at 64 characters.
///
/// # Errors
/// A wildcard in the service account name, or conflicting registrations
pub fn build_iam_for_service_account(
    model: &ModelContext,
    c: &mut ModelBuilderContext,
    sa: &ServiceAccount,
    policy: Option<PolicyDocument>,
) -> Result<Link<IamRole>, ModelError> {
    if sa.name.contains('*') {
        return Err(ModelError::invalid(
            "spec.iam.serviceAccountExternalPermissions",
            format!("service account name cannot contain a wildcard: {}", sa.name),
        ));
    }
    let key = sa.role_key();
    let full_name = format!("{key}.sa.{}", model.cluster_name());
    let name = truncate(&full_name, MAX_ROLE_NAME).to_string();
    let oidc_provider = model
        .cluster
        .service_account_issuer()
        .trim_start_matches("https://")
        .to_string();

    let trust = ServiceAccountTrustResolver {
        role_name: name.clone(),
        oidc_provider,
        namespace: sa.namespace.clone(),
        name: sa.name.clone(),
    };
    let mut tags = model.cloud_tags(&name, false);
    tags.insert(TAG_SERVICE_ACCOUNT_NAME.to_string(), sa.name.clone());
    tags.insert(TAG_SERVICE_ACCOUNT_NAMESPACE.to_string(), sa.namespace.clone());
    let role = c.add(IamRole {
        tags,
        export_with_id: Some(key),
        permissions_boundary: model.cluster.spec.iam.as_ref().and_then(|i| i.permissions_boundary.clone()),
        ..IamRole::new(name.clone(), Resource::lazy(Arc::new(trust), Vec::new()))
    })?;

    if let Some(policy) = policy.filter(|p| !p.statement.is_empty()) {
        c.add(IamRolePolicy {
            name: name.clone(),
            role: role.clone(),
            policy_document: Some(Resource::from_string(to_json(&name, &policy)?)),
            managed_policies: Vec::new(),
            lifecycle: Lifecycle::Sync,
        })?;
    }
    debug!(role = %name, namespace = %sa.namespace, service_account = %sa.name, "Service account role");
    Ok(role)
}

impl IamBuilder {
    fn node_policy(model: &ModelContext, role: InstanceGroupRole) -> NodePolicy {
        let iam = model.cluster.spec.iam.clone().unwrap_or_default();
        let kms_keys: BTreeSet<String> = if role == InstanceGroupRole::ControlPlane {
            model
                .cluster
                .spec
                .etcd_clusters
                .iter()
                .flat_map(|e| e.members.iter())
                .filter_map(|m| m.kms_key_id.clone())
                .collect()
        } else {
            BTreeSet::new()
        };
        let dns_zone = (role == InstanceGroupRole::ControlPlane && !model.is_gossip())
            .then(|| TaskKey::new(DnsZone::KIND, model.name_for_dns_zone()));
        NodePolicy {
            role,
            legacy: iam.legacy,
            allow_container_registry: iam.allow_container_registry,
            state_store: S3Location::parse(&model.config_base()),
            kms_keys,
            dns_zone,
        }
    }

    fn build_role(model: &ModelContext, c: &mut ModelBuilderContext, role: InstanceGroupRole) -> Result<(), ModelError> {
        let name = model.iam_name(role);
        let role_key = role.key();

        let profile = c.add(IamInstanceProfile {
            name: name.clone(),
            tags: model.cloud_tags(&name, false),
            arn: None,
            shared: false,
            lifecycle: Lifecycle::Sync,
        })?;

        let trust = to_json(&name, &ec2_assume_role_policy(model.ec2_service_principal()))?;
        let iam_role = c.add(IamRole {
            tags: model.cloud_tags(&name, false),
            export_with_id: Some(format!("{role_key}s")),
            permissions_boundary: model.cluster.spec.iam.as_ref().and_then(|i| i.permissions_boundary.clone()),
            ..IamRole::new(name.clone(), Resource::from_string(trust))
        })?;

        let policy = Self::node_policy(model, role);
        let predecessors: Vec<TaskKey> = policy.dns_zone.iter().cloned().collect();
        let resolver = NodePolicyResolver {
            name: name.clone(),
            policy,
        };
        c.add(IamRolePolicy {
            name: name.clone(),
            role: iam_role.clone(),
            policy_document: Some(Resource::lazy(Arc::new(resolver), predecessors)),
            managed_policies: Vec::new(),
            lifecycle: Lifecycle::Sync,
        })?;

        c.add(IamInstanceProfileRole {
            name: name.clone(),
            instance_profile: profile,
            role: iam_role.clone(),
            lifecycle: Lifecycle::Sync,
        })?;

        let mut external: Vec<String> = model
            .cluster
            .spec
            .external_policies
            .get(role_key)
            .cloned()
            .unwrap_or_default();
        external.sort();
        if !external.is_empty() {
            c.add(IamRolePolicy {
                name: format!("{role_key}-policyoverride"),
                role: iam_role.clone(),
                policy_document: None,
                managed_policies: external,
                lifecycle: Lifecycle::Sync,
            })?;
        }

        if let Some(additional) = model.cluster.spec.additional_policies.get(role_key).filter(|p| !p.is_empty()) {
            let document = parse_policy(format!("spec.additionalPolicies.{role_key}"), additional)?;
            let additional_name = format!("additional.{name}");
            c.add(IamRolePolicy {
                policy_document: Some(Resource::from_string(to_json(&additional_name, &document)?)),
                name: additional_name,
                role: iam_role,
                managed_policies: Vec::new(),
                lifecycle: Lifecycle::Sync,
            })?;
        }
        Ok(())
    }

    fn build_service_account(
        model: &ModelContext,
        c: &mut ModelBuilderContext,
        permission: &ServiceAccountExternalPermission,
    ) -> Result<(), ModelError> {
        let policy = permission
            .aws
            .inline_policy
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| {
                parse_policy(
                    format!(
                        "spec.iam.serviceAccountExternalPermissions[{}/{}].aws.inlinePolicy",
                        permission.namespace, permission.name
                    ),
                    p,
                )
            })
            .transpose()?;
        let sa = ServiceAccount {
            namespace: permission.namespace.clone(),
            name: permission.name.clone(),
        };
        let role = build_iam_for_service_account(model, c, &sa, policy)?;
        if !permission.aws.policy_arns.is_empty() {
            let mut arns = permission.aws.policy_arns.clone();
            arns.sort();
            c.add(IamRolePolicy {
                name: format!("external-{}", role.name()),
                role,
                policy_document: None,
                managed_policies: arns,
                lifecycle: Lifecycle::Sync,
            })?;
        }
        Ok(())
    }
}

impl ModelBuilder for IamBuilder {
    fn build(&self, model: &ModelContext, c: &mut ModelBuilderContext) -> Result<(), ModelError> {
        let mut managed: BTreeSet<InstanceGroupRole> = BTreeSet::new();
        let mut shared_profiles: BTreeMap<&str, InstanceGroupRole> = BTreeMap::new();

        for ig in &model.instance_groups {
            let Some(arn) = ig.spec.iam.as_ref().and_then(|i| i.profile.as_deref()) else {
                managed.insert(ig.spec.role);
                continue;
            };
            match shared_profiles.get(arn) {
                Some(existing) if *existing != ig.spec.role => {
                    return Err(ModelError::invalid(
                        format!("instanceGroups[{}].spec.iam.profile", ig.group_name()),
                        format!(
                            "found IAM instance profile assigned to multiple instance group roles {existing} and {}: {arn}",
                            ig.spec.role
                        ),
                    ));
                }
                Some(_) => {}
                None => {
                    shared_profiles.insert(arn, ig.spec.role);
                }
            }
        }

        for arn in shared_profiles.keys() {
            let profile = IamInstanceProfile::shared_from_arn(arn).map_err(|source| ModelError::Task {
                what: format!("instance profile {arn}"),
                source,
            })?;
            debug!(profile = %profile.name, "Using existing instance profile");
            c.ensure(profile)?;
        }

        for role in managed {
            Self::build_role(model, c, role)?;
        }

        if let Some(iam) = &model.cluster.spec.iam {
            for permission in &iam.service_account_external_permissions {
                Self::build_service_account(model, c, permission)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CLUSTER, group, minimal_cluster, model_for, model_with};
    use crds::{AwsPermission, IamProfileSpec, IamSpec};

    fn build(model: &ModelContext) -> ModelBuilderContext {
        let mut c = ModelBuilderContext::new();
        IamBuilder.build(model, &mut c).unwrap();
        c
    }

    #[test]
    fn test_managed_roles() {
        let model = model_for(minimal_cluster());
        let c = build(&model);
        let masters = format!("masters.{CLUSTER}");
        let role = c.find(&Link::<IamRole>::new(masters.clone())).unwrap();
        assert_eq!(role.export_with_id.as_deref(), Some("masters"));
        let trust = role.role_policy_document.as_text().unwrap();
        assert!(trust.contains("ec2.amazonaws.com"));
        assert!(c.find(&Link::<IamInstanceProfile>::new(masters.clone())).is_some());
        assert!(c.find(&Link::<IamInstanceProfileRole>::new(masters.clone())).is_some());

        let policy = c.find(&Link::<IamRolePolicy>::new(masters)).unwrap();
        let document = policy.policy_document.as_ref().unwrap();
        assert_eq!(
            document.predecessors(),
            &[TaskKey::new("DNSZone", CLUSTER)],
            "master policy waits for the hosted zone"
        );
        assert!(c.find(&Link::<IamRole>::new(format!("bastions.{CLUSTER}"))).is_none());
        assert!(c.find(&Link::<IamRolePolicy>::new("master-policyoverride")).is_none());
    }

    #[test]
    fn test_gossip_master_policy_has_no_dns_dependency() {
        let mut cluster = minimal_cluster();
        cluster.metadata.name = Some("minimal.k8s.local".to_string());
        let model = model_for(cluster);
        let c = build(&model);
        let policy = c
            .find(&Link::<IamRolePolicy>::new("masters.minimal.k8s.local"))
            .unwrap();
        assert!(policy.policy_document.as_ref().unwrap().predecessors().is_empty());
    }

    #[test]
    fn test_external_and_additional_policies() {
        let mut cluster = minimal_cluster();
        cluster
            .spec
            .external_policies
            .insert("node".to_string(), vec!["arn:aws:iam::aws:policy/b".to_string(), "arn:aws:iam::aws:policy/a".to_string()]);
        cluster.spec.additional_policies.insert(
            "node".to_string(),
            r#"[{"Effect":"Allow","Action":["s3:GetObject"],"Resource":["*"]}]"#.to_string(),
        );
        let model = model_for(cluster);
        let c = build(&model);
        let overrides = c.find(&Link::<IamRolePolicy>::new("node-policyoverride")).unwrap();
        assert_eq!(
            overrides.managed_policies,
            vec!["arn:aws:iam::aws:policy/a", "arn:aws:iam::aws:policy/b"]
        );
        let additional = c
            .find(&Link::<IamRolePolicy>::new(format!("additional.nodes.{CLUSTER}")))
            .unwrap();
        let text = additional.policy_document.as_ref().unwrap().as_text().unwrap();
        assert!(text.contains("2012-10-17"));
        assert!(text.contains("s3:GetObject"));
    }

    #[test]
    fn test_invalid_additional_policy() {
        let mut cluster = minimal_cluster();
        cluster.spec.additional_policies.insert("master".to_string(), "{".to_string());
        let model = model_for(cluster);
        let err = IamBuilder.build(&model, &mut ModelBuilderContext::new()).unwrap_err();
        assert!(matches!(err, ModelError::Validation(_)));
    }

    #[test]
    fn test_shared_profile() {
        let mut nodes = group("nodes", InstanceGroupRole::Node, &["us-test-1a"]);
        nodes.spec.iam = Some(IamProfileSpec {
            profile: Some("arn:aws:iam::123:instance-profile/custom-nodes".to_string()),
        });
        let master = group("master-us-test-1a", InstanceGroupRole::ControlPlane, &["us-test-1a"]);
        let model = model_with(minimal_cluster(), vec![master, nodes]);
        let c = build(&model);
        let profile = c.find(&Link::<IamInstanceProfile>::new("custom-nodes")).unwrap();
        assert!(profile.shared);
        assert!(c.find(&Link::<IamRole>::new(format!("nodes.{CLUSTER}"))).is_none());
        assert_eq!(model.instance_profile_name(&model.instance_groups[1]).unwrap(), "custom-nodes");
    }

    #[test]
    fn test_profile_shared_across_roles_rejected() {
        let profile = Some(IamProfileSpec {
            profile: Some("arn:aws:iam::123:instance-profile/shared".to_string()),
        });
        let mut nodes = group("nodes", InstanceGroupRole::Node, &["us-test-1a"]);
        nodes.spec.iam = profile.clone();
        let mut master = group("master-us-test-1a", InstanceGroupRole::ControlPlane, &["us-test-1a"]);
        master.spec.iam = profile;
        let model = model_with(minimal_cluster(), vec![master, nodes]);
        let err = IamBuilder.build(&model, &mut ModelBuilderContext::new()).unwrap_err();
        assert!(err.to_string().contains("multiple instance group roles"));
    }

    #[test]
    fn test_service_account_roles() {
        let mut cluster = minimal_cluster();
        cluster.spec.iam = Some(IamSpec {
            service_account_external_permissions: vec![ServiceAccountExternalPermission {
                name: "external-dns".to_string(),
                namespace: "Kube-*".to_string(),
                aws: AwsPermission {
                    policy_arns: vec!["arn:aws:iam::aws:policy/Route53".to_string()],
                    inline_policy: Some(r#"{"Effect":"Allow","Action":"route53:*","Resource":"*"}"#.to_string()),
                },
            }],
            ..Default::default()
        });
        let model = model_for(cluster);
        let c = build(&model);
        let name = format!("kube-wildcard-external-dns.sa.{CLUSTER}");
        let role = c.find(&Link::<IamRole>::new(name.clone())).unwrap();
        assert_eq!(role.tags[TAG_SERVICE_ACCOUNT_NAMESPACE], "Kube-*");
        assert_eq!(role.export_with_id.as_deref(), Some("kube-wildcard-external-dns"));
        assert!(c.find(&Link::<IamRolePolicy>::new(name.clone())).is_some());
        let external = c
            .find(&Link::<IamRolePolicy>::new(format!("external-{name}")))
            .unwrap();
        assert_eq!(external.managed_policies.len(), 1);
    }

    #[test]
    fn test_service_account_name_limits() {
        let model = model_for(minimal_cluster());
        let mut c = ModelBuilderContext::new();
        let long = ServiceAccount {
            namespace: "a-very-long-namespace-name".to_string(),
            name: "and-an-even-longer-service-account-name".to_string(),
        };
        let role = build_iam_for_service_account(&model, &mut c, &long, None).unwrap();
        assert_eq!(role.name().len(), MAX_ROLE_NAME);
        assert!(c.find(&Link::<IamRolePolicy>::new(role.name())).is_none());

        let wildcard = ServiceAccount {
            namespace: "default".to_string(),
            name: "*".to_string(),
        };
        assert!(build_iam_for_service_account(&model, &mut c, &wildcard, None).is_err());
    }
}
