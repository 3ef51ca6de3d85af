//! IAM policy documents for instance roles and service accounts
//!
//! Node role policies depend on the partition of the account and, for DNS
//! clusters, on the id of the hosted zone. Both are only known while running,
//! so the document is a lazy resource evaluated by [`NodePolicyResolver`].

use std::collections::BTreeSet;

use crds::InstanceGroupRole;
use fi::{ResourceResolver, RunContext, TaskError, TaskKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Policy language version
pub const POLICY_VERSION: &str = "2012-10-17";

/// A single string or a list of strings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    /// Sorted, deduplicated values; a single value collapses to a string
    pub fn from_sorted(values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut values: Vec<String> = values.into_iter().map(Into::into).collect();
        values.sort();
        values.dedup();
        if values.len() == 1 {
            StringOrList::One(values.remove(0))
        } else {
            StringOrList::Many(values)
        }
    }
}

/// One policy statement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub effect: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Value>,
    pub action: StringOrList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<StringOrList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
}

impl Statement {
    /// Allow `actions` on `resources`
    pub fn allow<A, R>(sid: &str, actions: A, resources: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            sid: Some(sid.to_string()),
            effect: "Allow".to_string(),
            principal: None,
            action: StringOrList::from_sorted(actions),
            resource: Some(StringOrList::from_sorted(resources)),
            condition: None,
        }
    }
}

/// A policy document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    pub fn new(statement: Vec<Statement>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement,
        }
    }

    /// Parse user-supplied statements: a JSON list of statements or a single one
    pub fn parse_statements(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        let statement = match value {
            Value::Array(_) => serde_json::from_value(value)?,
            other => vec![serde_json::from_value(other)?],
        };
        Ok(Self::new(statement))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Trust policy letting EC2 instances assume a role
pub fn ec2_assume_role_policy(service_principal: &str) -> PolicyDocument {
    PolicyDocument::new(vec![Statement {
        sid: None,
        effect: "Allow".to_string(),
        principal: Some(json!({ "Service": service_principal })),
        action: StringOrList::One("sts:AssumeRole".to_string()),
        resource: None,
        condition: None,
    }])
}

/// Trust statement for a Kubernetes service account federated through OIDC
///
/// A wildcard namespace switches the condition to `StringLike`.
pub fn service_account_trust_statement(
    partition: &str,
    account_id: &str,
    oidc_provider: &str,
    namespace: &str,
    name: &str,
) -> Statement {
    let operator = if namespace.contains('*') { "StringLike" } else { "StringEquals" };
    let mut subject = Map::new();
    subject.insert(
        format!("{oidc_provider}:sub"),
        Value::String(format!("system:serviceaccount:{namespace}:{name}")),
    );
    let mut condition = Map::new();
    condition.insert(operator.to_string(), Value::Object(subject));
    Statement {
        sid: None,
        effect: "Allow".to_string(),
        principal: Some(json!({
            "Federated": format!("arn:{partition}:iam::{account_id}:oidc-provider/{oidc_provider}")
        })),
        action: StringOrList::One("sts:AssumeRoleWithWebIdentity".to_string()),
        resource: None,
        condition: Some(Value::Object(condition)),
    }
}

/// State store location parsed from an `s3://bucket/prefix` config base
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub prefix: String,
}

impl S3Location {
    pub fn parse(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix("s3://")?;
        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        Some(Self {
            bucket: bucket.to_string(),
            prefix: prefix.trim_end_matches('/').to_string(),
        })
    }
}

/// Inputs of an instance role policy, fixed at compile time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePolicy {
    pub role: InstanceGroupRole,
    pub legacy: bool,
    pub allow_container_registry: bool,
    pub state_store: Option<S3Location>,
    pub kms_keys: BTreeSet<String>,
    /// Hosted zone whose records the role may change; masters only
    pub dns_zone: Option<TaskKey>,
}

impl NodePolicy {
    fn s3_statements(&self, partition: &str, statements: &mut Vec<Statement>) {
        let Some(store) = &self.state_store else {
            return;
        };
        let bucket_arn = format!("arn:{partition}:s3:::{}", store.bucket);
        let objects = if store.prefix.is_empty() {
            format!("{bucket_arn}/*")
        } else {
            format!("{bucket_arn}/{}/*", store.prefix)
        };
        statements.push(Statement::allow(
            "kopsK8sS3GetListBucket",
            [
                "s3:GetBucketLocation",
                "s3:GetEncryptionConfiguration",
                "s3:ListBucket",
                "s3:ListBucketVersions",
            ],
            [bucket_arn],
        ));
        if self.role == InstanceGroupRole::ControlPlane {
            statements.push(Statement::allow("kopsK8sS3MasterBucketFullGet", ["s3:Get*"], [objects]));
        } else {
            statements.push(Statement::allow(
                "kopsK8sS3NodeBucketSelectiveGet",
                ["s3:Get*"],
                [objects],
            ));
        }
    }

    fn route53_statements(partition: &str, hosted_zone_id: &str, statements: &mut Vec<Statement>) {
        let zone = hosted_zone_id.trim_start_matches("/hostedzone/");
        statements.push(Statement::allow(
            "kopsK8sRoute53Change",
            [
                "route53:ChangeResourceRecordSets",
                "route53:GetHostedZone",
                "route53:ListResourceRecordSets",
            ],
            [format!("arn:{partition}:route53:::hostedzone/{zone}")],
        ));
        statements.push(Statement::allow(
            "kopsK8sRoute53GetChanges",
            ["route53:GetChange"],
            [format!("arn:{partition}:route53:::change/*")],
        ));
        statements.push(Statement::allow(
            "kopsK8sRoute53ListZones",
            ["route53:ListHostedZones", "route53:ListTagsForResource"],
            ["*"],
        ));
    }

    fn ecr_statement() -> Statement {
        Statement::allow(
            "kopsK8sECR",
            [
                "ecr:BatchCheckLayerAvailability",
                "ecr:BatchGetImage",
                "ecr:DescribeRepositories",
                "ecr:GetAuthorizationToken",
                "ecr:GetDownloadUrlForLayer",
                "ecr:GetRepositoryPolicy",
                "ecr:ListImages",
            ],
            ["*"],
        )
    }

    fn master_statements(&self, statements: &mut Vec<Statement>) {
        if self.legacy {
            statements.push(Statement::allow(
                "kopsK8sMasterFullAccess",
                ["autoscaling:*", "ec2:*", "elasticloadbalancing:*"],
                ["*"],
            ));
        } else {
            statements.push(Statement::allow(
                "kopsK8sMasterEC2Perms",
                [
                    "ec2:AttachVolume",
                    "ec2:AuthorizeSecurityGroupIngress",
                    "ec2:CreateRoute",
                    "ec2:CreateSecurityGroup",
                    "ec2:CreateTags",
                    "ec2:CreateVolume",
                    "ec2:DeleteRoute",
                    "ec2:DeleteSecurityGroup",
                    "ec2:DeleteVolume",
                    "ec2:DescribeAccountAttributes",
                    "ec2:DescribeInstances",
                    "ec2:DescribeInternetGateways",
                    "ec2:DescribeRegions",
                    "ec2:DescribeRouteTables",
                    "ec2:DescribeSecurityGroups",
                    "ec2:DescribeSubnets",
                    "ec2:DescribeVolumes",
                    "ec2:DescribeVolumesModifications",
                    "ec2:DetachVolume",
                    "ec2:ModifyInstanceAttribute",
                    "ec2:ModifyVolume",
                    "ec2:RevokeSecurityGroupIngress",
                ],
                ["*"],
            ));
            statements.push(Statement::allow(
                "kopsElbPerms",
                [
                    "elasticloadbalancing:AddTags",
                    "elasticloadbalancing:ConfigureHealthCheck",
                    "elasticloadbalancing:CreateListener",
                    "elasticloadbalancing:CreateLoadBalancer",
                    "elasticloadbalancing:CreateTargetGroup",
                    "elasticloadbalancing:DeleteListener",
                    "elasticloadbalancing:DeleteLoadBalancer",
                    "elasticloadbalancing:DeleteTargetGroup",
                    "elasticloadbalancing:DeregisterInstancesFromLoadBalancer",
                    "elasticloadbalancing:DeregisterTargets",
                    "elasticloadbalancing:DescribeListeners",
                    "elasticloadbalancing:DescribeLoadBalancerAttributes",
                    "elasticloadbalancing:DescribeLoadBalancers",
                    "elasticloadbalancing:DescribeTargetGroups",
                    "elasticloadbalancing:DescribeTargetHealth",
                    "elasticloadbalancing:ModifyListener",
                    "elasticloadbalancing:ModifyLoadBalancerAttributes",
                    "elasticloadbalancing:ModifyTargetGroup",
                    "elasticloadbalancing:RegisterInstancesWithLoadBalancer",
                    "elasticloadbalancing:RegisterTargets",
                ],
                ["*"],
            ));
            statements.push(Statement::allow(
                "kopsMasterASPerms",
                [
                    "autoscaling:DescribeAutoScalingGroups",
                    "autoscaling:DescribeLaunchConfigurations",
                    "autoscaling:DescribeTags",
                    "autoscaling:SetDesiredCapacity",
                    "autoscaling:TerminateInstanceInAutoScalingGroup",
                    "autoscaling:UpdateAutoScalingGroup",
                    "ec2:DescribeLaunchTemplateVersions",
                ],
                ["*"],
            ));
        }
        statements.push(Statement::allow(
            "kopsMasterCertIAMPerms",
            ["iam:GetServerCertificate", "iam:ListServerCertificates"],
            ["*"],
        ));
        if !self.kms_keys.is_empty() {
            statements.push(Statement::allow(
                "kopsK8sKMSEncryptedVolumes",
                [
                    "kms:CreateGrant",
                    "kms:Decrypt",
                    "kms:DescribeKey",
                    "kms:Encrypt",
                    "kms:GenerateDataKey*",
                    "kms:ReEncrypt*",
                ],
                self.kms_keys.iter().cloned(),
            ));
        }
    }

    /// Statements for the given partition and hosted zone id
    pub fn document(&self, partition: &str, hosted_zone_id: Option<&str>) -> PolicyDocument {
        let mut statements = Vec::new();
        if self.role == InstanceGroupRole::Bastion {
            statements.push(Statement::allow("kopsK8sBastion", ["ec2:DescribeRegions"], ["*"]));
            return PolicyDocument::new(statements);
        }

        if self.role == InstanceGroupRole::ControlPlane {
            self.master_statements(&mut statements);
        } else {
            let actions: &[&str] = if self.legacy {
                &["ec2:Describe*"]
            } else {
                &["ec2:DescribeInstances", "ec2:DescribeRegions"]
            };
            statements.push(Statement::allow("kopsK8sNodeEC2Perms", actions.iter().copied(), ["*"]));
        }

        self.s3_statements(partition, &mut statements);
        if let Some(zone) = hosted_zone_id {
            Self::route53_statements(partition, zone, &mut statements);
        }
        if self.allow_container_registry {
            statements.push(Self::ecr_statement());
        }
        PolicyDocument::new(statements)
    }
}

/// Evaluates a [`NodePolicy`] once the hosted zone exists
#[derive(Debug, Clone)]
pub struct NodePolicyResolver {
    pub name: String,
    pub policy: NodePolicy,
}

#[async_trait::async_trait]
impl ResourceResolver for NodePolicyResolver {
    async fn resolve(&self, ctx: &RunContext) -> Result<Vec<u8>, TaskError> {
        let zone_id = match &self.policy.dns_zone {
            Some(key) => Some(ctx.output(key, "id")?),
            None => None,
        };
        let document = self.policy.document(ctx.cloud.partition(), zone_id.as_deref());
        Ok(document.to_json()?.into_bytes())
    }

    fn describe(&self) -> String {
        format!("iam-policy:{}", self.name)
    }
}

/// Evaluates a service account trust policy once the account id is known
#[derive(Debug, Clone)]
pub struct ServiceAccountTrustResolver {
    pub role_name: String,
    pub oidc_provider: String,
    pub namespace: String,
    pub name: String,
}

#[async_trait::async_trait]
impl ResourceResolver for ServiceAccountTrustResolver {
    async fn resolve(&self, ctx: &RunContext) -> Result<Vec<u8>, TaskError> {
        let statement = service_account_trust_statement(
            ctx.cloud.partition(),
            ctx.cloud.account_id(),
            &self.oidc_provider,
            &self.namespace,
            &self.name,
        );
        Ok(PolicyDocument::new(vec![statement]).to_json()?.into_bytes())
    }

    fn describe(&self) -> String {
        format!("iam-trust:{}", self.role_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sids(document: &PolicyDocument) -> Vec<&str> {
        document.statement.iter().filter_map(|s| s.sid.as_deref()).collect()
    }

    fn node_policy(role: InstanceGroupRole) -> NodePolicy {
        NodePolicy {
            role,
            legacy: false,
            allow_container_registry: false,
            state_store: None,
            kms_keys: BTreeSet::new(),
            dns_zone: None,
        }
    }

    #[test]
    fn test_bastion_policy() {
        let document = node_policy(InstanceGroupRole::Bastion).document("aws", None);
        assert_eq!(sids(&document), vec!["kopsK8sBastion"]);
        assert_eq!(document.version, POLICY_VERSION);
    }

    #[test]
    fn test_master_policy_with_route53() {
        let mut policy = node_policy(InstanceGroupRole::ControlPlane);
        policy.kms_keys.insert("arn:aws:kms:us-test-1:123:key/abc".to_string());
        let document = policy.document("aws", Some("/hostedzone/Z123"));
        let ids = sids(&document);
        for sid in [
            "kopsK8sMasterEC2Perms",
            "kopsElbPerms",
            "kopsMasterASPerms",
            "kopsMasterCertIAMPerms",
            "kopsK8sKMSEncryptedVolumes",
            "kopsK8sRoute53Change",
            "kopsK8sRoute53GetChanges",
            "kopsK8sRoute53ListZones",
        ] {
            assert!(ids.contains(&sid), "missing {sid}");
        }
        let change = document
            .statement
            .iter()
            .find(|s| s.sid.as_deref() == Some("kopsK8sRoute53Change"))
            .unwrap();
        assert_eq!(
            change.resource,
            Some(StringOrList::One("arn:aws:route53:::hostedzone/Z123".to_string()))
        );
    }

    #[test]
    fn test_node_policy_s3_and_ecr() {
        let mut policy = node_policy(InstanceGroupRole::Node);
        policy.allow_container_registry = true;
        policy.state_store = S3Location::parse("s3://state-bucket/clusters/a");
        let document = policy.document("aws-cn", None);
        let json = document.to_json().unwrap();
        assert!(json.contains("arn:aws-cn:s3:::state-bucket/clusters/a/*"));
        assert!(sids(&document).contains(&"kopsK8sECR"));
        assert!(!sids(&document).contains(&"kopsK8sRoute53Change"));
    }

    #[test]
    fn test_service_account_trust() {
        let statement = service_account_trust_statement("aws", "123456789012", "api.internal.c", "kube-*", "sa");
        let value = serde_json::to_value(&statement).unwrap();
        assert_eq!(
            value["Principal"]["Federated"],
            "arn:aws:iam::123456789012:oidc-provider/api.internal.c"
        );
        assert_eq!(
            value["Condition"]["StringLike"]["api.internal.c:sub"],
            "system:serviceaccount:kube-*:sa"
        );
    }

    #[test]
    fn test_parse_statements() {
        let one = PolicyDocument::parse_statements(r#"{"Effect":"Allow","Action":"s3:Get*","Resource":"*"}"#).unwrap();
        assert_eq!(one.statement.len(), 1);
        let many = PolicyDocument::parse_statements(
            r#"[{"Effect":"Allow","Action":["a:B"],"Resource":"*"},{"Effect":"Deny","Action":"c:D"}]"#,
        )
        .unwrap();
        assert_eq!(many.statement.len(), 2);
        assert!(PolicyDocument::parse_statements("not json").is_err());
    }

    #[test]
    fn test_s3_location() {
        assert_eq!(
            S3Location::parse("s3://bucket/path/"),
            Some(S3Location {
                bucket: "bucket".to_string(),
                prefix: "path".to_string(),
            })
        );
        assert_eq!(S3Location::parse("memfs://x"), None);
    }
}
