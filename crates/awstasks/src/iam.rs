//! IAM roles, policies, instance profiles and OIDC providers

use std::collections::BTreeSet;
use std::sync::Arc;

use cloud_client::ResourceKind;
use fi::{
    Changes, CloudFormationTarget, CloudupTask, Deletion, HclBody, Lifecycle, Link, Outputs, Resource, RunContext,
    TaskError, TaskKey, TaskMap, TerraformTarget,
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::util::{Tags, attributes, cf_link, cf_tags, create_or_update, find_one, id_output, task_identity, tf_tags};

/// Reformat a policy document so that equal JSON compares equal as text
pub fn canonical_policy(document: &str) -> Result<String, TaskError> {
    let value: Value = serde_json::from_str(document)?;
    Ok(value.to_string())
}

async fn canonical_resource(ctx: &RunContext, resource: &Resource) -> Result<Resource, TaskError> {
    let resource = resource.materialize(ctx).await?;
    match resource.as_text() {
        Some(text) => Ok(Resource::from_string(canonical_policy(&text)?)),
        None => Ok(resource),
    }
}

fn resource_text(resource: &Resource, what: &str) -> Result<String, TaskError> {
    resource
        .as_text()
        .ok_or_else(|| TaskError::Invalid(format!("{what} has not been materialized")))
}

fn resource_json(resource: &Resource, what: &str) -> Result<Value, TaskError> {
    Ok(serde_json::from_str(&resource_text(resource, what)?)?)
}

/// An IAM role
#[derive(Debug, Clone, Serialize)]
pub struct IamRole {
    pub name: String,
    pub path: Option<String>,
    pub role_policy_document: Resource,
    pub permissions_boundary: Option<String>,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    /// Terraform output prefix for the role name and ARN
    #[serde(skip)]
    pub export_with_id: Option<String>,
    #[serde(skip)]
    pub arn: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl IamRole {
    pub fn new(name: impl Into<String>, role_policy_document: Resource) -> Self {
        Self {
            name: name.into(),
            path: None,
            role_policy_document,
            permissions_boundary: None,
            tags: Tags::new(),
            export_with_id: None,
            arn: None,
            lifecycle: Lifecycle::Sync,
        }
    }
}

#[async_trait::async_trait]
impl CloudupTask for IamRole {
    const KIND: &'static str = "IAMRole";

    task_identity!();

    async fn normalize(&self, ctx: &RunContext) -> Result<Self, TaskError> {
        Ok(IamRole {
            role_policy_document: canonical_resource(ctx, &self.role_policy_document).await?,
            ..self.clone()
        })
    }

    fn outputs(&self) -> Outputs {
        let mut outputs = id_output(self.name.clone());
        if let Some(arn) = &self.arn {
            outputs.insert("arn".to_string(), arn.clone());
        }
        outputs
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let Some(o) = ctx.cloud.get(ResourceKind::IamRole, &self.name).await? else {
            return Ok(None);
        };
        let document = o
            .attr_str("assume_role_policy_document")
            .map(|d| canonical_policy(&d))
            .transpose()?
            .unwrap_or_default();
        Ok(Some(IamRole {
            name: self.name.clone(),
            path: o.attr_str("path"),
            role_policy_document: Resource::from_string(document),
            permissions_boundary: o.attr_str("permissions_boundary"),
            tags: o.tags.clone(),
            export_with_id: self.export_with_id.clone(),
            arn: o.attr_str("arn"),
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, _actual: Option<&Self>, changes: &Changes) -> Result<(), TaskError> {
        changes.check_immutable(&["path"])
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let mut attrs = attributes([
            ("name", json!(self.name)),
            ("path", json!(self.path)),
            (
                "assume_role_policy_document",
                json!(resource_text(&self.role_policy_document, "assume role policy")?),
            ),
            ("permissions_boundary", json!(self.permissions_boundary)),
        ]);
        if actual.is_some() && self.permissions_boundary.is_none() {
            attrs.insert("permissions_boundary".to_string(), Value::Null);
        }
        let o = create_or_update(
            ctx,
            ResourceKind::IamRole,
            actual.map(|a| a.name.as_str()),
            attrs,
            &self.tags,
            changes,
        )
        .await?;
        let mut outputs = id_output(o.id.clone());
        if let Some(arn) = o.attr_str("arn") {
            outputs.insert("arn".to_string(), arn);
        }
        Ok(outputs)
    }

    async fn render_terraform(&self, _ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        let document = resource_text(&self.role_policy_document, "assume role policy")?;
        let policy = tf.add_file("aws_iam_role", &self.name, "policy", document.as_bytes());
        tf.add_resource(
            "aws_iam_role",
            &self.name,
            HclBody::new()
                .attr("name", self.name.clone())
                .opt_attr("path", self.path.clone())
                .attr("assume_role_policy", policy)
                .opt_attr("permissions_boundary", self.permissions_boundary.clone())
                .attr("tags", tf_tags(&self.tags)),
        )?;
        let name = TerraformTarget::reference("aws_iam_role", &self.name, "name");
        let arn = TerraformTarget::reference("aws_iam_role", &self.name, "arn");
        if let Some(export) = &self.export_with_id {
            tf.add_output(&format!("{export}_role_arn"), arn.clone());
            tf.add_output(&format!("{export}_role_name"), name.clone());
        }
        Ok(Outputs::from([("id".to_string(), name), ("arn".to_string(), arn)]))
    }

    async fn render_cloudformation(&self, _ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        const TYPE: &str = "AWS::IAM::Role";
        cf.add_resource(
            TYPE,
            &self.name,
            json!({
                "RoleName": self.name,
                "Path": self.path,
                "AssumeRolePolicyDocument": resource_json(&self.role_policy_document, "assume role policy")?,
                "PermissionsBoundary": self.permissions_boundary,
                "Tags": cf_tags(&self.tags),
            }),
        )?;
        Ok(Outputs::from([
            ("id".to_string(), CloudFormationTarget::ref_output(TYPE, &self.name)),
            ("arn".to_string(), CloudFormationTarget::get_att_output(TYPE, &self.name, "Arn")),
        ]))
    }

    /// Owned roles of this cluster that no task describes any more
    async fn find_deletions(&self, ctx: &RunContext) -> Result<Vec<Arc<dyn Deletion>>, TaskError> {
        let suffix = format!(".{}", ctx.cluster_name);
        let expected: BTreeSet<&str> = ctx.tasks.of_kind::<IamRole>().into_iter().map(|r| r.name.as_str()).collect();
        let roles = ctx.cloud.query(ResourceKind::IamRole, &[]).await?;
        let mut deletions: Vec<Arc<dyn Deletion>> = Vec::new();
        for role in roles {
            if !role.id.ends_with(&suffix) || expected.contains(role.id.as_str()) {
                continue;
            }
            let owned = role
                .tags
                .get(&format!("kubernetes.io/cluster/{}", ctx.cluster_name))
                .is_some_and(|v| v == "owned");
            if !owned {
                debug!(role = %role.id, "Skipping role not owned by this cluster");
                continue;
            }
            deletions.push(Arc::new(IamRoleDeletion { role_name: role.id }));
        }
        Ok(deletions)
    }
}

/// Removes a role along with its inline policies, managed policy attachments
/// and instance profile memberships
#[derive(Debug)]
pub struct IamRoleDeletion {
    pub role_name: String,
}

#[async_trait::async_trait]
impl Deletion for IamRoleDeletion {
    fn task_kind(&self) -> &str {
        IamRole::KIND
    }

    fn item(&self) -> String {
        self.role_name.clone()
    }

    async fn delete(&self, ctx: &RunContext) -> Result<(), TaskError> {
        for kind in [
            ResourceKind::IamRolePolicy,
            ResourceKind::IamRolePolicyAttachment,
            ResourceKind::IamInstanceProfileRole,
        ] {
            for o in ctx.cloud.query(kind, &[("role_name", &self.role_name)]).await? {
                debug!(role = %self.role_name, kind = %kind, id = %o.id, "Removing role dependent");
                ctx.cloud.delete(kind, &o.id).await?;
            }
        }
        ctx.cloud.delete(ResourceKind::IamRole, &self.role_name).await?;
        info!(role = %self.role_name, "Deleted IAM role");
        Ok(())
    }
}

/// Inline policy document and managed policy attachments of a role
#[derive(Debug, Clone, Serialize)]
pub struct IamRolePolicy {
    pub name: String,
    pub role: Link<IamRole>,
    pub policy_document: Option<Resource>,
    /// Managed policy ARNs, kept sorted
    pub managed_policies: Vec<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl IamRolePolicy {
    async fn attached_policies(&self, ctx: &RunContext, role_name: &str) -> Result<Vec<(String, String)>, TaskError> {
        let mut attached: Vec<(String, String)> = ctx
            .cloud
            .query(ResourceKind::IamRolePolicyAttachment, &[("role_name", role_name)])
            .await?
            .into_iter()
            .filter_map(|o| o.attr_str("policy_arn").map(|arn| (arn, o.id)))
            .collect();
        attached.sort();
        Ok(attached)
    }

    fn attachment_name(&self, arn: &str) -> String {
        let policy = arn.rsplit('/').next().unwrap_or(arn);
        format!("{}-{policy}", self.name)
    }
}

#[async_trait::async_trait]
impl CloudupTask for IamRolePolicy {
    const KIND: &'static str = "IAMRolePolicy";

    task_identity!();

    async fn normalize(&self, ctx: &RunContext) -> Result<Self, TaskError> {
        let policy_document = match &self.policy_document {
            Some(document) => Some(canonical_resource(ctx, document).await?),
            None => None,
        };
        let mut managed_policies = self.managed_policies.clone();
        managed_policies.sort();
        managed_policies.dedup();
        Ok(IamRolePolicy {
            policy_document,
            managed_policies,
            ..self.clone()
        })
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let Some(role_name) = ctx.try_link_id(&self.role) else {
            return Ok(None);
        };
        let inline = find_one(
            ctx,
            ResourceKind::IamRolePolicy,
            &[("role_name", &role_name), ("policy_name", &self.name)],
        )
        .await?;
        let policy_document = inline
            .and_then(|o| o.attr_str("policy_document"))
            .map(|d| canonical_policy(&d))
            .transpose()?
            .map(Resource::from_string);
        let managed_policies: Vec<String> = if self.managed_policies.is_empty() {
            Vec::new()
        } else {
            self.attached_policies(ctx, &role_name)
                .await?
                .into_iter()
                .map(|(arn, _)| arn)
                .collect()
        };
        if policy_document.is_none() && managed_policies.is_empty() {
            return Ok(None);
        }
        Ok(Some(IamRolePolicy {
            name: self.name.clone(),
            role: self.role.clone(),
            policy_document,
            managed_policies,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, _actual: Option<&Self>, _changes: &Changes) -> Result<(), TaskError> {
        if self.policy_document.is_none() && self.managed_policies.is_empty() {
            return Err(TaskError::Invalid(format!(
                "role policy {} has neither a document nor managed policies",
                self.name
            )));
        }
        Ok(())
    }

    async fn render_direct(&self, ctx: &RunContext, _actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let role_name = ctx.link_id(&self.role)?;

        if let Some(document) = &self.policy_document {
            if changes.contains("policy_document") {
                let existing = find_one(
                    ctx,
                    ResourceKind::IamRolePolicy,
                    &[("role_name", &role_name), ("policy_name", &self.name)],
                )
                .await?;
                let attrs = attributes([
                    ("role_name", json!(role_name)),
                    ("policy_name", json!(self.name)),
                    ("policy_document", json!(resource_text(document, "policy document")?)),
                ]);
                match existing {
                    Some(o) => {
                        ctx.cloud.update(ResourceKind::IamRolePolicy, &o.id, attrs).await?;
                    }
                    None => {
                        ctx.cloud.create(ResourceKind::IamRolePolicy, attrs, Tags::new()).await?;
                    }
                }
            }
        }

        if changes.contains("managed_policies") {
            let attached = self.attached_policies(ctx, &role_name).await?;
            let expected: BTreeSet<&str> = self.managed_policies.iter().map(String::as_str).collect();
            for (arn, id) in &attached {
                if !expected.contains(arn.as_str()) {
                    debug!(role = %role_name, policy = %arn, "Detaching managed policy");
                    ctx.cloud.delete(ResourceKind::IamRolePolicyAttachment, id).await?;
                }
            }
            for arn in &self.managed_policies {
                if !attached.iter().any(|(a, _)| a == arn) {
                    debug!(role = %role_name, policy = %arn, "Attaching managed policy");
                    let attrs = attributes([("role_name", json!(role_name)), ("policy_arn", json!(arn))]);
                    ctx.cloud
                        .create(ResourceKind::IamRolePolicyAttachment, attrs, Tags::new())
                        .await?;
                }
            }
        }
        Ok(Outputs::new())
    }

    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        let role = ctx.link_id(&self.role)?;
        if let Some(document) = &self.policy_document {
            let text = resource_text(document, "policy document")?;
            let policy = tf.add_file("aws_iam_role_policy", &self.name, "policy", text.as_bytes());
            tf.add_resource(
                "aws_iam_role_policy",
                &self.name,
                HclBody::new()
                    .attr("name", self.name.clone())
                    .attr("role", role.clone())
                    .attr("policy", policy),
            )?;
        }
        for arn in &self.managed_policies {
            tf.add_resource(
                "aws_iam_role_policy_attachment",
                &self.attachment_name(arn),
                HclBody::new().attr("role", role.clone()).attr("policy_arn", arn.clone()),
            )?;
        }
        Ok(Outputs::new())
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        if !self.managed_policies.is_empty() {
            return Err(TaskError::Unsupported {
                kind: format!("{} {} (managed policy attachments)", Self::KIND, self.name),
                target: ctx.target.name().to_string(),
            });
        }
        if let Some(document) = &self.policy_document {
            cf.add_resource(
                "AWS::IAM::Policy",
                &self.name,
                json!({
                    "PolicyName": self.name,
                    "Roles": [cf_link(ctx, &self.role, "id")?],
                    "PolicyDocument": resource_json(document, "policy document")?,
                }),
            )?;
        }
        Ok(Outputs::new())
    }
}

/// An instance profile
///
/// Shared profiles name an existing profile by its ARN and are never modified.
#[derive(Debug, Clone, Serialize)]
pub struct IamInstanceProfile {
    pub name: String,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(skip)]
    pub arn: Option<String>,
    #[serde(skip)]
    pub shared: bool,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl IamInstanceProfile {
    /// Profile named by an existing ARN (`arn:aws:iam::<account>:instance-profile/<name>`)
    pub fn shared_from_arn(arn: &str) -> Result<Self, TaskError> {
        let name = arn
            .split_once(":instance-profile/")
            .map(|(_, rest)| rest.rsplit('/').next().unwrap_or(rest))
            .filter(|n| !n.is_empty())
            .ok_or_else(|| TaskError::Invalid(format!("{arn} is not an instance profile ARN")))?;
        Ok(Self {
            name: name.to_string(),
            tags: Tags::new(),
            arn: Some(arn.to_string()),
            shared: true,
            lifecycle: Lifecycle::Sync,
        })
    }
}

#[async_trait::async_trait]
impl CloudupTask for IamInstanceProfile {
    const KIND: &'static str = "IAMInstanceProfile";

    task_identity!();

    fn is_shared(&self) -> bool {
        self.shared
    }

    /// Rendered with the roles of the IAMInstanceProfileRole tasks naming this profile
    fn dependencies(&self, tasks: &TaskMap) -> Vec<TaskKey> {
        tasks
            .of_kind::<IamInstanceProfileRole>()
            .into_iter()
            .filter(|r| r.instance_profile.name() == self.name)
            .map(|r| r.role.key())
            .collect()
    }

    fn outputs(&self) -> Outputs {
        let mut outputs = id_output(self.name.clone());
        if let Some(arn) = &self.arn {
            outputs.insert("arn".to_string(), arn.clone());
        }
        outputs
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let Some(o) = ctx.cloud.get(ResourceKind::IamInstanceProfile, &self.name).await? else {
            return Ok(None);
        };
        Ok(Some(IamInstanceProfile {
            name: self.name.clone(),
            tags: if self.shared { Tags::new() } else { o.tags.clone() },
            arn: o.attr_str("arn"),
            shared: self.shared,
            lifecycle: self.lifecycle,
        }))
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let o = create_or_update(
            ctx,
            ResourceKind::IamInstanceProfile,
            actual.map(|a| a.name.as_str()),
            attributes([("name", json!(self.name))]),
            &self.tags,
            changes,
        )
        .await?;
        let mut outputs = id_output(o.id.clone());
        if let Some(arn) = o.attr_str("arn") {
            outputs.insert("arn".to_string(), arn);
        }
        Ok(outputs)
    }

    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        // The role is attached by the IAMInstanceProfileRole task that names this profile
        let role = ctx
            .tasks
            .of_kind::<IamInstanceProfileRole>()
            .into_iter()
            .find(|r| r.instance_profile.name() == self.name)
            .map(|r| ctx.link_id(&r.role))
            .transpose()?;
        tf.add_resource(
            "aws_iam_instance_profile",
            &self.name,
            HclBody::new()
                .attr("name", self.name.clone())
                .opt_attr("role", role)
                .attr("tags", tf_tags(&self.tags)),
        )?;
        Ok(Outputs::from([
            (
                "id".to_string(),
                TerraformTarget::reference("aws_iam_instance_profile", &self.name, "id"),
            ),
            (
                "arn".to_string(),
                TerraformTarget::reference("aws_iam_instance_profile", &self.name, "arn"),
            ),
        ]))
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        const TYPE: &str = "AWS::IAM::InstanceProfile";
        let roles = ctx
            .tasks
            .of_kind::<IamInstanceProfileRole>()
            .into_iter()
            .filter(|r| r.instance_profile.name() == self.name)
            .map(|r| cf_link(ctx, &r.role, "id"))
            .collect::<Result<Vec<_>, _>>()?;
        cf.add_resource(
            TYPE,
            &self.name,
            json!({
                "InstanceProfileName": self.name,
                "Roles": roles,
            }),
        )?;
        Ok(Outputs::from([
            ("id".to_string(), CloudFormationTarget::ref_output(TYPE, &self.name)),
            ("arn".to_string(), CloudFormationTarget::get_att_output(TYPE, &self.name, "Arn")),
        ]))
    }
}

/// Membership of a role in an instance profile
#[derive(Debug, Clone, Serialize)]
pub struct IamInstanceProfileRole {
    pub name: String,
    pub instance_profile: Link<IamInstanceProfile>,
    pub role: Link<IamRole>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for IamInstanceProfileRole {
    const KIND: &'static str = "IAMInstanceProfileRole";

    task_identity!();

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let (Some(profile), Some(role)) = (ctx.try_link_id(&self.instance_profile), ctx.try_link_id(&self.role)) else {
            return Ok(None);
        };
        let found = find_one(
            ctx,
            ResourceKind::IamInstanceProfileRole,
            &[("instance_profile_name", &profile), ("role_name", &role)],
        )
        .await?;
        Ok(found.map(|_| self.clone()))
    }

    async fn render_direct(&self, ctx: &RunContext, _actual: Option<&Self>, _changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([
            ("instance_profile_name", json!(ctx.link_id(&self.instance_profile)?)),
            ("role_name", json!(ctx.link_id(&self.role)?)),
        ]);
        ctx.cloud
            .create(ResourceKind::IamInstanceProfileRole, attrs, Tags::new())
            .await?;
        Ok(Outputs::new())
    }

    /// Rendered as the `role` of the instance profile
    async fn render_terraform(&self, _ctx: &RunContext, _tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        Ok(Outputs::new())
    }

    /// Rendered as the `Roles` of the instance profile
    async fn render_cloudformation(&self, _ctx: &RunContext, _cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        Ok(Outputs::new())
    }
}

/// An OpenID Connect identity provider trusted by IAM
#[derive(Debug, Clone, Serialize)]
pub struct IamOidcProvider {
    pub name: String,
    pub url: String,
    /// Client ids, kept sorted
    pub client_ids: Vec<String>,
    /// Certificate thumbprints, kept sorted
    pub thumbprints: Vec<String>,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(skip)]
    pub arn: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for IamOidcProvider {
    const KIND: &'static str = "IAMOIDCProvider";

    task_identity!();

    async fn normalize(&self, _ctx: &RunContext) -> Result<Self, TaskError> {
        let mut normalized = self.clone();
        normalized.client_ids.sort();
        normalized.thumbprints.sort();
        Ok(normalized)
    }

    fn outputs(&self) -> Outputs {
        self.arn.clone().map(id_output).unwrap_or_default()
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let Some(o) = find_one(ctx, ResourceKind::IamOidcProvider, &[("url", &self.url)]).await? else {
            return Ok(None);
        };
        let mut client_ids = o.attr_strings("client_ids");
        client_ids.sort();
        let mut thumbprints = o.attr_strings("thumbprints");
        thumbprints.sort();
        Ok(Some(IamOidcProvider {
            name: self.name.clone(),
            url: self.url.clone(),
            client_ids,
            thumbprints,
            tags: o.tags.clone(),
            arn: Some(o.id.clone()),
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, _actual: Option<&Self>, changes: &Changes) -> Result<(), TaskError> {
        changes.check_immutable(&["url"])
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let attrs = attributes([
            ("url", json!(self.url)),
            ("client_ids", json!(self.client_ids)),
            ("thumbprints", json!(self.thumbprints)),
        ]);
        let o = create_or_update(
            ctx,
            ResourceKind::IamOidcProvider,
            actual.and_then(|a| a.arn.as_deref()),
            attrs,
            &self.tags,
            changes,
        )
        .await?;
        Ok(id_output(o.id))
    }

    async fn render_terraform(&self, _ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        tf.add_resource(
            "aws_iam_openid_connect_provider",
            &self.name,
            HclBody::new()
                .attr("url", self.url.clone())
                .attr("client_id_list", self.client_ids.clone())
                .attr("thumbprint_list", self.thumbprints.clone())
                .attr("tags", tf_tags(&self.tags)),
        )?;
        Ok(id_output(TerraformTarget::reference(
            "aws_iam_openid_connect_provider",
            &self.name,
            "arn",
        )))
    }

    async fn render_cloudformation(&self, _ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        const TYPE: &str = "AWS::IAM::OIDCProvider";
        cf.add_resource(
            TYPE,
            &self.name,
            json!({
                "Url": self.url,
                "ClientIdList": self.client_ids,
                "ThumbprintList": self.thumbprints,
                "Tags": cf_tags(&self.tags),
            }),
        )?;
        Ok(id_output(CloudFormationTarget::ref_output(TYPE, &self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_policy_ignores_formatting() {
        let a = canonical_policy("{\n  \"Version\": \"2012-10-17\",\n  \"Statement\": []\n}").unwrap();
        let b = canonical_policy(r#"{"Statement":[],"Version":"2012-10-17"}"#).unwrap();
        assert_eq!(a, b);
        assert!(canonical_policy("not json").is_err());
    }

    #[test]
    fn test_shared_profile_from_arn() {
        let profile =
            IamInstanceProfile::shared_from_arn("arn:aws:iam::123456789012:instance-profile/path/custom").unwrap();
        assert_eq!(profile.name, "custom");
        assert!(profile.shared);
        assert_eq!(profile.outputs().get("arn").map(String::as_str), Some("arn:aws:iam::123456789012:instance-profile/path/custom"));
        assert!(IamInstanceProfile::shared_from_arn("arn:aws:iam::1:role/x").is_err());
    }
}
