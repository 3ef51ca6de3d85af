//! Launch configurations and launch templates

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use cloud_client::{CloudObject, ResourceKind};
use fi::{
    Changes, CloudFormationTarget, CloudupTask, HclBody, Lifecycle, Link, Outputs, Resource, RunContext, TaskError,
    TerraformTarget,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::iam::IamInstanceProfile;
use crate::securitygroup::SecurityGroup;
use crate::sshkey::SshKey;
use crate::util::{
    Tags, attributes, cf_link, cf_links, cf_tags, create_or_update, find_one, id_output, link_ids, opt_link_id, relink_all,
    relink_opt, task_identity, tf_tags,
};

/// Root device name used for every image
pub const ROOT_DEVICE_NAME: &str = "/dev/xvda";

/// Root volume of the machines in a group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootVolume {
    pub size: Option<i64>,
    pub volume_type: Option<String>,
    pub iops: Option<i64>,
    pub throughput: Option<i64>,
    pub encrypted: Option<bool>,
    pub encryption_key: Option<String>,
}

impl RootVolume {
    fn hcl(&self) -> HclBody {
        HclBody::new()
            .opt_attr("volume_type", self.volume_type.clone())
            .opt_attr("volume_size", self.size)
            .opt_attr("iops", self.iops)
            .opt_attr("throughput", self.throughput)
            .opt_attr("encrypted", self.encrypted)
            .opt_attr("kms_key_id", self.encryption_key.clone())
            .attr("delete_on_termination", true)
    }

    fn cf_ebs(&self) -> Value {
        json!({
            "VolumeType": self.volume_type,
            "VolumeSize": self.size,
            "Iops": self.iops,
            "Throughput": self.throughput,
            "Encrypted": self.encrypted,
            "KmsKeyId": self.encryption_key,
            "DeleteOnTermination": true,
        })
    }
}

/// Machine settings shared by launch configurations and templates
#[derive(Debug, Clone, Serialize)]
pub struct MachineSpec {
    pub image_id: Option<String>,
    pub instance_type: Option<String>,
    /// Key pair managed by this cluster
    pub ssh_key: Option<Link<SshKey>>,
    /// Existing key pair named in the cluster spec
    pub ssh_key_name: Option<String>,
    pub security_groups: Vec<Link<SecurityGroup>>,
    pub associate_public_ip: Option<bool>,
    pub iam_instance_profile: Option<Link<IamInstanceProfile>>,
    pub root_volume: Option<RootVolume>,
    pub user_data: Option<Resource>,
    pub spot_price: Option<String>,
    pub instance_monitoring: Option<bool>,
    pub http_tokens: Option<String>,
    pub http_put_response_hop_limit: Option<i64>,
}

impl MachineSpec {
    async fn normalize(&self, ctx: &RunContext) -> Result<Self, TaskError> {
        let mut spec = self.clone();
        if let Some(user_data) = &self.user_data {
            spec.user_data = Some(user_data.materialize(ctx).await?);
        }
        Ok(spec)
    }

    fn key_name(&self, ctx: &RunContext) -> Result<Option<String>, TaskError> {
        match (&self.ssh_key, &self.ssh_key_name) {
            (Some(link), _) => Ok(Some(ctx.link_id(link)?)),
            (None, name) => Ok(name.clone()),
        }
    }

    fn user_data_bytes(&self) -> Option<&[u8]> {
        self.user_data.as_ref().and_then(Resource::as_bytes)
    }

    /// Attributes stored on the backend object
    fn attributes(&self, ctx: &RunContext) -> Result<Map<String, Value>, TaskError> {
        Ok(attributes([
            ("image_id", json!(self.image_id)),
            ("instance_type", json!(self.instance_type)),
            ("key_name", json!(self.key_name(ctx)?)),
            ("security_group_ids", json!(link_ids(ctx, &self.security_groups)?)),
            ("associate_public_ip", json!(self.associate_public_ip)),
            (
                "iam_instance_profile",
                json!(opt_link_id(ctx, self.iam_instance_profile.as_ref())?),
            ),
            ("root_volume", serde_json::to_value(&self.root_volume)?),
            ("user_data", json!(self.user_data_bytes().map(|b| STANDARD.encode(b)))),
            ("spot_price", json!(self.spot_price)),
            ("instance_monitoring", json!(self.instance_monitoring)),
            ("http_tokens", json!(self.http_tokens)),
            ("http_put_response_hop_limit", json!(self.http_put_response_hop_limit)),
        ]))
    }

    /// Settings as found on a backend object
    fn found_in(&self, ctx: &RunContext, o: &CloudObject) -> Self {
        let key_name = o.attr_str("key_name");
        let (ssh_key, ssh_key_name) = match &self.ssh_key {
            Some(link) => (relink_opt(ctx, Some(link), key_name.as_deref()), None),
            None => (None, key_name),
        };
        MachineSpec {
            image_id: o.attr_str("image_id"),
            instance_type: o.attr_str("instance_type"),
            ssh_key,
            ssh_key_name,
            security_groups: relink_all(ctx, &self.security_groups, &o.attr_strings("security_group_ids")),
            associate_public_ip: o.attr_bool("associate_public_ip"),
            iam_instance_profile: relink_opt(
                ctx,
                self.iam_instance_profile.as_ref(),
                o.attr_str("iam_instance_profile").as_deref(),
            ),
            root_volume: o.attr("root_volume"),
            user_data: o
                .attr_str("user_data")
                .and_then(|b| STANDARD.decode(b).ok())
                .map(Resource::from_bytes),
            spot_price: o.attr_str("spot_price"),
            instance_monitoring: o.attr_bool("instance_monitoring"),
            http_tokens: o.attr_str("http_tokens"),
            http_put_response_hop_limit: o.attr_i64("http_put_response_hop_limit"),
        }
    }

    fn metadata_options_cf(&self) -> Option<Value> {
        if self.http_tokens.is_none() && self.http_put_response_hop_limit.is_none() {
            return None;
        }
        Some(json!({
            "HttpTokens": self.http_tokens,
            "HttpPutResponseHopLimit": self.http_put_response_hop_limit,
        }))
    }

    fn metadata_options_hcl(&self) -> Option<HclBody> {
        if self.http_tokens.is_none() && self.http_put_response_hop_limit.is_none() {
            return None;
        }
        Some(
            HclBody::new()
                .opt_attr("http_tokens", self.http_tokens.clone())
                .opt_attr("http_put_response_hop_limit", self.http_put_response_hop_limit),
        )
    }
}

/// A launch configuration
///
/// Launch configurations are immutable: a change creates a new one named
/// `<name>-<timestamp>`, and the autoscaling group moves to it.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchConfiguration {
    pub name: String,
    #[serde(flatten)]
    pub spec: MachineSpec,
    /// Name of the current configuration
    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for LaunchConfiguration {
    const KIND: &'static str = "LaunchConfiguration";

    task_identity!();

    async fn normalize(&self, ctx: &RunContext) -> Result<Self, TaskError> {
        Ok(LaunchConfiguration {
            spec: self.spec.normalize(ctx).await?,
            ..self.clone()
        })
    }

    fn outputs(&self) -> Outputs {
        self.id.clone().map(id_output).unwrap_or_default()
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let configurations = ctx
            .cloud
            .query(ResourceKind::LaunchConfiguration, &[("base_name", &self.name)])
            .await?;
        let Some(latest) = configurations.into_iter().max_by(|a, b| a.id.cmp(&b.id)) else {
            return Ok(None);
        };
        Ok(Some(LaunchConfiguration {
            name: self.name.clone(),
            spec: self.spec.found_in(ctx, &latest),
            id: Some(latest.id),
            lifecycle: self.lifecycle,
        }))
    }

    async fn render_direct(&self, ctx: &RunContext, _actual: Option<&Self>, _changes: &Changes) -> Result<Outputs, TaskError> {
        let name = format!("{}-{}", self.name, Utc::now().format("%Y%m%d%H%M%S"));
        let mut attrs = self.spec.attributes(ctx)?;
        attrs.insert("name".to_string(), json!(name));
        attrs.insert("base_name".to_string(), json!(self.name));
        let o = ctx
            .cloud
            .create(ResourceKind::LaunchConfiguration, attrs, Tags::new())
            .await?;
        Ok(id_output(o.id))
    }

    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        let spec = &self.spec;
        let user_data = spec
            .user_data_bytes()
            .map(|b| tf.add_file("aws_launch_configuration", &self.name, "user_data", b));
        let mut body = HclBody::new()
            .attr("name_prefix", format!("{}-", self.name))
            .opt_attr("image_id", spec.image_id.clone())
            .opt_attr("instance_type", spec.instance_type.clone())
            .opt_attr("key_name", spec.key_name(ctx)?)
            .opt_attr(
                "iam_instance_profile",
                opt_link_id(ctx, spec.iam_instance_profile.as_ref())?,
            )
            .attr("security_groups", link_ids(ctx, &spec.security_groups)?)
            .opt_attr("associate_public_ip_address", spec.associate_public_ip)
            .opt_attr("user_data", user_data)
            .opt_attr("enable_monitoring", spec.instance_monitoring)
            .opt_attr("spot_price", spec.spot_price.clone());
        if let Some(volume) = &spec.root_volume {
            body = body.block("root_block_device", volume.hcl());
        }
        if let Some(metadata) = spec.metadata_options_hcl() {
            body = body.block("metadata_options", metadata);
        }
        body = body.block("lifecycle", HclBody::new().attr("create_before_destroy", true));
        tf.add_resource("aws_launch_configuration", &self.name, body)?;
        Ok(id_output(TerraformTarget::reference(
            "aws_launch_configuration",
            &self.name,
            "id",
        )))
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        const TYPE: &str = "AWS::AutoScaling::LaunchConfiguration";
        let spec = &self.spec;
        let profile = spec
            .iam_instance_profile
            .as_ref()
            .map(|l| cf_link(ctx, l, "id"))
            .transpose()?;
        cf.add_resource(
            TYPE,
            &self.name,
            json!({
                "ImageId": spec.image_id,
                "InstanceType": spec.instance_type,
                "KeyName": spec.key_name(ctx)?.map(|k| CloudFormationTarget::value_of(&k)),
                "IamInstanceProfile": profile,
                "SecurityGroups": cf_links(ctx, &spec.security_groups)?,
                "AssociatePublicIpAddress": spec.associate_public_ip,
                "UserData": spec.user_data_bytes().map(|b| STANDARD.encode(b)),
                "InstanceMonitoring": spec.instance_monitoring,
                "SpotPrice": spec.spot_price,
                "MetadataOptions": spec.metadata_options_cf(),
                "BlockDeviceMappings": spec.root_volume.as_ref().map(|v| json!([{
                    "DeviceName": ROOT_DEVICE_NAME,
                    "Ebs": v.cf_ebs(),
                }])),
            }),
        )?;
        Ok(id_output(CloudFormationTarget::ref_output(TYPE, &self.name)))
    }
}

/// A launch template
///
/// Templates are versioned: every update adds a version and the
/// autoscaling group follows the latest.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchTemplate {
    pub name: String,
    #[serde(flatten)]
    pub spec: MachineSpec,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub latest_version: Option<i64>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait::async_trait]
impl CloudupTask for LaunchTemplate {
    const KIND: &'static str = "LaunchTemplate";

    task_identity!();

    async fn normalize(&self, ctx: &RunContext) -> Result<Self, TaskError> {
        Ok(LaunchTemplate {
            spec: self.spec.normalize(ctx).await?,
            ..self.clone()
        })
    }

    fn outputs(&self) -> Outputs {
        let mut outputs = self.id.clone().map(id_output).unwrap_or_default();
        if let Some(version) = self.latest_version {
            outputs.insert("latest_version".to_string(), version.to_string());
        }
        outputs
    }

    async fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError> {
        let found = find_one(ctx, ResourceKind::LaunchTemplate, &[("name", &self.name)]).await?;
        Ok(found.map(|o| LaunchTemplate {
            name: self.name.clone(),
            spec: self.spec.found_in(ctx, &o),
            id: Some(o.id.clone()),
            latest_version: o.attr_i64("latest_version"),
            tags: o.tags,
            lifecycle: self.lifecycle,
        }))
    }

    async fn render_direct(&self, ctx: &RunContext, actual: Option<&Self>, changes: &Changes) -> Result<Outputs, TaskError> {
        let mut attrs = self.spec.attributes(ctx)?;
        attrs.insert("name".to_string(), json!(self.name));
        let o = create_or_update(
            ctx,
            ResourceKind::LaunchTemplate,
            actual.and_then(|a| a.id.as_deref()),
            attrs,
            &self.tags,
            changes,
        )
        .await?;
        let mut outputs = id_output(o.id.clone());
        if let Some(version) = o.attr_i64("latest_version") {
            outputs.insert("latest_version".to_string(), version.to_string());
        }
        Ok(outputs)
    }

    async fn render_terraform(&self, ctx: &RunContext, tf: &TerraformTarget) -> Result<Outputs, TaskError> {
        let spec = &self.spec;
        let user_data = spec.user_data_bytes().map(|b| {
            tf.add_file("aws_launch_template", &self.name, "user_data", b)
                .replacen("${file(", "${filebase64(", 1)
        });
        let mut body = HclBody::new()
            .attr("name", self.name.clone())
            .opt_attr("image_id", spec.image_id.clone())
            .opt_attr("instance_type", spec.instance_type.clone())
            .opt_attr("key_name", spec.key_name(ctx)?)
            .opt_attr("user_data", user_data);
        if let Some(profile) = opt_link_id(ctx, spec.iam_instance_profile.as_ref())? {
            body = body.block("iam_instance_profile", HclBody::new().attr("name", profile));
        }
        body = body.block(
            "network_interfaces",
            HclBody::new()
                .opt_attr("associate_public_ip_address", spec.associate_public_ip)
                .attr("delete_on_termination", true)
                .attr("security_groups", link_ids(ctx, &spec.security_groups)?),
        );
        if let Some(volume) = &spec.root_volume {
            body = body.block(
                "block_device_mappings",
                HclBody::new()
                    .attr("device_name", ROOT_DEVICE_NAME)
                    .block("ebs", volume.hcl()),
            );
        }
        if let Some(enabled) = spec.instance_monitoring {
            body = body.block("monitoring", HclBody::new().attr("enabled", enabled));
        }
        if let Some(price) = &spec.spot_price {
            body = body.block(
                "instance_market_options",
                HclBody::new()
                    .attr("market_type", "spot")
                    .block("spot_options", HclBody::new().attr("max_price", price.clone())),
            );
        }
        if let Some(metadata) = spec.metadata_options_hcl() {
            body = body.block("metadata_options", metadata);
        }
        for resource_type in ["instance", "volume"] {
            body = body.block(
                "tag_specifications",
                HclBody::new()
                    .attr("resource_type", resource_type)
                    .attr("tags", tf_tags(&self.tags)),
            );
        }
        body = body
            .attr("tags", tf_tags(&self.tags))
            .block("lifecycle", HclBody::new().attr("create_before_destroy", true));
        tf.add_resource("aws_launch_template", &self.name, body)?;
        Ok(Outputs::from([
            ("id".to_string(), TerraformTarget::reference("aws_launch_template", &self.name, "id")),
            (
                "latest_version".to_string(),
                TerraformTarget::reference("aws_launch_template", &self.name, "latest_version"),
            ),
        ]))
    }

    async fn render_cloudformation(&self, ctx: &RunContext, cf: &CloudFormationTarget) -> Result<Outputs, TaskError> {
        const TYPE: &str = "AWS::EC2::LaunchTemplate";
        let spec = &self.spec;
        let tags = cf_tags(&self.tags);
        let profile = spec
            .iam_instance_profile
            .as_ref()
            .map(|l| cf_link(ctx, l, "id"))
            .transpose()?;
        cf.add_resource(
            TYPE,
            &self.name,
            json!({
                "LaunchTemplateName": self.name,
                "LaunchTemplateData": {
                    "ImageId": spec.image_id,
                    "InstanceType": spec.instance_type,
                    "KeyName": spec.key_name(ctx)?.map(|k| CloudFormationTarget::value_of(&k)),
                    "IamInstanceProfile": profile.map(|p| json!({ "Name": p })),
                    "NetworkInterfaces": [{
                        "DeviceIndex": 0,
                        "AssociatePublicIpAddress": spec.associate_public_ip,
                        "DeleteOnTermination": true,
                        "Groups": cf_links(ctx, &spec.security_groups)?,
                    }],
                    "UserData": spec.user_data_bytes().map(|b| STANDARD.encode(b)),
                    "Monitoring": spec.instance_monitoring.map(|enabled| json!({ "Enabled": enabled })),
                    "InstanceMarketOptions": spec.spot_price.as_ref().map(|price| json!({
                        "MarketType": "spot",
                        "SpotOptions": { "MaxPrice": price },
                    })),
                    "MetadataOptions": spec.metadata_options_cf(),
                    "BlockDeviceMappings": spec.root_volume.as_ref().map(|v| json!([{
                        "DeviceName": ROOT_DEVICE_NAME,
                        "Ebs": v.cf_ebs(),
                    }])),
                    "TagSpecifications": [
                        { "ResourceType": "instance", "Tags": tags },
                        { "ResourceType": "volume", "Tags": tags },
                    ],
                },
            }),
        )?;
        Ok(Outputs::from([
            ("id".to_string(), CloudFormationTarget::ref_output(TYPE, &self.name)),
            (
                "latest_version".to_string(),
                CloudFormationTarget::get_att_output(TYPE, &self.name, "LatestVersionNumber"),
            ),
        ]))
    }
}
