//! CloudFormation target
//!
//! Resources are collected under logical ids and written as one JSON
//! template. References between resources travel through the output store
//! as JSON-encoded intrinsic functions; [`CloudFormationTarget::value_of`]
//! turns them back into template values.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use serde_json::{Value, json};
use tracing::info;

use crate::error::TaskError;

/// CloudFormation template writer
#[derive(Debug)]
pub struct CloudFormationTarget {
    out_dir: PathBuf,
    resources: Mutex<BTreeMap<String, Value>>,
}

impl CloudFormationTarget {
    /// Create a target writing into `out_dir`
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            resources: Mutex::new(BTreeMap::new()),
        }
    }

    /// Logical id for a resource: type and name with everything but
    /// alphanumerics removed
    pub fn logical_id(resource_type: &str, name: &str) -> String {
        resource_type
            .chars()
            .chain(name.chars())
            .filter(char::is_ascii_alphanumeric)
            .collect()
    }

    /// `{"Ref": ...}` encoded for the output store
    pub fn ref_output(resource_type: &str, name: &str) -> String {
        json!({ "Ref": Self::logical_id(resource_type, name) }).to_string()
    }

    /// `{"Fn::GetAtt": [...]}` encoded for the output store
    pub fn get_att_output(resource_type: &str, name: &str, attribute: &str) -> String {
        json!({ "Fn::GetAtt": [Self::logical_id(resource_type, name), attribute] }).to_string()
    }

    /// Decode an output string into a template value
    ///
    /// Intrinsic functions come back as objects; anything else is a literal.
    pub fn value_of(output: &str) -> Value {
        if output.starts_with('{') {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(output) {
                return value;
            }
        }
        Value::String(output.to_string())
    }

    /// Add a resource and return its logical id
    ///
    /// `null` properties are dropped, at any depth.
    pub fn add_resource(&self, resource_type: &str, name: &str, mut properties: Value) -> Result<String, TaskError> {
        prune_nulls(&mut properties);
        let id = Self::logical_id(resource_type, name);
        let mut resources = self.resources.lock().unwrap_or_else(PoisonError::into_inner);
        if resources.contains_key(&id) {
            return Err(TaskError::Render(format!(
                "cloudformation resource {id} defined twice"
            )));
        }
        resources.insert(
            id.clone(),
            json!({ "Type": resource_type, "Properties": properties }),
        );
        Ok(id)
    }

    /// Resource previously added
    pub fn resource(&self, logical_id: &str) -> Option<Value> {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(logical_id)
            .cloned()
    }

    /// The template document
    pub fn render(&self) -> Value {
        let resources = self.resources.lock().unwrap_or_else(PoisonError::into_inner);
        json!({
            "AWSTemplateFormatVersion": "2010-09-09",
            "Resources": &*resources,
        })
    }

    /// Write `kubernetes.json`
    pub async fn finish(&self) -> Result<(), TaskError> {
        let text = serde_json::to_string_pretty(&self.render())?;
        tokio::fs::create_dir_all(&self.out_dir)
            .await
            .map_err(|e| TaskError::Render(format!("creating {}: {e}", self.out_dir.display())))?;
        let path = self.out_dir.join("kubernetes.json");
        tokio::fs::write(&path, text)
            .await
            .map_err(|e| TaskError::Render(format!("writing {}: {e}", path.display())))?;
        info!(path = %path.display(), "Wrote CloudFormation template");
        Ok(())
    }
}

fn prune_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(prune_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(prune_nulls),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_ids_and_refs() {
        assert_eq!(
            CloudFormationTarget::logical_id("AWS::EC2::VPC", "minimal.example.com"),
            "AWSEC2VPCminimalexamplecom"
        );
        let r = CloudFormationTarget::ref_output("AWS::EC2::VPC", "minimal.example.com");
        assert_eq!(
            CloudFormationTarget::value_of(&r),
            json!({"Ref": "AWSEC2VPCminimalexamplecom"})
        );
        assert_eq!(CloudFormationTarget::value_of("vpc-123"), json!("vpc-123"));
        assert_eq!(CloudFormationTarget::value_of("{not json"), json!("{not json"));
    }

    #[test]
    fn test_template_layout() {
        let cf = CloudFormationTarget::new("/tmp/out");
        cf.add_resource("AWS::EC2::VPC", "c", json!({"CidrBlock": "10.0.0.0/16", "Ipv6": null}))
            .unwrap();
        assert!(cf.add_resource("AWS::EC2::VPC", "c", json!({})).is_err());
        let doc = cf.render();
        assert_eq!(doc["Resources"]["AWSEC2VPCc"]["Type"], "AWS::EC2::VPC");
        assert_eq!(
            doc["Resources"]["AWSEC2VPCc"]["Properties"]["CidrBlock"],
            "10.0.0.0/16"
        );
        assert!(doc["Resources"]["AWSEC2VPCc"]["Properties"].get("Ipv6").is_none());
    }
}
