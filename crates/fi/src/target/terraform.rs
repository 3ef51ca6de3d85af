//! Terraform target
//!
//! Tasks add resource blocks; the target writes one `kubernetes.tf` plus a
//! `data/` directory for payloads too large to inline. Writes from
//! concurrently running tasks are serialised behind a mutex.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tracing::info;

use crate::error::TaskError;
use crate::target::sanitize_name;

/// One entry in an HCL body
#[derive(Debug, Clone, PartialEq)]
pub enum HclEntry {
    /// `key = value`
    Attr(Value),
    /// `key { ... }`
    Block(HclBody),
}

/// Ordered HCL body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HclBody {
    entries: Vec<(String, HclEntry)>,
}

impl HclBody {
    /// Empty body
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute; `null` values are dropped
    #[must_use]
    pub fn attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if !value.is_null() {
            self.entries.push((key.to_string(), HclEntry::Attr(value)));
        }
        self
    }

    /// Add an attribute when set
    #[must_use]
    pub fn opt_attr<V: Into<Value>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.attr(key, v),
            None => self,
        }
    }

    /// Add a nested block
    #[must_use]
    pub fn block(mut self, key: &str, body: HclBody) -> Self {
        self.entries.push((key.to_string(), HclEntry::Block(body)));
        self
    }

    /// Attribute value by key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find_map(|(k, e)| match e {
            HclEntry::Attr(v) if k == key => Some(v),
            _ => None,
        })
    }

    fn write(&self, out: &mut String, indent: usize) {
        let pad = "  ".repeat(indent);
        let width = self
            .entries
            .iter()
            .filter(|(_, e)| matches!(e, HclEntry::Attr(_)))
            .map(|(k, _)| k.len())
            .max()
            .unwrap_or(0);
        for (key, entry) in &self.entries {
            match entry {
                HclEntry::Attr(value) => {
                    let _ = write!(out, "{pad}{key:<width$} = ");
                    write_value(value, out, indent);
                    out.push('\n');
                }
                HclEntry::Block(body) => {
                    let _ = writeln!(out, "{pad}{key} {{");
                    body.write(out, indent + 1);
                    let _ = writeln!(out, "{pad}}}");
                }
            }
        }
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn write_value(value: &Value, out: &mut String, indent: usize) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => out.push_str(&quote(s)),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(item, out, indent);
            }
            out.push(']');
        }
        Value::Object(map) => {
            if map.is_empty() {
                out.push_str("{}");
                return;
            }
            let pad = "  ".repeat(indent + 1);
            out.push_str("{\n");
            for (k, v) in map {
                let _ = write!(out, "{pad}{} = ", quote(k));
                write_value(v, out, indent + 1);
                out.push('\n');
            }
            out.push_str(&"  ".repeat(indent));
            out.push('}');
        }
    }
}

#[derive(Debug, Default)]
struct TerraformState {
    resources: BTreeMap<(String, String), HclBody>,
    outputs: BTreeMap<String, Vec<String>>,
    files: BTreeMap<String, Vec<u8>>,
}

/// Terraform configuration writer
#[derive(Debug)]
pub struct TerraformTarget {
    out_dir: PathBuf,
    cluster_name: String,
    region: String,
    state: Mutex<TerraformState>,
}

impl TerraformTarget {
    /// Create a target writing into `out_dir`
    pub fn new(out_dir: impl Into<PathBuf>, cluster_name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            out_dir: out_dir.into(),
            cluster_name: cluster_name.into(),
            region: region.into(),
            state: Mutex::new(TerraformState::default()),
        }
    }

    /// Reference to an attribute of a resource in this configuration
    pub fn reference(resource_type: &str, name: &str, attribute: &str) -> String {
        format!("${{{resource_type}.{}.{attribute}}}", sanitize_name(name))
    }

    /// Add a resource block
    pub fn add_resource(&self, resource_type: &str, name: &str, body: HclBody) -> Result<(), TaskError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (resource_type.to_string(), sanitize_name(name));
        if state.resources.contains_key(&key) {
            return Err(TaskError::Render(format!(
                "terraform resource {}.{} defined twice",
                key.0, key.1
            )));
        }
        state.resources.insert(key, body);
        Ok(())
    }

    /// Store a payload under `data/` and return the expression that reads it
    pub fn add_file(&self, resource_type: &str, name: &str, field: &str, contents: &[u8]) -> String {
        let file = format!("{resource_type}_{}_{field}", sanitize_name(name));
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .files
            .insert(file.clone(), contents.to_vec());
        format!("${{file(\"${{path.module}}/data/{file}\")}}")
    }

    /// Append a value to a named output
    pub fn add_output(&self, name: &str, value: impl Into<String>) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .outputs
            .entry(name.to_string())
            .or_default()
            .push(value.into());
    }

    /// Resource body previously added
    pub fn resource(&self, resource_type: &str, name: &str) -> Option<HclBody> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .resources
            .get(&(resource_type.to_string(), sanitize_name(name)))
            .cloned()
    }

    /// Names of the files under `data/`
    pub fn files(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .files
            .keys()
            .cloned()
            .collect()
    }

    /// Render the configuration text
    pub fn render(&self) -> String {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = String::new();

        let locals = HclBody::new()
            .attr("cluster_name", self.cluster_name.clone())
            .attr("region", self.region.clone());
        out.push_str("locals {\n");
        locals.write(&mut out, 1);
        out.push_str("}\n\n");

        for (name, values) in &state.outputs {
            let value = match values.as_slice() {
                [single] => Value::String(single.clone()),
                many => Value::from(many.to_vec()),
            };
            let _ = writeln!(out, "output {} {{", quote(name));
            HclBody::new().attr("value", value).write(&mut out, 1);
            out.push_str("}\n\n");
        }

        out.push_str("provider \"aws\" {\n");
        HclBody::new()
            .attr("region", self.region.clone())
            .write(&mut out, 1);
        out.push_str("}\n\n");

        for ((resource_type, name), body) in &state.resources {
            let _ = writeln!(out, "resource {} {} {{", quote(resource_type), quote(name));
            body.write(&mut out, 1);
            out.push_str("}\n\n");
        }

        out.push_str("terraform {\n  required_version = \">= 0.15.0\"\n  required_providers {\n    aws = {\n      \"source\"  = \"hashicorp/aws\"\n      \"version\" = \">= 4.0.0\"\n    }\n  }\n}\n");
        out
    }

    /// Write `kubernetes.tf` and the `data/` files
    pub async fn finish(&self) -> Result<(), TaskError> {
        let text = self.render();
        let files: Vec<(String, Vec<u8>)> = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .files
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let data_dir = self.out_dir.join("data");
        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| TaskError::Render(format!("creating {}: {e}", data_dir.display())))?;
        for (name, contents) in &files {
            let path = data_dir.join(name);
            tokio::fs::write(&path, contents)
                .await
                .map_err(|e| TaskError::Render(format!("writing {}: {e}", path.display())))?;
        }
        let path = self.out_dir.join("kubernetes.tf");
        tokio::fs::write(&path, text)
            .await
            .map_err(|e| TaskError::Render(format!("writing {}: {e}", path.display())))?;
        info!(path = %path.display(), files = files.len(), "Wrote Terraform configuration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_resource_with_blocks() {
        let tf = TerraformTarget::new("/tmp/out", "minimal.example.com", "us-test-1");
        let vpc_id = TerraformTarget::reference("aws_vpc", "minimal.example.com", "id");
        assert_eq!(vpc_id, "${aws_vpc.minimal-example-com.id}");

        tf.add_resource(
            "aws_security_group",
            "nodes.minimal.example.com",
            HclBody::new()
                .attr("name", "nodes.minimal.example.com")
                .attr("vpc_id", vpc_id)
                .attr("tags", json!({"Name": "nodes.minimal.example.com"}))
                .block("timeouts", HclBody::new().attr("delete", "10m")),
        )
        .unwrap();
        let text = tf.render();
        assert!(text.contains("resource \"aws_security_group\" \"nodes-minimal-example-com\" {"));
        assert!(text.contains("vpc_id = \"${aws_vpc.minimal-example-com.id}\""));
        assert!(text.contains("  timeouts {\n    delete = \"10m\"\n  }"));
        assert!(text.contains("provider \"aws\" {\n  region = \"us-test-1\"\n}"));
    }

    #[test]
    fn test_duplicate_resource_rejected() {
        let tf = TerraformTarget::new("/tmp/out", "c", "r");
        tf.add_resource("aws_vpc", "c", HclBody::new()).unwrap();
        assert!(tf.add_resource("aws_vpc", "c", HclBody::new()).is_err());
    }

    #[test]
    fn test_file_reference() {
        let tf = TerraformTarget::new("/tmp/out", "c", "r");
        let expr = tf.add_file("aws_launch_template", "nodes.c", "user_data", b"#!/bin/bash");
        assert_eq!(expr, "${file(\"${path.module}/data/aws_launch_template_nodes-c_user_data\")}");
        assert_eq!(tf.files(), vec!["aws_launch_template_nodes-c_user_data".to_string()]);
    }
}
