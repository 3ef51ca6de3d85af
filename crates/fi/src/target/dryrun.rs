//! Dry-run target
//!
//! Collects what a run would change and renders a plain-text report.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::{Mutex, PoisonError};

use serde_json::Value;

use crate::changes::Changes;
use crate::key::{LINK_MARKER, TaskKey};
use crate::resource::RESOURCE_MARKER;

#[derive(Debug, Default)]
struct DryRunState {
    creates: BTreeMap<TaskKey, Changes>,
    modifies: BTreeMap<TaskKey, Changes>,
    deletions: BTreeSet<(String, String)>,
}

/// Change report
#[derive(Debug, Default)]
pub struct DryRunTarget {
    state: Mutex<DryRunState>,
}

impl DryRunTarget {
    /// Empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a task that would be created or modified
    pub fn record(&self, key: &TaskKey, is_create: bool, changes: &Changes) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if is_create {
            state.creates.insert(key.clone(), changes.clone());
        } else {
            state.modifies.insert(key.clone(), changes.clone());
        }
    }

    /// Record an item that would be deleted
    pub fn record_deletion(&self, task_kind: &str, item: &str) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .deletions
            .insert((task_kind.to_string(), item.to_string()));
    }

    /// Tasks that would be created
    pub fn creates(&self) -> Vec<TaskKey> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.creates.keys().cloned().collect()
    }

    /// Tasks that would be modified
    pub fn modifies(&self) -> Vec<TaskKey> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.modifies.keys().cloned().collect()
    }

    /// Items that would be deleted
    pub fn deletions(&self) -> Vec<(String, String)> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.deletions.iter().cloned().collect()
    }

    /// Nothing would change
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.creates.is_empty() && state.modifies.is_empty() && state.deletions.is_empty()
    }

    /// Render the report
    pub fn report(&self) -> String {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = String::new();
        if state.creates.is_empty() && state.modifies.is_empty() && state.deletions.is_empty() {
            out.push_str("No changes need to be applied\n");
            return out;
        }

        if !state.creates.is_empty() {
            out.push_str("Will create resources:\n");
            for (key, changes) in &state.creates {
                let _ = writeln!(out, "  {key}");
                for (field, change) in changes.iter() {
                    let _ = writeln!(out, "  \t{field:<24}\t{}", display_value(&change.expected));
                }
                out.push('\n');
            }
        }

        if !state.modifies.is_empty() {
            out.push_str("Will modify resources:\n");
            for (key, changes) in &state.modifies {
                let _ = writeln!(out, "  {key}");
                for (field, change) in changes.iter() {
                    let _ = writeln!(
                        out,
                        "  \t{field:<24}\t{} -> {}",
                        display_value(&change.actual),
                        display_value(&change.expected)
                    );
                }
                out.push('\n');
            }
        }

        if !state.deletions.is_empty() {
            out.push_str("Will delete items:\n");
            for (kind, item) in &state.deletions {
                let _ = writeln!(out, "  {kind:<24}\t{item}");
            }
            out.push('\n');
        }
        out
    }
}

/// Human form of a field value: links as task keys, resources elided
fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "<nil>".to_string(),
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            if let Some(Value::String(key)) = map.get(LINK_MARKER) {
                return format!("name:{key}");
            }
            if map.contains_key(RESOURCE_MARKER) {
                return "<resource>".to_string();
            }
            value.to_string()
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(display_value).collect();
            format!("[{}]", parts.join(", "))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_report_sections() {
        let report = DryRunTarget::new();
        assert!(report.is_empty());
        assert_eq!(report.report(), "No changes need to be applied\n");

        let created = Changes::compute(
            &json!({"cidr_block": "10.0.0.0/16", "vpc": {"$link": "Vpc/c"}}),
            None,
        );
        report.record(&TaskKey::new("Subnet", "a.c"), true, &created);
        let modified = Changes::compute(&json!({"cidr_block": "10.1.0.0/16"}), Some(&json!({"cidr_block": "10.0.0.0/16"})));
        report.record(&TaskKey::new("Vpc", "c"), false, &modified);
        report.record_deletion("IAMRole", "old-role");

        let text = report.report();
        let create_at = text.find("Will create resources:").unwrap();
        let modify_at = text.find("Will modify resources:").unwrap();
        let delete_at = text.find("Will delete items:").unwrap();
        assert!(create_at < modify_at && modify_at < delete_at);
        assert!(text.contains("name:Vpc/c"));
        assert!(text.contains("10.0.0.0/16 -> 10.1.0.0/16"));
        assert!(text.contains("old-role"));
    }
}
