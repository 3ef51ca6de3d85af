//! Dependency inference and ordering
//!
//! Implicit edges come from every `Link` and every lazy `Resource`
//! predecessor found in a task's serialized fields; explicit edges come from
//! `Task::dependencies`. Missing references and cycles abort compilation
//! before anything is rendered.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::{kosaraju_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::Value;
use tracing::debug;

use crate::error::CompileError;
use crate::key::{LINK_MARKER, TaskKey};
use crate::resource::RESOURCE_MARKER;
use crate::task::TaskMap;

/// A reference found inside a task's fields
#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldReference {
    field: String,
    target: TaskKey,
}

fn child_path(parent: &str, field: &str) -> String {
    if parent.is_empty() {
        field.to_string()
    } else {
        format!("{parent}.{field}")
    }
}

fn collect_references(value: &Value, path: &str, out: &mut Vec<FieldReference>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(target)) = map.get(LINK_MARKER) {
                if let Some(target) = TaskKey::parse(target) {
                    out.push(FieldReference {
                        field: path.to_string(),
                        target,
                    });
                }
                return;
            }
            if let Some(resource) = map.get(RESOURCE_MARKER) {
                if let Some(Value::Array(after)) = resource.get("after") {
                    for target in after.iter().filter_map(Value::as_str).filter_map(TaskKey::parse) {
                        out.push(FieldReference {
                            field: path.to_string(),
                            target,
                        });
                    }
                }
                return;
            }
            for (field, child) in map {
                collect_references(child, &child_path(path, field), out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                collect_references(child, &format!("{path}[{i}]"), out);
            }
        }
        _ => {}
    }
}

/// Ordered dependency graph of a task map
#[derive(Debug, Clone)]
pub struct TaskGraph {
    order: Vec<TaskKey>,
    dependencies: BTreeMap<TaskKey, BTreeSet<TaskKey>>,
}

impl TaskGraph {
    /// Infer edges, validate references and order the tasks
    pub fn build(tasks: &TaskMap) -> Result<Self, CompileError> {
        let mut dependencies: BTreeMap<TaskKey, BTreeSet<TaskKey>> = BTreeMap::new();

        for (key, task) in tasks.iter() {
            let value = task.to_value().map_err(|source| CompileError::Serialize {
                key: key.clone(),
                source,
            })?;
            let mut refs = Vec::new();
            collect_references(&value, "", &mut refs);
            for explicit in task.dependencies(tasks) {
                refs.push(FieldReference {
                    field: "dependencies".to_string(),
                    target: explicit,
                });
            }

            let deps = dependencies.entry(key.clone()).or_default();
            for r in refs {
                if tasks.get(&r.target).is_none() {
                    return Err(CompileError::MissingReference {
                        from: key.clone(),
                        field: r.field,
                        to: r.target,
                    });
                }
                deps.insert(r.target);
            }
        }

        let mut graph: DiGraph<TaskKey, ()> = DiGraph::new();
        let mut index: BTreeMap<TaskKey, NodeIndex> = BTreeMap::new();
        for key in tasks.keys() {
            index.insert(key.clone(), graph.add_node(key.clone()));
        }
        for (key, deps) in &dependencies {
            for dep in deps {
                if let (Some(&from), Some(&to)) = (index.get(dep), index.get(key)) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        let order = match toposort(&graph, None) {
            Ok(order) => order.into_iter().map(|i| graph[i].clone()).collect(),
            Err(_) => {
                let mut cycles: Vec<Vec<TaskKey>> = kosaraju_scc(&graph)
                    .into_iter()
                    .filter(|component| {
                        component.len() > 1
                            || component
                                .first()
                                .is_some_and(|&n| graph.contains_edge(n, n))
                    })
                    .map(|component| {
                        let mut keys: Vec<TaskKey> = component.into_iter().map(|i| graph[i].clone()).collect();
                        keys.sort();
                        keys
                    })
                    .collect();
                cycles.sort();
                return Err(CompileError::CycleDetected { cycles });
            }
        };

        debug!(tasks = tasks.len(), "Built task dependency graph");
        Ok(Self {
            order,
            dependencies,
        })
    }

    /// Keys in a valid execution order
    pub fn order(&self) -> &[TaskKey] {
        &self.order
    }

    /// Direct dependencies of a task
    pub fn dependencies_of(&self, key: &TaskKey) -> impl Iterator<Item = &TaskKey> {
        self.dependencies.get(key).into_iter().flatten()
    }

    /// Tasks that directly depend on `key`
    pub fn dependents_of(&self, key: &TaskKey) -> Vec<TaskKey> {
        self.dependencies
            .iter()
            .filter(|(_, deps)| deps.contains(key))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collect_links_and_resources() {
        let value = json!({
            "vpc": {"$link": "Vpc/example.com"},
            "subnets": [{"$link": "Subnet/a"}, {"$link": "Subnet/b"}],
            "user_data": {"$resource": {"lazy": "x", "after": ["BootstrapScript/nodes"]}},
            "tags": {"Name": "x"}
        });
        let mut refs = Vec::new();
        collect_references(&value, "", &mut refs);
        let fields: Vec<_> = refs.iter().map(|r| (r.field.as_str(), r.target.to_string())).collect();
        assert!(fields.contains(&("vpc", "Vpc/example.com".to_string())));
        assert!(fields.contains(&("subnets[1]", "Subnet/b".to_string())));
        assert!(fields.contains(&("user_data", "BootstrapScript/nodes".to_string())));
        assert_eq!(refs.len(), 4);
    }
}
