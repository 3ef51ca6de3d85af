//! Helpers shared by the task implementations

use std::collections::{BTreeMap, BTreeSet};

use cloud_client::{CloudObject, ResourceKind};
use fi::{Changes, CloudFormationTarget, CloudupTask, Link, Outputs, RunContext, TaskError};
use serde_json::{Map, Value, json};

/// Implements the identity and lifecycle accessors of [`fi::CloudupTask`]
/// for a task with `name` and `lifecycle` fields.
macro_rules! task_identity {
    () => {
        fn name(&self) -> &str {
            &self.name
        }

        fn lifecycle(&self) -> fi::Lifecycle {
            self.lifecycle
        }

        fn set_lifecycle(&mut self, lifecycle: fi::Lifecycle) {
            self.lifecycle = lifecycle;
        }
    };
}
pub(crate) use task_identity;

/// Tags map, used by serde to leave empty tag sets out of diffs
pub type Tags = BTreeMap<String, String>;

/// Attribute map with `null` entries dropped
pub(crate) fn attributes<'a>(pairs: impl IntoIterator<Item = (&'a str, Value)>) -> Map<String, Value> {
    pairs
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// `{"id": id}`
pub(crate) fn id_output(id: impl Into<String>) -> Outputs {
    Outputs::from([("id".to_string(), id.into())])
}

/// Find one object by its `Name` tag
pub(crate) async fn find_by_name(
    ctx: &RunContext,
    kind: ResourceKind,
    name: &str,
) -> Result<Option<CloudObject>, TaskError> {
    let mut found = ctx.cloud.query(kind, &[("tag:Name", name)]).await?;
    if found.len() > 1 {
        return Err(TaskError::Conflict(format!(
            "found {} {kind} objects named {name}",
            found.len()
        )));
    }
    Ok(found.pop())
}

/// Find one object by id, or by `Name` tag when no id is known
pub(crate) async fn find_by_id_or_name(
    ctx: &RunContext,
    kind: ResourceKind,
    id: Option<&str>,
    name: &str,
) -> Result<Option<CloudObject>, TaskError> {
    match id {
        Some(id) => Ok(ctx.cloud.get(kind, id).await?),
        None => find_by_name(ctx, kind, name).await,
    }
}

/// Find one object by attribute filters
pub(crate) async fn find_one(
    ctx: &RunContext,
    kind: ResourceKind,
    filters: &[(&str, &str)],
) -> Result<Option<CloudObject>, TaskError> {
    Ok(ctx.cloud.query(kind, filters).await?.into_iter().next())
}

/// Create the object, or update attributes and tags of an existing one
///
/// An update sends every attribute when any non-tag field changed; a `tags`
/// change rewrites the tag set.
pub(crate) async fn create_or_update(
    ctx: &RunContext,
    kind: ResourceKind,
    existing_id: Option<&str>,
    attributes: Map<String, Value>,
    tags: &Tags,
    changes: &Changes,
) -> Result<CloudObject, TaskError> {
    let Some(id) = existing_id else {
        return Ok(ctx.cloud.create(kind, attributes, tags.clone()).await?);
    };
    if changes.iter().any(|(field, _)| field != "tags") {
        ctx.cloud.update(kind, id, attributes).await?;
    }
    if changes.contains("tags") {
        ctx.cloud.set_tags(kind, id, tags).await?;
    }
    ctx.cloud
        .get(kind, id)
        .await?
        .ok_or_else(|| TaskError::NotFound(format!("{kind} {id}")))
}

/// Link as found in the cloud
///
/// When the cloud's id matches the id recorded for `expected` the expected
/// link is kept; otherwise the link names the foreign id so the diff shows it.
pub(crate) fn relink<T: CloudupTask>(ctx: &RunContext, expected: &Link<T>, actual_id: Option<&str>) -> Link<T> {
    match (ctx.try_link_id(expected), actual_id) {
        (Some(known), Some(actual)) if known == actual => expected.clone(),
        (None, _) => expected.clone(),
        (_, actual) => Link::new(actual.unwrap_or_default()),
    }
}

/// Optional variant of [`relink`]
pub(crate) fn relink_opt<T: CloudupTask>(
    ctx: &RunContext,
    expected: Option<&Link<T>>,
    actual_id: Option<&str>,
) -> Option<Link<T>> {
    match (expected, actual_id) {
        (Some(link), id) => Some(relink(ctx, link, id)),
        (None, Some(id)) => Some(Link::new(id)),
        (None, None) => None,
    }
}

/// List variant of [`relink`]: compares sets of ids
pub(crate) fn relink_all<T: CloudupTask>(ctx: &RunContext, expected: &[Link<T>], actual_ids: &[String]) -> Vec<Link<T>> {
    let known: Option<BTreeSet<String>> = expected.iter().map(|l| ctx.try_link_id(l)).collect();
    let actual: BTreeSet<String> = actual_ids.iter().cloned().collect();
    match known {
        Some(known) if known == actual => expected.to_vec(),
        None => expected.to_vec(),
        Some(_) => actual_ids.iter().map(Link::new).collect(),
    }
}

/// Provider ids of a list of links
pub(crate) fn link_ids<T: CloudupTask>(ctx: &RunContext, links: &[Link<T>]) -> Result<Vec<String>, TaskError> {
    links.iter().map(|l| ctx.link_id(l)).collect()
}

/// Id of an optional link
pub(crate) fn opt_link_id<T: CloudupTask>(ctx: &RunContext, link: Option<&Link<T>>) -> Result<Option<String>, TaskError> {
    link.map(|l| ctx.link_id(l)).transpose()
}

/// CloudFormation value of a linked task's output
pub(crate) fn cf_link<T: CloudupTask>(ctx: &RunContext, link: &Link<T>, attribute: &str) -> Result<Value, TaskError> {
    Ok(CloudFormationTarget::value_of(&ctx.link_output(link, attribute)?))
}

/// CloudFormation values of a list of links
pub(crate) fn cf_links<T: CloudupTask>(ctx: &RunContext, links: &[Link<T>]) -> Result<Value, TaskError> {
    links
        .iter()
        .map(|l| cf_link(ctx, l, "id"))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

/// CloudFormation tag list
pub(crate) fn cf_tags(tags: &Tags) -> Value {
    Value::Array(
        tags.iter()
            .map(|(k, v)| json!({ "Key": k, "Value": v }))
            .collect(),
    )
}

/// Terraform tag map, `null` when empty
pub(crate) fn tf_tags(tags: &Tags) -> Value {
    if tags.is_empty() {
        Value::Null
    } else {
        json!(tags)
    }
}

/// Output values that stand for something not yet known: Terraform
/// interpolations, CloudFormation intrinsics and dry-run placeholders
pub(crate) fn is_placeholder(value: &str) -> bool {
    value.starts_with("${") || value.starts_with('{') || value.starts_with('<')
}

/// Outputs pointing at a CloudFormation resource: `id` is its `Ref`
pub(crate) fn cf_id_output(resource_type: &str, name: &str) -> Outputs {
    id_output(CloudFormationTarget::ref_output(resource_type, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_drop_nulls() {
        let map = attributes([("a", json!(1)), ("b", Value::Null), ("c", json!("x"))]);
        assert_eq!(map.len(), 2);
        assert!(!map.contains_key("b"));
    }

    #[test]
    fn test_cf_tags_are_sorted_pairs() {
        let tags = Tags::from([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]);
        assert_eq!(
            cf_tags(&tags),
            json!([{"Key": "a", "Value": "1"}, {"Key": "b", "Value": "2"}])
        );
        assert!(tf_tags(&Tags::new()).is_null());
    }

    #[test]
    fn test_placeholders_are_not_addresses() {
        assert!(is_placeholder("${aws_elb.api.dns_name}"));
        assert!(is_placeholder(r#"{"Fn::GetAtt":["x","DNSName"]}"#));
        assert!(is_placeholder("<ClassicLoadBalancer/api.dns_name>"));
        assert!(!is_placeholder("api-1.elb.amazonaws.com"));
    }
}
