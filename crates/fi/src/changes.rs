//! Sparse diffs between desired and actual task values

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::error::TaskError;

/// One differing field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    /// Value found in the cloud (`Null` when absent)
    pub actual: Value,
    /// Desired value
    pub expected: Value,
}

/// Fields whose desired value is set and differs from the actual value
///
/// Unset (`null`) desired fields never produce a change, so defaults chosen
/// by the provider do not show up as drift.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    fields: BTreeMap<String, FieldChange>,
}

impl Changes {
    /// Diff the serialized forms of a desired and an actual task
    ///
    /// With no actual value every set field is a change.
    pub fn compute(expected: &Value, actual: Option<&Value>) -> Self {
        let mut fields = BTreeMap::new();
        let Value::Object(expected) = expected else {
            return Self { fields };
        };
        let empty = serde_json::Map::new();
        let actual = match actual {
            Some(Value::Object(map)) => map,
            _ => &empty,
        };
        for (field, want) in expected {
            if want.is_null() {
                continue;
            }
            let have = actual.get(field).cloned().unwrap_or(Value::Null);
            if &have != want {
                fields.insert(
                    field.clone(),
                    FieldChange {
                        actual: have,
                        expected: want.clone(),
                    },
                );
            }
        }
        Self { fields }
    }

    /// No differences
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of differing fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether `field` differs
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// The change for `field`
    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.fields.get(field)
    }

    /// Differing fields in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldChange)> {
        self.fields.iter()
    }

    /// Field names in order
    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    /// Fail with `ImmutableFieldChange` if any of `fields` differs on an existing resource
    ///
    /// A field that was never set on the actual resource is not treated as a change.
    pub fn check_immutable(&self, fields: &[&str]) -> Result<(), TaskError> {
        for field in fields {
            if let Some(change) = self.fields.get(*field) {
                if !change.actual.is_null() {
                    return Err(TaskError::ImmutableFieldChange {
                        field: (*field).to_string(),
                        actual: change.actual.to_string(),
                        expected: change.expected.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Changes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|(name, c)| format!("{name}: {} -> {}", c.actual, c.expected))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unset_fields_are_ignored() {
        let expected = json!({"cidr": "10.0.0.0/16", "id": null, "tags": {"a": "b"}});
        let actual = json!({"cidr": "10.0.0.0/16", "id": "vpc-1", "tags": {"a": "c"}});
        let changes = Changes::compute(&expected, Some(&actual));
        assert_eq!(changes.field_names(), vec!["tags".to_string()]);
    }

    #[test]
    fn test_missing_actual_lists_all_set_fields() {
        let expected = json!({"cidr": "10.0.0.0/16", "id": null, "name": "x"});
        let changes = Changes::compute(&expected, None);
        assert_eq!(changes.field_names(), vec!["cidr".to_string(), "name".to_string()]);
    }

    #[test]
    fn test_immutable_check() {
        let expected = json!({"cidr": "10.1.0.0/16", "zone": "a"});
        let actual = json!({"cidr": "10.0.0.0/16"});
        let changes = Changes::compute(&expected, Some(&actual));
        assert!(changes.check_immutable(&["zone"]).is_ok());
        let err = changes.check_immutable(&["cidr", "zone"]).unwrap_err();
        assert_eq!(err.field(), Some("cidr"));
    }
}
