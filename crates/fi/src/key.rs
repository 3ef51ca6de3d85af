//! Task keys and typed links

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::task::CloudupTask;

/// Field name marking a serialized link
pub const LINK_MARKER: &str = "$link";

/// Globally unique task identity: `(kind, name)`, displayed as `Kind/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    /// Task kind (`Vpc`, `SecurityGroup`, …)
    pub kind: String,
    /// Task name, unique within the kind
    pub name: String,
}

impl TaskKey {
    /// Create a key
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Parse `Kind/name`; the name may itself contain `/`
    pub fn parse(s: &str) -> Option<Self> {
        let (kind, name) = s.split_once('/')?;
        if kind.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(kind, name))
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl Serialize for TaskKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Typed reference to another task
///
/// A link only carries the target's key; the canonical task and its learned
/// outputs are looked up through the registry and the run's output store.
pub struct Link<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: CloudupTask> Link<T> {
    /// Link to the task of kind `T` named `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }

    /// Key of the linked task
    pub fn key(&self) -> TaskKey {
        TaskKey::new(T::KIND, self.name.clone())
    }
}

impl<T> Link<T> {
    /// Name of the linked task
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for Link<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: CloudupTask> fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Link({}/{})", T::KIND, self.name)
    }
}

impl<T> PartialEq for Link<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<T> Eq for Link<T> {}

impl<T> Hash for Link<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl<T> PartialOrd for Link<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Link<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl<T: CloudupTask> Serialize for Link<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(LINK_MARKER, &self.key().to_string())?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_with_slash_in_name() {
        let key = TaskKey::parse("SecurityGroupRule/from-nodes.example.com-egress-all-0to0-0.0.0.0/0").unwrap();
        assert_eq!(key.kind, "SecurityGroupRule");
        assert_eq!(key.name, "from-nodes.example.com-egress-all-0to0-0.0.0.0/0");
        assert!(TaskKey::parse("novalue").is_none());
        assert!(TaskKey::parse("/x").is_none());
    }
}
