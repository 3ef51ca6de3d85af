//! Task lifecycles

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::CompileError;

/// Per-task policy for how the executor treats differences
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Lifecycle {
    /// Create and update as needed
    #[default]
    Sync,
    /// Find runs, render is skipped
    Ignore,
    /// Create if missing; only warn about differences
    ExistsAndWarnIfChanges,
    /// Must exist and match; differences fail the run
    ExistsAndValidates,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Lifecycle::Sync => "Sync",
            Lifecycle::Ignore => "Ignore",
            Lifecycle::ExistsAndWarnIfChanges => "ExistsAndWarnIfChanges",
            Lifecycle::ExistsAndValidates => "ExistsAndValidates",
        };
        f.write_str(s)
    }
}

impl FromStr for Lifecycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Sync" => Ok(Lifecycle::Sync),
            "Ignore" => Ok(Lifecycle::Ignore),
            "ExistsAndWarnIfChanges" => Ok(Lifecycle::ExistsAndWarnIfChanges),
            "ExistsAndValidates" => Ok(Lifecycle::ExistsAndValidates),
            other => Err(format!("unknown lifecycle {other:?}")),
        }
    }
}

/// Parse `Kind=Lifecycle,Kind=Lifecycle` into per-kind overrides
///
/// # Arguments
///
/// * `spec` - Comma-separated overrides; empty tokens are ignored
pub fn parse_overrides(spec: &str) -> Result<BTreeMap<String, Lifecycle>, CompileError> {
    let mut overrides = BTreeMap::new();
    for token in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let (kind, lifecycle) = token
            .split_once('=')
            .ok_or_else(|| CompileError::InvalidOverride(format!("expected Kind=Lifecycle, got {token:?}")))?;
        let lifecycle = lifecycle
            .trim()
            .parse::<Lifecycle>()
            .map_err(CompileError::InvalidOverride)?;
        overrides.insert(kind.trim().to_string(), lifecycle);
    }
    Ok(overrides)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_overrides() {
        let o = parse_overrides("SecurityGroup=Ignore, IAMRole=ExistsAndWarnIfChanges,").unwrap();
        assert_eq!(o.get("SecurityGroup"), Some(&Lifecycle::Ignore));
        assert_eq!(o.get("IAMRole"), Some(&Lifecycle::ExistsAndWarnIfChanges));
        assert!(parse_overrides("Vpc").is_err());
        assert!(parse_overrides("Vpc=Sometimes").is_err());
    }
}
