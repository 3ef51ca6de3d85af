//! Feature flags
//!
//! Flags are parsed once per process from `CLOUDUP_FEATURE_FLAGS` and read
//! through a [`FeatureFlags`] snapshot taken at the start of a run, so a run
//! never observes a flag changing under it.

use std::collections::BTreeMap;
use std::sync::{LazyLock, PoisonError, RwLock};

use tracing::{debug, warn};

/// Environment variable holding the flag string
pub const ENV_FEATURE_FLAGS: &str = "CLOUDUP_FEATURE_FLAGS";

/// Render managed files through Terraform
pub const TERRAFORM_MANAGED_FILES: &str = "TerraformManagedFiles";
/// Use the short legacy ELB naming scheme
pub const USE_LEGACY_ELB_NAME: &str = "UseLegacyELBName";
/// Emit launch templates instead of launch configurations
pub const ENABLE_LAUNCH_TEMPLATES: &str = "EnableLaunchTemplates";
/// Dedicated API server instance groups
pub const API_SERVER_NODES: &str = "APIServerNodes";
/// Spotinst-managed instance groups
pub const SPOTINST: &str = "Spotinst";
/// External cloud controller manager
pub const ENABLE_EXTERNAL_CLOUD_CONTROLLER: &str = "EnableExternalCloudController";
/// Experimental cluster DNS
pub const EXPERIMENTAL_CLUSTER_DNS: &str = "ExperimentalClusterDNS";
/// Skip the etcd version check
pub const SKIP_ETCD_VERSION_CHECK: &str = "SkipEtcdVersionCheck";

/// Registered flags and their defaults
const REGISTERED: &[(&str, bool)] = &[
    (TERRAFORM_MANAGED_FILES, true),
    (USE_LEGACY_ELB_NAME, false),
    (ENABLE_LAUNCH_TEMPLATES, false),
    (API_SERVER_NODES, false),
    (SPOTINST, false),
    (ENABLE_EXTERNAL_CLOUD_CONTROLLER, false),
    (EXPERIMENTAL_CLUSTER_DNS, false),
    (SKIP_ETCD_VERSION_CHECK, false),
];

static GLOBAL: LazyLock<RwLock<FeatureFlags>> = LazyLock::new(|| RwLock::new(FeatureFlags::defaults()));

/// Immutable view of flag values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureFlags {
    values: BTreeMap<&'static str, bool>,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self::defaults()
    }
}

impl FeatureFlags {
    /// Every registered flag at its default
    pub fn defaults() -> Self {
        Self {
            values: REGISTERED.iter().copied().collect(),
        }
    }

    /// Apply a flag string on top of the defaults
    ///
    /// Tokens are comma separated, optionally prefixed with `+` (enable) or
    /// `-` (disable). Unknown names are logged and ignored.
    pub fn parse(spec: &str) -> Self {
        let mut flags = Self::defaults();
        for token in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (enabled, name) = match token.strip_prefix('-') {
                Some(name) => (false, name),
                None => (true, token.strip_prefix('+').unwrap_or(token)),
            };
            match REGISTERED.iter().find(|(n, _)| *n == name) {
                Some((registered, _)) => {
                    debug!(flag = registered, enabled, "Feature flag set");
                    flags.values.insert(registered, enabled);
                }
                None => warn!(flag = name, "Unknown feature flag, ignoring"),
            }
        }
        flags
    }

    /// Override one flag (unknown names are ignored)
    #[must_use]
    pub fn with(mut self, name: &str, enabled: bool) -> Self {
        if let Some((registered, _)) = REGISTERED.iter().find(|(n, _)| *n == name) {
            self.values.insert(registered, enabled);
        }
        self
    }

    /// Whether a flag is enabled
    pub fn enabled(&self, name: &str) -> bool {
        self.values.get(name).copied().unwrap_or(false)
    }
}

/// Parse `spec` into the process-wide registry
pub fn parse_flags(spec: &str) {
    let flags = FeatureFlags::parse(spec);
    *GLOBAL.write().unwrap_or_else(PoisonError::into_inner) = flags;
}

/// Parse the process-wide registry from `CLOUDUP_FEATURE_FLAGS`
pub fn parse_flags_from_env() {
    parse_flags(&std::env::var(ENV_FEATURE_FLAGS).unwrap_or_default());
}

/// Snapshot of the process-wide registry
pub fn snapshot() -> FeatureFlags {
    GLOBAL
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}
