//! Cluster model builders
//!
//! Turns a validated [`crds::Cluster`] and its [`crds::InstanceGroup`]s into
//! the task registry the engine executes. Each builder covers one concern
//! (network, firewall, IAM, load balancers...) and registers its tasks in a
//! shared [`ModelBuilderContext`]; builders never read each other's output,
//! they agree on task names through [`ModelContext`].

pub mod apiloadbalancer;
pub mod autoscaling;
pub mod bastion;
pub mod bootstrapscript;
pub mod config;
pub mod context;
pub mod dns;
pub mod error;
pub mod etcdmanager;
pub mod firewall;
pub mod iam;
pub mod issuerdiscovery;
pub mod mastervolume;
pub mod network;
pub mod nodeterminationhandler;
pub mod oidcprovider;
pub mod pki;
pub mod policy;
pub mod sshkey;

#[cfg(test)]
pub(crate) mod test_support;

use std::collections::BTreeMap;

use fi::{Lifecycle, ModelBuilderContext, TaskGraph, TaskMap};
use tracing::{debug, info, info_span};

pub use context::ModelContext;
pub use error::ModelError;
pub use iam::build_iam_for_service_account;

/// One concern of the cluster model
pub trait ModelBuilder: std::fmt::Debug + Send + Sync {
    /// Register this builder's tasks
    ///
    /// # Errors
    /// Validation errors for inconsistent input, compile errors for
    /// conflicting registrations
    fn build(&self, model: &ModelContext, c: &mut ModelBuilderContext) -> Result<(), ModelError>;
}

/// Every builder, in registration order
pub fn builders() -> Vec<(&'static str, Box<dyn ModelBuilder>)> {
    vec![
        ("network", Box::new(network::NetworkBuilder)),
        ("sshkey", Box::new(sshkey::SshKeyBuilder)),
        ("pki", Box::new(pki::PkiBuilder)),
        ("iam", Box::new(iam::IamBuilder)),
        ("firewall", Box::new(firewall::FirewallBuilder)),
        ("bastion", Box::new(bastion::BastionBuilder)),
        ("apiloadbalancer", Box::new(apiloadbalancer::ApiLoadBalancerBuilder)),
        ("dns", Box::new(dns::DnsBuilder)),
        ("mastervolume", Box::new(mastervolume::MasterVolumeBuilder)),
        ("etcdmanager", Box::new(etcdmanager::EtcdManagerBuilder)),
        ("nodeterminationhandler", Box::new(nodeterminationhandler::NodeTerminationHandlerBuilder)),
        ("oidcprovider", Box::new(oidcprovider::OidcProviderBuilder)),
        ("issuerdiscovery", Box::new(issuerdiscovery::IssuerDiscoveryBuilder)),
        ("bootstrapscript", Box::new(bootstrapscript::BootstrapScriptBuilder)),
        ("autoscaling", Box::new(autoscaling::AutoscalingGroupBuilder)),
        ("config", Box::new(config::ConfigBuilder)),
    ]
}

/// Run every builder against a fresh registry
///
/// # Errors
/// The first builder error aborts the build
pub fn build_model(
    model: &ModelContext,
    lifecycle_overrides: BTreeMap<String, Lifecycle>,
) -> Result<TaskMap, ModelError> {
    let mut c = ModelBuilderContext::with_lifecycle_overrides(lifecycle_overrides);
    for (name, builder) in builders() {
        let _span = info_span!("builder", name).entered();
        let before = c.len();
        builder.build(model, &mut c)?;
        debug!(tasks = c.len() - before, "Builder finished");
    }
    info!(cluster = model.cluster_name(), tasks = c.len(), "Model built");
    Ok(c.into_tasks())
}

/// Build the model and order it
///
/// # Errors
/// Builder errors, unresolved references and dependency cycles
pub fn compile(
    model: &ModelContext,
    lifecycle_overrides: BTreeMap<String, Lifecycle>,
) -> Result<(TaskMap, TaskGraph), ModelError> {
    let tasks = build_model(model, lifecycle_overrides)?;
    let graph = TaskGraph::build(&tasks)?;
    Ok((tasks, graph))
}
