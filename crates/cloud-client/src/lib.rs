//! Cloud backend boundary
//!
//! Tasks talk to the cloud only through [`CloudApi`]: a small set of verbs over
//! generic [`CloudObject`] records. This crate provides the trait, the
//! [`MemoryCloud`] backend used for local runs and tests, and the
//! [`RetryingCloud`] wrapper that applies per-call deadlines and retries.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use cloud_client::{CloudApi, MemoryCloud, ResourceKind, RetryPolicy, RetryingCloud};
//!
//! # async fn example() -> Result<(), cloud_client::CloudError> {
//! let cloud = RetryingCloud::new(
//!     Arc::new(MemoryCloud::new("us-east-1", "123456789012")),
//!     RetryPolicy::default(),
//! );
//! let vpcs = cloud.query(ResourceKind::Vpc, &[("tag:Name", "example.com")]).await?;
//! # let _ = (vpcs, BTreeMap::<String, String>::new());
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod error;
pub mod memory;
pub mod models;
pub mod retry;
#[path = "trait.rs"]
pub mod cloud_trait;

pub use backoff::ExponentialBackoff;
pub use cloud_trait::CloudApi;
pub use error::CloudError;
pub use memory::{CloudCall, MemoryCloud, Verb};
pub use models::{CloudObject, ResourceKind};
pub use retry::{RetryPolicy, RetryingCloud};
