//! Retrying wrapper around any backend
//!
//! Idempotent verbs (query, get, update, delete, tagging) are retried on
//! throttling and timeouts with exponential backoff. Create is never retried:
//! a create that timed out may still have happened, so the next run's find
//! has to discover it instead.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::backoff::ExponentialBackoff;
use crate::cloud_trait::CloudApi;
use crate::error::CloudError;
use crate::models::{CloudObject, ResourceKind};

/// Retry and deadline settings for backend calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts for idempotent verbs (1 disables retries)
    pub attempts: u32,
    /// Deadline applied to every single call
    pub call_timeout: Duration,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Cap for the retry delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            call_timeout: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Backend wrapper applying a [`RetryPolicy`]
#[derive(Clone)]
pub struct RetryingCloud {
    inner: Arc<dyn CloudApi>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for RetryingCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingCloud")
            .field("region", &self.inner.region())
            .field("policy", &self.policy)
            .finish()
    }
}

impl RetryingCloud {
    /// Wrap a backend
    ///
    /// # Arguments
    ///
    /// * `inner` - Backend receiving the calls
    /// * `policy` - Retry and deadline settings
    pub fn new(inner: Arc<dyn CloudApi>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn with_deadline<T, F>(&self, verb: &str, fut: F) -> Result<T, CloudError>
    where
        F: Future<Output = Result<T, CloudError>>,
    {
        match tokio::time::timeout(self.policy.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CloudError::Timeout(format!(
                "{verb} did not complete within {:?}",
                self.policy.call_timeout
            ))),
        }
    }

    async fn retrying<T, F, Fut>(&self, verb: &str, mut call: F) -> Result<T, CloudError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CloudError>>,
    {
        let mut backoff = ExponentialBackoff::new(self.policy.initial_backoff, self.policy.max_backoff);
        let mut attempt = 1;
        loop {
            match self.with_deadline(verb, call()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.policy.attempts => {
                    let delay = backoff.next_backoff();
                    warn!(verb, attempt, ?delay, error = %e, "Retrying backend call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(verb, attempt, error = %e, "Backend call failed");
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl CloudApi for RetryingCloud {
    fn region(&self) -> &str {
        self.inner.region()
    }

    fn account_id(&self) -> &str {
        self.inner.account_id()
    }

    fn partition(&self) -> &str {
        self.inner.partition()
    }

    async fn query(&self, kind: ResourceKind, filters: &[(&str, &str)]) -> Result<Vec<CloudObject>, CloudError> {
        self.retrying("query", || self.inner.query(kind, filters)).await
    }

    async fn get(&self, kind: ResourceKind, id: &str) -> Result<Option<CloudObject>, CloudError> {
        self.retrying("get", || self.inner.get(kind, id)).await
    }

    async fn create(
        &self,
        kind: ResourceKind,
        attributes: Map<String, Value>,
        tags: BTreeMap<String, String>,
    ) -> Result<CloudObject, CloudError> {
        self.with_deadline("create", self.inner.create(kind, attributes, tags))
            .await
    }

    async fn update(&self, kind: ResourceKind, id: &str, attributes: Map<String, Value>) -> Result<CloudObject, CloudError> {
        self.retrying("update", || self.inner.update(kind, id, attributes.clone()))
            .await
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), CloudError> {
        self.retrying("delete", || self.inner.delete(kind, id)).await
    }

    async fn set_tags(&self, kind: ResourceKind, id: &str, tags: &BTreeMap<String, String>) -> Result<(), CloudError> {
        self.retrying("set_tags", || self.inner.set_tags(kind, id, tags)).await
    }

    async fn remove_tags(&self, kind: ResourceKind, id: &str, keys: &[String]) -> Result<(), CloudError> {
        self.retrying("remove_tags", || self.inner.remove_tags(kind, id, keys))
            .await
    }
}
