//! Timeout and retry wrapper
//!
//! Every call through [`RetryingStore`] is bounded by `timeout_ms`.
//! Retryable failures are retried with exponential backoff, capped at
//! `max_delay_ms`, with optional jitter. `NotFound` is an answer, not a
//! failure, and is returned immediately.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::ObjectStore;

/// Retry and timeout settings for store calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the first retry, doubled on each further one
    pub base_delay_ms: u64,
    /// Upper bound for any single delay
    pub max_delay_ms: u64,
    /// Per-attempt time bound
    pub timeout_ms: u64,
    /// Randomize each delay into `[delay/2, delay]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            timeout_ms: 10_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Whether a failed attempt (0-indexed) may be followed by another
    #[inline]
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Backoff before the retry that follows `attempt` (0-indexed), without jitter
    #[must_use]
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(self.max_delay_ms)
    }

    fn delay(&self, attempt: u32) -> Duration {
        let ms = self.delay_ms(attempt);
        let ms = if self.jitter && ms > 1 {
            rand::rng().random_range(ms / 2..=ms)
        } else {
            ms
        };
        Duration::from_millis(ms)
    }

    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[inline]
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }
}

/// Store wrapper adding timeouts and retries
#[derive(Debug, Clone)]
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: ObjectStore> RetryingStore<S> {
    #[must_use]
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    #[inline]
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    #[inline]
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn call<T, F, Fut>(&self, op: &'static str, key: &str, f: F) -> Result<T, StoreError>
    where
        F: Fn() -> Fut + Send,
        Fut: Future<Output = Result<T, StoreError>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            let outcome = match tokio::time::timeout(self.policy.timeout(), f()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(StoreError::Timeout {
                    op,
                    after_ms: self.policy.timeout_ms,
                }),
            };
            match outcome {
                Err(e) if e.is_retryable() && self.policy.should_retry(attempt) => {
                    let delay = self.policy.delay(attempt);
                    warn!(
                        op,
                        key,
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Store call failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(op, key, attempts = attempt + 1, error = %e, "Store call gave up");
                    }
                    return Err(e);
                }
                Ok(value) => {
                    if attempt > 0 {
                        debug!(op, key, attempts = attempt + 1, "Store call recovered");
                    }
                    return Ok(value);
                }
            }
        }
    }
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for RetryingStore<S> {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let inner = &self.inner;
        let bytes = &bytes;
        self.call("put", key, move || inner.put(bucket, key, bytes.clone()))
            .await
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let inner = &self.inner;
        self.call("get", key, move || inner.get(bucket, key)).await
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let inner = &self.inner;
        self.call("list", prefix, move || inner.list(bucket, prefix))
            .await
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let inner = &self.inner;
        self.call("delete", key, move || inner.delete(bucket, key))
            .await
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        let inner = &self.inner;
        self.call("exists", key, move || inner.exists(bucket, key))
            .await
    }
}
