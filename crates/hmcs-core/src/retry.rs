//! Retry with exponential backoff around remote service calls.
//!
//! A [`RetryPolicy`] retries an operation while its error satisfies the
//! policy's predicate (transient errors by default), sleeping
//! `initial_delay * multiplier^(n-1)` before the n-th retry, optionally
//! stretched by up to 100% random jitter and capped at `max_delay_ms`.
//! Exhausting the retries turns the last error into a fatal one.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result, ServiceError, ServiceResult};
use crate::memory::{CompletionRequest, EmbeddingService, SummarizationService};

fn transient_only(error: &ServiceError) -> bool {
    error.is_transient()
}

fn default_retry_if() -> fn(&ServiceError) -> bool {
    transient_only
}

/// Backoff policy for service calls
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry (default: 1000)
    pub initial_delay_ms: u64,
    /// Growth factor between consecutive delays (default: 2)
    pub multiplier: f64,
    /// Randomly stretch each delay by up to 100%
    pub jitter: bool,
    /// Retries after the first attempt (default: 10)
    pub max_retries: u32,
    /// Upper bound for a single delay (default: 60000)
    pub max_delay_ms: u64,
    /// Which errors are worth retrying
    #[serde(skip, default = "default_retry_if")]
    pub retry_if: fn(&ServiceError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            multiplier: 2.0,
            jitter: true,
            max_retries: 10,
            max_delay_ms: 60_000,
            retry_if: transient_only,
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("initial_delay_ms", &self.initial_delay_ms)
            .field("multiplier", &self.multiplier)
            .field("jitter", &self.jitter)
            .field("max_retries", &self.max_retries)
            .field("max_delay_ms", &self.max_delay_ms)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Retry only errors matching `predicate`
    pub fn with_retry_if(mut self, predicate: fn(&ServiceError) -> bool) -> Self {
        self.retry_if = predicate;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(Error::invalid_config("retry.multiplier", "must be at least 1"));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(Error::invalid_config(
                "retry.max_delay_ms",
                "must not be smaller than initial_delay_ms",
            ));
        }
        Ok(())
    }

    /// Delay before the given retry (1-based), without jitter
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let ms = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(ms.min(self.max_delay_ms as f64) as u64)
    }

    fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if !self.jitter {
            return base;
        }
        let stretched = base.mul_f64(1.0 + rand::random::<f64>());
        stretched.min(Duration::from_millis(self.max_delay_ms))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// runs out of retries.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> ServiceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        let mut retries = 0;
        loop {
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !(self.retry_if)(&e) => return Err(e),
                Err(e) => e,
            };

            retries += 1;
            if retries > self.max_retries {
                warn!(operation = label, max_retries = self.max_retries, error = %error, "Giving up after retries");
                return Err(ServiceError::fatal(format!(
                    "maximum number of retries ({}) exceeded: {}",
                    self.max_retries, error
                )));
            }

            let delay = self.delay(retries);
            warn!(
                operation = label,
                retry = retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Service call failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Wraps a service so every call goes through a [`RetryPolicy`]
pub struct Retrying<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> Retrying<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: SummarizationService> SummarizationService for Retrying<S> {
    async fn complete(&self, request: &CompletionRequest) -> ServiceResult<String> {
        self.policy
            .run(request.kind.as_str(), || self.inner.complete(request))
            .await
    }
}

#[async_trait]
impl<S: EmbeddingService> EmbeddingService for Retrying<S> {
    async fn embed(&self, text: &str) -> ServiceResult<Vec<f32>> {
        self.policy.run("embed", || self.inner.embed(text)).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
