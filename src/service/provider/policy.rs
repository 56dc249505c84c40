//! Retry and timeout policy shared by every provider call

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, sleep, timeout};

use super::{ChatCompletion, ChatProvider, ChatRequest, ProviderError, StreamUpdate};
use crate::model::CallPolicyConfig;

/// Attempt budget for one logical call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub max_attempts: u32,
    /// Fixed pause between attempts
    pub retry_delay: Duration,
    /// Bound on a single attempt, including the whole streamed body
    pub attempt_timeout: Duration,
}

impl From<CallPolicyConfig> for CallPolicy {
    fn from(config: CallPolicyConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay,
            attempt_timeout: config.attempt_timeout,
        }
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        CallPolicyConfig::default().into()
    }
}

/// Wraps a provider so each call gets up to `max_attempts` tries, each
/// bounded by `attempt_timeout`, with `retry_delay` between them. The error
/// of the last attempt is returned unchanged. A streamed attempt that already
/// forwarded deltas is followed by `StreamUpdate::Restart` before the next try.
pub struct RetryingProvider<P> {
    inner: P,
    policy: CallPolicy,
}

impl<P: ChatProvider> RetryingProvider<P> {
    pub fn new(inner: P, policy: CallPolicy) -> Self {
        Self { inner, policy }
    }

    /// Log a failed attempt and wait out the delay if another try is allowed
    async fn should_retry(&self, attempt: u32, error: &ProviderError, started: Instant) -> bool {
        if !error.is_retryable() || attempt >= self.policy.max_attempts {
            tracing::error!(
                attempt,
                max_attempts = self.policy.max_attempts,
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %error,
                "Provider call failed"
            );
            return false;
        }

        tracing::warn!(
            attempt,
            max_attempts = self.policy.max_attempts,
            retry_delay_ms = self.policy.retry_delay.as_millis() as u64,
            error = %error,
            "Provider attempt failed, retrying"
        );
        sleep(self.policy.retry_delay).await;
        true
    }
}

#[async_trait]
impl<P: ChatProvider> ChatProvider for RetryingProvider<P> {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, ProviderError> {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match timeout(self.policy.attempt_timeout, self.inner.complete(request)).await {
                Ok(Ok(completion)) => return Ok(completion),
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout(self.policy.attempt_timeout),
            };

            if !self.should_retry(attempt, &error, started).await {
                return Err(error);
            }
        }
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        on_update: &mut (dyn for<'d> FnMut(StreamUpdate<'d>) + Send),
    ) -> Result<ChatCompletion, ProviderError> {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut forwarded = false;
            let mut forward = |update: StreamUpdate<'_>| {
                forwarded |= matches!(update, StreamUpdate::Delta(_));
                on_update(update);
            };
            let call = self.inner.stream(request, &mut forward);
            let error = match timeout(self.policy.attempt_timeout, call).await {
                Ok(Ok(completion)) => return Ok(completion),
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout(self.policy.attempt_timeout),
            };

            if !self.should_retry(attempt, &error, started).await {
                return Err(error);
            }
            if forwarded {
                on_update(StreamUpdate::Restart {
                    attempt: attempt + 1,
                });
            }
        }
    }
}
