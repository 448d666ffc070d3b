//! # Retryable Provider
//!
//! Wraps a [`SecretsProvider`] so that a failed pass is retried on a
//! [`LimitedBackoff`] schedule. With a retry limit of `n`, a pass makes at
//! most `n + 1` attempts.
//!
//! The retries run inline: `provide` only returns once a pass succeeded or
//! the retry budget is spent.

use super::backoff::LimitedBackoff;
use crate::provider::{ProvideOutcome, SecretsProvider};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

#[derive(Debug)]
pub struct RetryableProvider<P> {
    inner: P,
    backoff: LimitedBackoff,
}

impl<P: SecretsProvider> RetryableProvider<P> {
    #[must_use]
    pub fn new(inner: P, retry_interval: Duration, retry_count_limit: u32) -> Self {
        Self {
            inner,
            backoff: LimitedBackoff::new(retry_interval, retry_count_limit),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: SecretsProvider> SecretsProvider for RetryableProvider<P> {
    async fn provide(&mut self) -> ProvideOutcome {
        self.backoff.reset();
        loop {
            if self.backoff.retry_count() > 0 {
                info!(
                    attempt = self.backoff.retry_count(),
                    limit = self.backoff.retry_limit(),
                    "Retrying secrets provider"
                );
            }

            let outcome = self.inner.provide().await;
            if outcome.is_ok() {
                return outcome;
            }
            let err = outcome
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();

            match self.backoff.next_backoff() {
                Some(delay) => {
                    warn!(error = %err, delay_ms = delay.as_millis(), "Secrets provider failed, will retry");
                    sleep(delay).await;
                }
                None => {
                    error!(
                        error = %err,
                        retry_limit = self.backoff.retry_limit(),
                        "Secrets provider backoff exhausted"
                    );
                    return outcome;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::RetrieveError;
    use crate::push_to_file::fetch::FetchError;
    use tokio::time::Instant;

    /// Fails the first `failures` calls, then succeeds
    #[derive(Debug, Default)]
    struct FlakyProvider {
        failures: usize,
        calls: usize,
        call_times: Vec<Instant>,
    }

    #[async_trait]
    impl SecretsProvider for FlakyProvider {
        async fn provide(&mut self) -> ProvideOutcome {
            self.calls += 1;
            self.call_times.push(Instant::now());
            if self.calls <= self.failures {
                ProvideOutcome::failure(
                    false,
                    FetchError::Retrieve(RetrieveError::Status { status: 500 }),
                )
            } else {
                ProvideOutcome::success(true)
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_retries() {
        let flaky = FlakyProvider {
            failures: 2,
            ..Default::default()
        };
        let mut provider = RetryableProvider::new(flaky, Duration::from_secs(1), 5);

        let outcome = provider.provide().await;
        assert!(outcome.is_ok());
        assert!(outcome.updated);
        assert_eq!(provider.inner().calls, 3);

        let times = &provider.inner().call_times;
        assert!(times[1] - times[0] >= Duration::from_secs(1));
        assert!(times[2] - times[1] >= Duration::from_secs(1));
        assert!(times[2] - times[0] < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_returns_last_outcome() {
        let flaky = FlakyProvider {
            failures: usize::MAX,
            ..Default::default()
        };
        let mut provider = RetryableProvider::new(flaky, Duration::from_millis(10), 3);

        let outcome = provider.provide().await;
        assert!(!outcome.is_ok());
        assert!(outcome.error.unwrap().to_string().contains("HTTP status 500"));
        assert_eq!(provider.inner().calls, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_limit_makes_single_attempt() {
        let flaky = FlakyProvider {
            failures: 1,
            ..Default::default()
        };
        let mut provider = RetryableProvider::new(flaky, Duration::from_secs(1), 0);

        assert!(!provider.provide().await.is_ok());
        assert_eq!(provider.inner().calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_resets_between_passes() {
        let flaky = FlakyProvider {
            failures: 2,
            ..Default::default()
        };
        let mut provider = RetryableProvider::new(flaky, Duration::from_secs(1), 2);
        assert!(provider.provide().await.is_ok());

        provider.inner.failures = 5;
        assert!(provider.provide().await.is_ok());
        assert_eq!(provider.inner().calls, 6);
    }
}
