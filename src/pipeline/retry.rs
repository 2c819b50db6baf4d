use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::time::Duration;
use tracing::warn;

use crate::config::StoreConfig;
use crate::error::StoreError;

/// Bounded exponential backoff for store operations
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max_interval: Duration,
    /// Give up once this much time has passed since the first attempt
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

impl From<&StoreConfig> for RetryPolicy {
    fn from(config: &StoreConfig) -> Self {
        Self {
            initial: config.retry_initial,
            max_interval: config.retry_max_interval,
            max_elapsed: config.retry_max_elapsed,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial)
            .with_max_interval(self.max_interval.max(self.initial))
            .with_max_elapsed_time(Some(self.max_elapsed))
            .build()
    }
}

/// Run a store operation, retrying while it fails with a transient error.
///
/// Non-transient errors are returned at once. After the policy's time budget
/// the last transient error is returned.
pub async fn with_retry<T, F>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Result<T, StoreError>,
{
    let operation = || {
        let result = op().map_err(|e| {
            if e.is_transient() {
                backoff::Error::transient(e)
            } else {
                backoff::Error::permanent(e)
            }
        });
        std::future::ready(result)
    };

    backoff::future::retry_notify(policy.backoff(), operation, |err: StoreError, wait: Duration| {
        warn!(operation = what, error = %err, retry_in = ?wait, "store operation failed, retrying");
    })
    .await
}
