use std::time::Duration;

use crate::init::error::InitError;
use crate::init::progress::{ProgressTracker, Step};

pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);
pub const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(15);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempt budgets, linear backoff and per-step request timeouts for init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_unit: DEFAULT_BACKOFF_UNIT,
        }
    }
}

impl RetryPolicy {
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn max_attempts(&self, step: Step) -> u32 {
        match step {
            Step::UrlCollection
            | Step::ConnectivityTest
            | Step::CredentialCollection
            | Step::Authentication => 3,
            Step::PatGeneration | Step::ConfigWrite | Step::ConfigValidation => 2,
        }
    }

    /// `None` for steps that only touch the terminal or the local disk.
    pub fn timeout(&self, step: Step) -> Option<Duration> {
        match step {
            Step::ConnectivityTest => Some(CONNECTIVITY_TIMEOUT),
            Step::Authentication | Step::PatGeneration | Step::ConfigValidation => {
                Some(REQUEST_TIMEOUT)
            }
            Step::UrlCollection | Step::CredentialCollection | Step::ConfigWrite => None,
        }
    }

    /// Delay after failed attempt `attempt` (1-based): `attempt × unit`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_unit * attempt
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// step's attempt budget is spent. `op` receives the 1-based attempt number.
pub async fn retrying<T>(
    policy: &RetryPolicy,
    progress: &mut ProgressTracker,
    step: Step,
    mut op: impl AsyncFnMut(u32) -> Result<T, InitError>,
) -> Result<T, InitError> {
    let max_attempts = policy.max_attempts(step);
    let mut attempt = 1;
    loop {
        progress.begin(step, attempt);
        match op(attempt).await {
            Ok(value) => {
                progress.complete(step);
                return Ok(value);
            }
            Err(err) if err.retryable && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                tracing::debug!(
                    step = step.name(),
                    attempt,
                    error = %err,
                    "step failed, retrying"
                );
                progress.retry(step, &err, max_attempts, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::debug!(step = step.name(), attempt, error = %err, "step failed");
                progress.fail(step, &err);
                return Err(err);
            }
        }
    }
}
