//! Retry with exponential backoff around collaborator calls.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::config::RuntimeSettings;
use crate::error::{ExamError, PortError};

/// How often, and how patiently, a collaborator call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_backoff: Duration,
    /// Ceiling for the doubling delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RuntimeSettings::default())
    }
}

impl From<&RuntimeSettings> for RetryPolicy {
    fn from(settings: &RuntimeSettings) -> Self {
        Self {
            max_attempts: settings.retry_max_attempts,
            initial_backoff: settings.retry_initial_backoff,
            max_backoff: settings.retry_max_backoff,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Runs `call` until it succeeds, fails permanently, or the attempts
    /// run out. Only [`PortError::Transient`] failures are retried.
    ///
    /// # Errors
    ///
    /// The last error seen.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, PortError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PortError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    debug!(operation, attempt, ?delay, error = %e, "retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Maps a collaborator failure onto the caller-facing taxonomy.
#[must_use]
pub fn port_error(operation: &'static str, err: PortError) -> ExamError {
    match err {
        PortError::Transient(message) => ExamError::TransientIo { operation, message },
        PortError::NotFound(id) => ExamError::NotFound { kind: "record", id },
        PortError::Rejected(message) => ExamError::validation(message),
    }
}
