use crate::error::DbError;
use configuration::RetrySettings;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Linear backoff for transient database errors.
///
/// Attempt `n` waits `min(n, max_factor) * step`, so delays never decrease and
/// never exceed `max_factor * step` (5s with the defaults). With no
/// `max_attempts` the loop only ends on success, a fatal error, or cancellation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    step: Duration,
    max_factor: u32,
    max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            step: Duration::from_millis(100),
            max_factor: 50,
            max_attempts: None,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            step: Duration::from_millis(settings.step_ms),
            max_factor: settings.max_factor.max(1),
            max_attempts: settings.max_attempts,
        }
    }
}

impl RetryPolicy {
    pub fn new(step: Duration, max_factor: u32) -> Self {
        Self {
            step,
            max_factor: max_factor.max(1),
            max_attempts: None,
        }
    }

    /// Caps the total number of attempts; reaching it yields [`DbError::RetriesExhausted`].
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    /// The wait after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.step * attempt.clamp(1, self.max_factor)
    }

    /// Runs `op` until it succeeds, fails with an error `is_transient`
    /// rejects, or `cancel` fires.
    ///
    /// Cancellation is checked before every attempt and during every wait, and
    /// always surfaces as [`DbError::Cancelled`].
    pub async fn run<T, F, Fut, C>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        is_transient: C,
        mut op: F,
    ) -> Result<T, DbError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DbError>>,
        C: Fn(&DbError) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(DbError::Cancelled);
            }

            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(DbError::Cancelled) => return Err(DbError::Cancelled),
                Err(e) if !is_transient(&e) => return Err(e),
                Err(e) => e,
            };

            attempt += 1;
            if self.max_attempts.is_some_and(|max| attempt >= max) {
                tracing::error!(operation, attempts = attempt, error = %error, "Giving up after repeated transient errors.");
                return Err(DbError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            let delay = self.delay_for(attempt);
            tracing::warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient database error, retrying."
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(DbError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
