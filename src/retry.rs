//! Bounded retry with a fixed backoff.
//!
//! Every retry site in the bridge goes through [`RetryPolicy`]: attaching the
//! external-media channel to its bridge, reconnecting the realtime session,
//! and the per-slot validation budget (which counts attempts across dialogue
//! turns rather than looping, see [`RetryPolicy::is_exhausted`]).

use std::future::Future;
use std::time::Duration;

/// Maximum attempts plus a fixed delay between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Budget that is only counted, never slept on.
    pub fn attempts_only(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// True once `attempts` has used up the budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Run `op` until it succeeds or the budget runs out.
    ///
    /// `op` receives the 1-based attempt number. The last error is returned
    /// when every attempt failed; the caller supplies the terminal fallback.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(op = label, attempt, "Retry succeeded");
                    }
                    return Ok(value);
                }
                Err(e) if self.is_exhausted(attempt) => {
                    tracing::warn!(
                        op = label,
                        attempts = attempt,
                        error = %e,
                        "Retry budget exhausted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!(
                        op = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Attempt failed, backing off"
                    );
                    if !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}
