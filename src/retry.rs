use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Fixed-count retry with a constant delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

/// Result of running an operation under a [`RetryPolicy`].
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Succeeded { value: T, attempts: u32 },
    Exhausted { last_error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. } | RetryOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryOutcome::Succeeded { value, .. } => Ok(value),
            RetryOutcome::Exhausted { last_error, .. } => Err(last_error),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Calls `operation` until it succeeds or the attempt budget is spent.
    /// There is no sleep after the final failure.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut operation: F) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    return RetryOutcome::Succeeded {
                        value,
                        attempts: attempt,
                    }
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "{what} failed"
                    );
                    if attempt >= self.max_attempts {
                        return RetryOutcome::Exhausted {
                            last_error: e,
                            attempts: attempt,
                        };
                    }
                    sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
