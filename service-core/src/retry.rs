//! Bounded retry for calls against unreliable remote systems.
//!
//! Every policy has an explicit attempt bound and a fixed delay; there is no
//! "retry forever" mode.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Attempt bound and the constant delay between attempts.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Never below 1.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// Successful result together with the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Last error after every attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryError<E> {
    pub last_error: E,
    pub attempts: u32,
}

/// Retry `f` on every error until it succeeds or the policy is exhausted.
///
/// `f` receives the one-based attempt number.
pub async fn retry_async<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut f: F,
) -> Result<Retried<T>, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match f(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    info!(
                        operation = operation_name,
                        attempt = attempt,
                        "Call succeeded after retry"
                    );
                }
                return Ok(Retried {
                    value,
                    attempts: attempt,
                });
            }
            Err(error) if attempt >= max_attempts => {
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    error = %error,
                    "Call failed after max attempts"
                );
                return Err(RetryError {
                    last_error: error,
                    attempts: attempt,
                });
            }
            Err(error) => {
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    error = %error,
                    backoff_ms = policy.delay.as_millis() as u64,
                    "Call failed, retrying after backoff"
                );
                sleep(policy.delay).await;
            }
        }
    }
}
