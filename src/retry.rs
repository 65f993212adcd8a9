//! Bounded fixed-delay retry, used for token issuance after registration.

use std::future::Future;
use std::time::Duration;

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 are treated as 1.
    pub attempts: u32,
    /// Fixed pause between consecutive attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

impl Default for RetryPolicy {
    /// 10 attempts, 1 second apart.
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_secs(1),
        }
    }
}

/// Run `op` until it succeeds or the budget is spent.
///
/// A failed attempt never aborts early: every attempt in the budget is made,
/// with `policy.delay` between them, and the last error is returned.
pub(crate) async fn retry<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                tracing::warn!(attempt, remaining = attempts - attempt, error = %e, "attempt failed, retrying");
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "retry budget exhausted");
                return Err(e);
            }
        }
    }
}
