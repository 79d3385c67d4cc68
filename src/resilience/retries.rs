//! Retry logic for transcript persistence.
//!
//! # Responsibilities
//! - Re-run a failed persistence call a bounded number of times
//! - Back off exponentially with jitter between attempts
//!
//! # Design Decisions
//! - Only the persistence path retries. The relay makes one inline attempt
//!   and hands transient failures to a background task, so no backoff
//!   delay is spent before the client gets its response
//! - The caller decides which errors are transient; constraint violations
//!   are returned immediately

use std::future::Future;

use crate::config::PersistRetryConfig;
use crate::resilience::backoff::calculate_backoff;

/// Bounded retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }
}

impl From<&PersistRetryConfig> for RetryPolicy {
    fn from(config: &PersistRetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are used up. The last error is returned.
pub async fn retry_transient<T, E, F, Fut>(
    policy: RetryPolicy,
    operation: &'static str,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts && is_transient(&e) => {
                let delay = calculate_backoff(attempt, policy.base_delay_ms, policy.max_delay_ms);
                tracing::warn!(
                    operation,
                    attempt,
                    delay = ?delay,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
