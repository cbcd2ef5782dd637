//! Job-level retries.
//!
//! A job is retried as a unit: it must re-establish its own starting state
//! (for reports, re-navigating to the report screen). No progress inside a
//! job is kept between attempts.

use crate::result::{CosechaError, CosechaResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Default number of attempts per job
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Bounded retry with a fixed delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total tries, including the first
    pub max_attempts: u32,
    /// Pause after a failed attempt; skipped after the last one
    #[serde(with = "millis")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Create a policy; zero attempts is raised to one
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// A single attempt with no delay
    #[must_use]
    pub const fn once() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// Successful result plus the failures that preceded it
#[derive(Debug)]
pub struct Retried<T> {
    /// The value of the successful attempt
    pub value: T,
    /// Attempt number that succeeded, starting at 1
    pub attempts: u32,
    /// Errors from the failed attempts, oldest first
    pub failures: Vec<CosechaError>,
}

/// Run `job` until it succeeds or `policy.max_attempts` tries have failed.
///
/// `job` receives the attempt number, starting at 1. When every attempt
/// fails the result is `Exhausted` carrying the final error.
pub async fn run_with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    job_name: &str,
    mut job: F,
) -> CosechaResult<Retried<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = CosechaResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut failures = Vec::new();

    for attempt in 1..=max_attempts {
        tracing::info!(job = job_name, attempt, max_attempts, "starting attempt");
        match job(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(job = job_name, attempt, "succeeded after retry");
                }
                return Ok(Retried {
                    value,
                    attempts: attempt,
                    failures,
                });
            }
            Err(e) => {
                tracing::warn!(job = job_name, attempt, max_attempts, error = %e, "attempt failed");
                failures.push(e);
                if attempt < max_attempts && !policy.delay.is_zero() {
                    tracing::info!(job = job_name, delay_ms = policy.delay.as_millis() as u64, "retrying");
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }

    let last = failures
        .pop()
        .unwrap_or_else(|| CosechaError::page("job made no attempts"));
    tracing::error!(job = job_name, attempts = max_attempts, error = %last, "job exhausted");
    Err(CosechaError::Exhausted {
        job: job_name.to_string(),
        attempts: max_attempts,
        last: Box::new(last),
    })
}

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
