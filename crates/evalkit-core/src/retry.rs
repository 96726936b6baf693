//! Fixed-schedule retry for a single upstream call.
//!
//! The schedule length is the number of attempts: `[1s, 2s, 4s]` means three
//! calls, sleeping 1s after the first failure and 2s after the second. The last
//! delay is never slept. Faults are classified before any sleep, so a
//! non-retryable fault returns straight away without using up an attempt.

use crate::errors::{FaultClass, ProviderFault};
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4),
        ])
    }
}

impl RetrySchedule {
    /// An empty list still yields one attempt.
    pub fn new(mut delays: Vec<Duration>) -> Self {
        if delays.is_empty() {
            delays.push(Duration::ZERO);
        }
        Self { delays }
    }

    /// Same attempt count as the default schedule, without sleeping.
    pub fn immediate() -> Self {
        Self::new(vec![Duration::ZERO; 3])
    }

    pub fn attempts(&self) -> usize {
        self.delays.len()
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// Non-retryable fault, returned on the attempt that raised it.
    Fatal(E),
    /// Every scheduled attempt failed with a retryable fault.
    Exhausted { attempts: usize, last: E },
}

impl From<RetryError<ProviderFault>> for ProviderFault {
    fn from(e: RetryError<ProviderFault>) -> Self {
        match e {
            RetryError::Fatal(fault) => fault,
            RetryError::Exhausted { attempts, last } => ProviderFault::ExhaustedRetries {
                attempts,
                last: Box::new(last),
            },
        }
    }
}

/// Run `thunk` under `schedule`. On success returns the value and the elapsed
/// time of the successful attempt in milliseconds.
pub async fn call_with_retry<T, E, C, F, Fut>(
    schedule: &RetrySchedule,
    classify: C,
    mut thunk: F,
) -> Result<(T, f64), RetryError<E>>
where
    C: Fn(&E) -> FaultClass,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = schedule.attempts();
    let mut attempt = 0;

    loop {
        let start = Instant::now();
        match thunk().await {
            Ok(value) => {
                let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
                return Ok((value, elapsed_ms));
            }
            Err(e) => {
                if classify(&e) == FaultClass::NonRetryable {
                    tracing::debug!(
                        event = "retry.fatal",
                        attempt = attempt + 1,
                        error = %e,
                        "non-retryable fault"
                    );
                    return Err(RetryError::Fatal(e));
                }
                let delay = schedule.delays()[attempt];
                tracing::warn!(
                    event = "retry.attempt_failed",
                    attempt = attempt + 1,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retryable fault"
                );
                if attempt + 1 >= attempts {
                    return Err(RetryError::Exhausted { attempts, last: e });
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
