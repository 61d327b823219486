// src/retry.rs
// Bounded-retry executor with exponential backoff and jitter.
//
// The policy itself performs no I/O: the attempt is a caller-supplied
// closure and the delay is handed to an injected Sleeper, so the whole
// loop is testable with scripted outcomes and a recording fake.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ServiceError;

/// Outcome of a retried operation once the policy gives up.
#[derive(Debug, Clone)]
pub enum RetryError {
    /// The attempt failed with a non-retryable classification.
    Fatal(ServiceError),
    /// Every attempt in the budget failed with a retryable classification.
    /// The service is treated as unreachable.
    Exhausted {
        attempts: u32,
        last: ServiceError,
    },
}

/// Sleep seam so tests can run the loop against a fake clock.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(1000),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (starting at 1 after the first
    /// failure): `2^attempt * base + jitter`, jitter uniform in
    /// `[0, max_jitter)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_with_jitter(attempt, rand::random::<f64>())
    }

    /// Deterministic core of `delay_for`; `unit_jitter` must lie in [0, 1).
    pub fn delay_with_jitter(&self, attempt: u32, unit_jitter: f64) -> Duration {
        let backoff = self.base_delay.saturating_mul(1u32 << attempt.min(20));
        let jitter = self.max_jitter.mul_f64(unit_jitter.clamp(0.0, 1.0));
        backoff + jitter
    }

    /// Run `op` up to `max_attempts` times. Retryable failures sleep and
    /// retry; anything else returns immediately.
    pub async fn run<T, F, Fut>(
        &self,
        sleeper: &dyn Sleeper,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut failures = 0u32;
        loop {
            match op().await {
                Ok(value) => {
                    debug!(attempt = failures + 1, "attempt succeeded");
                    return Ok(value);
                }
                Err(err) if err.is_retryable() => {
                    failures += 1;
                    if failures >= self.max_attempts {
                        warn!(attempts = failures, error = %err, "retry budget exhausted");
                        return Err(RetryError::Exhausted {
                            attempts: failures,
                            last: err,
                        });
                    }
                    let delay = self.delay_for(failures);
                    warn!(
                        attempt = failures,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retryable failure, backing off"
                    );
                    sleeper.sleep(delay).await;
                }
                Err(err) => {
                    debug!(error = %err, "non-retryable failure");
                    return Err(RetryError::Fatal(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Records requested delays instead of waiting.
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        fn new() -> Self {
            Self {
                delays: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.delays.lock().unwrap().push(duration);
        }
    }

    fn scripted(
        outcomes: &'static [Result<&'static str, u16>],
        counter: &'static AtomicU32,
    ) -> impl FnMut() -> std::pin::Pin<
        Box<dyn Future<Output = Result<String, ServiceError>> + Send>,
    > {
        move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) as usize;
            let outcome = outcomes[n.min(outcomes.len() - 1)];
            Box::pin(async move {
                match outcome {
                    Ok(text) => Ok(text.to_string()),
                    Err(status) => Err(ServiceError::from_status(status)),
                }
            })
        }
    }

    #[tokio::test]
    async fn test_three_failures_then_success_takes_four_attempts() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        static OUTCOMES: [Result<&str, u16>; 4] =
            [Err(503), Err(503), Err(503), Ok("answer")];

        let policy = RetryPolicy::default();
        let sleeper = RecordingSleeper::new();
        let result = policy.run(&sleeper, scripted(&OUTCOMES, &CALLS)).await;

        assert_eq!(result.unwrap(), "answer");
        assert_eq!(CALLS.load(Ordering::SeqCst), 4, "expected exactly 4 attempts");
        assert_eq!(sleeper.delays.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_after_four_retryable_failures() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        static OUTCOMES: [Result<&str, u16>; 5] =
            [Err(503), Err(503), Err(503), Err(503), Ok("too late")];

        let policy = RetryPolicy::default();
        let sleeper = RecordingSleeper::new();
        let result = policy.run(&sleeper, scripted(&OUTCOMES, &CALLS)).await;

        match result {
            Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 4),
            other => panic!("expected exhaustion, got {:?}", other.map(|_| ())),
        }
        assert_eq!(
            CALLS.load(Ordering::SeqCst),
            4,
            "no fifth attempt may be made after the budget is spent"
        );
        // Only three sleeps: no backoff after the final failure.
        assert_eq!(sleeper.delays.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_fatal_status_is_not_retried() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        static OUTCOMES: [Result<&str, u16>; 2] = [Err(403), Ok("unreachable")];

        let policy = RetryPolicy::default();
        let sleeper = RecordingSleeper::new();
        let result = policy.run(&sleeper, scripted(&OUTCOMES, &CALLS)).await;

        match result {
            Err(RetryError::Fatal(err)) => {
                assert_eq!(err.status(), Some(403));
            }
            other => panic!("expected fatal error, got {:?}", other.map(|_| ())),
        }
        assert_eq!(CALLS.load(Ordering::SeqCst), 1, "403 must not be retried");
        assert!(sleeper.delays.lock().unwrap().is_empty());
    }

    #[test]
    fn test_backoff_delay_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 1..=4u32 {
            let floor = Duration::from_millis(1000 * (1u64 << attempt));
            let ceiling = floor + Duration::from_millis(1000);
            assert_eq!(policy.delay_with_jitter(attempt, 0.0), floor);
            assert!(policy.delay_with_jitter(attempt, 0.999) < ceiling);
            for _ in 0..50 {
                let d = policy.delay_for(attempt);
                assert!(
                    d >= floor && d < ceiling,
                    "delay {:?} for attempt {} outside [{:?}, {:?})",
                    d,
                    attempt,
                    floor,
                    ceiling
                );
            }
        }
    }
}
