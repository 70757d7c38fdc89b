//! Explicit retry policy for chunk writes.
//!
//! The chunk runner never retries a failed write on its own. Wrapping a writer in
//! [`RetryingWriter`] opts a step into re-attempting the whole chunk with exponential backoff;
//! this is only sound when the wrapped writer is idempotent for a chunk it may have
//! partially attempted (atomic writers are).

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use super::writer::ItemWriter;
use crate::config::RetryConfig;
use crate::error::WriterError;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1).min(i32::MAX as u32) as i32);
        let delay_secs = self.base_delay.as_secs_f64() * factor;

        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay_secs.max(0.0))
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryingWriter<W> {
    inner: W,
    policy: RetryPolicy,
}

impl<W> RetryingWriter<W> {
    pub fn new(inner: W, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<T, W> ItemWriter<T> for RetryingWriter<W>
where
    T: Send + Sync + 'static,
    W: ItemWriter<T>,
{
    async fn write(&self, items: &[T]) -> Result<(), WriterError> {
        let mut attempt = 1;
        loop {
            match self.inner.write(items).await {
                Ok(()) => return Ok(()),
                Err(error) if attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        attempt = attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Chunk write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    return Err(WriterError::new(format!(
                        "{} (after {attempt} attempts)",
                        error.message
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyWriter {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyWriter {
        fn failing(times: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(times),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ItemWriter<u32> for FlakyWriter {
        async fn write(&self, _items: &[u32]) -> Result<(), WriterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(WriterError::new("deadlock detected"));
            }
            Ok(())
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_recovers_within_attempts() {
        let writer = RetryingWriter::new(FlakyWriter::failing(2), fast_policy(3));
        writer.write(&[1, 2, 3]).await.unwrap();
        assert_eq!(writer.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let writer = RetryingWriter::new(FlakyWriter::failing(5), fast_policy(2));
        let error = writer.write(&[1]).await.unwrap_err();
        assert!(error.message.contains("after 2 attempts"));
        assert_eq!(writer.inner.calls.load(Ordering::SeqCst), 2);
    }
}
