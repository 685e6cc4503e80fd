//! Reusable retry-with-backoff policy.
//!
//! The reference's embedding provider had its own ad-hoc backoff loop baked into
//! `embed_openai`; this is the same policy lifted into an object so the embedding
//! batcher ([`crate::embedding`]), the context enricher ([`crate::enrich`]) and the
//! code-block summarizer ([`crate::code_extract`]) all share it rather than
//! reimplementing exponential backoff at each call site.

use std::future::Future;
use std::time::Duration;

/// Max attempts, base delay, and multiplier for exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: u32) -> Self {
        Self {
            max_attempts,
            base_delay,
            multiplier,
        }
    }

    /// `embed` batch/per-item retries: 3 attempts, `B·2^i` backoff.
    pub fn embedding_default() -> Self {
        Self::new(3, Duration::from_secs(1), 2)
    }

    /// Runs `f` up to `max_attempts` times, sleeping `base_delay * multiplier^i`
    /// between attempts. Returns the last error if every attempt fails.
    pub async fn run<T, E, F, Fut>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut last_err = None;
        for attempt in 0..self.max_attempts {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < self.max_attempts {
                        let delay = self.base_delay * self.multiplier.pow(attempt);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(last_err.expect("at least one attempt always runs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), 1);
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("boom")
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_returns_last_error() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), 1);
        let result: Result<u32, &str> = policy.run(|| async { Err("nope") }).await;
        assert_eq!(result, Err("nope"));
    }
}
