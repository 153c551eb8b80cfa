//! Bounded retry with a fixed wait between attempts.
//!
//! Used at both retry sites: the batch-wide provider fetch and the
//! per-device sink submission.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub attempts: u32,
    /// Fixed wait between consecutive attempts.
    pub wait: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, wait: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            wait,
        }
    }

    /// Provider fetch pass: 3 attempts, 60s apart.
    pub fn fetch() -> Self {
        Self::new(3, Duration::from_secs(60))
    }

    /// Sink submission: 3 attempts, 10s apart.
    pub fn delivery() -> Self {
        Self::new(3, Duration::from_secs(10))
    }

    /// Run `op` until it succeeds, fails with an error `should_retry` rejects,
    /// or the attempts are used up. The last error is returned.
    pub async fn run<T, E, F, Fut, P>(&self, label: &str, should_retry: P, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.attempts && should_retry(&e) => {
                    log::warn!(
                        "[Retry] {} attempt {}/{} failed: {}; retrying in {:?}",
                        label,
                        attempt,
                        self.attempts,
                        e,
                        self.wait
                    );
                    if !self.wait.is_zero() {
                        tokio::time::sleep(self.wait).await;
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
