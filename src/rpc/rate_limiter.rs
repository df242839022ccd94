//! RPC rate limiter - minimum call gap + backoff retry
//!
//! Serializes every RPC dispatch in the process through one shared
//! instance: callers queue on an internal mutex, sleep out the
//! remainder of the configured gap since the previous dispatch, then
//! run their operation. Failures classified as rate limiting (HTTP 429
//! or a "rate limit" / "Too Many Requests" message) are retried with
//! exponentially growing delay; every other error propagates on the
//! first failure.

use std::future::Future;
use std::time::{Duration, Instant};

use eyre::Result;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Starting backoff delay, doubled on each retry.
const BASE_BACKOFF_MS: u64 = 500;

pub struct RateLimiter {
    min_delay: Duration,
    max_retries: u32,
    last_dispatch: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_delay: Duration, max_retries: u32) -> Self {
        Self {
            min_delay,
            max_retries,
            last_dispatch: Mutex::new(None),
        }
    }

    /// Run `operation`, enforcing the inter-call gap and retrying
    /// rate-limited failures with exponential backoff.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            self.wait_for_slot().await;

            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if is_rate_limit_error(&err) && attempt < self.max_retries => {
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS << attempt);
                    attempt += 1;
                    warn!(
                        "Rate limited (attempt {}/{}), backing off {:?}: {}",
                        attempt, self.max_retries, backoff, err
                    );
                    sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Sleep out the remainder of the gap since the previous dispatch.
    /// The lock is held across the sleep so concurrent callers queue.
    async fn wait_for_slot(&self) {
        let mut last = self.last_dispatch.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_delay {
                let wait = self.min_delay - elapsed;
                debug!("Throttling RPC dispatch for {:?}", wait);
                sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Rate-limit classification: status 429 or the provider's usual
/// throttle phrasing anywhere in the error chain.
pub fn is_rate_limit_error(err: &eyre::Report) -> bool {
    let text = format!("{:#}", err).to_lowercase();
    text.contains("429") || text.contains("rate limit") || text.contains("too many requests")
}

// ============================================
// TESTS
// ============================================
