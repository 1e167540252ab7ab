use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

type Backoff = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// How many times an outbound call is attempted and how long to wait in between.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Retry immediately, up to `max_attempts` attempts in total.
    pub fn fixed(max_attempts: u32) -> Self {
        Self::with_backoff(max_attempts, |_| Duration::ZERO)
    }

    /// `backoff(n)` is the delay after the n-th failed attempt (1-based).
    pub fn with_backoff<F>(max_attempts: u32, backoff: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Arc::new(backoff),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it succeeds or the attempts are used up; the last error wins.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    warn!(attempt, max_attempts = self.max_attempts, error = %e, "Attempt failed, retrying");
                    let delay = (self.backoff)(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Final attempt failed");
                    return Err(e);
                }
            }
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}
