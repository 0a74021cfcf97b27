use std::future::Future;
use std::time::Duration;

use reqwest::header::HeaderMap;

use crate::error::LlmError;

/// Rate-limit retry for one backend.
///
/// Delays come from `retry-after-ms`, then `retry-after` (seconds, fractions
/// allowed), then doubling backoff. Every delay is capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    pub(crate) max_retries: u32,
    base: Duration,
    cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2)
    }
}

impl RetryPolicy {
    pub(crate) const fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base: Duration::from_millis(500),
            cap: Duration::from_secs(20),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    fn delay(&self, headers: &HeaderMap, attempt: u32) -> Duration {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let hinted = header("retry-after-ms")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .or_else(|| {
                header("retry-after")
                    .and_then(|v| v.trim().parse::<f64>().ok())
                    .filter(|secs| secs.is_finite() && *secs >= 0.0)
                    .map(Duration::from_secs_f64)
            });

        hinted.unwrap_or_else(|| self.backoff(attempt)).min(self.cap)
    }

    /// Send a request built by `build`, retrying 429 responses.
    ///
    /// `build` is called once per attempt. Any non-429 response is returned
    /// as is for the caller to inspect.
    ///
    /// # Errors
    ///
    /// `LlmError::RateLimited` once retries are exhausted, `LlmError::Http`
    /// when the request itself fails.
    pub(crate) async fn send<F, Fut>(
        &self,
        provider: &str,
        mut build: F,
    ) -> Result<reqwest::Response, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let mut attempt = 0;
        loop {
            let response = build().await.map_err(LlmError::Http)?;
            if response.status() != reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }
            if attempt >= self.max_retries {
                tracing::warn!(provider, attempts = attempt + 1, "rate limited, giving up");
                return Err(LlmError::RateLimited);
            }

            let delay = self.delay(response.headers(), attempt);
            attempt += 1;
            tracing::warn!(
                provider,
                attempt,
                max_retries = self.max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "rate limited, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
