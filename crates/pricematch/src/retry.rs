//! Retry for outbound HTTP calls: exponential backoff with jitter.
//!
//! Used by the matching client, the job dispatcher and the blob store.
//! Backoff delays come from `backon`; a `429` response carrying a
//! `Retry-After: <seconds>` header overrides the computed delay.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f32,
    pub jitter: bool,
    /// Off for calls that are not safe to repeat once the server may have
    /// started on them.
    pub retry_timeouts: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
            jitter: true,
            retry_timeouts: true,
        }
    }
}

impl RetryPolicy {
    /// Policy without waits, for tests against local servers.
    pub fn immediate(max_retries: usize) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
            jitter: false,
            retry_timeouts: true,
        }
    }

    pub fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.factor)
            .with_max_times(self.max_retries);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// Connection failures are always retried, timeouts only when enabled.
    pub fn retries_error(&self, err: &reqwest::Error) -> bool {
        err.is_connect() || (self.retry_timeouts && err.is_timeout())
    }
}

/// Rate limiting and gateway failures are worth another attempt.
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 502 | 503 | 504)
}

/// Parses `Retry-After` given in whole seconds. HTTP-date values are ignored.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Delay before the next attempt after a retryable response.
pub fn delay_for_response(status: StatusCode, headers: &HeaderMap, backoff: Duration) -> Duration {
    if status == StatusCode::TOO_MANY_REQUESTS {
        retry_after(headers).unwrap_or(backoff)
    } else {
        backoff
    }
}

/// Sends a request built by `make_request`, retrying per `policy`.
///
/// Once the retries are used up the last response is returned as-is, so the
/// caller still sees the final status code.
pub async fn send_with_retry<F>(
    policy: &RetryPolicy,
    label: &str,
    make_request: F,
) -> Result<Response, reqwest::Error>
where
    F: Fn() -> RequestBuilder,
{
    let mut delays = policy.backoff().build();
    let mut attempt = 1usize;

    loop {
        match make_request().send().await {
            Ok(response) if is_retryable_status(response.status()) => {
                let Some(backoff) = delays.next() else {
                    return Ok(response);
                };
                let wait = delay_for_response(response.status(), response.headers(), backoff);
                warn!(
                    call = label,
                    attempt,
                    status = response.status().as_u16(),
                    wait_ms = wait.as_millis() as u64,
                    "Retryable response, backing off"
                );
                tokio::time::sleep(wait).await;
            }
            Ok(response) => return Ok(response),
            Err(e) if policy.retries_error(&e) => {
                let Some(wait) = delays.next() else {
                    return Err(e);
                };
                warn!(
                    call = label,
                    attempt,
                    error = %e,
                    wait_ms = wait.as_millis() as u64,
                    "Request failed, backing off"
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => return Err(e),
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_retryable_statuses() {
        for code in [429u16, 502, 503, 504] {
            assert!(is_retryable_status(StatusCode::from_u16(code).unwrap()));
        }
        for code in [200u16, 400, 401, 404, 500] {
            assert!(!is_retryable_status(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[test]
    fn test_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"),
        );
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn test_retry_after_only_applies_to_429() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        let backoff = Duration::from_secs(1);

        assert_eq!(
            delay_for_response(StatusCode::TOO_MANY_REQUESTS, &headers, backoff),
            Duration::from_secs(12)
        );
        assert_eq!(
            delay_for_response(StatusCode::SERVICE_UNAVAILABLE, &headers, backoff),
            backoff
        );
        assert_eq!(
            delay_for_response(StatusCode::TOO_MANY_REQUESTS, &HeaderMap::new(), backoff),
            backoff
        );
    }

    #[test]
    fn test_backoff_grows_and_stops() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        let delays: Vec<Duration> = policy.backoff().build().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[test]
    fn test_backoff_capped_at_max_delay() {
        let policy = RetryPolicy {
            max_retries: 8,
            jitter: false,
            ..RetryPolicy::default()
        };
        let delays: Vec<Duration> = policy.backoff().build().collect();
        assert_eq!(delays.len(), 8);
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(30)));
        assert_eq!(delays.last(), Some(&Duration::from_secs(30)));
    }
}
