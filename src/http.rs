use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::errors::AppResult;

pub const RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];
const BACKOFF_MAX: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries on top of the first attempt.
    pub total: u32,
    pub backoff_factor: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            total: config.retry_total,
            backoff_factor: config.backoff_factor,
        }
    }

    /// Delay before retry number `retry` (1-based). The first retry is immediate, then
    /// `factor * 2^(retry - 1)` seconds, capped at two minutes.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        if retry <= 1 || self.backoff_factor <= 0.0 {
            return Duration::ZERO;
        }
        let exponent = (retry - 1).min(16) as i32;
        let seconds = self.backoff_factor * 2_f64.powi(exponent);
        capped_secs(seconds)
    }

    /// Delay before retry number `retry` after a retryable status. A usable
    /// `Retry-After` header wins over the computed backoff; both are capped.
    pub fn delay_for(&self, retry: u32, headers: &HeaderMap) -> Duration {
        retry_after(headers).unwrap_or_else(|| self.backoff_delay(retry))
    }

    fn is_retryable(status: StatusCode) -> bool {
        RETRYABLE_STATUSES.contains(&status.as_u16())
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
    /// Physical requests issued for this logical fetch.
    pub attempts: u32,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// `true` when the last response still carried a retryable status.
    pub fn retries_exhausted(&self) -> bool {
        RetryPolicy::is_retryable(self.status)
    }

    /// Parses the body as JSON; `None` for empty or non-JSON bodies.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// GET-only HTTP client with a per-request timeout, bounded retries and exponential
/// backoff. A retryable status that survives the budget is returned, not raised; a
/// connection that never succeeds is an error.
#[derive(Clone)]
pub struct ResilientClient {
    http: Client,
    policy: RetryPolicy,
}

impl ResilientClient {
    pub fn new(config: &PipelineConfig) -> AppResult<Self> {
        Self::with_policy(
            config.request_timeout,
            &config.user_agent,
            RetryPolicy::from_config(config),
        )
    }

    pub fn with_policy(timeout: Duration, user_agent: &str, policy: RetryPolicy) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { http, policy })
    }

    pub async fn get(
        &self,
        url: &str,
        params: &[(&str, &str)],
        headers: &HeaderMap,
    ) -> AppResult<FetchResponse> {
        let mut retries = 0_u32;
        loop {
            let attempts = retries + 1;
            let outcome = self
                .http
                .get(url)
                .query(params)
                .headers(headers.clone())
                .send()
                .await;

            let response = match outcome {
                Ok(response) => response,
                Err(err) if retries < self.policy.total => {
                    retries += 1;
                    let delay = self.policy.backoff_delay(retries);
                    warn!(?err, url, attempt = attempts, "request failed; retrying after {:?}", delay);
                    sleep(delay).await;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let status = response.status();
            if RetryPolicy::is_retryable(status) && retries < self.policy.total {
                retries += 1;
                let delay = self.policy.delay_for(retries, response.headers());
                warn!(
                    url,
                    status = status.as_u16(),
                    attempt = attempts,
                    "retryable status; retrying after {:?}",
                    delay
                );
                sleep(delay).await;
                continue;
            }

            match response.bytes().await {
                Ok(body) => {
                    debug!(url, status = status.as_u16(), attempts, "request completed");
                    return Ok(FetchResponse {
                        status,
                        body: body.to_vec(),
                        attempts,
                    });
                }
                Err(err) if retries < self.policy.total => {
                    retries += 1;
                    let delay = self.policy.backoff_delay(retries);
                    warn!(?err, url, attempt = attempts, "body read failed; retrying after {:?}", delay);
                    sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Reads `Retry-After` as delta-seconds or an HTTP date, capped like the backoff.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Some(capped_secs(seconds));
        }
        return None;
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some(
        (at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(BACKOFF_MAX),
    )
}

/// Seconds that do not fit in a `Duration` saturate at the cap.
fn capped_secs(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds)
        .unwrap_or(BACKOFF_MAX)
        .min(BACKOFF_MAX)
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_is_capped() {
        let policy = RetryPolicy {
            total: 6,
            backoff_factor: 0.6,
        };
        assert_eq!(policy.backoff_delay(1), Duration::ZERO);
        assert_eq!(policy.backoff_delay(2), Duration::from_secs_f64(1.2));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs_f64(2.4));
        assert_eq!(policy.backoff_delay(30), BACKOFF_MAX);

        let disabled = RetryPolicy {
            total: 6,
            backoff_factor: 0.0,
        };
        assert_eq!(disabled.backoff_delay(5), Duration::ZERO);

        let huge = RetryPolicy {
            total: 6,
            backoff_factor: 1e300,
        };
        assert_eq!(huge.backoff_delay(2), BACKOFF_MAX);
        assert_eq!(huge.backoff_delay(17), BACKOFF_MAX);
    }

    #[test]
    fn parses_retry_after_seconds_and_dates() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(3)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after(&headers), Some(Duration::ZERO));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("1e30"));
        assert_eq!(retry_after(&headers), Some(BACKOFF_MAX));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Fri, 01 Jan 9999 00:00:00 GMT"));
        assert_eq!(retry_after(&headers), Some(BACKOFF_MAX));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("-1"));
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(retry_after(&headers), None);
        assert_eq!(retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn retry_after_overrides_computed_backoff() {
        let policy = RetryPolicy {
            total: 6,
            backoff_factor: 10.0,
        };
        let mut headers = HeaderMap::new();
        assert_eq!(policy.delay_for(3, &headers), Duration::from_secs(40));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        assert_eq!(policy.delay_for(3, &headers), Duration::from_secs(2));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("garbage"));
        assert_eq!(policy.delay_for(3, &headers), Duration::from_secs(40));
    }

    #[test]
    fn flags_exhausted_retryable_statuses() {
        let response = FetchResponse {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: b"<html>busy</html>".to_vec(),
            attempts: 7,
        };
        assert!(response.retries_exhausted());
        assert!(!response.is_success());
        assert!(response.json().is_none());
    }
}
