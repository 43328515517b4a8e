//! Retrying HTTP GET for API sources

use sluice_core::config::HttpConfig;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Errors surfaced once the retry budget is spent
#[derive(Error, Debug)]
pub enum HttpError {
    /// Server answered with a non-success status
    #[error("{url} returned HTTP {status} after {attempts} attempt(s)")]
    Status {
        /// Requested URL
        url: String,
        /// Last status received
        status: u16,
        /// Requests made
        attempts: u32,
    },

    /// Connection, timeout or body read failure
    #[error("request to {url} failed after {attempts} attempt(s): {source}")]
    Transport {
        /// Requested URL
        url: String,
        /// Requests made
        attempts: u32,
        /// Underlying client error
        #[source]
        source: reqwest::Error,
    },
}

/// When and how long to wait between GET attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each later one
    pub backoff_base: Duration,
    /// Statuses worth retrying
    pub retry_statuses: Vec<u16>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(retry.saturating_sub(1))
    }

    /// Whether a response status should be retried
    pub fn retries_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// Short description for run logs, e.g. `3 retries, 10s timeout`
    pub fn describe(&self) -> String {
        format!("{} retries, {}s timeout", self.max_retries, self.timeout.as_secs())
    }
}

impl From<&HttpConfig> for RetryPolicy {
    fn from(config: &HttpConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: config.backoff_base(),
            retry_statuses: config.retry_statuses.clone(),
            timeout: config.timeout(),
        }
    }
}

/// HTTP client that retries idempotent GETs with exponential backoff
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl HttpFetcher {
    /// Build a client honoring the configured timeout
    pub fn new(config: &HttpConfig) -> reqwest::Result<Self> {
        Self::with_policy(RetryPolicy::from(config))
    }

    /// Build a client from an explicit policy
    pub fn with_policy(policy: RetryPolicy) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(policy.timeout)
            .user_agent(concat!("sluice/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, policy })
    }

    /// Retry policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GET `url` and return the body as text
    ///
    /// Retryable statuses and transport failures are retried up to
    /// `max_retries` times; any other non-success status fails at once.
    pub async fn get_text(&self, url: &str) -> Result<String, HttpError> {
        let max_attempts = self.policy.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let failure = match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    return response.text().await.map_err(|source| HttpError::Transport {
                        url: url.to_string(),
                        attempts: attempt,
                        source,
                    });
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let error = HttpError::Status {
                        url: url.to_string(),
                        status,
                        attempts: attempt,
                    };
                    if !self.policy.retries_status(status) {
                        return Err(error);
                    }
                    error
                }
                Err(source) => HttpError::Transport {
                    url: url.to_string(),
                    attempts: attempt,
                    source,
                },
            };

            warn!("GET attempt {}/{} failed: {}", attempt, max_attempts, failure);
            if attempt >= max_attempts {
                return Err(failure);
            }

            let delay = self.policy.backoff(attempt);
            info!("Retrying in {} ms...", delay.as_millis());
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_base: Duration::from_millis(5),
            retry_statuses: vec![429, 500, 502, 503, 504],
            timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::from(&HttpConfig::default());
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.describe(), "3 retries, 10s timeout");
    }

    #[tokio::test]
    async fn test_two_503s_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .with_priority(1)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .with_priority(2)
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::with_policy(fast_policy(3)).unwrap();
        let body = fetcher.get_text(&format!("{}/users", server.uri())).await.unwrap();
        assert_eq!(body, "[]");
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(4)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::with_policy(fast_policy(3)).unwrap();
        let err = fetcher.get_text(&server.uri()).await.unwrap_err();
        match err {
            HttpError::Status { status, attempts, .. } => {
                assert_eq!(status, 503);
                assert_eq!(attempts, 4);
            }
            other => panic!("Expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_status_fails_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::with_policy(fast_policy(3)).unwrap();
        let err = fetcher.get_text(&server.uri()).await.unwrap_err();
        assert!(matches!(err, HttpError::Status { status: 404, attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_timeout_is_a_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let mut policy = fast_policy(1);
        policy.timeout = Duration::from_millis(50);
        let fetcher = HttpFetcher::with_policy(policy).unwrap();

        let err = fetcher.get_text(&server.uri()).await.unwrap_err();
        match err {
            HttpError::Transport { attempts, source, .. } => {
                assert_eq!(attempts, 2);
                assert!(source.is_timeout());
            }
            other => panic!("Expected transport error, got {:?}", other),
        }
    }
}
