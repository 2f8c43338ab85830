use std::time::Duration;

use rand::Rng;
use reqwest::{Client, ClientBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tokio::time::sleep;

use crate::error::SourceError;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Configuration for the retrying API client
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub max_retries: usize,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        HttpClientConfig {
            timeout: Duration::from_secs(15),
            max_retries: 3,
            initial_retry_delay_ms: 500,
            max_retry_delay_ms: 8000,
        }
    }
}

/// HTTP client for the JSON APIs the source adapters talk to.
///
/// Retries transient failures with exponential backoff and jitter; a 404 is
/// surfaced as [`SourceError::NotFound`] so adapters can propagate it.
pub struct ApiClient {
    client: Client,
    config: HttpClientConfig,
}

impl ApiClient {
    #[allow(dead_code)]
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_config(HttpClientConfig::default())
    }

    pub fn with_config(config: HttpClientConfig) -> Result<Self, reqwest::Error> {
        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .gzip(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(ApiClient { client, config })
    }

    /// Exponential backoff with jitter to avoid thundering herd
    fn retry_delay(&self, attempt: usize) -> Duration {
        let base = self.config.initial_retry_delay_ms;
        let delay_ms = (base * 2u64.pow(attempt as u32)).min(self.config.max_retry_delay_ms);
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_millis((delay_ms as f64 * jitter) as u64)
    }

    fn is_retryable_status(status: StatusCode) -> bool {
        matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
    }

    async fn get_with_retry(&self, url: Url) -> Result<Response, SourceError> {
        let mut last_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.config.max_retries {
            match self.client.get(url.clone()).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::NOT_FOUND {
                        return Err(SourceError::NotFound(url.to_string()));
                    }
                    if Self::is_retryable_status(status) && attempt < self.config.max_retries {
                        log::warn!(
                            "retryable status {} for {}, attempt {}/{}",
                            status,
                            url,
                            attempt + 1,
                            self.config.max_retries + 1
                        );
                        sleep(self.retry_delay(attempt)).await;
                        continue;
                    }
                    return response.error_for_status().map_err(SourceError::from);
                }
                Err(e) => {
                    let should_retry = e.is_timeout() || e.is_connect() || e.is_request();
                    if should_retry && attempt < self.config.max_retries {
                        log::warn!(
                            "request failed for {}, attempt {}/{}: {}",
                            url,
                            attempt + 1,
                            self.config.max_retries + 1,
                            e
                        );
                        sleep(self.retry_delay(attempt)).await;
                        last_error = Some(e);
                        continue;
                    }
                    return Err(SourceError::from(e));
                }
            }
        }

        Err(SourceError::from(last_error.unwrap()))
    }

    /// GET a URL and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, SourceError> {
        let response = self.get_with_retry(url).await?;
        response.json::<T>().await.map_err(SourceError::from)
    }

    /// Quick liveness probe: one request, short timeout, no retries
    pub async fn probe(&self, url: Url, timeout: Duration) -> bool {
        match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_status_classification() {
        assert!(ApiClient::is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(ApiClient::is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!ApiClient::is_retryable_status(StatusCode::OK));
        assert!(!ApiClient::is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!ApiClient::is_retryable_status(StatusCode::FORBIDDEN));
    }

    #[test]
    fn test_retry_delay_is_bounded() {
        let client = ApiClient::new().unwrap();
        for attempt in 0..8 {
            let delay = client.retry_delay(attempt);
            // max delay plus 25% jitter headroom
            assert!(delay <= Duration::from_millis(10000));
        }
    }

    #[tokio::test]
    async fn test_client_creation() {
        assert!(ApiClient::new().is_ok());
    }
}
