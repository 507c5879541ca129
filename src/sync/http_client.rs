//! Rate-limited HTTP client shared by HTTP-backed providers
//!
//! Limits concurrent requests with a semaphore and spaces out requests to the
//! same host. Status codes are mapped onto [`FetchError`] so providers can tell
//! "does not exist" (404) apart from transport and upstream failures.

use crate::config::{HttpConfig, RateLimitConfig};
use crate::error::FetchError;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

/// HTTP client with rate limiting capabilities
///
/// Features:
/// - Per-host request interval enforcement
/// - Global concurrent request limiting via semaphore
/// - HTTP 429 handling with Retry-After support
#[derive(Debug)]
pub struct HttpClientWithRateLimit {
    client: Client,
    semaphore: Arc<Semaphore>,
    last_request: Arc<Mutex<HashMap<String, Instant>>>,
    config: RateLimitConfig,
}

impl HttpClientWithRateLimit {
    /// Create a new rate-limited HTTP client
    pub fn new(config: &HttpConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(client, config.rate_limit.clone()))
    }

    /// Create a rate-limited HTTP client with a custom reqwest Client
    pub fn with_client(client: Client, config: RateLimitConfig) -> Self {
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            last_request: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Perform a GET request
    pub async fn get(&self, url: &str) -> Result<Bytes, FetchError> {
        self.get_with_headers(url, &[]).await
    }

    /// Perform a GET request with extra headers
    ///
    /// Invalid header names or values are skipped with a warning.
    pub async fn get_with_headers(
        &self,
        url: &str,
        extra_headers: &[(&str, String)],
    ) -> Result<Bytes, FetchError> {
        // Acquire semaphore permit to limit concurrent requests
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| FetchError::Network("HTTP client is shutting down".to_string()))?;

        // Wait for rate limit interval if needed
        self.wait_for_rate_limit(url).await;

        let mut headers = HeaderMap::new();
        for (name, value) in extra_headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(header = *name, "Skipping invalid request header"),
            }
        }

        debug!(url = url, "Sending HTTP GET request");

        let response = self
            .client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::NetworkTimeout
                } else if e.is_connect() {
                    FetchError::ConnectionRefused
                } else {
                    FetchError::Network(e.to_string())
                }
            })?;

        match response.status() {
            status if status.is_success() => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| FetchError::Network(e.to_string()))?;

                debug!(url = url, body_size = body.len(), "Received response");
                Ok(body)
            }
            StatusCode::TOO_MANY_REQUESTS => {
                // Handle rate limiting with Retry-After header
                let wait = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(self.config.rate_limit_wait_secs);

                warn!(url = url, retry_after = wait, "Rate limited by upstream");
                Err(FetchError::RateLimited(wait))
            }
            StatusCode::NOT_FOUND => {
                debug!(url = url, "Resource not found (404)");
                Err(FetchError::NotFound)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!(url = url, status = ?response.status(), "Unauthorized");
                Err(FetchError::Unauthorized)
            }
            status if status.is_server_error() => {
                warn!(url = url, status = status.as_u16(), "Server error");
                Err(FetchError::ServerError(status.as_u16()))
            }
            status => {
                warn!(url = url, status = status.as_u16(), "Unexpected status");
                Err(FetchError::ServerError(status.as_u16()))
            }
        }
    }

    /// Wait for the rate limit interval to pass for the given URL's host
    async fn wait_for_rate_limit(&self, url: &str) {
        let domain = extract_domain(url);
        let min_interval = Duration::from_millis(self.config.min_interval_ms);

        let mut last_requests = self.last_request.lock().await;

        if let Some(last) = last_requests.get(&domain) {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                let wait_time = min_interval - elapsed;
                debug!(
                    domain = domain,
                    wait_ms = wait_time.as_millis(),
                    "Waiting for rate limit"
                );
                drop(last_requests); // Release lock while waiting
                tokio::time::sleep(wait_time).await;
                last_requests = self.last_request.lock().await;
            }
        }

        last_requests.insert(domain, Instant::now());
    }

    /// Get current configuration
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Get number of available permits (concurrent request slots)
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Extract host from URL for rate limiting purposes
fn extract_domain(url: &str) -> String {
    url.split("://")
        .nth(1)
        .and_then(|s| s.split('/').next())
        .unwrap_or(url)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(max_concurrent: usize, min_interval_ms: u64) -> HttpClientWithRateLimit {
        let config = HttpConfig {
            rate_limit: RateLimitConfig {
                min_interval_ms,
                max_concurrent,
                rate_limit_wait_secs: 60,
            },
            ..HttpConfig::default()
        };
        HttpClientWithRateLimit::new(&config).unwrap()
    }

    // Test 1: Basic GET request returns body
    #[tokio::test]
    async fn test_basic_get_request() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/test"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Hello, World!"))
            .mount(&mock_server)
            .await;

        let client = test_client(2, 0);
        let result = client.get(&format!("{}/test", mock_server.uri())).await;

        assert_eq!(result.unwrap(), Bytes::from("Hello, World!"));
    }

    // Test 2: Extra headers are sent with the request
    #[tokio::test]
    async fn test_extra_headers_sent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/a/b"))
            .and(header("Authorization", "Bearer secret"))
            .and(header("Accept", "application/vnd.github+json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = test_client(2, 0);
        let result = client
            .get_with_headers(
                &format!("{}/repos/a/b", mock_server.uri()),
                &[
                    ("Authorization", "Bearer secret".to_string()),
                    ("Accept", "application/vnd.github+json".to_string()),
                ],
            )
            .await;

        assert!(result.is_ok());
    }

    // Test 3: HTTP 429 returns RateLimited error with Retry-After
    #[tokio::test]
    async fn test_429_rate_limited() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "12"))
            .mount(&mock_server)
            .await;

        let client = test_client(2, 0);
        let result = client.get(&mock_server.uri()).await;

        assert_eq!(result, Err(FetchError::RateLimited(12)));
    }

    // Test 4: HTTP 429 without Retry-After uses default
    #[tokio::test]
    async fn test_429_uses_default_wait() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let client = test_client(2, 0);
        let result = client.get(&mock_server.uri()).await;

        assert_eq!(result, Err(FetchError::RateLimited(60)));
    }

    // Test 5: HTTP 404 returns NotFound error
    #[tokio::test]
    async fn test_404_not_found() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = test_client(2, 0);
        let result = client.get(&format!("{}/missing", mock_server.uri())).await;

        assert_eq!(result, Err(FetchError::NotFound));
    }

    // Test 6: HTTP 5xx returns ServerError
    #[tokio::test]
    async fn test_5xx_server_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let client = test_client(2, 0);
        let result = client.get(&mock_server.uri()).await;

        assert_eq!(result, Err(FetchError::ServerError(503)));
    }

    // Test 7: HTTP 401/403 returns Unauthorized
    #[tokio::test]
    async fn test_401_unauthorized() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&mock_server)
            .await;

        let client = test_client(2, 0);
        let result = client.get(&mock_server.uri()).await;

        assert_eq!(result, Err(FetchError::Unauthorized));
    }

    // Test 8: Domain rate limiting enforces minimum interval
    #[tokio::test]
    async fn test_domain_rate_limiting() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let client = test_client(2, 100);
        let start = Instant::now();
        client.get(&mock_server.uri()).await.unwrap();
        client.get(&mock_server.uri()).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    // Test 9: Domain extraction from URL
    #[test]
    fn test_extract_domain() {
        assert_eq!(extract_domain("https://api.github.com/repos/a/b"), "api.github.com");
        assert_eq!(extract_domain("http://127.0.0.1:8080/x.yml"), "127.0.0.1:8080");
        assert_eq!(extract_domain("not-a-url"), "not-a-url");
    }

    // Test 10: Available permits reflects concurrent limit
    #[test]
    fn test_available_permits() {
        let client = test_client(3, 0);
        assert_eq!(client.available_permits(), 3);
        assert_eq!(client.config().max_concurrent, 3);
    }

    // Test 11: Connection failure maps to a retryable transport error
    #[tokio::test]
    async fn test_connection_refused() {
        let client = test_client(1, 0);
        // Port 9 (discard) is not expected to be listening locally
        let result = client.get("http://127.0.0.1:9/x.yml").await;

        assert!(matches!(
            result,
            Err(FetchError::ConnectionRefused) | Err(FetchError::Network(_))
        ));
    }
}
