use futures::StreamExt;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors from a single fetch attempt. None of them are retried here.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// No response headers within the header timeout
    #[error("Timed out after {0:?} waiting for response headers")]
    HeaderTimeout(Duration),
    /// Body not fully received within the body timeout
    #[error("Timed out after {0:?} reading response body")]
    BodyTimeout(Duration),
    /// Any status other than 200 or 304
    #[error("Bad HTTP response: {0}")]
    HttpStatus(StatusCode),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Received fewer bytes than Content-Length
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Plain-value settings for [`Fetcher`].
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Connect plus wait for response headers
    pub header_timeout: Duration,
    /// Reading the full body, measured from the headers' arrival
    pub body_timeout: Duration,
    pub max_body_bytes: usize,
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            header_timeout: Duration::from_secs(10),
            body_timeout: Duration::from_secs(60),
            max_body_bytes: DEFAULT_MAX_FEED_SIZE,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// A feed body as served by its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFeed {
    pub url: String,
    pub body: Vec<u8>,
    /// `ETag` response header, if the origin sent one
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched(RawFeed),
    /// 304: the body the origin last sent is still current
    NotModified,
}

/// Conditional-GET client for feed URLs.
///
/// Cloning is cheap and shares the underlying connection pool.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    config: FetcherConfig,
}

impl Fetcher {
    /// Build a fetcher with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Request` if the TLS backend or resolver cannot
    /// be initialized.
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .redirect(create_redirect_policy())
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.header_timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Fetch `url`, sending `If-None-Match` when `etag` is given.
    ///
    /// # Returns
    ///
    /// `FetchOutcome::Fetched` for a 200 with the full body, and
    /// `FetchOutcome::NotModified` for a 304 (the body is never read).
    ///
    /// # Errors
    ///
    /// - `HeaderTimeout` / `Request` if no response arrives
    /// - `HttpStatus` for any other status
    /// - `BodyTimeout`, `ResponseTooLarge` or `IncompleteResponse` while reading the body
    pub async fn fetch(&self, url: &str, etag: Option<&str>) -> Result<FetchOutcome, FetchError> {
        let mut request = self.client.get(url);
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = tokio::time::timeout(self.config.header_timeout, request.send())
            .await
            .map_err(|_| FetchError::HeaderTimeout(self.config.header_timeout))??;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_MODIFIED => return Ok(FetchOutcome::NotModified),
            status => return Err(FetchError::HttpStatus(status)),
        }

        let response_etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let body = tokio::time::timeout(
            self.config.body_timeout,
            read_limited_bytes(response, self.config.max_body_bytes),
        )
        .await
        .map_err(|_| FetchError::BodyTimeout(self.config.body_timeout))??;

        Ok(FetchOutcome::Fetched(RawFeed {
            url: url.to_string(),
            body,
            etag: response_etag,
        }))
    }
}

/// Create a custom redirect policy with loop detection and limited hops.
///
/// - Limits redirects to 3 hops maximum
/// - Detects redirect loops (same URL appearing twice in chain)
fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        for prev in attempt.previous() {
            if prev.as_str() == url.as_str() {
                return attempt.error("Redirect loop detected");
            }
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
