//! Rate-limited HTTP page fetcher
//!
//! Shared by the worker processors and the discovery crawler. Features:
//! - User-Agent rotation
//! - Rate limiting with governor
//! - Retry of transient failures with jittered backoff
//! - Optional base URL override for testing with mock servers

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use rand::seq::SliceRandom;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, LOCATION, USER_AGENT},
    redirect::Policy,
    Client, StatusCode,
};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

use crate::utils::retry::{with_retry_if, RetryConfig};

/// Pool of realistic User-Agent strings for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

/// Errors that can occur during page fetching
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP client could not be built
    #[error("HTTP client initialization failed: {0}")]
    Init(String),

    /// Transport failure
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Non-success status code
    #[error("Server responded with status {0}")]
    Status(u16),

    /// A redirect was expected but the response carried no usable location
    #[error("Missing redirect location")]
    MissingLocation,
}

impl FetchError {
    /// Whether another attempt may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout => true,
            Self::Status(code) => matches!(code, 429 | 500 | 502 | 503 | 504),
            Self::Init(_) | Self::MissingLocation => false,
        }
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(e.to_string())
        }
    }
}

/// Page fetcher sharing one rate limiter across tasks
pub struct PageFetcher {
    /// HTTP client with configured timeout and compression
    client: Client,

    /// Client that reports redirects instead of following them
    no_redirect: Client,

    /// Rate limiter to control request frequency
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,

    /// Retry policy for transient failures
    retry: RetryConfig,

    /// Optional base URL override for testing with mock servers
    base_url: Option<String>,
}

impl PageFetcher {
    /// Create a fetcher allowing `requests_per_second` requests
    pub fn new(requests_per_second: u32, timeout: Duration) -> Result<Self, FetchError> {
        Self::with_retry(requests_per_second, timeout, RetryConfig::default())
    }

    /// Create a fetcher with a custom retry policy
    pub fn with_retry(
        requests_per_second: u32,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| FetchError::Init(e.to_string()))?;

        let no_redirect = Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|e| FetchError::Init(e.to_string()))?;

        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            no_redirect,
            rate_limiter,
            retry,
            base_url: None,
        })
    }

    /// Rewrite every absolute URL onto `base_url`
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Resolve a URL against the base override, if any
    pub fn resolve(&self, url: &str) -> String {
        match &self.base_url {
            Some(base) => match url::Url::parse(url) {
                Ok(parsed) => {
                    let mut path = parsed.path().to_string();
                    if let Some(query) = parsed.query() {
                        path.push('?');
                        path.push_str(query);
                    }
                    crate::utils::join_url(base, &path)
                }
                Err(_) => crate::utils::join_url(base, url),
            },
            None => url.to_string(),
        }
    }

    /// Fetch a page body as text
    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let url = self.resolve(url);

        with_retry_if(
            &self.retry,
            || async {
                self.rate_limiter.until_ready().await;

                let response = self
                    .client
                    .get(&url)
                    .headers(Self::build_headers())
                    .send()
                    .await
                    .map_err(FetchError::from_reqwest)?;

                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError::Status(status.as_u16()));
                }
                response.text().await.map_err(FetchError::from_reqwest)
            },
            FetchError::is_transient,
        )
        .await
    }

    /// Request a URL without following redirects and return the `Location`
    pub async fn fetch_redirect(&self, url: &str) -> Result<String, FetchError> {
        let url = self.resolve(url);
        self.rate_limiter.until_ready().await;

        let response = self
            .no_redirect
            .get(&url)
            .headers(Self::build_headers())
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        if !response.status().is_redirection() && response.status() != StatusCode::OK {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(FetchError::MissingLocation)
    }

    fn build_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        let agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);

        headers.insert(USER_AGENT, HeaderValue::from_static(agent));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/json;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers
    }
}
