//! Coordinator client for workers
//!
//! Speaks the lease protocol over HTTP. Transport failures and 5xx answers
//! are retried with jittered backoff; a 400 carries a stable error code and
//! is never retried.

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::models::{EntityKind, WorkType, WorkerId};
use crate::utils::join_url;
use crate::utils::retry::{with_retry_if, RetryConfig};

// ============================================================================
// Client Configuration
// ============================================================================

/// Configuration for the coordinator client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Coordinator server URL
    pub coordinator_url: String,

    /// Request timeout
    pub timeout: Duration,

    /// Retry policy for transient failures
    pub retry: RetryConfig,
}

impl ClientConfig {
    /// Create a new client config
    pub fn new(coordinator_url: impl Into<String>) -> Self {
        Self {
            coordinator_url: coordinator_url.into(),
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: u16,
}

#[derive(Debug, Deserialize)]
struct NewWorkerResponse {
    #[serde(rename = "workerID")]
    worker_id: WorkerId,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    inserted: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    version: String,
    uptime_secs: u64,
}

/// Health status from coordinator
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub version: String,
    pub uptime_secs: u64,
}

// ============================================================================
// Coordinator Client
// ============================================================================

/// Client for communicating with the coordinator server
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    config: ClientConfig,
    http_client: Client,
}

impl CoordinatorClient {
    /// Create a new coordinator client
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .gzip(true)
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Base URL of the coordinator
    pub fn base_url(&self) -> &str {
        &self.config.coordinator_url
    }

    /// Ask the coordinator for a fresh worker token
    pub async fn new_worker(&self) -> Result<WorkerId, ClientError> {
        let response: NewWorkerResponse = self.get_with_retry("/worker", &[]).await?;
        Ok(response.worker_id)
    }

    /// Lease up to `limit` units of a work type
    pub async fn assign(
        &self,
        work_type: WorkType,
        worker: &WorkerId,
        limit: u32,
    ) -> Result<Vec<String>, ClientError> {
        let key = work_type.entity_kind().plural();
        let mut body: Value = self
            .get_with_retry(
                key,
                &[("worker", worker.to_string()), ("limit", limit.to_string())],
            )
            .await?;

        let ids = body
            .get_mut(key)
            .map(Value::take)
            .ok_or_else(|| ClientError::InvalidResponse(format!("Missing '{key}' in response")))?;
        serde_json::from_value(ids).map_err(|e| ClientError::ParseError(e.to_string()))
    }

    /// Commit a completion batch
    pub async fn complete(
        &self,
        work_type: WorkType,
        worker: &WorkerId,
        batch: &Value,
    ) -> Result<(), ClientError> {
        let path = work_type.entity_kind().plural();
        self.post_with_retry(path, worker, batch).await.map(|_| ())
    }

    /// Give back leases on `ids`
    pub async fn abort(
        &self,
        work_type: WorkType,
        worker: &WorkerId,
        ids: &[String],
    ) -> Result<(), ClientError> {
        let path = format!("{}/abort", work_type.entity_kind().plural());
        self.post_with_retry(&path, worker, ids).await.map(|_| ())
    }

    /// Refresh leases on `ids`
    pub async fn ping(
        &self,
        work_type: WorkType,
        worker: &WorkerId,
        ids: &[String],
    ) -> Result<(), ClientError> {
        let path = format!("{}/ping", work_type.entity_kind().plural());
        self.post_with_retry(&path, worker, ids).await.map(|_| ())
    }

    /// Submit discovered IDs, returning the ones the coordinator did not know
    pub async fn submit(&self, kind: EntityKind, ids: &[String]) -> Result<Vec<String>, ClientError> {
        let url = join_url(&self.config.coordinator_url, &format!("{}/submit", kind.plural()));
        let body = serde_json::json!({ kind.plural(): ids });

        let value = with_retry_if(
            &self.config.retry,
            || async {
                let response = self
                    .http_client
                    .post(&url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(ClientError::from_reqwest)?;
                read_response(response).await
            },
            ClientError::is_transient,
        )
        .await?
        .ok_or_else(|| ClientError::InvalidResponse("Empty submit response".to_string()))?;

        let parsed: SubmitResponse =
            serde_json::from_value(value).map_err(|e| ClientError::ParseError(e.to_string()))?;
        Ok(parsed.inserted)
    }

    /// Check coordinator health
    pub async fn health_check(&self) -> Result<HealthStatus, ClientError> {
        let health: HealthResponse = self.get_with_retry("/health", &[]).await?;
        Ok(HealthStatus {
            healthy: health.status == "healthy",
            version: health.version,
            uptime_secs: health.uptime_secs,
        })
    }

    // Internal: GET request with retry
    async fn get_with_retry<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ClientError> {
        let url = join_url(&self.config.coordinator_url, path);

        let value = with_retry_if(
            &self.config.retry,
            || async {
                let response = self
                    .http_client
                    .get(&url)
                    .query(query)
                    .send()
                    .await
                    .map_err(ClientError::from_reqwest)?;
                read_response(response).await
            },
            ClientError::is_transient,
        )
        .await?
        .ok_or_else(|| ClientError::InvalidResponse(format!("Empty response from {path}")))?;

        serde_json::from_value(value).map_err(|e| ClientError::ParseError(e.to_string()))
    }

    // Internal: POST request with retry; `None` for a 204
    async fn post_with_retry<B: Serialize + ?Sized>(
        &self,
        path: &str,
        worker: &WorkerId,
        body: &B,
    ) -> Result<Option<Value>, ClientError> {
        let url = join_url(&self.config.coordinator_url, path);

        with_retry_if(
            &self.config.retry,
            || async {
                let response = self
                    .http_client
                    .post(&url)
                    .query(&[("worker", worker.as_str())])
                    .json(body)
                    .send()
                    .await
                    .map_err(ClientError::from_reqwest)?;
                read_response(response).await
            },
            ClientError::is_transient,
        )
        .await
    }
}

async fn read_response(response: reqwest::Response) -> Result<Option<Value>, ClientError> {
    let status = response.status();
    if status == StatusCode::NO_CONTENT {
        return Ok(None);
    }

    let text = response.text().await.map_err(ClientError::from_reqwest)?;

    if status.is_success() {
        return serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| ClientError::ParseError(e.to_string()));
    }

    if status == StatusCode::BAD_REQUEST {
        if let Ok(ErrorBody { code }) = serde_json::from_str(&text) {
            return Err(ClientError::Rejected { code });
        }
    }

    Err(ClientError::HttpError {
        status: status.as_u16(),
        message: text,
    })
}

// ============================================================================
// Client Errors
// ============================================================================

/// Client errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Initialization error
    #[error("Initialization error: {0}")]
    InitError(String),

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The coordinator rejected the request with an error code
    #[error("Rejected by coordinator with code {code}")]
    Rejected { code: u16 },

    /// HTTP error
    #[error("HTTP error ({status}): {message}")]
    HttpError { status: u16, message: String },

    /// Parse error
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Invalid response
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        Self::NetworkError(e.to_string())
    }

    /// Worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NetworkError(_) => true,
            Self::HttpError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// The coordinator says the lease is no longer ours
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Rejected { code: 3 | 4 })
    }

    /// Error code returned by the coordinator, if any
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Rejected { code } => Some(*code),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
