use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, sleep};

use crate::config::settings::ErpConfig;
use crate::error::UpstreamError;
use crate::utils::http_client::new_erp_client;

const USER_AGENT: &str = "ERP-Gateway/1.0";

// Backoff between read retries
const BASE_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 2_000;
const JITTER_MS: u64 = 50;

// Upstream error bodies are truncated to this many characters
const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpstreamMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl UpstreamMethod {
    /// Only reads are safe to repeat.
    pub fn is_read(self) -> bool {
        matches!(self, UpstreamMethod::Get)
    }

    fn as_reqwest(self) -> reqwest::Method {
        match self {
            UpstreamMethod::Get => reqwest::Method::GET,
            UpstreamMethod::Post => reqwest::Method::POST,
            UpstreamMethod::Put => reqwest::Method::PUT,
            UpstreamMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for UpstreamMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpstreamMethod::Get => "GET",
            UpstreamMethod::Post => "POST",
            UpstreamMethod::Put => "PUT",
            UpstreamMethod::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// One ERP call, relative to the versioned API root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamRequest {
    pub method: UpstreamMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl UpstreamRequest {
    fn new(method: UpstreamMethod, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(UpstreamMethod::Get, path, None)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(UpstreamMethod::Post, path, Some(body))
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(UpstreamMethod::Put, path, Some(body))
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(UpstreamMethod::Delete, path, None)
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }
}

impl fmt::Display for UpstreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// The ERP as seen by the dispatcher.
#[async_trait]
pub trait UpstreamGateway: Send + Sync {
    /// Performs `request`, giving up once `timeout` has elapsed.
    async fn call(&self, request: &UpstreamRequest, timeout: Duration) -> Result<Value, UpstreamError>;

    async fn health_check(&self) -> Result<Value, UpstreamError>;

    /// Deadline applied when the caller has no stricter one.
    fn default_timeout(&self) -> Duration;
}

/// reqwest-based client for the ERP REST API.
pub struct ErpHttpClient {
    client: Client,
    api_root: String,
    api_key: String,
    timeout: Duration,
    max_retries: u32,
}

impl ErpHttpClient {
    pub fn new(config: &ErpConfig) -> Result<Self, UpstreamError> {
        let client = new_erp_client(USER_AGENT)
            .map_err(|e| UpstreamError::Unreachable(format!("Failed to build HTTP client: {}", e)))?;
        let api_root = format!(
            "{}/{}",
            config.base_url.trim_end_matches('/'),
            config.api_version.trim_matches('/')
        );
        info!("ERP client initialized with base URL: {}", api_root);
        if config.api_key.is_empty() {
            warn!("ERP_API_KEY is empty; upstream calls will be unauthenticated");
        }

        Ok(Self {
            client,
            api_root,
            api_key: config.api_key.clone(),
            timeout: Duration::from_millis(config.timeout_ms.max(1)),
            max_retries: config.max_retries,
        })
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.api_root, path.trim_start_matches('/'))
    }

    async fn attempt(&self, request: &UpstreamRequest, remaining: Duration) -> Result<Value, UpstreamError> {
        let mut builder = self
            .client
            .request(request.method.as_reqwest(), self.url_for(&request.path))
            .timeout(remaining)
            .header("Accept", "application/json");
        if !self.api_key.is_empty() {
            builder = builder.header("X-API-Key", &self.api_key);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            let message: String = text.chars().take(MAX_ERROR_BODY).collect();
            return Err(UpstreamError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| UpstreamError::Rejected {
            status: status.as_u16(),
            message: format!("Invalid JSON in ERP response: {}", e),
        })
    }
}

fn map_transport_error(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout
    } else {
        UpstreamError::Unreachable(err.to_string())
    }
}

fn backoff_for(attempt: u32) -> Duration {
    let exp = BASE_BACKOFF_MS.saturating_mul(1u64 << attempt.min(10)).min(MAX_BACKOFF_MS);
    let jitter = rand::random_range(0..=JITTER_MS);
    Duration::from_millis(exp + jitter)
}

#[async_trait]
impl UpstreamGateway for ErpHttpClient {
    async fn call(&self, request: &UpstreamRequest, timeout: Duration) -> Result<Value, UpstreamError> {
        let deadline = Instant::now() + timeout;
        let mut attempt: u32 = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(UpstreamError::Timeout);
            }

            debug!("ERP request {} (attempt {})", request, attempt + 1);
            let err = match self.attempt(request, remaining).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let may_retry = request.method.is_read() && err.is_retryable() && attempt < self.max_retries;
            let delay = backoff_for(attempt);
            if !may_retry || Instant::now() + delay >= deadline {
                error!("ERP request {} failed: {}", request, err);
                return Err(err);
            }

            warn!("ERP request {} failed ({}), retrying in {}ms", request, err, delay.as_millis());
            sleep(delay).await;
            attempt += 1;
        }
    }

    async fn health_check(&self) -> Result<Value, UpstreamError> {
        self.call(&UpstreamRequest::get("health"), self.timeout).await
    }

    fn default_timeout(&self) -> Duration {
        self.timeout
    }
}
