use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// Failures of the credential verification and authorization stage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing credential")]
    Missing,
    #[error("Invalid credential or token signature")]
    InvalidSignature,
    #[error("Token has expired")]
    Expired,
    #[error("Missing permission: {permission}")]
    Forbidden { permission: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Rate limit exceeded, retry after {}s", retry_after.as_secs())]
pub struct RateLimitError {
    pub retry_after: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid argument '{field}': {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Raised only when neither the primary store nor the fallback can serve.
/// Callers treat it as a miss and skip persisting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("Upstream call timed out")]
    Timeout,
    #[error("Upstream unreachable: {0}")]
    Unreachable(String),
    #[error("Upstream rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

impl UpstreamError {
    /// Timeouts and connectivity failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpstreamError::Timeout | UpstreamError::Unreachable(_))
    }
}

/// Every way a dispatched request can fail.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("Unknown {class} operation: {name}")]
    UnknownOperation { class: String, name: String },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Auth(AuthError::Missing) => "auth_missing",
            GatewayError::Auth(AuthError::InvalidSignature) => "auth_invalid_signature",
            GatewayError::Auth(AuthError::Expired) => "auth_expired",
            GatewayError::Auth(AuthError::Forbidden { .. }) => "auth_forbidden",
            GatewayError::RateLimited(_) => "rate_limited",
            GatewayError::Validation(_) => "validation_error",
            GatewayError::Upstream(UpstreamError::Timeout) => "upstream_timeout",
            GatewayError::Upstream(UpstreamError::Unreachable(_)) => "upstream_unreachable",
            GatewayError::Upstream(UpstreamError::Rejected { .. }) => "upstream_rejected",
            GatewayError::UnknownOperation { .. } => "unknown_operation",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::RateLimited(_) => true,
            GatewayError::Upstream(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Auth(AuthError::Forbidden { .. }) => StatusCode::FORBIDDEN,
            GatewayError::Auth(_) => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Upstream(UpstreamError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UnknownOperation { .. } => StatusCode::NOT_FOUND,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    Internal(String),
    Auth(String),
    BadRequest(String),
    Configuration(String),
    External(String),
    Serialization(String),
    Gateway(GatewayError),
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    code: u16,
    message: String,
    error_type: String,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
            AppError::Auth(e) => write!(f, "Authentication error: {}", e),
            AppError::BadRequest(e) => write!(f, "Bad request: {}", e),
            AppError::Configuration(e) => write!(f, "Configuration error: {}", e),
            AppError::External(e) => write!(f, "External service error: {}", e),
            AppError::Serialization(e) => write!(f, "Serialization error: {}", e),
            AppError::Gateway(e) => write!(f, "{}", e),
        }
    }
}

impl StdError for AppError {}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let error_type = match self {
            AppError::Internal(_) => "internal_error",
            AppError::Auth(_) => "authentication_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::Configuration(_) => "configuration_error",
            AppError::External(_) => "external_service_error",
            AppError::Serialization(_) => "serialization_error",
            AppError::Gateway(e) => e.kind(),
        };
        let status_code = self.status_code();

        let error_response = ErrorResponse {
            code: status_code.as_u16(),
            message: self.to_string(),
            error_type: error_type.to_string(),
        };

        let mut builder = HttpResponse::build(status_code);
        if let AppError::Gateway(GatewayError::RateLimited(e)) = self {
            builder.insert_header(("Retry-After", e.retry_after.as_secs().to_string()));
        }
        builder.json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::External(_) => StatusCode::BAD_GATEWAY,
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Gateway(e) => e.status_code(),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(error: GatewayError) -> Self {
        AppError::Gateway(error)
    }
}

impl From<AuthError> for AppError {
    fn from(error: AuthError) -> Self {
        AppError::Gateway(GatewayError::Auth(error))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Serialization(format!("JSON deserialization/serialization error: {}", error))
    }
}

// Define AppResult type alias for Result<T, AppError>
pub type AppResult<T> = Result<T, AppError>;
