use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::GatewayError;

/// Arguments keyed by name. Ordered so that derived cache keys are stable.
pub type Arguments = BTreeMap<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    Resource,
    Tool,
    Prompt,
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationClass::Resource => "resource",
            OperationClass::Tool => "tool",
            OperationClass::Prompt => "prompt",
        };
        f.write_str(name)
    }
}

/// The credential as it arrived, before verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PresentedCredential {
    None,
    ApiKey(String),
    Bearer(String),
}

/// One inbound call. Built per request and dropped once the response is produced.
#[derive(Clone, Debug)]
pub struct InboundRequest {
    pub class: OperationClass,
    pub name: String,
    pub arguments: Arguments,
    pub credential: PresentedCredential,
}

impl InboundRequest {
    pub fn new(class: OperationClass, name: impl Into<String>, arguments: Arguments, credential: PresentedCredential) -> Self {
        Self {
            class,
            name: name.into(),
            arguments,
            credential,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheProvenance {
    Hit,
    Miss,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl From<&GatewayError> for ErrorDetail {
    fn from(error: &GatewayError) -> Self {
        let field = match error {
            GatewayError::Validation(v) => Some(v.field.clone()),
            _ => None,
        };
        let retry_after_secs = match error {
            GatewayError::RateLimited(r) => Some(r.retry_after.as_secs()),
            _ => None,
        };
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
            field,
            retry_after_secs,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheProvenance>,
}

impl ResponseEnvelope {
    pub fn ok(payload: Value, cache: CacheProvenance) -> Self {
        Self {
            status: ResponseStatus::Ok,
            payload: Some(payload),
            error: None,
            cache: Some(cache),
        }
    }

    pub fn failed(error: &GatewayError) -> Self {
        Self {
            status: ResponseStatus::Error,
            payload: None,
            error: Some(ErrorDetail::from(error)),
            cache: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}
