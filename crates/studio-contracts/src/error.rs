use serde_json::{Map, Value};
use thiserror::Error;

/// Failure categories shared by the engine, the HTTP endpoints and the flow
/// runner. Each variant maps onto one HTTP status.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StudioError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Missing {0} on server")]
    MissingCredential(String),

    #[error("{message}")]
    Upstream {
        message: String,
        status: u16,
        details: Option<Value>,
    },

    #[error("{message}")]
    JobFailed {
        message: String,
        details: Option<Value>,
    },

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Internal(String),
}

pub type StudioResult<T> = std::result::Result<T, StudioError>;

impl StudioError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn missing_credential(env_key: impl Into<String>) -> Self {
        Self::MissingCredential(env_key.into())
    }

    /// Upstream failure reported as 502.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            status: 502,
            details: None,
        }
    }

    pub fn upstream_with(message: impl Into<String>, status: u16, details: Option<Value>) -> Self {
        Self::Upstream {
            message: message.into(),
            status,
            details,
        }
    }

    pub fn job_failed(message: impl Into<String>, details: Option<Value>) -> Self {
        Self::JobFailed {
            message: message.into(),
            details,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::MissingCredential(_) => 500,
            Self::Upstream { status, .. } => {
                if (400..=599).contains(status) {
                    *status
                } else {
                    502
                }
            }
            Self::JobFailed { .. } => 502,
            Self::Timeout(_) => 504,
            Self::Internal(_) => 500,
        }
    }

    pub fn details(&self) -> Option<&Value> {
        match self {
            Self::Upstream { details, .. } | Self::JobFailed { details, .. } => details.as_ref(),
            _ => None,
        }
    }

    /// `{ "error": message, "details"?: ... }` as returned by every endpoint.
    pub fn to_payload(&self) -> Value {
        let mut payload = Map::new();
        payload.insert("error".to_string(), Value::String(self.to_string()));
        if let Some(details) = self.details() {
            payload.insert("details".to_string(), details.clone());
        }
        Value::Object(payload)
    }
}

impl From<serde_json::Error> for StudioError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("Invalid JSON: {err}"))
    }
}
