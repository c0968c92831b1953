use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SERVER_ERROR_MESSAGE: &str = "Server error occurred";
pub const NO_RESPONSE_MESSAGE: &str = "No response from server. Please check your connection.";
pub const UNEXPECTED_ERROR_MESSAGE: &str = "An unexpected error occurred";
pub const MAX_RETRIES_MESSAGE: &str = "Maximum retries exceeded";

/// Normalized failure of a network call, as surfaced to callers and stored
/// in the per-operation error map.
///
/// `status` is the HTTP status when the server answered, `0` otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (status {status})")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    pub details: Value,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>, details: Value) -> Self {
        Self {
            status,
            message: message.into(),
            details,
        }
    }

    pub fn max_retries_exceeded() -> Self {
        Self::new(0, MAX_RETRIES_MESSAGE, Value::Null)
    }

    /// Transient failures: no response, rate limited, or server error.
    pub fn is_retriable(&self) -> bool {
        self.status == 0 || self.status == 429 || self.status >= 500
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Raw failure of a single network call, before normalization.
#[derive(Debug)]
pub enum CallError {
    /// The server answered with a non-2xx status.
    Status { status: u16, body: Value },
    /// The request went out but nothing came back.
    NoResponse { request: String },
    /// The call failed before or after the exchange.
    Exception { message: Option<String>, raw: String },
}

impl CallError {
    pub fn exception(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Exception {
            raw: message.clone(),
            message: Some(message),
        }
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            let request = err
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "<unknown request>".to_string());
            return CallError::NoResponse { request };
        }
        if let Some(status) = err.status() {
            return CallError::Status {
                status: status.as_u16(),
                body: Value::Null,
            };
        }
        let raw = format!("{:?}", err);
        CallError::Exception {
            message: Some(err.to_string()),
            raw,
        }
    }
}

impl From<serde_json::Error> for CallError {
    fn from(err: serde_json::Error) -> Self {
        CallError::exception(err.to_string())
    }
}

/// Convert any call failure into an [`ApiError`]. Never fails.
pub fn normalize(err: CallError) -> ApiError {
    match err {
        CallError::Status { status, body } => {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .unwrap_or(SERVER_ERROR_MESSAGE)
                .to_string();
            ApiError::new(status, message, body)
        }
        CallError::NoResponse { request } => {
            ApiError::new(0, NO_RESPONSE_MESSAGE, Value::String(request))
        }
        CallError::Exception { message, raw } => {
            let message = message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| UNEXPECTED_ERROR_MESSAGE.to_string());
            ApiError::new(0, message, Value::String(raw))
        }
    }
}

/// Local failures: storage, serialization, filesystem, rejected input.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, Error>;
