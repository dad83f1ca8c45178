use std::time::Duration;

use axum::http::header::{CONTENT_TYPE, RETRY_AFTER, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::middleware::capture::ResponseSink;
use crate::middleware::metadata::MetadataError;

/// Generic message returned to clients for every 5xx failure.
///
/// Internal details (resolver errors, storage errors) only ever reach the log.
pub const INTERNAL_ERROR_MESSAGE: &str =
    "An internal error occurred. Please contact support if the issue persists.";

/// Message returned for any request body over the configured maximum.
pub const PAYLOAD_TOO_LARGE_MESSAGE: &str = "Request body too large";

/// Application-wide error types with appropriate HTTP status codes.
///
/// Terminal handlers return these. The chain never catches them; they are
/// converted to a response by [`IntoResponse`] at the service boundary.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<MetadataError> for AppError {
    fn from(err: MetadataError) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Standard error payload: `{"code": <int>, "message": <string>, "data": null}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl ErrorBody {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code: status.as_u16(),
            message: message.into(),
            data: None,
        }
    }

    /// Serialize to JSON bytes.
    ///
    /// Falls back to a hand-written payload if serialization ever fails, so
    /// callers always have something valid to send.
    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":{},"message":"internal error","data":null}}"#,
                self.code
            )
            .into_bytes()
        })
    }
}

impl AppError {
    /// HTTP status this error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::SerializationError(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Full details stay server-side; clients only see sanitized messages.
        // Client errors are already reported by the request logger.
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let message = match &self {
            AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg) => msg.clone(),
            AppError::SerializationError(e) => sanitize_serde_error(e),
            AppError::PayloadTooLarge(_) => PAYLOAD_TOO_LARGE_MESSAGE.to_string(),
            AppError::Internal(_) | AppError::ConfigError(_) => INTERNAL_ERROR_MESSAGE.to_string(),
        };

        (status, axum::Json(ErrorBody::new(status, message))).into_response()
    }
}

/// Terminal rejections produced by interceptors.
///
/// An interceptor that rejects a request writes the rejection to its sink and
/// does not call the rest of the chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Missing, malformed or unknown credential.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Window quota exceeded. The denied request was not counted.
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Declared request body exceeds the configured maximum.
    #[error("request body of {actual} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { limit: usize, actual: u64 },

    /// Unexpected interceptor failure. The detail is logged, never sent.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Rejection {
    /// HTTP status paired with this rejection.
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Rejection::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Rejection::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Rejection::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message that is safe to show to the caller.
    pub fn public_message(&self) -> String {
        match self {
            Rejection::Unauthenticated(reason) => reason.clone(),
            Rejection::RateLimited { .. } => {
                "Too many requests, please try again later".to_string()
            }
            Rejection::PayloadTooLarge { .. } => PAYLOAD_TOO_LARGE_MESSAGE.to_string(),
            Rejection::Internal(_) => INTERNAL_ERROR_MESSAGE.to_string(),
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody::new(self.status(), self.public_message())
    }

    /// Write this rejection as the terminal response of the request.
    pub fn write_to(&self, sink: &mut dyn ResponseSink) {
        if let Rejection::Internal(detail) = self {
            tracing::error!(error = %detail, "Interceptor failed");
        }

        let headers = sink.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        match self {
            Rejection::Unauthenticated(_) => {
                headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            Rejection::RateLimited { retry_after } => {
                headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs(*retry_after)));
            }
            Rejection::PayloadTooLarge { .. } | Rejection::Internal(_) => {}
        }

        sink.set_status(self.status());
        sink.write(&self.body().to_json());
    }
}

/// Whole seconds for a `Retry-After` header, never less than one.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs.max(1)
    }
}

/// Sanitize serde error messages to avoid leaking internal type information.
fn sanitize_serde_error(e: &serde_json::Error) -> String {
    let msg = e.to_string();

    if msg.contains("missing field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Missing required field: {field}");
    }

    if msg.contains("invalid type") {
        return "Invalid data type in request body".to_string();
    }

    if msg.contains("EOF while parsing") || msg.contains("expected") {
        return "Malformed JSON in request body".to_string();
    }

    "Invalid request format".to_string()
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
