use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::messages::anthropic::ErrorEnvelope;

pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors surfaced to the client. Each variant carries its own HTTP status
/// and wire `type` string.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Malformed client body or adapter-rejected request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No configured provider's model prefix matches the request.
    #[error("no provider configured for model '{0}'")]
    NoProvider(String),

    /// Upstream rejected credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Upstream 403.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Upstream 404, including unknown model.
    #[error("not found: {0}")]
    NotFound(String),

    /// Upstream 429 or deadline exceeded.
    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Upstream 503.
    #[error("upstream overloaded: {0}")]
    Overloaded(String),

    /// Unspecified upstream or internal failure.
    #[error("{0}")]
    ApiError(String),

    /// Transport-level failure talking to upstream.
    #[error("connection error: {0}")]
    ConnectionError(String),
}

impl LlmError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NoProvider(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Overloaded(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ConnectionError(_) => StatusCode::BAD_GATEWAY,
            Self::ApiError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The wire `type` string placed in the canonical error envelope.
    /// `no_provider` maps to `not_found_error` at the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::AuthenticationFailed(_) => "authentication_error",
            Self::PermissionDenied(_) => "permission_error",
            Self::NoProvider(_) | Self::NotFound(_) => "not_found_error",
            Self::RateLimitExceeded(_) => "rate_limit_error",
            Self::Overloaded(_) => "overloaded_error",
            Self::ConnectionError(_) | Self::ApiError(_) => "api_error",
        }
    }

    /// Map an upstream HTTP status code to the corresponding error variant.
    /// Shared by every adapter's non-streaming and streaming error paths.
    pub fn from_upstream_status(status: u16, message: String) -> Self {
        match status {
            400 => Self::InvalidRequest(message),
            401 => Self::AuthenticationFailed(message),
            403 => Self::PermissionDenied(message),
            404 => Self::NotFound(message),
            429 => Self::RateLimitExceeded(message),
            503 => Self::Overloaded(message),
            _ => Self::ApiError(message),
        }
    }

    pub fn into_envelope(self) -> ErrorEnvelope {
        ErrorEnvelope::new(self.kind(), self.to_string())
    }
}

impl IntoResponse for LlmError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let envelope = self.into_envelope();
        (status, Json(envelope)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_provider_maps_to_not_found_at_the_wire() {
        let err = LlmError::NoProvider("gpt-9".to_string());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.kind(), "not_found_error");
    }

    #[test]
    fn upstream_status_table() {
        assert!(matches!(LlmError::from_upstream_status(401, String::new()), LlmError::AuthenticationFailed(_)));
        assert!(matches!(LlmError::from_upstream_status(429, String::new()), LlmError::RateLimitExceeded(_)));
        assert!(matches!(LlmError::from_upstream_status(503, String::new()), LlmError::Overloaded(_)));
        assert!(matches!(LlmError::from_upstream_status(418, String::new()), LlmError::ApiError(_)));
    }

    #[test]
    fn envelope_carries_kind_and_message() {
        let envelope = LlmError::PermissionDenied("no access".to_string()).into_envelope();
        assert_eq!(envelope.error.kind, "permission_error");
        assert_eq!(envelope.error.message, "permission denied: no access");
    }
}
