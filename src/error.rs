//! Error kinds surfaced by the admin operations and their HTTP mapping.
//!
//! Per-peer WebSocket send/receive failures are not represented here — they
//! are recovered locally by detaching the failing peer and never reach the
//! HTTP layer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::ssh::SshError;

/// Failure modes of the admin operations (create, snapshot, delete, resize).
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or missing request fields.
    #[error("{0}")]
    InvalidRequest(String),

    /// Registry is full; admission refused.
    #[error("connection limit reached (MAX_CONNECTIONS={0})")]
    CapacityExceeded(usize),

    /// No session with the given id.
    #[error("connection {0} not found")]
    NotFound(String),

    /// Session exists but is not in the Ready state.
    #[error("connection {0} is not ready")]
    NotReady(String),

    /// SSH transport could not be established (DNS, TCP, handshake, auth,
    /// or ready timeout).
    #[error("SSH connect failed: {0}")]
    Connect(String),

    /// PTY shell allocation failed on an established transport.
    #[error("shell open failed: {0}")]
    Shell(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::CapacityExceeded(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound(_) | Self::NotReady(_) => StatusCode::NOT_FOUND,
            Self::Connect(_) | Self::Shell(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::CapacityExceeded(_) => "capacity_exceeded",
            Self::NotFound(_) => "not_found",
            Self::NotReady(_) => "not_ready",
            Self::Connect(_) => "connect_failed",
            Self::Shell(_) => "shell_failed",
            Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.kind(),
            "detail": self.to_string(),
        }));
        (self.status(), body).into_response()
    }
}

impl From<SshError> for ApiError {
    fn from(err: SshError) -> Self {
        match err {
            SshError::Shell(msg) => ApiError::Shell(msg),
            other => ApiError::Connect(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_propagation_policy() {
        assert_eq!(
            ApiError::InvalidRequest("host is required".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::CapacityExceeded(100).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::NotReady("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Connect("refused".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Shell("pty denied".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn capacity_detail_names_the_limit() {
        let err = ApiError::CapacityExceeded(2);
        assert!(err.to_string().contains("MAX_CONNECTIONS"));
    }

    #[test]
    fn ssh_errors_map_to_connect_or_shell() {
        let conn: ApiError = SshError::Auth {
            user: "root".into(),
        }
        .into();
        assert!(matches!(conn, ApiError::Connect(_)));

        let shell: ApiError = SshError::Shell("no pty".into()).into();
        assert!(matches!(shell, ApiError::Shell(_)));
    }
}
