//! Application error types.
//!
//! Every failure a gateway operation can report maps to one variant here, and
//! every variant carries a stable code that clients can branch on.

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mongodb::error::ErrorKind;
use thiserror::Error;

use crate::middleware::request_id::current_request_id;
use crate::response::ApiResponse;

/// Result alias used across all services.
pub type AppResult<T> = Result<T, AppError>;

/// MongoDB server error code for an already existing namespace.
pub const NAMESPACE_EXISTS_CODE: i32 = 48;

/// Unified application error.
#[derive(Debug, Error)]
pub enum AppError {
    /// The operation needs a connection and the session has none.
    #[error("no connection is open for this session")]
    NotConnected,

    /// The operation needs a selected database.
    #[error("no database is selected")]
    NoDatabaseSelected,

    /// The operation needs a selected collection.
    #[error("no collection is selected")]
    NoCollectionSelected,

    /// Document lookup miss.
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// The cluster is unreachable or rejected the credentials.
    #[error("connection error: {0}")]
    Connection(String),

    /// Any other failure surfaced by the document engine.
    #[error("engine error: {0}")]
    Engine(String),

    /// An engine call did not finish within the configured bound.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The handle was closed while the operation was in flight.
    #[error("connection was closed")]
    ConnectionClosed,

    /// Invalid caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// The request carried no caller identity.
    #[error("missing or empty X-User-Id header")]
    MissingUserId,
}

impl AppError {
    /// Machine-checkable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotConnected => "NOT_CONNECTED",
            AppError::NoDatabaseSelected => "NO_DATABASE_SELECTED",
            AppError::NoCollectionSelected => "NO_COLLECTION_SELECTED",
            AppError::DocumentNotFound(_) => "NOT_FOUND",
            AppError::Connection(_) => "CONNECTION_ERROR",
            AppError::Engine(_) => "ENGINE_ERROR",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::ConnectionClosed => "CONNECTION_CLOSED",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::MissingUserId => "MISSING_USER_ID",
        }
    }

    /// HTTP status used when rendering this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotConnected
            | AppError::NoDatabaseSelected
            | AppError::NoCollectionSelected
            | AppError::ConnectionClosed => StatusCode::CONFLICT,
            AppError::DocumentNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Connection(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Validation(_) | AppError::MissingUserId => StatusCode::BAD_REQUEST,
            AppError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "request rejected");
        }
        let mut body = ApiResponse::err(self.code(), self.to_string());
        if let Some(request_id) = current_request_id() {
            body = body.with_request_id(request_id);
        }
        (status, Json(body)).into_response()
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(e: mongodb::error::Error) -> Self {
        match e.kind.as_ref() {
            ErrorKind::ServerSelection { .. }
            | ErrorKind::Io(_)
            | ErrorKind::DnsResolve { .. }
            | ErrorKind::Authentication { .. } => AppError::Connection(e.to_string()),
            ErrorKind::Shutdown => AppError::ConnectionClosed,
            ErrorKind::InvalidArgument { .. } => AppError::Validation(e.to_string()),
            _ => AppError::Engine(e.to_string()),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}

/// Returns the server error code carried by a command failure, if any.
pub fn server_error_code(e: &mongodb::error::Error) -> Option<i32> {
    match e.kind.as_ref() {
        ErrorKind::Command(cmd) => Some(cmd.code),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_errors_are_conflicts() {
        for err in [
            AppError::NotConnected,
            AppError::NoDatabaseSelected,
            AppError::NoCollectionSelected,
            AppError::ConnectionClosed,
        ] {
            assert_eq!(err.status(), StatusCode::CONFLICT);
        }
        assert_eq!(
            AppError::Engine("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(AppError::NotConnected.code(), "NOT_CONNECTED");
        assert_eq!(AppError::DocumentNotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(AppError::Timeout("list".into()).status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(AppError::Connection("refused".into()).status(), StatusCode::BAD_GATEWAY);
    }
}
