//! Session Controller error types.
//!
//! Every error maps to a stable machine-readable code and an HTTP status via the
//! `IntoResponse` impl. Messages returned to clients never include internal
//! details such as storage paths; the full error is logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Session Controller error type.
///
/// Maps to HTTP status codes:
/// - `InvalidToken`, `InvalidRequest`: 400 Bad Request
/// - `PermissionDenied`: 403 Forbidden
/// - `ArtifactNotFound`, `SessionNotFound`, `NotInGroup`: 404 Not Found
/// - `SessionAlreadyRunning`, `SessionNotRunning`, `HandleClosed`,
///   `ConcurrentTeardownConflict`: 409 Conflict
/// - `DuplicateToken`, `NoPortAvailable`, `StartupTimeout`, `WorkerExited`,
///   `ShuttingDown`: 503 Service Unavailable
/// - `ProvisioningFailed`, `Platform`: 502 Bad Gateway
/// - Everything else: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum ScError {
    /// No free token could be generated within the attempt budget.
    #[error("Could not generate a free session token")]
    DuplicateToken,

    /// Port range exhausted after the bounded number of probes.
    #[error("No port available in the configured range")]
    NoPortAvailable,

    /// Worker did not accept connections before the startup deadline.
    #[error("Worker startup timed out")]
    StartupTimeout,

    /// No data artifact stored for this token.
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    /// Token already has a live session.
    #[error("Session already running: {0}")]
    SessionAlreadyRunning(String),

    /// Token has no live session.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Worker handle is closed (worker already exited).
    #[error("Worker handle closed: {0}")]
    HandleClosed(String),

    /// Channel/role creation failed; partial resources were rolled back.
    #[error("Provisioning failed: {0}")]
    ProvisioningFailed(String),

    /// An in-flight operation lost the race against a teardown of the same identifier.
    #[error("Concurrent teardown: {0}")]
    ConcurrentTeardownConflict(String),

    /// User-supplied token is malformed.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Malformed request input other than a token (empty artifact, bad header).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Session exists but is still starting.
    #[error("Session not running yet: {0}")]
    SessionNotRunning(String),

    /// The chosen port was taken between probe and bind. Retryable.
    #[error("Port in use: {0}")]
    PortInUse(u16),

    /// Worker exited before it became ready.
    #[error("Worker exited during startup: {0}")]
    WorkerExited(String),

    /// Artifact storage I/O failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Chat-platform collaborator failure.
    #[error("Platform error: {0}")]
    Platform(String),

    /// Command issued from outside a live channel group, or by a non-member.
    #[error("Not in a channel group")]
    NotInGroup,

    /// Actor is not allowed to trigger this transition.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The controller is shutting down.
    #[error("Session controller is shutting down")]
    ShuttingDown,

    /// Internal error (actor mailbox failures, task join failures).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScError {
    /// Returns the stable machine-readable code for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            ScError::DuplicateToken => "DUPLICATE_TOKEN",
            ScError::NoPortAvailable => "NO_PORT_AVAILABLE",
            ScError::StartupTimeout => "STARTUP_TIMEOUT",
            ScError::ArtifactNotFound(_) => "ARTIFACT_NOT_FOUND",
            ScError::SessionAlreadyRunning(_) => "SESSION_ALREADY_RUNNING",
            ScError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            ScError::HandleClosed(_) => "HANDLE_CLOSED",
            ScError::ProvisioningFailed(_) => "PROVISIONING_FAILED",
            ScError::ConcurrentTeardownConflict(_) => "CONCURRENT_TEARDOWN",
            ScError::InvalidToken(_) => "INVALID_TOKEN",
            ScError::InvalidRequest(_) => "INVALID_REQUEST",
            ScError::SessionNotRunning(_) => "SESSION_NOT_RUNNING",
            ScError::PortInUse(_) => "PORT_IN_USE",
            ScError::WorkerExited(_) => "WORKER_EXITED",
            ScError::Storage(_) => "STORAGE_ERROR",
            ScError::Platform(_) => "PLATFORM_ERROR",
            ScError::NotInGroup => "NOT_IN_GROUP",
            ScError::PermissionDenied(_) => "PERMISSION_DENIED",
            ScError::Config(_) => "CONFIG_ERROR",
            ScError::ShuttingDown => "SHUTTING_DOWN",
            ScError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            ScError::InvalidToken(_) | ScError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ScError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ScError::ArtifactNotFound(_) | ScError::SessionNotFound(_) | ScError::NotInGroup => {
                StatusCode::NOT_FOUND
            }
            ScError::SessionAlreadyRunning(_)
            | ScError::SessionNotRunning(_)
            | ScError::HandleClosed(_)
            | ScError::ConcurrentTeardownConflict(_) => StatusCode::CONFLICT,
            ScError::DuplicateToken
            | ScError::NoPortAvailable
            | ScError::StartupTimeout
            | ScError::WorkerExited(_)
            | ScError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            ScError::ProvisioningFailed(_) | ScError::Platform(_) => StatusCode::BAD_GATEWAY,
            ScError::PortInUse(_)
            | ScError::Storage(_)
            | ScError::Config(_)
            | ScError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            ScError::Storage(_) | ScError::Config(_) | ScError::Internal(_) | ScError::PortInUse(_) => {
                "An internal error occurred".to_string()
            }
            ScError::Platform(_) => "The chat platform rejected the request".to_string(),
            ScError::ProvisioningFailed(_) => {
                "Could not create the channel group, please try again".to_string()
            }
            ScError::WorkerExited(_) => "The game server exited during startup".to_string(),
            ScError::ArtifactNotFound(token) => format!("No stored game for {token}"),
            ScError::SessionAlreadyRunning(token) => format!("Game {token} is already running"),
            ScError::SessionNotFound(token) => format!("No running game with token {token}"),
            ScError::SessionNotRunning(token) => format!("Game {token} is still starting"),
            ScError::HandleClosed(token) => format!("Game {token} is no longer running"),
            ScError::ConcurrentTeardownConflict(_) => {
                "The resource was removed while the request was in progress".to_string()
            }
            ScError::InvalidToken(_) => "Tokens are exactly four letters".to_string(),
            ScError::PermissionDenied(msg) | ScError::InvalidRequest(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for ScError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(target: "sc.api", error = %self, code = self.error_code(), "Request failed");
        } else {
            tracing::debug!(target: "sc.api", error = %self, code = self.error_code(), "Request rejected");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ScError::InvalidToken("AB1".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ScError::SessionNotFound("ABCD".to_string()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ScError::ArtifactNotFound("ABCD".to_string()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ScError::SessionAlreadyRunning("ABCD".to_string()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ScError::ConcurrentTeardownConflict("ABCD".to_string()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(ScError::NoPortAvailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ScError::StartupTimeout.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ScError::DuplicateToken.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            ScError::PermissionDenied("operators only".to_string()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ScError::Storage("disk full".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let storage = ScError::Storage("failed to write /srv/artifacts/ABCD.data".to_string());
        assert!(!storage.client_message().contains("/srv"));
        assert_eq!(storage.client_message(), "An internal error occurred");

        let internal = ScError::Internal("channel send failed: closed".to_string());
        assert_eq!(internal.client_message(), "An internal error occurred");
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            ScError::SessionNotFound("WXYZ".to_string()).to_string(),
            "Session not found: WXYZ"
        );
        assert_eq!(ScError::PortInUse(5001).to_string(), "Port in use: 5001");
        assert_eq!(ScError::NotInGroup.to_string(), "Not in a channel group");
    }

    #[tokio::test]
    async fn test_into_response_body() {
        let response = ScError::SessionAlreadyRunning("QWER".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "SESSION_ALREADY_RUNNING");
        assert_eq!(body["error"]["message"], "Game QWER is already running");
    }
}
