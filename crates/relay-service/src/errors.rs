//! Relay error types.
//!
//! Every registry and relay failure is reported only to the connection that
//! caused it. Internal details are logged server-side but not exposed to
//! clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Message shown to a non-member trying to join a locked meeting.
pub const LOCKED_MESSAGE: &str = "The host disabled New Entries, Meeting Inaccessible";

/// Relay error type.
///
/// Maps to numeric codes used in logs and the `relay_signaling_errors_total`
/// metric:
/// - `Validation`: `INVALID_REQUEST` (1)
/// - `Forbidden`: `FORBIDDEN` (3)
/// - `MeetingNotFound`, `ParticipantNotFound`, `NotInMeeting`: `NOT_FOUND` (4)
/// - `Conflict`: `CONFLICT` (5)
/// - `Internal`: `INTERNAL_ERROR` (6)
/// - `CapacityExceeded`, `Draining`: `CAPACITY_EXCEEDED` (7)
/// - `Locked`: `LOCKED` (8)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Payload passed shape checks but is semantically invalid.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Meeting does not exist (or was already torn down).
    #[error("Meeting not found: {0}")]
    MeetingNotFound(String),

    /// Target participant is not in the caller's meeting.
    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    /// Caller is not in any meeting.
    #[error("Connection is not in a meeting")]
    NotInMeeting,

    /// Caller lacks the host or co-host role the operation needs.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Meeting is locked and the caller is not already a participant.
    #[error("Meeting is locked: {0}")]
    Locked(String),

    /// Meeting already exists, or the caller is already elsewhere.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Meeting or server limit reached.
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Relay is shutting down and accepts no new sockets.
    #[error("Relay is draining")]
    Draining,

    /// Internal error (actor gone, channel closed).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Returns the numeric error code for logs and metrics.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            RelayError::Validation(_) => 1,
            RelayError::Forbidden(_) => 3,
            RelayError::MeetingNotFound(_)
            | RelayError::ParticipantNotFound(_)
            | RelayError::NotInMeeting => 4,
            RelayError::Conflict(_) => 5,
            RelayError::Internal(_) => 6,
            RelayError::CapacityExceeded(_) | RelayError::Draining => 7,
            RelayError::Locked(_) => 8,
        }
    }

    /// Short label for the error kind, used as a metric label.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Validation(_) => "validation",
            RelayError::MeetingNotFound(_) => "meeting_not_found",
            RelayError::ParticipantNotFound(_) => "participant_not_found",
            RelayError::NotInMeeting => "not_in_meeting",
            RelayError::Forbidden(_) => "forbidden",
            RelayError::Locked(_) => "locked",
            RelayError::Conflict(_) => "conflict",
            RelayError::CapacityExceeded(_) => "capacity_exceeded",
            RelayError::Draining => "draining",
            RelayError::Internal(_) => "internal",
        }
    }

    /// HTTP status for the meeting API.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::MeetingNotFound(_)
            | RelayError::ParticipantNotFound(_)
            | RelayError::NotInMeeting => StatusCode::NOT_FOUND,
            RelayError::Forbidden(_) => StatusCode::FORBIDDEN,
            RelayError::Locked(_) => StatusCode::LOCKED,
            RelayError::Conflict(_) => StatusCode::CONFLICT,
            RelayError::CapacityExceeded(_) | RelayError::Draining => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RelayError::Validation(msg) | RelayError::Forbidden(msg) | RelayError::Conflict(msg) => {
                msg.clone()
            }
            RelayError::MeetingNotFound(_) => "Meeting not found".to_string(),
            RelayError::ParticipantNotFound(_) => "Participant not found".to_string(),
            RelayError::NotInMeeting => "You are not in a meeting".to_string(),
            RelayError::Locked(_) => LOCKED_MESSAGE.to_string(),
            RelayError::CapacityExceeded(_) => "Meeting is at capacity".to_string(),
            RelayError::Draining => "Server is shutting down".to_string(),
            RelayError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        if let RelayError::Internal(detail) = &self {
            tracing::error!(target: "relay.api", error = %detail, "Request failed");
        }
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.kind(),
                message: self.client_message(),
            },
        };
        (self.status_code(), Json(body)).into_response()
    }
}
