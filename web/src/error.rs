//! Problem responses for web handlers.
//!
//! This module bridges domain errors and HTTP responses. Every error leaves
//! the controller as an RFC 7807 problem document
//! (`application/problem+json`) via Axum's `IntoResponse`.

use crate::limiter::NoConnectionSlots;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use eventgate_core::repository::RepositoryError;
use serde::Serialize;
use std::fmt;

/// Media type of problem response bodies.
pub const PROBLEM_JSON: &str = "application/problem+json";

/// An error on its way out of the controller.
///
/// Wraps a status and a user-facing detail; an optional source is kept for
/// logging only and never exposed to the client.
#[derive(Debug)]
pub struct Problem {
    status: StatusCode,
    detail: String,
    source: Option<anyhow::Error>,
}

impl Problem {
    /// Create a problem with the given status and detail.
    #[must_use]
    pub const fn new(status: StatusCode, detail: String) -> Self {
        Self {
            status,
            detail,
            source: None,
        }
    }

    /// Attach a source error for logging.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Create a 400 Bad Request problem.
    #[must_use]
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail.into())
    }

    /// Create a 403 Forbidden problem.
    #[must_use]
    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, detail.into())
    }

    /// Create a 404 Not Found problem.
    #[must_use]
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail.into())
    }

    /// Create a 412 Precondition Failed problem.
    #[must_use]
    pub fn precondition_failed(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::PRECONDITION_FAILED, detail.into())
    }

    /// Create a 500 Internal Server Error problem.
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail.into())
    }

    /// Create a 503 Service Unavailable problem.
    #[must_use]
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, detail.into())
    }

    /// The HTTP status this problem maps to.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// The user-facing detail.
    #[must_use]
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.status, self.detail)
    }
}

impl std::error::Error for Problem {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// RFC 7807 body.
#[derive(Debug, Serialize)]
struct ProblemBody<'a> {
    title: &'a str,
    status: u16,
    detail: &'a str,
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    detail = %self.detail,
                    error = %source,
                    "request failed"
                );
            } else {
                tracing::error!(status = %self.status, detail = %self.detail, "request failed");
            }
        }

        let body = ProblemBody {
            title: self.status.canonical_reason().unwrap_or("Unknown"),
            status: self.status.as_u16(),
            detail: &self.detail,
        };
        let payload = serde_json::to_string(&body)
            .unwrap_or_else(|_| format!("{{\"status\":{}}}", self.status.as_u16()));

        (
            self.status,
            [(header::CONTENT_TYPE, PROBLEM_JSON)],
            payload,
        )
            .into_response()
    }
}

impl From<RepositoryError> for Problem {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::InvalidCursor(rejection) => {
                Self::precondition_failed(rejection.to_string())
            }
            RepositoryError::ServiceUnavailable { ref reason } => {
                let detail = reason.clone();
                Self::unavailable(detail).with_source(error.into())
            }
            RepositoryError::TopicCreation { .. } | RepositoryError::TopicDeletion { .. } => {
                let detail = error.to_string();
                Self::unavailable(detail).with_source(error.into())
            }
            RepositoryError::EventPublishing => Self::internal(error.to_string()),
        }
    }
}

impl From<NoConnectionSlots> for Problem {
    fn from(error: NoConnectionSlots) -> Self {
        Self::unavailable(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_status_and_detail() {
        let problem = Problem::bad_request("incorrect syntax of X-nakadi-cursors header");
        assert_eq!(
            problem.to_string(),
            "[400 Bad Request] incorrect syntax of X-nakadi-cursors header"
        );
    }

    #[test]
    fn invalid_cursor_maps_to_precondition_failed() {
        use eventgate_core::cursor::TopicPosition;
        use eventgate_core::repository::{CursorRejection, RejectionReason};

        let error = RepositoryError::InvalidCursor(CursorRejection::new(
            RejectionReason::Unavailable,
            TopicPosition::new("T", "0", Some("999999")),
        ));
        let problem = Problem::from(error);
        assert_eq!(problem.status(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(problem.detail(), "cursor UNAVAILABLE");
    }

    #[test]
    fn service_outage_maps_to_unavailable() {
        let error = RepositoryError::ServiceUnavailable {
            reason: "zookeeper down".to_string(),
        };
        let problem = Problem::from(error);
        assert_eq!(problem.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
