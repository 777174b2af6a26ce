//! HTTP error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use switchyard_core::SessionError;
use switchyard_protocols::{ProxyError, WireResponse, WireStatus};
use thiserror::Error;
use tracing::warn;

/// Errors returned to WebDriver clients as `{sessionId, status, value}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{source}")]
    Session {
        session_id: Option<String>,
        #[source]
        source: SessionError,
    },

    #[error("{source}")]
    Proxy {
        session_id: String,
        #[source]
        source: ProxyError,
    },

    #[error("Unknown command: {method} {path}")]
    UnknownCommand { method: String, path: String },

    #[error("Invalid request body: {0}")]
    BadRequest(String),
}

impl ApiError {
    /// Attach the session id the error occurred in.
    pub fn session(session_id: impl Into<String>, source: SessionError) -> Self {
        Self::Session {
            session_id: Some(session_id.into()),
            source,
        }
    }

    pub fn wire_status(&self) -> WireStatus {
        match self {
            Self::Session { source, .. } => source.wire_status(),
            Self::Proxy { source, .. } => source.wire_status(),
            Self::UnknownCommand { .. } => WireStatus::UnknownCommand,
            Self::BadRequest(_) => WireStatus::UnknownError,
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match (self, self.wire_status()) {
            (Self::BadRequest(_), _) => StatusCode::BAD_REQUEST,
            (_, WireStatus::NoSuchDriver | WireStatus::UnknownCommand) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn session_id(&self) -> Option<String> {
        match self {
            Self::Session { session_id, .. } => session_id.clone(),
            Self::Proxy { session_id, .. } => Some(session_id.clone()),
            _ => None,
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(source: SessionError) -> Self {
        Self::Session {
            session_id: None,
            source,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }
        let body = WireResponse::error(self.session_id(), self.wire_status(), self.to_string());
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_such_session_is_404() {
        let err = ApiError::from(SessionError::NoSuchSession("abc".into()));
        assert_eq!(err.wire_status(), WireStatus::NoSuchDriver);
        assert_eq!(err.http_status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_unknown_command() {
        let err = ApiError::UnknownCommand {
            method: "GET".into(),
            path: "/nope".into(),
        };
        assert_eq!(err.wire_status().code(), 9);
        assert_eq!(err.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Unknown command: GET /nope");
    }

    #[test]
    fn test_session_error_carries_session_id() {
        let err = ApiError::session("s-1", SessionError::Protocol("bad".into()));
        assert_eq!(err.session_id().as_deref(), Some("s-1"));
        assert_eq!(err.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_bad_request() {
        let err = ApiError::BadRequest("expected object".into());
        assert_eq!(err.http_status(), StatusCode::BAD_REQUEST);
    }
}
