//! Crate-wide typed error enum.
//!
//! Library code returns `anyhow::Result` everywhere except at the axum
//! handler boundary, where a [`GuardianError`] carries the HTTP status a
//! failure should map to. Call sites that have a safe fallback (bad regex,
//! bad duration) recover locally and never construct one of these; this enum
//! exists for the errors that must reach an HTTP client as a typed status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GuardianError {
    #[error("missing or invalid token")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Configuration(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GuardianError {
    pub fn status(&self) -> StatusCode {
        match self {
            GuardianError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GuardianError::Forbidden(_) => StatusCode::FORBIDDEN,
            GuardianError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GuardianError::NotFound => StatusCode::NOT_FOUND,
            GuardianError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GuardianError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GuardianError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let GuardianError::Internal(err) = &self {
            tracing::error!(error = %err, "internal error");
        }
        let body = json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
