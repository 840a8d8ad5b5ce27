//! Error types for the trigger surface.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Errors that can occur while serving trigger requests.
#[derive(Debug, Error)]
pub enum WebError {
    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] chime_store::StoreError),

    /// Dispatch error.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] chime_dispatch::DispatchError),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        error!(error = %self, "trigger request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
