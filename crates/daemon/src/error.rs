//! `ProtocolError`: "invalid client request — responded to
//! with a 4xx and a descriptive message; not logged as an event."

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crab_store::StoreError;

#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("{0}")]
    BadRequest(String),

    #[error("job not found")]
    NotFound,

    #[error("feed is disabled")]
    FeedDisabled,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Schedule(#[from] crab_core::ScheduleError),
}

impl IntoResponse for ProtocolError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ProtocolError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ProtocolError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ProtocolError::FeedDisabled => (StatusCode::NOT_FOUND, self.to_string()),
            ProtocolError::Schedule(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ProtocolError::Store(StoreError::NotFound) => {
                (StatusCode::NOT_FOUND, "not found".to_string())
            }
            // 5xx bodies never leak internal error text, only the kind name.
            ProtocolError::Store(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "store error".to_string())
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "internal error handling request");
        }
        (status, Json(json!({ "status": "error", "message": message }))).into_response()
    }
}
