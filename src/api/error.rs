use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::error::FeedError;

impl FeedError {
    /// HTTP status reported to API clients
    pub fn status_code(&self) -> StatusCode {
        match self {
            FeedError::NoData(_) | FeedError::NotFound(_) => StatusCode::NOT_FOUND,
            FeedError::InvalidParameter(_) | FeedError::Range(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for FeedError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("API request failed: {} ({})", self, self.error_code());
        }

        let body = json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
