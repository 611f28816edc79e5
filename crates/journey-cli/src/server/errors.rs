use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use journey_core::JourneyError;
use log::{error, warn};
use serde_json::json;

/// Error answered by the RPC endpoint as `{"success": false, "error": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<JourneyError> for ApiError {
    fn from(err: JourneyError) -> Self {
        let status = match &err {
            JourneyError::InvalidInput { .. }
            | JourneyError::Validation { .. }
            | JourneyError::Serialization { .. } => StatusCode::BAD_REQUEST,
            JourneyError::NotFound { .. } => StatusCode::NOT_FOUND,
            JourneyError::Conflict { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("Request failed: {err}");
        } else {
            warn!("Request rejected: {err}");
        }

        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        warn!("Malformed request body: {rejection}");
        Self {
            status: StatusCode::BAD_REQUEST,
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "success": false, "error": self.message }));
        (self.status, body).into_response()
    }
}
