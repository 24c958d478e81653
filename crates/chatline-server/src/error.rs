use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chatline_protocol::{ErrorResponse, RequestError};

/// Errors that stop the server from starting or running.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error returned before any stream bytes are written.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, body: ErrorResponse) -> Self {
        Self { status, body }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<RequestError> for ApiError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::InvalidJson(detail) => Self::new(
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("Invalid JSON in request body", "invalid_request")
                    .with_details(serde_json::json!({ "parse_error": detail })),
            ),
            RequestError::Validation(message) => Self::new(
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(message, "validation_error"),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
