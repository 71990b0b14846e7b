//! Error types for the HTTP API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use payment_core::PaymentError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Error raised anywhere in the payment pipeline
    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// No route for this path (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Failure outside the payment pipeline (500)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ApiError {
    /// Status code and stable error tag for this error
    pub fn status(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Payment(err) => {
                let status = match err {
                    PaymentError::InvalidRequest(_) | PaymentError::DecodeError(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    PaymentError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
                    PaymentError::Config(_) | PaymentError::Internal(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.kind())
            }
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status();
        let message = self.to_string();

        if status.is_server_error() {
            error!(status = status.as_u16(), error = error_type, %message, "request failed");
        }

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}
