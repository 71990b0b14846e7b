//! Error types for payment authorisation

use thiserror::Error;

/// Main error type for payment operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PaymentError {
    /// Domain values are malformed (negative or non-finite amount)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Transport body could not be parsed or converted to the expected type
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// The call context was cancelled or its deadline passed before evaluation
    #[error("Request cancelled: {0}")]
    Cancelled(String),

    /// Service construction was given an unusable configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected failure in the decision path
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PaymentError {
    /// Stable snake_case tag, used in log fields and error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            PaymentError::InvalidRequest(_) => "invalid_request",
            PaymentError::DecodeError(_) => "decode_error",
            PaymentError::Cancelled(_) => "cancelled",
            PaymentError::Config(_) => "config_error",
            PaymentError::Internal(_) => "internal_error",
        }
    }

    /// Whether the caller is at fault
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PaymentError::InvalidRequest(_) | PaymentError::DecodeError(_)
        )
    }
}

/// Result type alias for payment operations
pub type Result<T> = std::result::Result<T, PaymentError>;
