//! Payment Error Types

use avalia_core::CoreError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment-related errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Provider timeout, connection failure, 5xx or 429; safe to retry
    #[error("Payment provider unavailable: {0}")]
    Transient(String),

    /// Provider refused the request (validation failure, unknown payment)
    #[error("Payment provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Provider refused our credentials; blocks every payment until fixed
    #[error("Payment provider authentication failed: {0}")]
    Auth(String),

    /// Provider answered with something we cannot use
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// Caller sent an unusable request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Idempotency key already used by a different user
    #[error("Idempotency key {0} belongs to another user")]
    IdempotencyConflict(String),

    /// Webhook signature verification failed
    #[error("Webhook signature invalid: {0}")]
    WebhookSignature(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Entitlement store or intent registry failure
    #[error(transparent)]
    Store(#[from] CoreError),
}

impl PaymentError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Store(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Provider said the payment does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Rejected { status: 404, .. })
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> &str {
        match self {
            Self::Transient(_) => "Payment service temporarily unavailable. Please try again.",
            Self::Rejected { .. } | Self::InvalidRequest(_) => {
                "The payment could not be created. Please check your details."
            }
            Self::Auth(_) | Self::Config(_) => "Payments are unavailable right now.",
            Self::IdempotencyConflict(_) => "This payment request was already used.",
            _ => "An error occurred processing your payment.",
        }
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Transient(err.to_string())
        }
    }
}
