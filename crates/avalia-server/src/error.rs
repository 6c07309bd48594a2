//! API Error Types

use avalia_core::CoreError;
use avalia_payments::PaymentError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Errors returned by the HTTP handlers
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Free credits exhausted")]
    UpgradeRequired,

    #[error("Payments are not configured")]
    PaymentsDisabled,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ApiError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Payment(e) => e.is_retryable(),
            Self::Core(e) => e.is_retryable(),
            _ => false,
        }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::UpgradeRequired => (StatusCode::PAYMENT_REQUIRED, "UPGRADE_REQUIRED"),
            Self::PaymentsDisabled => (StatusCode::SERVICE_UNAVAILABLE, "PAYMENTS_DISABLED"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            Self::Payment(e) => match e {
                PaymentError::Transient(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "PROVIDER_UNAVAILABLE")
                }
                PaymentError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
                PaymentError::Rejected { .. } => (StatusCode::BAD_GATEWAY, "PROVIDER_REJECTED"),
                PaymentError::InvalidResponse(_) => (StatusCode::BAD_GATEWAY, "PROVIDER_ERROR"),
                PaymentError::IdempotencyConflict(_) => {
                    (StatusCode::CONFLICT, "IDEMPOTENCY_CONFLICT")
                }
                PaymentError::WebhookSignature(_) => {
                    (StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE")
                }
                PaymentError::Auth(_) | PaymentError::Config(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "PAYMENTS_UNAVAILABLE")
                }
                PaymentError::Store(core) => Self::core_status(core),
            },
            Self::Core(e) => Self::core_status(e),
        }
    }

    const fn core_status(error: &CoreError) -> (StatusCode, &'static str) {
        match error {
            CoreError::Contention(_) | CoreError::Storage(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "TRY_AGAIN")
            }
            CoreError::IntentNotFound(_) | CoreError::UserNotFound(_) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            CoreError::InvalidTransition(_) => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Payment(e) => e.user_message().to_string(),
            Self::Core(e) if e.is_retryable() => "Please try again in a moment.".into(),
            Self::UpgradeRequired => {
                "Your free analyses are used up. Unlock PRO access to continue.".into()
            }
            Self::Config(_) | Self::Core(_) => "Internal server error".into(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            tracing::error!(%status, error = %self, "Request failed");
        } else {
            tracing::debug!(%status, error = %self, "Request refused");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.message(),
                code: code.into(),
            }),
        )
            .into_response()
    }
}
