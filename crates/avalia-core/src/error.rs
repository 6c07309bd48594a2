//! Error Types

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Entitlement and registry errors
#[derive(Error, Debug)]
pub enum CoreError {
    /// No payment intent with this transaction id
    #[error("Payment intent not found: {0}")]
    IntentNotFound(String),

    /// No entitlement record for this user
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// A write would break a store invariant
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Optimistic concurrency lost twice in a row
    #[error("Concurrent update on {0}, retry later")]
    Contention(String),

    /// Backing store failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CoreError {
    /// Check if the operation can be retried as-is
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention(_) | Self::Storage(_))
    }
}
