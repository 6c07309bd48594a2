//! Client Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors seen by the checkout client
#[derive(Error, Debug)]
pub enum ClientError {
    /// Network failure, timeout or 5xx/503 from the server
    #[error("Service unavailable: {0}")]
    Transient(String),

    /// Server refused the request
    #[error("Request failed ({status}, {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// Out of free credits and not entitled
    #[error("Upgrade required")]
    UpgradeRequired,

    /// Server answered with something we cannot read
    #[error("Unexpected response: {0}")]
    Decode(String),

    /// Checkout action not allowed in the current state
    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
}

impl ClientError {
    /// Check if this error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Transient(_) => {
                "Could not reach the server. Please try again.".to_string()
            }
            Self::Api { message, .. } => message.clone(),
            Self::UpgradeRequired => {
                "Your free analyses are used up. Unlock PRO access to continue.".to_string()
            }
            Self::Decode(_) | Self::InvalidTransition { .. } => {
                "Something went wrong. Please try again.".to_string()
            }
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transient(err.to_string())
        }
    }
}
