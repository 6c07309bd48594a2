//! Server Configuration

use std::time::Duration;

use avalia_payments::{MercadoPagoConfig, PixPricing, SignatureVerifier};

use crate::error::ApiError;

/// Which payment provider backs the PIX routes
#[derive(Clone, Debug)]
pub enum PaymentsMode {
    /// No provider configured; payment routes answer 503
    Disabled,

    /// In-memory provider that approves every charge after a delay
    Sandbox { auto_approve_after: Duration },

    MercadoPago(MercadoPagoConfig),
}

/// Everything the server reads from the environment
#[derive(Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub payments: PaymentsMode,
    pub pricing: PixPricing,
    pub notification_url: Option<String>,
    pub webhook_verifier: Option<SignatureVerifier>,

    /// Free analyses for a new user
    pub starting_credits: u32,

    /// Bound on one provider status check from the reconciler
    pub verify_timeout: Duration,

    /// A status read re-verifies a non-terminal intent older than this
    pub reconcile_stale_after: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            payments: PaymentsMode::Disabled,
            pricing: PixPricing::default(),
            notification_url: None,
            webhook_verifier: None,
            starting_credits: 2,
            verify_timeout: Duration::from_secs(10),
            reconcile_stale_after: Duration::from_secs(30),
        }
    }
}

/// Seconds from `name`; unset keeps `default`, malformed refuses to start
fn env_secs(name: &str, default: Duration) -> Result<Duration, ApiError> {
    parse_secs(name, std::env::var(name).ok().as_deref(), default)
}

fn parse_secs(name: &str, raw: Option<&str>, default: Duration) -> Result<Duration, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(raw) => raw
            .parse()
            .map(Duration::from_secs)
            .map_err(|e| ApiError::Config(format!("{name} '{raw}': {e}"))),
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

impl ServerConfig {
    /// Create from environment variables
    pub fn from_env() -> Result<Self, ApiError> {
        let defaults = Self::default();

        let payments = if env_flag("PIX_SANDBOX") {
            PaymentsMode::Sandbox {
                auto_approve_after: Duration::from_secs(8),
            }
        } else if std::env::var("MP_ACCESS_TOKEN").is_ok_and(|t| !t.trim().is_empty()) {
            PaymentsMode::MercadoPago(
                MercadoPagoConfig::from_env().map_err(|e| ApiError::Config(e.to_string()))?,
            )
        } else {
            PaymentsMode::Disabled
        };

        let pricing = PixPricing::from_env().map_err(|e| ApiError::Config(e.to_string()))?;

        let starting_credits = match std::env::var("STARTING_CREDITS") {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|e| ApiError::Config(format!("STARTING_CREDITS '{raw}': {e}")))?,
            Err(_) => defaults.starting_credits,
        };

        Ok(Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            payments,
            pricing,
            notification_url: std::env::var("MP_NOTIFICATION_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            webhook_verifier: SignatureVerifier::from_env(),
            starting_credits,
            verify_timeout: env_secs("PROVIDER_TIMEOUT_SECS", defaults.verify_timeout)?,
            reconcile_stale_after: env_secs("RECONCILE_STALE_SECS", defaults.reconcile_stale_after)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_default_when_unset() {
        let default = Duration::from_secs(30);
        assert_eq!(parse_secs("RECONCILE_STALE_SECS", None, default).unwrap(), default);
        assert_eq!(
            parse_secs("RECONCILE_STALE_SECS", Some(" 0 "), default).unwrap(),
            Duration::ZERO
        );
    }

    #[test]
    fn test_malformed_seconds_refuse_to_start() {
        let err = parse_secs("PROVIDER_TIMEOUT_SECS", Some("10s"), Duration::from_secs(10))
            .unwrap_err();
        assert!(matches!(err, ApiError::Config(ref msg) if msg.contains("PROVIDER_TIMEOUT_SECS")));
    }
}
