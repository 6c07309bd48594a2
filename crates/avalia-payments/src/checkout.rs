//! PIX Checkout
//!
//! Creates the one-time PRO unlock charge and records it as a payment intent.

use std::sync::Arc;
use std::time::Duration;

use avalia_core::{IdempotencyKey, IntentRegistry, PaymentIntent, PaymentStatus, UserId};
use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::{PaymentError, Result};
use crate::gateway::{ChargeRequest, PaymentGateway};

/// Price and presentation of the lifetime unlock
#[derive(Clone, Debug)]
pub struct PixPricing {
    pub amount: Decimal,
    pub description: String,

    /// Provider-side QR expiry; the client's deadline matches it
    pub expiry: Duration,
}

impl Default for PixPricing {
    fn default() -> Self {
        Self {
            amount: dec!(47.90),
            description: "AvalIA AI - Acesso PRO Vitalício".into(),
            expiry: Duration::from_secs(600),
        }
    }
}

impl PixPricing {
    /// Create from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let amount = match std::env::var("PIX_AMOUNT") {
            Ok(raw) => raw
                .parse::<Decimal>()
                .map_err(|e| PaymentError::Config(format!("PIX_AMOUNT '{raw}': {e}")))?,
            Err(_) => defaults.amount,
        };
        if amount <= Decimal::ZERO {
            return Err(PaymentError::Config("PIX_AMOUNT must be positive".into()));
        }

        let description = std::env::var("PIX_DESCRIPTION").unwrap_or(defaults.description);
        let expiry = env_secs("PIX_EXPIRY_SECS", defaults.expiry)?;

        Ok(Self {
            amount,
            description,
            expiry,
        })
    }
}

/// Seconds from `name`, `default` when unset; a malformed value is a config error
pub(crate) fn env_secs(name: &str, default: Duration) -> Result<Duration> {
    parse_secs(name, std::env::var(name).ok().as_deref(), default)
}

fn parse_secs(name: &str, raw: Option<&str>, default: Duration) -> Result<Duration> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(raw) => raw
            .parse()
            .map(Duration::from_secs)
            .map_err(|e| PaymentError::Config(format!("{name} '{raw}': {e}"))),
    }
}

/// Charge creation with idempotency and provider retries
pub struct ChargeService {
    gateway: Arc<dyn PaymentGateway>,
    registry: Arc<dyn IntentRegistry>,
    pricing: PixPricing,
    notification_url: Option<String>,
    max_retries: usize,
}

impl ChargeService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        registry: Arc<dyn IntentRegistry>,
        pricing: PixPricing,
    ) -> Self {
        Self {
            gateway,
            registry,
            pricing,
            notification_url: None,
            max_retries: 3,
        }
    }

    /// Ask the provider to notify this URL
    pub fn with_notification_url(mut self, url: impl Into<String>) -> Self {
        self.notification_url = Some(url.into());
        self
    }

    /// Retries on transient provider errors (default 3)
    pub const fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn retry_strategy(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(250))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(self.max_retries)
    }

    /// Create (or return the already created) charge for this checkout attempt
    ///
    /// A repeated `idempotency_key` from the same user returns the stored
    /// intent without calling the provider again. Transient provider errors
    /// are retried with the same key, so the provider dedupes as well.
    pub async fn create_charge(
        &self,
        user_id: &UserId,
        payer_email: &str,
        idempotency_key: IdempotencyKey,
    ) -> Result<PaymentIntent> {
        if !payer_email.contains('@') {
            return Err(PaymentError::InvalidRequest(
                "payer email must be a valid address".into(),
            ));
        }

        if let Some(existing) = self.registry.find_by_idempotency_key(&idempotency_key).await? {
            if existing.user_id != *user_id {
                return Err(PaymentError::IdempotencyConflict(idempotency_key.to_string()));
            }
            tracing::debug!(
                transaction_id = %existing.transaction_id,
                idempotency_key = %idempotency_key,
                "Replayed charge request"
            );
            return Ok(existing);
        }

        let request = ChargeRequest {
            amount: self.pricing.amount,
            description: self.pricing.description.clone(),
            payer_email: payer_email.to_string(),
            idempotency_key: idempotency_key.clone(),
            external_reference: user_id.clone(),
            expires_at: chrono::Duration::from_std(self.pricing.expiry)
                .ok()
                .map(|expiry| Utc::now() + expiry),
            notification_url: self.notification_url.clone(),
        };

        let charge = (|| self.gateway.create_charge(&request))
            .retry(self.retry_strategy())
            .when(PaymentError::is_retryable)
            .notify(|err, delay| {
                tracing::warn!(
                    idempotency_key = %idempotency_key,
                    error = %err,
                    retry_in = ?delay,
                    "Charge creation failed, retrying with the same key"
                );
            })
            .await
            .inspect_err(|err| {
                tracing::error!(
                    idempotency_key = %idempotency_key,
                    user_id = %user_id,
                    provider = self.gateway.name(),
                    error = %err,
                    "Charge creation failed"
                );
            })?;

        let intent = self
            .registry
            .create(PaymentIntent {
                transaction_id: charge.transaction_id,
                user_id: user_id.clone(),
                idempotency_key: idempotency_key.clone(),
                status: PaymentStatus::Created,
                amount: self.pricing.amount,
                qr_code: charge.qr_code,
                qr_code_base64: charge.qr_code_base64,
                ticket_url: charge.ticket_url,
                created_at: Utc::now(),
                last_checked_at: None,
            })
            .await?;

        // Another user's request with the same key may have registered first
        if intent.user_id != *user_id {
            tracing::warn!(
                transaction_id = %intent.transaction_id,
                idempotency_key = %idempotency_key,
                user_id = %user_id,
                "Idempotency key raced with another user's checkout"
            );
            return Err(PaymentError::IdempotencyConflict(idempotency_key.to_string()));
        }

        tracing::info!(
            transaction_id = %intent.transaction_id,
            idempotency_key = %idempotency_key,
            user_id = %user_id,
            amount = %intent.amount,
            "PIX charge created"
        );

        Ok(intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxGateway;
    use avalia_core::MemoryIntentRegistry;

    fn service(gateway: Arc<SandboxGateway>) -> (ChargeService, Arc<MemoryIntentRegistry>) {
        let registry = Arc::new(MemoryIntentRegistry::new());
        let service = ChargeService::new(gateway, registry.clone(), PixPricing::default());
        (service, registry)
    }

    #[test]
    fn test_default_pricing() {
        let pricing = PixPricing::default();
        assert_eq!(pricing.amount, dec!(47.90));
        assert_eq!(pricing.expiry, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_charge_is_recorded_as_created() {
        let gateway = Arc::new(SandboxGateway::new());
        let (service, registry) = service(gateway);
        let user = UserId::new("user-1");

        let intent = service
            .create_charge(&user, "buyer@example.com", IdempotencyKey::generate())
            .await
            .unwrap();

        assert_eq!(intent.status, PaymentStatus::Created);
        assert_eq!(intent.user_id, user);
        let stored = registry.get(&intent.transaction_id).await.unwrap().unwrap();
        assert_eq!(stored, intent);
    }

    #[tokio::test]
    async fn test_replayed_key_does_not_call_provider() {
        let gateway = Arc::new(SandboxGateway::new());
        let (service, _) = service(gateway.clone());
        let user = UserId::new("user-1");
        let key = IdempotencyKey::generate();

        let first = service
            .create_charge(&user, "buyer@example.com", key.clone())
            .await
            .unwrap();
        let again = service
            .create_charge(&user, "buyer@example.com", key)
            .await
            .unwrap();

        assert_eq!(first, again);
        assert_eq!(gateway.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_key_of_another_user_is_refused() {
        let gateway = Arc::new(SandboxGateway::new());
        let (service, _) = service(gateway);
        let key = IdempotencyKey::generate();

        service
            .create_charge(&UserId::new("alice"), "a@example.com", key.clone())
            .await
            .unwrap();
        let err = service
            .create_charge(&UserId::new("mallory"), "m@example.com", key)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::IdempotencyConflict(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_key_reuse_across_users_is_refused() {
        let gateway = Arc::new(SandboxGateway::new());
        gateway.set_latency(Duration::from_millis(50)).await;
        let (service, registry) = service(gateway);
        let key = IdempotencyKey::generate();
        let alice = UserId::new("alice");
        let mallory = UserId::new("mallory");

        // Both pass the registry lookup before either charge is recorded
        let (a, m) = tokio::join!(
            service.create_charge(&alice, "a@example.com", key.clone()),
            service.create_charge(&mallory, "m@example.com", key.clone()),
        );

        let (winner, intent, err) = match (a, m) {
            (Ok(intent), Err(err)) => (alice, intent, err),
            (Err(err), Ok(intent)) => (mallory, intent, err),
            other => panic!("expected one charge and one conflict, got {other:?}"),
        };
        assert_eq!(intent.user_id, winner);
        assert!(matches!(err, PaymentError::IdempotencyConflict(_)));

        let stored = registry.find_by_idempotency_key(&key).await.unwrap().unwrap();
        assert_eq!(stored.user_id, winner);
    }

    #[test]
    fn test_malformed_seconds_are_a_config_error() {
        let default = Duration::from_secs(600);
        assert_eq!(parse_secs("PIX_EXPIRY_SECS", None, default).unwrap(), default);
        assert_eq!(parse_secs("PIX_EXPIRY_SECS", Some(" "), default).unwrap(), default);
        assert_eq!(
            parse_secs("PIX_EXPIRY_SECS", Some("90"), default).unwrap(),
            Duration::from_secs(90)
        );

        let err = parse_secs("PIX_EXPIRY_SECS", Some("ten"), default).unwrap_err();
        assert!(matches!(err, PaymentError::Config(ref msg) if msg.contains("PIX_EXPIRY_SECS")));
        assert!(parse_secs("PIX_EXPIRY_SECS", Some("-5"), default).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_retries_then_surfaces_transient() {
        let gateway = Arc::new(SandboxGateway::new());
        gateway.set_outage(true);
        let (service, registry) = service(gateway.clone());
        let user = UserId::new("user-1");

        let err = service
            .create_charge(&user, "buyer@example.com", IdempotencyKey::generate())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(gateway.create_calls(), 4);
        assert!(registry.in_flight_for_user(&user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_permanent_rejection_is_not_retried() {
        let gateway = Arc::new(SandboxGateway::new());
        let (service, _) = service(gateway.clone());

        let err = service
            .create_charge(&UserId::new("u"), "not-an-email", IdempotencyKey::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidRequest(_)));
        assert_eq!(gateway.create_calls(), 0);
    }
}
