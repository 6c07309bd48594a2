//! Application State

use std::sync::Arc;
use std::time::Duration;

use avalia_core::{
    CreditGuard, EntitlementStore, IntentRegistry, MemoryEntitlementStore, MemoryIntentRegistry,
};
use avalia_payments::{
    ChargeService, MercadoPagoClient, PaymentGateway, SandboxGateway, SignatureVerifier,
    WebhookReconciler,
};

use crate::config::{PaymentsMode, ServerConfig};
use crate::error::ApiError;

/// Charge creation and reconciliation over one provider
#[derive(Clone)]
pub struct Payments {
    pub provider: String,
    pub charges: Arc<ChargeService>,
    pub reconciler: WebhookReconciler,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Per-user credits and PRO flag
    pub entitlements: Arc<dyn EntitlementStore>,

    /// Charges requested through this server
    pub registry: Arc<dyn IntentRegistry>,

    pub credits: CreditGuard,

    /// None when no provider is configured
    pub payments: Option<Payments>,

    pub webhook_verifier: Option<SignatureVerifier>,
    pub starting_credits: u32,
    pub reconcile_stale_after: Duration,
}

impl AppState {
    /// Build state with in-memory stores and the provider named by `config`
    pub fn from_config(config: &ServerConfig) -> Result<Self, ApiError> {
        let gateway: Option<Arc<dyn PaymentGateway>> = match &config.payments {
            PaymentsMode::Disabled => None,
            PaymentsMode::Sandbox { auto_approve_after } => {
                Some(Arc::new(SandboxGateway::with_auto_approve(*auto_approve_after)))
            }
            PaymentsMode::MercadoPago(mp) => Some(Arc::new(MercadoPagoClient::new(mp.clone())?)),
        };

        Ok(Self::with_gateway(config, gateway))
    }

    /// Build state around an already constructed provider
    pub fn with_gateway(config: &ServerConfig, gateway: Option<Arc<dyn PaymentGateway>>) -> Self {
        let entitlements: Arc<dyn EntitlementStore> = Arc::new(MemoryEntitlementStore::new());
        let registry: Arc<dyn IntentRegistry> = Arc::new(MemoryIntentRegistry::new());

        let payments = gateway.map(|gateway| {
            let mut charges =
                ChargeService::new(gateway.clone(), registry.clone(), config.pricing.clone());
            if let Some(url) = &config.notification_url {
                charges = charges.with_notification_url(url.clone());
            }

            Payments {
                provider: gateway.name().to_string(),
                charges: Arc::new(charges),
                reconciler: WebhookReconciler::new(gateway, registry.clone(), entitlements.clone())
                    .with_verify_timeout(config.verify_timeout),
            }
        });

        Self {
            credits: CreditGuard::new(entitlements.clone(), config.starting_credits),
            entitlements,
            registry,
            payments,
            webhook_verifier: config.webhook_verifier.clone(),
            starting_credits: config.starting_credits,
            reconcile_stale_after: config.reconcile_stale_after,
        }
    }

    /// Payment services, or 503 when payments are off
    pub fn payments(&self) -> Result<&Payments, ApiError> {
        self.payments.as_ref().ok_or(ApiError::PaymentsDisabled)
    }
}
