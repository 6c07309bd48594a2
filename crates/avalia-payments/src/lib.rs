//! # avalia-payments
//!
//! PIX checkout and settlement reconciliation for AvalIA.
//!
//! ## Flow
//!
//! ```text
//! ┌──────────┐ create_charge ┌──────────────┐   QR code    ┌─────────┐
//! │  Client  │──────────────▶│ChargeService │─────────────▶│  Payer  │
//! └──────────┘               └──────┬───────┘              └────┬────┘
//!      │                            │ POST /v1/payments         │ pays in
//!      │ poll status                ▼                           │ bank app
//!      │                     ┌──────────────┐◀──────────────────┘
//!      │                     │ Mercado Pago │
//!      │                     └──────┬───────┘
//!      │                            │ webhook (untrusted, repeated)
//!      ▼                            ▼
//! ┌────────────────────────────────────────┐  GET /v1/payments/{id}
//! │          WebhookReconciler             │─────────────────────▶ verified status
//! │  grant(user, tx) once per transaction  │
//! └────────────────────────────────────────┘
//! ```
//!
//! Only a status fetched from the provider's API can grant access. Webhook
//! payloads and client polls only decide *when* to verify.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use avalia_payments::{ChargeService, MercadoPagoClient, PixPricing, WebhookReconciler};
//!
//! let gateway = Arc::new(MercadoPagoClient::from_env()?);
//! let charges = ChargeService::new(gateway.clone(), registry.clone(), PixPricing::from_env()?);
//! let intent = charges.create_charge(&user, "buyer@example.com", key).await?;
//!
//! // later, from the webhook route
//! let reconciler = WebhookReconciler::new(gateway, registry, entitlements);
//! reconciler.handle(&WebhookNotification::parse(&query, &body)).await?;
//! ```

mod checkout;
mod error;
mod gateway;
mod mercadopago;
mod reconcile;
mod sandbox;
mod webhook;

pub use checkout::{ChargeService, PixPricing};
pub use error::{PaymentError, Result};
pub use gateway::{Charge, ChargeRequest, ChargeStatus, PaymentGateway};
pub use mercadopago::{MercadoPagoClient, MercadoPagoConfig, map_status};
pub use reconcile::{ReconcileOutcome, WebhookReconciler};
pub use sandbox::SandboxGateway;
pub use webhook::{SignatureVerifier, WebhookNotification};
