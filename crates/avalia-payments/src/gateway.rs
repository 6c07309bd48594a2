//! Payment Gateway
//!
//! I/O boundary to the PIX provider. Implementations hold no payment state of
//! their own; the provider is the source of truth for a charge's status.

use async_trait::async_trait;
use avalia_core::{IdempotencyKey, PaymentStatus, TransactionId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::Result;

/// Request to create a one-time PIX charge
#[derive(Clone, Debug)]
pub struct ChargeRequest {
    pub amount: Decimal,
    pub description: String,
    pub payer_email: String,

    /// Same key on every retry of the same checkout attempt
    pub idempotency_key: IdempotencyKey,

    /// Returned unmodified by the provider; attributes the settlement
    pub external_reference: UserId,

    /// Provider-side expiry of the QR code
    pub expires_at: Option<DateTime<Utc>>,

    /// Where the provider should deliver notifications
    pub notification_url: Option<String>,
}

/// A charge as created by the provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Charge {
    pub transaction_id: TransactionId,
    pub status: PaymentStatus,

    /// PIX "copy and paste" code
    pub qr_code: String,
    pub qr_code_base64: Option<String>,
    pub ticket_url: Option<String>,
}

/// Authoritative status of a charge, straight from the provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChargeStatus {
    pub transaction_id: TransactionId,
    pub status: PaymentStatus,
    pub external_reference: Option<UserId>,
    pub status_detail: Option<String>,
}

/// Payment provider client (Strategy pattern)
///
/// Implement this for each provider. `MercadoPagoClient` talks to the real
/// API, `SandboxGateway` is an in-memory double for demos and tests.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a charge; a repeated idempotency key returns the same charge
    async fn create_charge(&self, request: &ChargeRequest) -> Result<Charge>;

    /// Fetch the current status of a charge
    async fn fetch_status(&self, transaction_id: &TransactionId) -> Result<ChargeStatus>;

    /// Provider name
    fn name(&self) -> &str;
}
