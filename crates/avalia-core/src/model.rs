//! Domain Model
//!
//! Identifiers, the per-user entitlement record and the payment intent.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable user identity (primary key of the entitlement record)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction id assigned by the payment provider
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token that makes a retried "create charge" land on the same charge
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Generate a fresh key (one per checkout attempt)
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a payment intent
///
/// `Created → Pending → Approved | Rejected | Expired`. The last three are
/// terminal and never change again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Created,
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl PaymentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Expired)
    }

    /// Position in the lifecycle; transitions must strictly increase it
    pub const fn rank(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Pending => 1,
            Self::Approved | Self::Rejected | Self::Expired => 2,
        }
    }

    /// Whether moving from `self` to `next` is a forward step
    pub const fn can_advance_to(self, next: Self) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-user entitlement record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub user_id: UserId,

    /// Remaining free billable actions
    pub credits: u32,

    /// Lifetime unlock confirmed; never reverts to false
    pub is_entitled: bool,

    /// Bumped on every write, used for compare-and-swap
    pub version: u64,

    /// Transaction that unlocked the account
    pub granted_by: Option<TransactionId>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entitlement {
    /// Fresh record for a first sign-in
    pub fn new(user_id: UserId, credits: u32) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            credits,
            is_entitled: false,
            version: 0,
            granted_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn view(&self) -> EntitlementView {
        EntitlementView {
            user_id: self.user_id.clone(),
            credits: self.credits,
            is_entitled: self.is_entitled,
        }
    }
}

/// What the client sees of its entitlement
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementView {
    pub user_id: UserId,
    pub credits: u32,
    pub is_entitled: bool,
}

/// A charge requested by a user, keyed by the provider's transaction id
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub transaction_id: TransactionId,

    /// Payer, also sent to the provider as the external reference
    pub user_id: UserId,

    pub idempotency_key: IdempotencyKey,
    pub status: PaymentStatus,
    pub amount: Decimal,

    /// PIX "copy and paste" code
    pub qr_code: String,

    /// QR image, base64 PNG
    pub qr_code_base64: Option<String>,

    pub ticket_url: Option<String>,
    pub created_at: DateTime<Utc>,

    /// Last time the status was verified against the provider
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl PaymentIntent {
    pub fn view(&self) -> IntentView {
        IntentView {
            transaction_id: self.transaction_id.clone(),
            status: self.status,
            amount: self.amount,
            qr_code: self.qr_code.clone(),
            qr_code_base64: self.qr_code_base64.clone(),
            ticket_url: self.ticket_url.clone(),
            created_at: self.created_at,
        }
    }
}

/// What the client sees of a charge
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentView {
    pub transaction_id: TransactionId,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub qr_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_monotonic() {
        assert!(PaymentStatus::Created.can_advance_to(PaymentStatus::Pending));
        assert!(PaymentStatus::Created.can_advance_to(PaymentStatus::Approved));
        assert!(PaymentStatus::Pending.can_advance_to(PaymentStatus::Expired));
        assert!(!PaymentStatus::Pending.can_advance_to(PaymentStatus::Created));
        assert!(!PaymentStatus::Pending.can_advance_to(PaymentStatus::Pending));
        assert!(!PaymentStatus::Approved.can_advance_to(PaymentStatus::Rejected));
        assert!(!PaymentStatus::Expired.can_advance_to(PaymentStatus::Approved));
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&PaymentStatus::Approved).unwrap();
        assert_eq!(json, "\"approved\"");
        let parsed: PaymentStatus = serde_json::from_str("\"expired\"").unwrap();
        assert_eq!(parsed, PaymentStatus::Expired);
    }

    #[test]
    fn test_idempotency_keys_are_fresh() {
        assert_ne!(IdempotencyKey::generate(), IdempotencyKey::generate());
    }
}
