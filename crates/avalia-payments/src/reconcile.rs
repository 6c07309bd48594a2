//! Settlement Reconciliation
//!
//! Turns "something happened to transaction X" into at most one entitlement
//! grant. The provider's status endpoint is the only source of truth; a
//! webhook or a client poll just decides when to ask.
//!
//! ```text
//! notification / status poll
//!          │
//!          ▼
//!   fetch_status(tx) ──timeout──▶ Transient (provider redelivers)
//!          │
//!          ├─ pending   ─▶ touch intent, wait
//!          ├─ rejected  ─▶ close intent, no entitlement
//!          ├─ expired   ─▶ close intent, no entitlement
//!          └─ approved  ─▶ grant(user, tx)  (processed set dedupes)
//!                              │
//!                              ▼
//!                        mark intent approved
//! ```

use std::sync::Arc;
use std::time::Duration;

use avalia_core::{
    EntitlementStore, Grant, IntentRegistry, PaymentIntent, PaymentStatus, TransactionId, UserId,
};

use crate::error::{PaymentError, Result};
use crate::gateway::{ChargeStatus, PaymentGateway};
use crate::webhook::WebhookNotification;

/// What a reconciliation did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Notification was not about a payment we can verify
    Ignored { reason: String },

    /// Entitlement granted by this call
    Granted {
        transaction_id: TransactionId,
        user_id: UserId,
    },

    /// Approved, but the grant had already been applied
    AlreadyApplied { transaction_id: TransactionId },

    /// Not settled yet
    Pending { transaction_id: TransactionId },

    /// Rejected or expired; no entitlement
    Closed {
        transaction_id: TransactionId,
        status: PaymentStatus,
    },

    /// Provider does not know this transaction
    UnknownPayment { transaction_id: TransactionId },

    /// Approved, but no user can be safely credited
    Unattributed { transaction_id: TransactionId },
}

impl ReconcileOutcome {
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

/// Verifies settlements against the provider and applies grants
#[derive(Clone)]
pub struct WebhookReconciler {
    gateway: Arc<dyn PaymentGateway>,
    registry: Arc<dyn IntentRegistry>,
    entitlements: Arc<dyn EntitlementStore>,
    verify_timeout: Duration,
}

impl WebhookReconciler {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        registry: Arc<dyn IntentRegistry>,
        entitlements: Arc<dyn EntitlementStore>,
    ) -> Self {
        Self {
            gateway,
            registry,
            entitlements,
            verify_timeout: Duration::from_secs(10),
        }
    }

    /// Bound on a single status verification (default 10s)
    pub const fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }

    /// Handle an inbound webhook notification
    pub async fn handle(&self, notification: &WebhookNotification) -> Result<ReconcileOutcome> {
        if !notification.is_payment_event() {
            let hint = notification.event_hint.as_deref().unwrap_or_default();
            tracing::debug!(event = hint, "Ignoring non-payment notification");
            return Ok(ReconcileOutcome::Ignored {
                reason: format!("event '{hint}' is not a payment"),
            });
        }

        let Some(transaction_id) = &notification.transaction_id else {
            tracing::warn!("Payment notification without a transaction id");
            return Ok(ReconcileOutcome::Ignored {
                reason: "no transaction id".into(),
            });
        };

        self.reconcile_transaction(transaction_id).await
    }

    /// Verify one transaction with the provider and apply the result
    ///
    /// Safe to call any number of times, concurrently, from webhooks and
    /// status polls alike: a transaction grants at most once.
    pub async fn reconcile_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<ReconcileOutcome> {
        let verified = match self.verify(transaction_id).await {
            Ok(verified) => verified,
            Err(e) if e.is_not_found() => {
                tracing::warn!(transaction_id = %transaction_id, "Provider does not know this payment");
                return Ok(ReconcileOutcome::UnknownPayment {
                    transaction_id: transaction_id.clone(),
                });
            }
            Err(e) => return Err(e),
        };

        let intent = self.registry.get(transaction_id).await?;

        match verified.status {
            PaymentStatus::Approved => self.apply_approval(&verified, intent.as_ref()).await,
            PaymentStatus::Created | PaymentStatus::Pending => {
                self.touch(intent.as_ref(), PaymentStatus::Pending).await?;
                Ok(ReconcileOutcome::Pending {
                    transaction_id: transaction_id.clone(),
                })
            }
            status @ (PaymentStatus::Rejected | PaymentStatus::Expired) => {
                self.touch(intent.as_ref(), status).await?;
                tracing::info!(
                    transaction_id = %transaction_id,
                    status = status.as_str(),
                    detail = verified.status_detail.as_deref().unwrap_or_default(),
                    "Payment closed without settlement"
                );
                Ok(ReconcileOutcome::Closed {
                    transaction_id: transaction_id.clone(),
                    status,
                })
            }
        }
    }

    async fn verify(&self, transaction_id: &TransactionId) -> Result<ChargeStatus> {
        let verified =
            tokio::time::timeout(self.verify_timeout, self.gateway.fetch_status(transaction_id))
                .await
                .map_err(|_| {
                    tracing::warn!(
                        transaction_id = %transaction_id,
                        timeout = ?self.verify_timeout,
                        "Status verification timed out"
                    );
                    PaymentError::Transient(format!(
                        "status check for {transaction_id} timed out"
                    ))
                })??;

        if verified.transaction_id != *transaction_id {
            return Err(PaymentError::InvalidResponse(format!(
                "asked for {transaction_id}, provider answered {}",
                verified.transaction_id
            )));
        }
        Ok(verified)
    }

    async fn touch(&self, intent: Option<&PaymentIntent>, status: PaymentStatus) -> Result<()> {
        if let Some(intent) = intent {
            self.registry
                .mark_status(&intent.transaction_id, status)
                .await?;
        }
        Ok(())
    }

    /// The provider's `external_reference` names the user; the registered
    /// intent must agree with it when both exist
    fn attribute(verified: &ChargeStatus, intent: Option<&PaymentIntent>) -> Option<UserId> {
        match (&verified.external_reference, intent) {
            (Some(reference), Some(intent)) if *reference != intent.user_id => {
                tracing::error!(
                    transaction_id = %verified.transaction_id,
                    provider_user = %reference,
                    intent_user = %intent.user_id,
                    "Approved payment is attributed to two different users"
                );
                None
            }
            (Some(reference), _) => Some(reference.clone()),
            (None, Some(intent)) => Some(intent.user_id.clone()),
            (None, None) => None,
        }
    }

    async fn apply_approval(
        &self,
        verified: &ChargeStatus,
        intent: Option<&PaymentIntent>,
    ) -> Result<ReconcileOutcome> {
        let transaction_id = &verified.transaction_id;

        // A locally closed intent stays closed; the conflict needs an operator
        if let Some(closed) =
            intent.filter(|i| i.status.is_terminal() && i.status != PaymentStatus::Approved)
        {
            tracing::error!(
                transaction_id = %transaction_id,
                user_id = %closed.user_id,
                recorded = closed.status.as_str(),
                "Provider approved a payment already closed here, not granting"
            );
            return Ok(ReconcileOutcome::Closed {
                transaction_id: transaction_id.clone(),
                status: closed.status,
            });
        }

        let Some(user_id) = Self::attribute(verified, intent) else {
            tracing::error!(transaction_id = %transaction_id, "Approved payment left unattributed");
            return Ok(ReconcileOutcome::Unattributed {
                transaction_id: transaction_id.clone(),
            });
        };

        if intent.is_none() {
            tracing::warn!(
                transaction_id = %transaction_id,
                user_id = %user_id,
                "Approved payment has no registered intent"
            );
        }

        // Grant before marking: a redelivery after a failed mark is a
        // duplicate grant, never a lost one
        let grant = self.entitlements.grant(&user_id, transaction_id).await?;
        self.touch(intent, PaymentStatus::Approved).await?;

        match grant {
            Grant::Applied {
                entitlement,
                newly_entitled,
            } => {
                tracing::info!(
                    transaction_id = %transaction_id,
                    user_id = %user_id,
                    newly_entitled,
                    version = entitlement.version,
                    "PRO access granted"
                );
                Ok(ReconcileOutcome::Granted {
                    transaction_id: transaction_id.clone(),
                    user_id,
                })
            }
            Grant::Duplicate { .. } => {
                tracing::debug!(transaction_id = %transaction_id, "Settlement already applied");
                Ok(ReconcileOutcome::AlreadyApplied {
                    transaction_id: transaction_id.clone(),
                })
            }
        }
    }
}
