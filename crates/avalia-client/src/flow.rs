//! Checkout State Machine
//!
//! ```text
//!            begin()                 charge created
//!   Offer ───────────▶ Requesting ─────────────────▶ AwaitingSettlement
//!     ▲ ▲                  │ failure                    │       │
//!     │ └──────────────────┘                            │       │ deadline /
//!     │          cancel() ◀─────────────────────────────┘       │ closed
//!     │                                                  settled ▼
//!     └──── acknowledge() ◀──── Reconciled         Expired ──begin()──▶ Requesting
//! ```
//!
//! One flow per screen. Re-entering after a cancel or expiry always asks for
//! a new charge with a new idempotency key.

use std::sync::Arc;
use std::time::Duration;

use avalia_core::{EntitlementView, IdempotencyKey, IntentView, TransactionId};
use backon::{ExponentialBuilder, Retryable};

use crate::api::CheckoutApi;
use crate::error::{ClientError, Result};
use crate::poller::{ExpiryReason, PollHandle, PollOutcome, SettlementPoller};

/// Where the checkout currently is
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckoutState {
    /// Upgrade offer shown, possibly with the last failure
    Offer { last_error: Option<String> },

    /// Charge request in flight
    Requesting { idempotency_key: IdempotencyKey },

    /// QR code shown, waiting for the bank
    AwaitingSettlement { charge: IntentView },

    /// Entitlement confirmed by the server
    Reconciled { entitlement: EntitlementView },

    /// Charge can no longer settle
    Expired {
        transaction_id: Option<TransactionId>,
        reason: String,
    },
}

impl CheckoutState {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Requesting { .. } => "requesting",
            Self::AwaitingSettlement { .. } => "awaiting_settlement",
            Self::Reconciled { .. } => "reconciled",
            Self::Expired { .. } => "expired",
        }
    }
}

/// Drives one user's checkout from offer to entitlement
pub struct CheckoutFlow {
    api: Arc<dyn CheckoutApi>,
    poller: SettlementPoller,
    state: CheckoutState,
    poll: Option<PollHandle>,
    max_retries: usize,
}

impl CheckoutFlow {
    pub fn new(api: Arc<dyn CheckoutApi>) -> Self {
        Self {
            poller: SettlementPoller::new(api.clone()),
            api,
            state: CheckoutState::Offer { last_error: None },
            poll: None,
            max_retries: 3,
        }
    }

    pub fn with_poller(mut self, poller: SettlementPoller) -> Self {
        self.poller = poller;
        self
    }

    /// Retries of the charge request on transient errors (default 3)
    pub const fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub const fn state(&self) -> &CheckoutState {
        &self.state
    }

    fn invalid(&self, action: &'static str) -> ClientError {
        ClientError::InvalidTransition {
            action,
            state: self.state.name(),
        }
    }

    /// Request a new charge and start watching it
    ///
    /// Allowed from `Offer` and `Expired`. Each call uses a fresh idempotency
    /// key; retries inside the call reuse it, so a lost response never turns
    /// into a second charge.
    pub async fn begin(&mut self, email: &str) -> Result<IntentView> {
        if !matches!(
            self.state,
            CheckoutState::Offer { .. } | CheckoutState::Expired { .. }
        ) {
            return Err(self.invalid("begin checkout"));
        }

        let key = IdempotencyKey::generate();
        self.state = CheckoutState::Requesting {
            idempotency_key: key.clone(),
        };

        let api = self.api.clone();
        let result = (|| api.create_pix_charge(email, &key))
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(500))
                    .with_max_delay(Duration::from_secs(4))
                    .with_max_times(self.max_retries),
            )
            .when(ClientError::is_retryable)
            .notify(|err, delay| {
                tracing::warn!(
                    idempotency_key = %key,
                    error = %err,
                    retry_in = ?delay,
                    "Charge request failed, retrying with the same key"
                );
            })
            .await;

        match result {
            Ok(charge) => {
                tracing::info!(
                    transaction_id = %charge.transaction_id,
                    idempotency_key = %key,
                    "Awaiting PIX settlement"
                );
                self.poll = Some(self.poller.spawn(charge.transaction_id.clone()));
                self.state = CheckoutState::AwaitingSettlement {
                    charge: charge.clone(),
                };
                Ok(charge)
            }
            Err(e) => {
                tracing::warn!(idempotency_key = %key, error = %e, "Charge request failed");
                self.state = CheckoutState::Offer {
                    last_error: Some(e.user_message()),
                };
                Err(e)
            }
        }
    }

    /// Wait until the running poll ends and apply its outcome
    pub async fn wait(&mut self) -> Result<&CheckoutState> {
        let CheckoutState::AwaitingSettlement { charge } = &self.state else {
            return Err(self.invalid("wait for settlement"));
        };
        let transaction_id = charge.transaction_id.clone();

        let outcome = match self.poll.take() {
            Some(poll) => poll.outcome().await,
            None => PollOutcome::Cancelled,
        };

        self.state = match outcome {
            PollOutcome::Reconciled(entitlement) => CheckoutState::Reconciled { entitlement },
            PollOutcome::Expired(ExpiryReason::Deadline) => CheckoutState::Expired {
                transaction_id: Some(transaction_id),
                reason: "The PIX code expired before payment was confirmed.".into(),
            },
            PollOutcome::Expired(ExpiryReason::Closed(status)) => CheckoutState::Expired {
                transaction_id: Some(transaction_id),
                reason: format!("The payment was {status}."),
            },
            PollOutcome::Cancelled => CheckoutState::Offer { last_error: None },
        };

        Ok(&self.state)
    }

    /// Leave the checkout; polling stops immediately
    pub fn cancel(&mut self) -> Result<()> {
        if !matches!(
            self.state,
            CheckoutState::Requesting { .. } | CheckoutState::AwaitingSettlement { .. }
        ) {
            return Err(self.invalid("cancel"));
        }

        if let Some(poll) = self.poll.take() {
            poll.cancel();
        }
        tracing::debug!("Checkout cancelled");
        self.state = CheckoutState::Offer { last_error: None };
        Ok(())
    }

    /// Dismiss the success screen
    pub fn acknowledge(&mut self) -> Result<()> {
        if !matches!(self.state, CheckoutState::Reconciled { .. }) {
            return Err(self.invalid("acknowledge"));
        }
        self.state = CheckoutState::Offer { last_error: None };
        Ok(())
    }
}
