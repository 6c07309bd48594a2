//! Payment Intent Registry
//!
//! Durable mapping from the provider's transaction id to the user that asked
//! for the charge, indexed by idempotency key and by user.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{CoreError, Result};
use crate::model::{IdempotencyKey, PaymentIntent, PaymentStatus, TransactionId, UserId};

/// Result of a guarded status update
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Status moved forward
    Applied {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    /// Already terminal or not a forward step; nothing changed
    Unchanged { current: PaymentStatus },
}

impl Transition {
    pub const fn changed(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Intent registry trait
#[async_trait]
pub trait IntentRegistry: Send + Sync {
    /// Insert an intent; if the transaction id is already known the stored
    /// intent is returned unchanged
    async fn create(&self, intent: PaymentIntent) -> Result<PaymentIntent>;

    /// Get an intent by transaction id
    async fn get(&self, transaction_id: &TransactionId) -> Result<Option<PaymentIntent>>;

    /// Get the intent created with this idempotency key
    async fn find_by_idempotency_key(&self, key: &IdempotencyKey) -> Result<Option<PaymentIntent>>;

    /// Most recent non-terminal intent of a user
    async fn in_flight_for_user(&self, user_id: &UserId) -> Result<Option<PaymentIntent>>;

    /// Move an intent forward; terminal intents are left untouched
    ///
    /// Records the verification time even when the status does not change.
    async fn mark_status(
        &self,
        transaction_id: &TransactionId,
        status: PaymentStatus,
    ) -> Result<Transition>;
}

#[derive(Default)]
struct Indexes {
    intents: HashMap<TransactionId, PaymentIntent>,
    by_key: HashMap<IdempotencyKey, TransactionId>,
    by_user: HashMap<UserId, Vec<TransactionId>>,
}

/// In-memory intent registry (for development and tests)
#[derive(Default)]
pub struct MemoryIntentRegistry {
    indexes: RwLock<Indexes>,
}

impl MemoryIntentRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IntentRegistry for MemoryIntentRegistry {
    async fn create(&self, intent: PaymentIntent) -> Result<PaymentIntent> {
        let mut indexes = self.indexes.write().await;

        if let Some(existing) = indexes.intents.get(&intent.transaction_id) {
            return Ok(existing.clone());
        }

        indexes
            .by_key
            .insert(intent.idempotency_key.clone(), intent.transaction_id.clone());
        indexes
            .by_user
            .entry(intent.user_id.clone())
            .or_default()
            .push(intent.transaction_id.clone());
        indexes
            .intents
            .insert(intent.transaction_id.clone(), intent.clone());

        Ok(intent)
    }

    async fn get(&self, transaction_id: &TransactionId) -> Result<Option<PaymentIntent>> {
        let indexes = self.indexes.read().await;
        Ok(indexes.intents.get(transaction_id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &IdempotencyKey) -> Result<Option<PaymentIntent>> {
        let indexes = self.indexes.read().await;
        Ok(indexes
            .by_key
            .get(key)
            .and_then(|tx| indexes.intents.get(tx))
            .cloned())
    }

    async fn in_flight_for_user(&self, user_id: &UserId) -> Result<Option<PaymentIntent>> {
        let indexes = self.indexes.read().await;
        let Some(transactions) = indexes.by_user.get(user_id) else {
            return Ok(None);
        };

        Ok(transactions
            .iter()
            .rev()
            .filter_map(|tx| indexes.intents.get(tx))
            .find(|intent| !intent.status.is_terminal())
            .cloned())
    }

    async fn mark_status(
        &self,
        transaction_id: &TransactionId,
        status: PaymentStatus,
    ) -> Result<Transition> {
        let mut indexes = self.indexes.write().await;
        let intent = indexes
            .intents
            .get_mut(transaction_id)
            .ok_or_else(|| CoreError::IntentNotFound(transaction_id.to_string()))?;

        intent.last_checked_at = Some(Utc::now());

        if !intent.status.can_advance_to(status) {
            return Ok(Transition::Unchanged {
                current: intent.status,
            });
        }

        let from = intent.status;
        intent.status = status;

        Ok(Transition::Applied { from, to: status })
    }
}
