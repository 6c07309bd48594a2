//! Entitlement Store
//!
//! Persistent `{credits, is_entitled}` record per user, plus the set of
//! transactions that already produced a grant.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{CoreError, Result};
use crate::model::{Entitlement, TransactionId, UserId};

/// Result of a compare-and-swap on the credit count
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Swap {
    /// Write applied, record as stored
    Swapped(Entitlement),

    /// Record changed since it was read
    Conflict,
}

/// Result of applying a settlement to a user
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Grant {
    /// First time this transaction is applied
    Applied {
        entitlement: Entitlement,
        /// False when the user was already entitled by another transaction
        newly_entitled: bool,
    },

    /// Transaction was already applied; nothing changed
    Duplicate { user_id: UserId },
}

/// Entitlement storage trait
///
/// Every method is atomic with respect to the others. Implementations backed
/// by a database map `swap_credits` to a conditional update on `version` and
/// `grant` to a unique insert into a processed-transactions table in the same
/// transaction as the entitlement update.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Get the record for a user
    async fn get(&self, user_id: &UserId) -> Result<Option<Entitlement>>;

    /// Get the record, creating it with `starting_credits` on first sign-in
    async fn get_or_create(&self, user_id: &UserId, starting_credits: u32) -> Result<Entitlement>;

    /// Set `credits` if the record is still at `expected_version`
    ///
    /// Credits can only go down through this call.
    async fn swap_credits(&self, user_id: &UserId, expected_version: u64, credits: u32)
    -> Result<Swap>;

    /// Mark the user entitled on behalf of `transaction_id`, at most once per transaction
    async fn grant(&self, user_id: &UserId, transaction_id: &TransactionId) -> Result<Grant>;
}

#[derive(Default)]
struct Ledger {
    records: HashMap<UserId, Entitlement>,
    processed: HashMap<TransactionId, UserId>,
}

/// In-memory entitlement store (for development and tests)
#[derive(Default)]
pub struct MemoryEntitlementStore {
    ledger: Mutex<Ledger>,
}

impl MemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transactions that produced a grant
    pub async fn processed_count(&self) -> usize {
        self.ledger.lock().await.processed.len()
    }
}

#[async_trait]
impl EntitlementStore for MemoryEntitlementStore {
    async fn get(&self, user_id: &UserId) -> Result<Option<Entitlement>> {
        let ledger = self.ledger.lock().await;
        Ok(ledger.records.get(user_id).cloned())
    }

    async fn get_or_create(&self, user_id: &UserId, starting_credits: u32) -> Result<Entitlement> {
        let mut ledger = self.ledger.lock().await;
        let record = ledger.records.entry(user_id.clone()).or_insert_with(|| {
            tracing::info!(user_id = %user_id, credits = starting_credits, "Created entitlement record");
            Entitlement::new(user_id.clone(), starting_credits)
        });
        Ok(record.clone())
    }

    async fn swap_credits(
        &self,
        user_id: &UserId,
        expected_version: u64,
        credits: u32,
    ) -> Result<Swap> {
        let mut ledger = self.ledger.lock().await;
        let record = ledger
            .records
            .get_mut(user_id)
            .ok_or_else(|| CoreError::UserNotFound(user_id.to_string()))?;

        if record.version != expected_version {
            return Ok(Swap::Conflict);
        }

        if credits > record.credits {
            return Err(CoreError::InvalidTransition(format!(
                "credits for {user_id} cannot grow from {} to {credits}",
                record.credits
            )));
        }

        record.credits = credits;
        record.version += 1;
        record.updated_at = Utc::now();

        Ok(Swap::Swapped(record.clone()))
    }

    async fn grant(&self, user_id: &UserId, transaction_id: &TransactionId) -> Result<Grant> {
        let mut ledger = self.ledger.lock().await;

        if let Some(owner) = ledger.processed.get(transaction_id) {
            return Ok(Grant::Duplicate { user_id: owner.clone() });
        }

        let record = ledger
            .records
            .entry(user_id.clone())
            .or_insert_with(|| Entitlement::new(user_id.clone(), 0));

        let newly_entitled = !record.is_entitled;
        record.is_entitled = true;
        if record.granted_by.is_none() {
            record.granted_by = Some(transaction_id.clone());
        }
        record.version += 1;
        record.updated_at = Utc::now();
        let entitlement = record.clone();

        ledger.processed.insert(transaction_id.clone(), user_id.clone());

        Ok(Grant::Applied {
            entitlement,
            newly_entitled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserId {
        UserId::new("user-1")
    }

    #[tokio::test]
    async fn test_first_sign_in_gets_starting_credits() {
        let store = MemoryEntitlementStore::new();
        let first = store.get_or_create(&user(), 2).await.unwrap();
        assert_eq!(first.credits, 2);
        assert!(!first.is_entitled);

        // A later sign-in with a different default does not reset the record
        let again = store.get_or_create(&user(), 5).await.unwrap();
        assert_eq!(again.credits, 2);
    }

    #[tokio::test]
    async fn test_swap_detects_stale_version() {
        let store = MemoryEntitlementStore::new();
        let record = store.get_or_create(&user(), 2).await.unwrap();

        let swapped = store.swap_credits(&user(), record.version, 1).await.unwrap();
        assert!(matches!(swapped, Swap::Swapped(ref e) if e.credits == 1));

        let stale = store.swap_credits(&user(), record.version, 0).await.unwrap();
        assert_eq!(stale, Swap::Conflict);
    }

    #[tokio::test]
    async fn test_swap_refuses_to_add_credits() {
        let store = MemoryEntitlementStore::new();
        let record = store.get_or_create(&user(), 1).await.unwrap();
        let err = store.swap_credits(&user(), record.version, 10).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_grant_applies_once_per_transaction() {
        let store = MemoryEntitlementStore::new();
        store.get_or_create(&user(), 0).await.unwrap();
        let tx = TransactionId::new("123");

        let first = store.grant(&user(), &tx).await.unwrap();
        assert!(matches!(first, Grant::Applied { newly_entitled: true, .. }));
        let after_first = store.get(&user()).await.unwrap().unwrap();

        for _ in 0..5 {
            let again = store.grant(&user(), &tx).await.unwrap();
            assert_eq!(again, Grant::Duplicate { user_id: user() });
        }

        assert_eq!(store.get(&user()).await.unwrap().unwrap(), after_first);
        assert_eq!(store.processed_count().await, 1);
    }

    #[tokio::test]
    async fn test_grant_for_unknown_user_creates_entitled_record() {
        let store = MemoryEntitlementStore::new();
        store.grant(&user(), &TransactionId::new("9")).await.unwrap();

        let record = store.get(&user()).await.unwrap().unwrap();
        assert!(record.is_entitled);
        assert_eq!(record.granted_by, Some(TransactionId::new("9")));
    }

    #[tokio::test]
    async fn test_second_payment_keeps_first_grant() {
        let store = MemoryEntitlementStore::new();
        store.grant(&user(), &TransactionId::new("1")).await.unwrap();
        let second = store.grant(&user(), &TransactionId::new("2")).await.unwrap();

        assert!(matches!(second, Grant::Applied { newly_entitled: false, .. }));
        let record = store.get(&user()).await.unwrap().unwrap();
        assert_eq!(record.granted_by, Some(TransactionId::new("1")));
    }
}
