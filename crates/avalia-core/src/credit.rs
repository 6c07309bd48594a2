//! Credit Consumption Guard
//!
//! Gate in front of every billable action (one pricing analysis).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entitlement::{EntitlementStore, Swap};
use crate::error::{CoreError, Result};
use crate::model::UserId;

/// Attempts of the read-modify-write before giving up
const MAX_ATTEMPTS: usize = 2;

/// Outcome of a billable action check
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum CreditDecision {
    /// Entitled user, nothing consumed
    Unlimited,

    /// One credit consumed
    Allowed { remaining: u32 },

    /// Not entitled and out of credits; caller shows the upgrade offer
    InsufficientCredits,
}

impl CreditDecision {
    pub const fn is_allowed(&self) -> bool {
        !matches!(self, Self::InsufficientCredits)
    }
}

/// Atomic check-and-decrement over an [`EntitlementStore`]
#[derive(Clone)]
pub struct CreditGuard {
    store: Arc<dyn EntitlementStore>,
    starting_credits: u32,
}

impl CreditGuard {
    pub fn new(store: Arc<dyn EntitlementStore>, starting_credits: u32) -> Self {
        Self {
            store,
            starting_credits,
        }
    }

    /// Consume one credit for `user_id`, or allow unconditionally if entitled
    ///
    /// Two concurrent calls never both succeed off the same credit: the
    /// decrement is a compare-and-swap on the record version, and the loser
    /// re-reads once before answering.
    pub async fn consume(&self, user_id: &UserId) -> Result<CreditDecision> {
        for attempt in 1..=MAX_ATTEMPTS {
            let current = self
                .store
                .get_or_create(user_id, self.starting_credits)
                .await?;

            if current.is_entitled {
                return Ok(CreditDecision::Unlimited);
            }

            if current.credits == 0 {
                tracing::debug!(user_id = %user_id, "No credits left");
                return Ok(CreditDecision::InsufficientCredits);
            }

            match self
                .store
                .swap_credits(user_id, current.version, current.credits - 1)
                .await?
            {
                Swap::Swapped(updated) => {
                    tracing::debug!(
                        user_id = %user_id,
                        remaining = updated.credits,
                        "Consumed credit"
                    );
                    return Ok(CreditDecision::Allowed {
                        remaining: updated.credits,
                    });
                }
                Swap::Conflict => {
                    tracing::debug!(user_id = %user_id, attempt, "Credit swap lost a race");
                }
            }
        }

        tracing::warn!(user_id = %user_id, "Credit consumption contended");
        Err(CoreError::Contention(user_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlement::{Grant, MemoryEntitlementStore};
    use crate::model::{Entitlement, TransactionId};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn user() -> UserId {
        UserId::new("user-1")
    }

    #[tokio::test]
    async fn test_credits_decrease_to_zero_then_reject() {
        let store = Arc::new(MemoryEntitlementStore::new());
        let guard = CreditGuard::new(store.clone(), 2);

        assert_eq!(
            guard.consume(&user()).await.unwrap(),
            CreditDecision::Allowed { remaining: 1 }
        );
        assert_eq!(
            guard.consume(&user()).await.unwrap(),
            CreditDecision::Allowed { remaining: 0 }
        );

        for _ in 0..3 {
            assert_eq!(
                guard.consume(&user()).await.unwrap(),
                CreditDecision::InsufficientCredits
            );
        }
        assert_eq!(store.get(&user()).await.unwrap().unwrap().credits, 0);
    }

    #[tokio::test]
    async fn test_entitled_user_is_unlimited() {
        let store = Arc::new(MemoryEntitlementStore::new());
        let guard = CreditGuard::new(store.clone(), 0);
        store.grant(&user(), &TransactionId::new("1")).await.unwrap();

        for _ in 0..10 {
            assert_eq!(
                guard.consume(&user()).await.unwrap(),
                CreditDecision::Unlimited
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consumers_share_one_credit() {
        for _ in 0..50 {
            let store = Arc::new(MemoryEntitlementStore::new());
            let guard = CreditGuard::new(store.clone(), 1);
            let barrier = Arc::new(tokio::sync::Barrier::new(2));

            let tasks: Vec<_> = (0..2)
                .map(|_| {
                    let guard = guard.clone();
                    let barrier = barrier.clone();
                    tokio::spawn(async move {
                        barrier.wait().await;
                        guard.consume(&user()).await.unwrap()
                    })
                })
                .collect();

            let mut allowed = 0;
            let mut rejected = 0;
            for task in tasks {
                match task.await.unwrap() {
                    CreditDecision::Allowed { remaining: 0 } => allowed += 1,
                    CreditDecision::InsufficientCredits => rejected += 1,
                    other => panic!("unexpected decision: {other:?}"),
                }
            }

            assert_eq!((allowed, rejected), (1, 1));
            assert_eq!(store.get(&user()).await.unwrap().unwrap().credits, 0);
        }
    }

    /// Lets another writer slip in before the first `conflicts` swaps
    struct RacingStore {
        inner: MemoryEntitlementStore,
        conflicts: AtomicUsize,
        swaps: AtomicUsize,
    }

    #[async_trait]
    impl EntitlementStore for RacingStore {
        async fn get(&self, user_id: &UserId) -> Result<Option<Entitlement>> {
            self.inner.get(user_id).await
        }

        async fn get_or_create(&self, user_id: &UserId, credits: u32) -> Result<Entitlement> {
            self.inner.get_or_create(user_id, credits).await
        }

        async fn swap_credits(&self, user_id: &UserId, version: u64, credits: u32) -> Result<Swap> {
            self.swaps.fetch_add(1, Ordering::SeqCst);
            if self.conflicts.load(Ordering::SeqCst) > 0 {
                self.conflicts.fetch_sub(1, Ordering::SeqCst);
                let current = self.inner.get(user_id).await?.unwrap();
                self.inner
                    .swap_credits(user_id, current.version, current.credits - 1)
                    .await?;
            }
            self.inner.swap_credits(user_id, version, credits).await
        }

        async fn grant(&self, user_id: &UserId, tx: &TransactionId) -> Result<Grant> {
            self.inner.grant(user_id, tx).await
        }
    }

    #[tokio::test]
    async fn test_losing_writer_retries_once() {
        let store = Arc::new(RacingStore {
            inner: MemoryEntitlementStore::new(),
            conflicts: AtomicUsize::new(1),
            swaps: AtomicUsize::new(0),
        });
        let guard = CreditGuard::new(store.clone(), 3);

        // The interloper takes one credit, our retry takes another
        assert_eq!(
            guard.consume(&user()).await.unwrap(),
            CreditDecision::Allowed { remaining: 1 }
        );
        assert_eq!(store.swaps.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_sees_exhausted_credits() {
        let store = Arc::new(RacingStore {
            inner: MemoryEntitlementStore::new(),
            conflicts: AtomicUsize::new(1),
            swaps: AtomicUsize::new(0),
        });
        let guard = CreditGuard::new(store, 1);

        assert_eq!(
            guard.consume(&user()).await.unwrap(),
            CreditDecision::InsufficientCredits
        );
    }

    #[tokio::test]
    async fn test_persistent_contention_is_retryable_error() {
        let store = Arc::new(RacingStore {
            inner: MemoryEntitlementStore::new(),
            conflicts: AtomicUsize::new(2),
            swaps: AtomicUsize::new(0),
        });
        let guard = CreditGuard::new(store, 5);

        let err = guard.consume(&user()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
