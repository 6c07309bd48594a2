//! Settlement Poller
//!
//! Watches one charge until the server reports the user entitled, the charge
//! closes, or the deadline passes. Every exit path stops both timers: the
//! loop owns them, and [`PollHandle`] cancels and aborts the task on drop.

use std::sync::Arc;
use std::time::Duration;

use avalia_core::{EntitlementView, PaymentStatus, TransactionId};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api::CheckoutApi;

/// Why polling stopped without a settlement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpiryReason {
    /// Deadline passed without a verified settlement
    Deadline,

    /// Server verified the charge as rejected or expired
    Closed(PaymentStatus),
}

/// How a poll ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Reconciled(EntitlementView),
    Expired(ExpiryReason),
    Cancelled,
}

/// Poll cadence
#[derive(Clone)]
pub struct SettlementPoller {
    api: Arc<dyn CheckoutApi>,
    interval: Duration,
    deadline: Duration,
}

impl SettlementPoller {
    /// Poll every 5s for at most 10 minutes, the lifetime of a PIX QR code
    pub fn new(api: Arc<dyn CheckoutApi>) -> Self {
        Self {
            api,
            interval: Duration::from_secs(5),
            deadline: Duration::from_secs(600),
        }
    }

    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Start watching `transaction_id` on the current runtime
    pub fn spawn(&self, transaction_id: TransactionId) -> PollHandle {
        let token = CancellationToken::new();
        let poller = self.clone();
        let task = tokio::spawn(poller.run(transaction_id, token.clone()));
        PollHandle {
            token,
            task: Some(task),
        }
    }

    /// Poll until settled, closed, past the deadline, or cancelled
    pub async fn run(self, transaction_id: TransactionId, token: CancellationToken) -> PollOutcome {
        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);

        let mut ticks = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(transaction_id = %transaction_id, "Polling for settlement");

        // Cancel and deadline also race the in-flight requests of a tick
        loop {
            let checked = tokio::select! {
                biased;
                () = token.cancelled() => None,
                () = &mut deadline => None,
                _ = ticks.tick() => tokio::select! {
                    biased;
                    () = token.cancelled() => None,
                    () = &mut deadline => None,
                    checked = self.check(&transaction_id) => Some(checked),
                },
            };

            match checked {
                Some(Some(outcome)) => return outcome,
                Some(None) => {}
                None if token.is_cancelled() => {
                    tracing::debug!(transaction_id = %transaction_id, "Polling cancelled");
                    return PollOutcome::Cancelled;
                }
                None => {
                    tracing::info!(transaction_id = %transaction_id, "Payment window expired");
                    return PollOutcome::Expired(ExpiryReason::Deadline);
                }
            }
        }
    }

    async fn check(&self, transaction_id: &TransactionId) -> Option<PollOutcome> {
        // Status first: reading it may make the server verify with the provider
        let status = match self.api.payment_status(transaction_id).await {
            Ok(intent) => intent.status,
            Err(e) => {
                tracing::warn!(transaction_id = %transaction_id, error = %e, "Status poll failed");
                return None;
            }
        };

        let entitlement = match self.api.entitlement().await {
            Ok(entitlement) => entitlement,
            Err(e) => {
                tracing::warn!(transaction_id = %transaction_id, error = %e, "Entitlement poll failed");
                return None;
            }
        };

        if entitlement.is_entitled || status == PaymentStatus::Approved {
            tracing::info!(transaction_id = %transaction_id, "Payment settled");
            return Some(PollOutcome::Reconciled(entitlement));
        }

        match status {
            PaymentStatus::Rejected | PaymentStatus::Expired => {
                tracing::info!(transaction_id = %transaction_id, status = %status, "Payment closed");
                Some(PollOutcome::Expired(ExpiryReason::Closed(status)))
            }
            _ => None,
        }
    }
}

/// Running poll; dropping it stops the poll
pub struct PollHandle {
    token: CancellationToken,
    task: Option<JoinHandle<PollOutcome>>,
}

impl PollHandle {
    /// Stop polling; `outcome` then resolves to `Cancelled`
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the poll to end
    pub async fn outcome(mut self) -> PollOutcome {
        match self.task.take() {
            Some(task) => task.await.unwrap_or(PollOutcome::Cancelled),
            None => PollOutcome::Cancelled,
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::error::{ClientError, Result};
    use async_trait::async_trait;
    use avalia_core::{IdempotencyKey, IntentView, UserId};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use tokio::sync::Mutex;

    /// Scriptable server double
    pub(crate) struct FakeApi {
        pub status: Mutex<PaymentStatus>,
        pub entitled: AtomicBool,
        pub down: AtomicBool,
        pub hang: AtomicBool,
        pub create_failures: AtomicUsize,
        pub status_calls: AtomicUsize,
        pub create_keys: Mutex<Vec<IdempotencyKey>>,
    }

    impl FakeApi {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                status: Mutex::new(PaymentStatus::Pending),
                entitled: AtomicBool::new(false),
                down: AtomicBool::new(false),
                hang: AtomicBool::new(false),
                create_failures: AtomicUsize::new(0),
                status_calls: AtomicUsize::new(0),
                create_keys: Mutex::new(Vec::new()),
            })
        }

        pub async fn settle(&self, status: PaymentStatus) {
            *self.status.lock().await = status;
            if status == PaymentStatus::Approved {
                self.entitled.store(true, Ordering::SeqCst);
            }
        }

        fn intent(transaction_id: TransactionId, status: PaymentStatus) -> IntentView {
            IntentView {
                transaction_id,
                status,
                amount: Decimal::new(4790, 2),
                qr_code: "000201".into(),
                qr_code_base64: None,
                ticket_url: None,
                created_at: Utc::now(),
            }
        }
    }

    #[async_trait]
    impl CheckoutApi for FakeApi {
        async fn create_pix_charge(&self, _email: &str, key: &IdempotencyKey) -> Result<IntentView> {
            let mut keys = self.create_keys.lock().await;
            keys.push(key.clone());
            if self.create_failures.load(Ordering::SeqCst) > 0 {
                self.create_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ClientError::Transient("503".into()));
            }
            let distinct = {
                let mut seen: Vec<&IdempotencyKey> = keys.iter().collect();
                seen.dedup();
                seen.len()
            };
            Ok(Self::intent(
                TransactionId::new(format!("tx-{distinct}")),
                PaymentStatus::Created,
            ))
        }

        async fn payment_status(&self, transaction_id: &TransactionId) -> Result<IntentView> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.down.load(Ordering::SeqCst) {
                return Err(ClientError::Transient("connection refused".into()));
            }
            Ok(Self::intent(transaction_id.clone(), *self.status.lock().await))
        }

        async fn entitlement(&self) -> Result<EntitlementView> {
            if self.down.load(Ordering::SeqCst) {
                return Err(ClientError::Transient("connection refused".into()));
            }
            Ok(EntitlementView {
                user_id: UserId::new("user-1"),
                credits: 0,
                is_entitled: self.entitled.load(Ordering::SeqCst),
            })
        }
    }

    fn poller(api: Arc<FakeApi>) -> SettlementPoller {
        SettlementPoller::new(api)
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires_and_stops_polling() {
        let api = FakeApi::new();
        let handle = poller(api.clone()).spawn(TransactionId::new("tx-1"));

        let outcome = handle.outcome().await;
        assert_eq!(outcome, PollOutcome::Expired(ExpiryReason::Deadline));

        // Ticks at 5s..595s; the deadline wins the 600s race
        let calls = api.status_calls.load(Ordering::SeqCst);
        assert_eq!(calls, 119);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(api.status_calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settlement_is_seen_on_next_tick() {
        let api = FakeApi::new();
        let handle = poller(api.clone()).spawn(TransactionId::new("tx-1"));

        tokio::time::sleep(Duration::from_secs(12)).await;
        api.settle(PaymentStatus::Approved).await;

        match handle.outcome().await {
            PollOutcome::Reconciled(entitlement) => assert!(entitlement.is_entitled),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_charge_ends_polling_early() {
        let api = FakeApi::new();
        api.settle(PaymentStatus::Rejected).await;

        let outcome = poller(api.clone())
            .spawn(TransactionId::new("tx-1"))
            .outcome()
            .await;
        assert_eq!(
            outcome,
            PollOutcome::Expired(ExpiryReason::Closed(PaymentStatus::Rejected))
        );
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_keep_polling() {
        let api = FakeApi::new();
        api.down.store(true, Ordering::SeqCst);
        let handle = poller(api.clone()).spawn(TransactionId::new("tx-1"));

        tokio::time::sleep(Duration::from_secs(16)).await;
        api.down.store(false, Ordering::SeqCst);
        api.settle(PaymentStatus::Approved).await;

        assert!(matches!(handle.outcome().await, PollOutcome::Reconciled(_)));
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_holds_while_server_hangs() {
        let api = FakeApi::new();
        api.hang.store(true, Ordering::SeqCst);
        let started = Instant::now();

        let outcome = poller(api.clone())
            .spawn(TransactionId::new("tx-1"))
            .outcome()
            .await;

        assert_eq!(outcome, PollOutcome::Expired(ExpiryReason::Deadline));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(600) && elapsed < Duration::from_secs(601));
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_hanging_request() {
        let api = FakeApi::new();
        api.hang.store(true, Ordering::SeqCst);
        let handle = poller(api.clone()).spawn(TransactionId::new("tx-1"));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 1);

        let cancelled_at = Instant::now();
        handle.cancel();
        assert_eq!(handle.outcome().await, PollOutcome::Cancelled);
        assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling() {
        let api = FakeApi::new();
        let handle = poller(api.clone()).spawn(TransactionId::new("tx-1"));

        tokio::time::sleep(Duration::from_secs(11)).await;
        handle.cancel();
        assert_eq!(handle.outcome().await, PollOutcome::Cancelled);

        let calls = api.status_calls.load(Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(api.status_calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_polling() {
        let api = FakeApi::new();
        let handle = poller(api.clone()).spawn(TransactionId::new("tx-1"));
        tokio::time::sleep(Duration::from_secs(6)).await;
        drop(handle);

        let calls = api.status_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(api.status_calls.load(Ordering::SeqCst), calls);
    }
}
