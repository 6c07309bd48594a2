//! Sandbox Gateway
//!
//! In-memory stand-in for the PIX provider, for local demos and tests.
//! Behaves like the provider where it matters: idempotency keys map to one
//! charge, statuses only move forward, and nothing settles unless told to
//! (or after the optional auto-approval delay).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use avalia_core::{IdempotencyKey, PaymentStatus, TransactionId, UserId};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{PaymentError, Result};
use crate::gateway::{Charge, ChargeRequest, ChargeStatus, PaymentGateway};

struct SandboxCharge {
    status: PaymentStatus,
    external_reference: UserId,
    created_at: Instant,
    charge: Charge,
}

#[derive(Default)]
struct Ledger {
    charges: HashMap<TransactionId, SandboxCharge>,
    by_key: HashMap<IdempotencyKey, TransactionId>,
}

/// Sandbox payment provider
pub struct SandboxGateway {
    ledger: Mutex<Ledger>,
    next_id: AtomicU64,
    auto_approve_after: Option<Duration>,
    outage: AtomicBool,
    latency: Mutex<Duration>,
    create_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl Default for SandboxGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            next_id: AtomicU64::new(1_000_000),
            auto_approve_after: None,
            outage: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
            create_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    /// Approve every charge once it is `delay` old (demo mode)
    pub fn with_auto_approve(delay: Duration) -> Self {
        Self {
            auto_approve_after: Some(delay),
            ..Self::new()
        }
    }

    /// Settle a charge as the payer's bank would
    pub async fn settle(&self, transaction_id: &TransactionId, status: PaymentStatus) -> Result<()> {
        let mut ledger = self.ledger.lock().await;
        let charge = ledger
            .charges
            .get_mut(transaction_id)
            .ok_or_else(|| not_found(transaction_id))?;
        if charge.status.can_advance_to(status) {
            charge.status = status;
        }
        Ok(())
    }

    /// Make every call fail as a provider outage
    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.lock().await = latency;
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    async fn simulate_network(&self) -> Result<()> {
        let latency = *self.latency.lock().await;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.outage.load(Ordering::SeqCst) {
            return Err(PaymentError::Transient("sandbox outage".into()));
        }
        Ok(())
    }
}

fn not_found(transaction_id: &TransactionId) -> PaymentError {
    PaymentError::Rejected {
        status: 404,
        message: format!("payment {transaction_id} not found"),
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<Charge> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_network().await?;

        if !request.payer_email.contains('@') {
            return Err(PaymentError::Rejected {
                status: 400,
                message: "payer.email must be a valid email".into(),
            });
        }

        let mut ledger = self.ledger.lock().await;
        if let Some(existing) = ledger
            .by_key
            .get(&request.idempotency_key)
            .and_then(|tx| ledger.charges.get(tx))
        {
            return Ok(existing.charge.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let transaction_id = TransactionId::new(id.to_string());
        let charge = Charge {
            transaction_id: transaction_id.clone(),
            status: PaymentStatus::Pending,
            qr_code: format!(
                "00020101021226580014BR.GOV.BCB.PIX0136sandbox-{id}5204000053039865405{}5802BR5913AvalIA Sandbox6304ABCD",
                request.amount
            ),
            qr_code_base64: None,
            ticket_url: None,
        };

        ledger
            .by_key
            .insert(request.idempotency_key.clone(), transaction_id.clone());
        ledger.charges.insert(
            transaction_id,
            SandboxCharge {
                status: PaymentStatus::Pending,
                external_reference: request.external_reference.clone(),
                created_at: Instant::now(),
                charge: charge.clone(),
            },
        );

        tracing::debug!(transaction_id = id, "Sandbox charge created");
        Ok(charge)
    }

    async fn fetch_status(&self, transaction_id: &TransactionId) -> Result<ChargeStatus> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_network().await?;

        let mut ledger = self.ledger.lock().await;
        let charge = ledger
            .charges
            .get_mut(transaction_id)
            .ok_or_else(|| not_found(transaction_id))?;

        if let Some(delay) = self.auto_approve_after {
            if !charge.status.is_terminal() && charge.created_at.elapsed() >= delay {
                charge.status = PaymentStatus::Approved;
            }
        }

        Ok(ChargeStatus {
            transaction_id: transaction_id.clone(),
            status: charge.status,
            external_reference: Some(charge.external_reference.clone()),
            status_detail: None,
        })
    }

    fn name(&self) -> &str {
        "sandbox"
    }
}
