//! # avalia-core
//!
//! Entitlement bookkeeping for the AvalIA PRO unlock.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   grant (exactly once)   ┌──────────────────────┐
//! │ Webhook          │─────────────────────────▶│  EntitlementStore    │
//! │ Reconciler       │                          │  {credits, entitled} │
//! │                  │──┐                       └──────────▲───────────┘
//! └──────────────────┘  │ mark_status                      │ consume (CAS)
//!                       ▼                                  │
//!              ┌──────────────────┐               ┌────────┴─────────┐
//!              │  IntentRegistry  │               │   CreditGuard    │
//!              │  tx → intent     │               │  billable action │
//!              └──────────────────┘               └──────────────────┘
//! ```
//!
//! Both stores are traits with in-memory implementations. All coordination
//! between the webhook path and the polling client goes through the atomic
//! primitives these traits expose.

pub mod credit;
pub mod entitlement;
pub mod error;
pub mod model;
pub mod registry;

pub use credit::{CreditDecision, CreditGuard};
pub use entitlement::{EntitlementStore, Grant, MemoryEntitlementStore, Swap};
pub use error::{CoreError, Result};
pub use model::{
    Entitlement, EntitlementView, IdempotencyKey, IntentView, PaymentIntent, PaymentStatus,
    TransactionId, UserId,
};
pub use registry::{IntentRegistry, MemoryIntentRegistry, Transition};
