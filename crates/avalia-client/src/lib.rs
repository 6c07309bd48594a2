//! # avalia-client
//!
//! Client side of the AvalIA PRO checkout.
//!
//! - [`ApiClient`]: typed calls to the AvalIA server
//! - [`SettlementPoller`]: watches a charge until it settles, closes or expires
//! - [`CheckoutFlow`]: the checkout screen as an explicit state machine
//!
//! ## Usage
//!
//! ```rust,ignore
//! use avalia_client::{ApiClient, CheckoutFlow, CheckoutState};
//!
//! let api = Arc::new(ApiClient::new("http://localhost:3000", UserId::new("user-1"))?);
//! let mut flow = CheckoutFlow::new(api);
//!
//! let charge = flow.begin("buyer@example.com").await?;
//! show_qr(&charge.qr_code);
//!
//! if let CheckoutState::Reconciled { .. } = flow.wait().await? {
//!     // PRO unlocked
//! }
//! ```

pub mod api;
pub mod error;
pub mod flow;
pub mod poller;

pub use api::{AnalysisGrant, ApiClient, CheckoutApi};
pub use error::{ClientError, Result};
pub use flow::{CheckoutFlow, CheckoutState};
pub use poller::{ExpiryReason, PollHandle, PollOutcome, SettlementPoller};
