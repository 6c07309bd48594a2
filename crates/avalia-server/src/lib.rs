//! # avalia-server
//!
//! HTTP surface of the AvalIA PRO unlock.
//!
//! ```text
//!  GET  /health
//!  GET  /api/entitlement               credits + PRO flag
//!  POST /api/analyses                  billable action (402 when out of credits)
//!  POST /api/payments/pix              create the PIX charge
//!  GET  /api/payments/{transaction_id} charge status (re-verified when stale)
//!  POST /webhook/mercadopago           provider notifications
//! ```
//!
//! Callers are identified by the `x-user-id` header set by the
//! authenticating edge.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use config::{PaymentsMode, ServerConfig};
pub use error::{ApiError, ErrorResponse};
pub use state::AppState;

/// Build the application router
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        // Credits
        .route("/api/entitlement", get(handlers::get_entitlement))
        .route("/api/analyses", post(handlers::run_analysis))
        // Payments
        .route("/api/payments/pix", post(handlers::create_pix_charge))
        .route(
            "/api/payments/{transaction_id}",
            get(handlers::get_payment_status),
        )
        .route("/webhook/mercadopago", post(handlers::mercadopago_webhook))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
