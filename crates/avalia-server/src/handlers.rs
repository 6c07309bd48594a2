//! HTTP Handlers

use std::collections::HashMap;

use avalia_core::{CreditDecision, EntitlementView, IdempotencyKey, IntentView, TransactionId};
use avalia_payments::WebhookNotification;
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub payments: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisResponse {
    pub allowed: bool,
    pub unlimited: bool,
    pub credits_remaining: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PixChargeRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        payments: state
            .payments
            .as_ref()
            .map_or_else(|| "disabled".to_string(), |p| p.provider.clone()),
    })
}

/// Caller's credits and PRO flag
pub async fn get_entitlement(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<EntitlementView>, ApiError> {
    let entitlement = state
        .entitlements
        .get_or_create(&user_id, state.starting_credits)
        .await?;
    Ok(Json(entitlement.view()))
}

/// Billable action: one pricing analysis
pub async fn run_analysis(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<AnalysisResponse>, ApiError> {
    match state.credits.consume(&user_id).await? {
        CreditDecision::Unlimited => Ok(Json(AnalysisResponse {
            allowed: true,
            unlimited: true,
            credits_remaining: None,
        })),
        CreditDecision::Allowed { remaining } => Ok(Json(AnalysisResponse {
            allowed: true,
            unlimited: false,
            credits_remaining: Some(remaining),
        })),
        CreditDecision::InsufficientCredits => Err(ApiError::UpgradeRequired),
    }
}

/// Create the PRO unlock PIX charge
///
/// The `Idempotency-Key` header makes retries safe; without it every call is
/// a new checkout attempt.
pub async fn create_pix_charge(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
    Json(payload): Json<PixChargeRequest>,
) -> Result<Json<IntentView>, ApiError> {
    let payments = state.payments()?;

    let key = header(&headers, "idempotency-key")
        .map_or_else(IdempotencyKey::generate, IdempotencyKey::from_string);

    let intent = payments
        .charges
        .create_charge(&user_id, payload.email.trim(), key)
        .await?;

    Ok(Json(intent.view()))
}

/// Caller's charge, re-verified with the provider when the last check is stale
pub async fn get_payment_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(transaction_id): Path<String>,
) -> Result<Json<IntentView>, ApiError> {
    let transaction_id = TransactionId::new(transaction_id);
    let not_found = || ApiError::NotFound(format!("payment {transaction_id}"));

    let intent = state
        .registry
        .get(&transaction_id)
        .await?
        .filter(|intent| intent.user_id == user_id)
        .ok_or_else(not_found)?;

    let stale = intent.last_checked_at.is_none_or(|checked| {
        (Utc::now() - checked)
            .to_std()
            .is_ok_and(|age| age >= state.reconcile_stale_after)
    });

    if intent.status.is_terminal() || !stale {
        return Ok(Json(intent.view()));
    }

    let Some(payments) = &state.payments else {
        return Ok(Json(intent.view()));
    };

    if let Err(e) = payments
        .reconciler
        .reconcile_transaction(&transaction_id)
        .await
    {
        tracing::warn!(
            transaction_id = %transaction_id,
            error = %e,
            "Status refresh failed, serving stored status"
        );
        return Ok(Json(intent.view()));
    }

    let refreshed = state
        .registry
        .get(&transaction_id)
        .await?
        .ok_or_else(not_found)?;
    Ok(Json(refreshed.view()))
}

/// Mercado Pago notification endpoint
///
/// Acknowledges everything it has dealt with, including duplicates and
/// notifications it cannot use, so the provider stops redelivering. Only
/// retryable failures answer 503.
pub async fn mercadopago_webhook(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let payments = state.payments()?;
    let notification = WebhookNotification::parse(&query, &body);

    if let Some(verifier) = &state.webhook_verifier {
        let data_id = notification
            .signed_data_id
            .clone()
            .or_else(|| notification.transaction_id.as_ref().map(ToString::to_string));

        verifier
            .verify(
                header(&headers, "x-signature"),
                header(&headers, "x-request-id"),
                data_id.as_deref(),
            )
            .inspect_err(|e| tracing::warn!(error = %e, "Webhook signature rejected"))?;
    }

    match payments.reconciler.handle(&notification).await {
        Ok(outcome) => {
            tracing::debug!(outcome = ?outcome, "Webhook processed");
        }
        Err(e) if e.is_retryable() => {
            tracing::warn!(
                transaction_id = ?notification.transaction_id,
                error = %e,
                "Webhook processing failed, asking for redelivery"
            );
            return Err(e.into());
        }
        Err(e) => {
            tracing::error!(
                transaction_id = ?notification.transaction_id,
                error = %e,
                "Webhook processing failed permanently, acknowledging"
            );
        }
    }

    Ok(Json(WebhookAck { received: true }))
}
