//! Mercado Pago Integration
//!
//! PIX charges through `POST /v1/payments` and status lookups through
//! `GET /v1/payments/{id}`.

use std::time::Duration;

use async_trait::async_trait;
use avalia_core::{PaymentStatus, TransactionId, UserId};
use chrono::SecondsFormat;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::checkout::env_secs;
use crate::error::{PaymentError, Result};
use crate::gateway::{Charge, ChargeRequest, ChargeStatus, PaymentGateway};

const DEFAULT_API_BASE: &str = "https://api.mercadopago.com";

/// Mercado Pago client configuration
#[derive(Clone, Debug)]
pub struct MercadoPagoConfig {
    /// Private access token (`APP_USR-...` or `TEST-...`)
    pub access_token: String,

    /// API base URL
    pub api_base: String,

    /// Per-request timeout
    pub timeout: Duration,
}

impl MercadoPagoConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            api_base: DEFAULT_API_BASE.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let access_token = std::env::var("MP_ACCESS_TOKEN")
            .map(|token| token.trim().to_string())
            .map_err(|_| PaymentError::Config("MP_ACCESS_TOKEN not set".into()))?;
        if access_token.is_empty() {
            return Err(PaymentError::Config("MP_ACCESS_TOKEN is empty".into()));
        }

        let api_base = std::env::var("MP_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.into());
        let timeout = env_secs("PROVIDER_TIMEOUT_SECS", Duration::from_secs(10))?;

        Ok(Self {
            access_token,
            api_base,
            timeout,
        })
    }
}

/// Mercado Pago API client
pub struct MercadoPagoClient {
    http: reqwest::Client,
    config: MercadoPagoConfig,
}

impl MercadoPagoClient {
    pub fn new(config: MercadoPagoConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::Config(format!("HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(MercadoPagoConfig::from_env()?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// Turn a non-success response into the matching error class
    async fn error_for(response: reqwest::Response) -> PaymentError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiError>(&body)
            .ok()
            .and_then(|e| e.message)
            .unwrap_or(body);

        match status.as_u16() {
            401 | 403 => {
                tracing::error!(
                    status = status.as_u16(),
                    message = %message,
                    "Mercado Pago refused our access token; all payments are blocked"
                );
                PaymentError::Auth(message)
            }
            429 => PaymentError::Transient(format!("rate limited: {message}")),
            code @ 500..=599 => PaymentError::Transient(format!("{code}: {message}")),
            code => PaymentError::Rejected {
                status: code,
                message,
            },
        }
    }
}

/// Map a Mercado Pago payment status onto the intent lifecycle
pub fn map_status(status: &str) -> PaymentStatus {
    match status {
        "approved" => PaymentStatus::Approved,
        "rejected" | "refunded" | "charged_back" => PaymentStatus::Rejected,
        "cancelled" | "expired" => PaymentStatus::Expired,
        "pending" | "in_process" | "authorized" | "in_mediation" => PaymentStatus::Pending,
        other => {
            tracing::warn!(status = other, "Unknown Mercado Pago status, treating as pending");
            PaymentStatus::Pending
        }
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoClient {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<Charge> {
        let body = CreatePayment {
            transaction_amount: request.amount,
            description: &request.description,
            payment_method_id: "pix",
            external_reference: request.external_reference.as_str(),
            notification_url: request.notification_url.as_deref(),
            date_of_expiration: request
                .expires_at
                .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, false)),
            payer: Payer {
                email: &request.payer_email,
                first_name: "Cliente",
                last_name: "AvalIA",
            },
        };

        let response = self
            .http
            .post(self.url("/v1/payments"))
            .bearer_auth(&self.config.access_token)
            .header("X-Idempotency-Key", request.idempotency_key.as_str())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let payment: PaymentResponse = response.json().await?;
        let data = payment
            .point_of_interaction
            .and_then(|p| p.transaction_data)
            .unwrap_or_default();
        let qr_code = data.qr_code.ok_or_else(|| {
            PaymentError::InvalidResponse(format!("payment {} has no PIX code", payment.id))
        })?;

        Ok(Charge {
            transaction_id: TransactionId::new(payment.id.to_string()),
            status: map_status(&payment.status),
            qr_code,
            qr_code_base64: data.qr_code_base64,
            ticket_url: data.ticket_url,
        })
    }

    async fn fetch_status(&self, transaction_id: &TransactionId) -> Result<ChargeStatus> {
        let response = self
            .http
            .get(self.url(&format!("/v1/payments/{transaction_id}")))
            .bearer_auth(&self.config.access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let payment: PaymentResponse = response.json().await?;

        Ok(ChargeStatus {
            transaction_id: TransactionId::new(payment.id.to_string()),
            status: map_status(&payment.status),
            external_reference: payment
                .external_reference
                .filter(|r| !r.is_empty())
                .map(UserId::new),
            status_detail: payment.status_detail,
        })
    }

    fn name(&self) -> &str {
        "mercadopago"
    }
}

#[derive(Serialize)]
struct CreatePayment<'a> {
    #[serde(with = "rust_decimal::serde::float")]
    transaction_amount: Decimal,
    description: &'a str,
    payment_method_id: &'static str,
    external_reference: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date_of_expiration: Option<String>,
    payer: Payer<'a>,
}

#[derive(Serialize)]
struct Payer<'a> {
    email: &'a str,
    first_name: &'static str,
    last_name: &'static str,
}

#[derive(Deserialize)]
struct PaymentResponse {
    id: u64,
    status: String,
    #[serde(default)]
    status_detail: Option<String>,
    #[serde(default)]
    external_reference: Option<String>,
    #[serde(default)]
    point_of_interaction: Option<PointOfInteraction>,
}

#[derive(Deserialize)]
struct PointOfInteraction {
    #[serde(default)]
    transaction_data: Option<TransactionData>,
}

#[derive(Deserialize, Default)]
struct TransactionData {
    #[serde(default)]
    qr_code: Option<String>,
    #[serde(default)]
    qr_code_base64: Option<String>,
    #[serde(default)]
    ticket_url: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: Option<String>,
}
