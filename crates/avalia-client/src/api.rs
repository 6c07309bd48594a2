//! API Client
//!
//! Typed access to the AvalIA server routes the checkout flow needs.

use std::time::Duration;

use async_trait::async_trait;
use avalia_core::{EntitlementView, IdempotencyKey, IntentView, TransactionId, UserId};
use serde::Deserialize;

use crate::error::{ClientError, Result};

/// What the checkout flow needs from the server
#[async_trait]
pub trait CheckoutApi: Send + Sync {
    /// Request a PIX charge; the same key always yields the same charge
    async fn create_pix_charge(&self, email: &str, key: &IdempotencyKey) -> Result<IntentView>;

    /// Current status of one of our charges
    async fn payment_status(&self, transaction_id: &TransactionId) -> Result<IntentView>;

    /// Our credits and entitlement
    async fn entitlement(&self) -> Result<EntitlementView>;
}

/// Result of a billable analysis request
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AnalysisGrant {
    pub allowed: bool,
    pub unlimited: bool,
    pub credits_remaining: Option<u32>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    code: String,
}

/// HTTP client for the AvalIA server
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    user_id: UserId,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, user_id: UserId) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ClientError::Transient(format!("http client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id,
        })
    }

    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(self.url(path))
            .header("x-user-id", self.user_id.as_str())
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(self.url(path))
            .header("x-user-id", self.user_id.as_str())
    }

    async fn read<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status().as_u16();
        if response.status().is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<ErrorBody>(&body).ok();

        match status {
            402 => Err(ClientError::UpgradeRequired),
            429 | 500..=599 => Err(ClientError::Transient(
                parsed.map_or_else(|| format!("status {status}"), |b| b.error),
            )),
            _ => Err(match parsed {
                Some(ErrorBody { error, code }) => ClientError::Api {
                    status,
                    code,
                    message: error,
                },
                None => ClientError::Api {
                    status,
                    code: "UNKNOWN".into(),
                    message: format!("status {status}"),
                },
            }),
        }
    }

    /// Run one billable analysis; `UpgradeRequired` when out of credits
    pub async fn consume_analysis(&self) -> Result<AnalysisGrant> {
        let response = self.post("/api/analyses").send().await?;
        Self::read(response).await
    }
}

#[async_trait]
impl CheckoutApi for ApiClient {
    async fn create_pix_charge(&self, email: &str, key: &IdempotencyKey) -> Result<IntentView> {
        let response = self
            .post("/api/payments/pix")
            .header("Idempotency-Key", key.as_str())
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await?;
        Self::read(response).await
    }

    async fn payment_status(&self, transaction_id: &TransactionId) -> Result<IntentView> {
        let response = self
            .get(&format!("/api/payments/{transaction_id}"))
            .send()
            .await?;
        Self::read(response).await
    }

    async fn entitlement(&self) -> Result<EntitlementView> {
        let response = self.get("/api/entitlement").send().await?;
        Self::read(response).await
    }
}
