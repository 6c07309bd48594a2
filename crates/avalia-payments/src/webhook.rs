//! Mercado Pago Webhook Notifications
//!
//! Parses inbound notifications and checks the optional `x-signature`
//! header. Nothing here is trusted to carry a payment status: a notification
//! only names the transaction that should be re-verified.

use std::collections::HashMap;

use avalia_core::TransactionId;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::error::{PaymentError, Result};

type HmacSha256 = Hmac<Sha256>;

/// What we take from an inbound notification
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WebhookNotification {
    /// Transaction to re-verify
    pub transaction_id: Option<TransactionId>,

    /// Event type hint (`payment`, `payment.updated`, `merchant_order`, ...)
    pub event_hint: Option<String>,

    /// `data.id` query parameter, part of the signed manifest
    pub signed_data_id: Option<String>,
}

impl WebhookNotification {
    /// Parse a notification from its query parameters and raw body
    ///
    /// The provider is inconsistent across notification kinds, so the
    /// transaction id is looked up in a fixed order: `data.id` in the body,
    /// `id` in the body, `id` in the query, `data.id` in the query. The
    /// event hint follows `type`/`action` in the body, then `topic`/`type` in
    /// the query. An empty or non-JSON body is tolerated.
    pub fn parse(query: &HashMap<String, String>, body: &[u8]) -> Self {
        let json: Value = if body.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(body).unwrap_or_else(|e| {
                tracing::debug!(error = %e, "Webhook body is not JSON");
                Value::Null
            })
        };

        let transaction_id = json
            .pointer("/data/id")
            .and_then(json_id)
            .or_else(|| json.get("id").and_then(json_id))
            .or_else(|| query_value(query, "id"))
            .or_else(|| query_value(query, "data.id"))
            .map(TransactionId::new);

        let event_hint = ["type", "action"]
            .iter()
            .find_map(|field| json.get(*field).and_then(Value::as_str))
            .map(str::to_string)
            .filter(|s| !s.is_empty())
            .or_else(|| query_value(query, "topic"))
            .or_else(|| query_value(query, "type"));

        Self {
            transaction_id,
            event_hint,
            signed_data_id: query_value(query, "data.id"),
        }
    }

    /// Whether this notification concerns a payment
    ///
    /// A missing hint counts as a payment: verification against the provider
    /// decides anyway.
    pub fn is_payment_event(&self) -> bool {
        self.event_hint
            .as_deref()
            .is_none_or(|hint| hint.contains("payment"))
    }
}

fn query_value(query: &HashMap<String, String>, key: &str) -> Option<String> {
    query
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Ids arrive as JSON numbers or strings depending on the notification kind
fn json_id(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Verifies Mercado Pago's `x-signature` header
///
/// The header is `ts=<unix>,v1=<hex hmac>`; the HMAC-SHA256 is computed over
/// `id:<data.id>;request-id:<x-request-id>;ts:<ts>;`, omitting the parts
/// that are absent from the request.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Create from `MP_WEBHOOK_SECRET`, if set
    pub fn from_env() -> Option<Self> {
        std::env::var("MP_WEBHOOK_SECRET")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(Self::new)
    }

    fn manifest(data_id: Option<&str>, request_id: Option<&str>, ts: &str) -> String {
        let mut manifest = String::new();
        if let Some(id) = data_id {
            let id = if id.chars().all(char::is_alphanumeric) {
                id.to_lowercase()
            } else {
                id.to_string()
            };
            manifest.push_str(&format!("id:{id};"));
        }
        if let Some(request_id) = request_id {
            manifest.push_str(&format!("request-id:{request_id};"));
        }
        manifest.push_str(&format!("ts:{ts};"));
        manifest
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| PaymentError::Config(format!("webhook secret: {e}")))
    }

    /// Compute the header value the provider would send (used by tests and tooling)
    pub fn sign(&self, data_id: Option<&str>, request_id: Option<&str>, ts: &str) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(Self::manifest(data_id, request_id, ts).as_bytes());
        Ok(format!(
            "ts={ts},v1={}",
            hex::encode(mac.finalize().into_bytes())
        ))
    }

    /// Check a signature header against the request's `data.id` and `x-request-id`
    pub fn verify(
        &self,
        signature_header: Option<&str>,
        request_id: Option<&str>,
        data_id: Option<&str>,
    ) -> Result<()> {
        let header = signature_header
            .ok_or_else(|| PaymentError::WebhookSignature("missing x-signature header".into()))?;

        let mut ts = None;
        let mut v1 = None;
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("ts", value)) => ts = Some(value.trim()),
                Some(("v1", value)) => v1 = Some(value.trim()),
                _ => {}
            }
        }

        let ts = ts.ok_or_else(|| PaymentError::WebhookSignature("missing ts".into()))?;
        let v1 = v1.ok_or_else(|| PaymentError::WebhookSignature("missing v1".into()))?;
        let expected =
            hex::decode(v1).map_err(|_| PaymentError::WebhookSignature("v1 is not hex".into()))?;

        let mut mac = self.mac()?;
        mac.update(Self::manifest(data_id, request_id, ts).as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| PaymentError::WebhookSignature("digest mismatch".into()))
    }
}
