use axum::body::Bytes;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use sqlx::PgPool;

use crate::error::{AppError, AppResult};

use super::service::{BillingService, SubscriptionUpsert};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "polar-signature";

/// Checks the provider signature: lowercase hex HMAC-SHA256 over the raw
/// request body. The comparison happens inside the MAC, so it is constant
/// time.
pub fn verify_signature(secret: &[u8], body: &[u8], signature_hex: &str) -> bool {
    let signature = match hex::decode(signature_hex.trim()) {
        Ok(signature) => signature,
        Err(_) => return false,
    };
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

#[derive(Deserialize)]
struct EventEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct SubscriptionPayload {
    id: String,
    #[serde(default)]
    customer_id: Option<String>,
    #[serde(default)]
    product_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    current_period_start: Option<DateTime<Utc>>,
    #[serde(default)]
    current_period_end: Option<DateTime<Utc>>,
    #[serde(default)]
    cancel_at_period_end: Option<bool>,
}

/// Webhook entry point. Rejects unsigned calls before touching the payload,
/// then applies lifecycle events idempotently. Business-level oddities
/// (unknown event types, unknown customers) are logged and acked with 200 so
/// the provider does not retry them forever; only genuine processing errors
/// surface as 5xx.
pub async fn polar_webhook(
    Extension(pool): Extension<PgPool>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !verify_signature(
        crate::config::POLAR_WEBHOOK_SECRET.as_bytes(),
        &body,
        signature,
    ) {
        return Err(AppError::Unauthorized);
    }

    // A correctly signed body we cannot parse is a processing failure, not a
    // caller mistake; 5xx lets the provider retry the delivery.
    let envelope: EventEnvelope = serde_json::from_slice(&body)
        .map_err(|e| AppError::Message(format!("malformed event payload: {}", e)))?;
    let service = BillingService::new(pool);
    let external_id = envelope
        .data
        .get("id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    service
        .record_event(&envelope.event_type, external_id.as_deref(), &envelope.data)
        .await?;

    match envelope.event_type.as_str() {
        "subscription.created" | "subscription.updated" => {
            match serde_json::from_value::<SubscriptionPayload>(envelope.data.clone()) {
                Ok(payload) => match payload.customer_id.as_deref() {
                    Some(customer_id) => {
                        service
                            .upsert_subscription(&SubscriptionUpsert {
                                external_subscription_id: &payload.id,
                                external_customer_id: customer_id,
                                external_product_id: payload.product_id.as_deref(),
                                provider_status: payload.status.as_deref(),
                                current_period_start: payload.current_period_start,
                                current_period_end: payload.current_period_end,
                                cancel_at_period_end: payload.cancel_at_period_end,
                            })
                            .await?;
                    }
                    None => {
                        tracing::warn!(
                            event = %envelope.event_type,
                            subscription = %payload.id,
                            "subscription event without customer_id, skipping"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        event = %envelope.event_type,
                        error = %e,
                        "could not parse subscription payload, skipping"
                    );
                }
            }
        }
        "subscription.canceled" => match envelope.data.get("id").and_then(|v| v.as_str()) {
            Some(subscription_id) => {
                if !service.mark_canceled(subscription_id).await? {
                    tracing::warn!(
                        subscription = subscription_id,
                        "cancellation for unknown subscription"
                    );
                }
            }
            None => tracing::warn!("cancellation event without subscription id"),
        },
        "checkout.created" | "order.paid" => {
            tracing::info!(event = %envelope.event_type, "billing event acknowledged");
        }
        other => {
            tracing::info!(event = other, "unhandled billing event type");
        }
    }

    Ok(Json(json!({ "received": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &[u8], body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_accepted() {
        let secret = b"whsec_test";
        let body = br#"{"type":"subscription.updated","data":{"id":"sub_1"}}"#;
        let signature = sign(secret, body);
        assert!(verify_signature(secret, body, &signature));
    }

    #[test]
    fn tampered_body_rejected() {
        let secret = b"whsec_test";
        let signature = sign(secret, b"original body");
        assert!(!verify_signature(secret, b"tampered body", &signature));
    }

    #[test]
    fn wrong_secret_rejected() {
        let body = b"payload";
        let signature = sign(b"whsec_a", body);
        assert!(!verify_signature(b"whsec_b", body, &signature));
    }

    #[test]
    fn garbage_signature_rejected() {
        assert!(!verify_signature(b"whsec_test", b"payload", "not-hex"));
        assert!(!verify_signature(b"whsec_test", b"payload", ""));
    }
}
