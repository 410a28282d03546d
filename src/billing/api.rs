use std::sync::Arc;

use axum::http::HeaderMap;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

use super::models::{SubscriptionPlan, SubscriptionSummary, UsageSummary};
use super::provider::{BillingProvider, CheckoutSessionRequest};
use super::service::BillingService;

#[derive(Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub success_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub checkout_url: String,
}

pub async fn list_plans(
    Extension(pool): Extension<PgPool>,
) -> AppResult<Json<Vec<SubscriptionPlan>>> {
    let plans = sqlx::query_as::<_, SubscriptionPlan>(
        "SELECT id, external_product_id, name, document_limit, features,
                price_monthly_cents, price_yearly_cents, is_active
         FROM subscription_plans
         WHERE is_active = TRUE
         ORDER BY price_monthly_cents ASC NULLS LAST",
    )
    .fetch_all(&pool)
    .await?;
    Ok(Json(plans))
}

pub async fn get_subscription(
    Extension(pool): Extension<PgPool>,
    auth: AuthUser,
) -> AppResult<Json<SubscriptionSummary>> {
    let service = BillingService::new(pool);
    Ok(Json(service.current_subscription(auth.user_id).await?))
}

pub async fn get_usage(
    Extension(pool): Extension<PgPool>,
    auth: AuthUser,
) -> AppResult<Json<UsageSummary>> {
    let service = BillingService::new(pool);
    Ok(Json(service.usage_summary(auth.user_id).await?))
}

/// Starts a hosted checkout. Creates the provider customer (and the seed
/// `free` subscription) on first use; that side effect is deliberately not
/// rolled back when the later session call fails.
pub async fn create_checkout(
    Extension(pool): Extension<PgPool>,
    Extension(provider): Extension<Arc<dyn BillingProvider>>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(req): Json<CheckoutRequest>,
) -> AppResult<Json<CheckoutResponse>> {
    let product_id = match req.product_id.as_deref().map(str::trim) {
        Some(product_id) if !product_id.is_empty() => product_id.to_string(),
        _ => return Err(AppError::BadRequest("product_id is required".into())),
    };
    let user = sqlx::query_as::<_, (String, Option<String>)>(
        "SELECT email, name FROM users WHERE id = $1",
    )
    .bind(auth.user_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::Unauthorized)?;

    let service = BillingService::new(pool.clone());
    let customer = service
        .ensure_customer(auth.user_id, &user.0, user.1.as_deref(), provider.as_ref())
        .await?;

    let origin = headers
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim_end_matches('/').to_string());
    let base = origin
        .unwrap_or_else(|| crate::config::APP_BASE_URL.trim_end_matches('/').to_string());
    let success_url = req
        .success_url
        .unwrap_or_else(|| format!("{}/settings?checkout=success", base));
    let cancel_url = req
        .cancel_url
        .unwrap_or_else(|| format!("{}/settings?checkout=canceled", base));

    let session = provider
        .create_checkout_session(&CheckoutSessionRequest {
            product_id,
            customer_id: customer.external_billing_id.clone(),
            success_url,
            cancel_url,
        })
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;
    Ok(Json(CheckoutResponse {
        checkout_url: session.url,
    }))
}
