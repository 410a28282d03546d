use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

/// The slice of the billing provider's API this backend drives: remote
/// customer creation and hosted checkout sessions. Lifecycle changes flow
/// back through the webhook, not through this trait.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn create_customer(
        &self,
        email: &str,
        name: Option<&str>,
        external_id: &str,
    ) -> anyhow::Result<ProviderCustomer>;

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> anyhow::Result<CheckoutSession>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderCustomer {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub product_id: String,
    pub customer_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// Thin Polar REST client. Base URL and access token are injected so tests
/// can point it at a local mock server.
pub struct PolarClient {
    base: String,
    token: String,
    client: reqwest::Client,
}

impl PolarClient {
    pub fn new(base: String, token: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build http client");
        Self {
            base,
            token,
            client,
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            crate::config::POLAR_API_BASE.clone(),
            crate::config::POLAR_ACCESS_TOKEN.clone(),
        )
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> anyhow::Result<T> {
        let url = format!("{}{}", self.base.trim_end_matches('/'), path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("polar {} returned {}: {}", path, status, body);
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl BillingProvider for PolarClient {
    async fn create_customer(
        &self,
        email: &str,
        name: Option<&str>,
        external_id: &str,
    ) -> anyhow::Result<ProviderCustomer> {
        let mut body = serde_json::json!({
            "email": email,
            "external_id": external_id,
        });
        if let Some(name) = name {
            body["name"] = serde_json::Value::String(name.to_string());
        }
        self.post_json("/customers", &body).await
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> anyhow::Result<CheckoutSession> {
        let body = serde_json::json!({
            "products": [request.product_id],
            "customer_id": request.customer_id,
            "success_url": request.success_url,
            "cancel_url": request.cancel_url,
        });
        self.post_json("/checkouts", &body).await
    }
}
