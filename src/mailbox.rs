use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::extract::Path;
use axum::{Extension, Json};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config;
use crate::error::{AppError, AppResult};
use crate::extractor::{AuthUser, ServiceToken};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GmailConnection {
    pub id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expires_at: DateTime<Utc>,
    pub last_history_id: Option<String>,
    pub is_active: bool,
}

pub struct GoogleOAuthClient {
    token_url: String,
    client_id: String,
    client_secret: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
pub struct RefreshedToken {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

impl GoogleOAuthClient {
    pub fn new(token_url: String, client_id: String, client_secret: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(10))
            .build()
            .expect("failed to build http client");
        Self {
            token_url,
            client_id,
            client_secret,
            client,
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            config::GOOGLE_TOKEN_URL.clone(),
            config::GOOGLE_CLIENT_ID.clone(),
            config::GOOGLE_CLIENT_SECRET.clone(),
        )
    }

    pub async fn refresh_access_token(&self, refresh_token: &str) -> anyhow::Result<RefreshedToken> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("token refresh returned {}: {}", status, body);
        }
        Ok(response.json::<RefreshedToken>().await?)
    }
}

pub struct GmailClient {
    base: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchResponse {
    #[serde(default)]
    pub history_id: Option<String>,
    #[serde(default)]
    pub expiration: Option<String>,
}

impl GmailClient {
    pub fn new(base: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(10))
            .build()
            .expect("failed to build http client");
        Self { base, client }
    }

    pub fn from_env() -> Self {
        Self::new(config::GMAIL_API_BASE.clone())
    }

    /// Re-registers the push notification watch for the mailbox the token
    /// belongs to.
    pub async fn register_watch(
        &self,
        access_token: &str,
        topic: &str,
        labels: &[String],
    ) -> anyhow::Result<WatchResponse> {
        let url = format!("{}/gmail/v1/users/me/watch", self.base.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&json!({
                "topicName": topic,
                "labelIds": labels,
                "labelFilterBehavior": "INCLUDE",
            }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("watch registration returned {}: {}", status, body);
        }
        Ok(response.json::<WatchResponse>().await?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RenewalReport {
    pub renewed: u32,
    pub failed: u32,
}

/// Periodic renewal of Gmail push registrations. The notification topic and
/// label filter are injected at construction rather than read ambiently, so
/// tests and alternate deployments can swap them.
pub struct WatchRenewer {
    pool: PgPool,
    oauth: GoogleOAuthClient,
    gmail: GmailClient,
    topic: String,
    labels: Vec<String>,
}

impl WatchRenewer {
    pub fn new(
        pool: PgPool,
        oauth: GoogleOAuthClient,
        gmail: GmailClient,
        topic: String,
        labels: Vec<String>,
    ) -> Self {
        Self {
            pool,
            oauth,
            gmail,
            topic,
            labels,
        }
    }

    pub fn from_env(pool: PgPool) -> Self {
        Self::new(
            pool,
            GoogleOAuthClient::from_env(),
            GmailClient::from_env(),
            config::GMAIL_PUBSUB_TOPIC.clone(),
            config::GMAIL_WATCH_LABELS.clone(),
        )
    }

    /// Renews every active connection, isolating failures per connection.
    /// Only the initial table scan can fail the whole pass.
    pub async fn run_once(&self) -> AppResult<RenewalReport> {
        let connections = sqlx::query_as::<_, GmailConnection>(
            "SELECT id, user_id, email, access_token, refresh_token, token_expires_at,
                    last_history_id, is_active
             FROM gmail_connections WHERE is_active = TRUE",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut report = RenewalReport::default();
        for connection in connections {
            match self.renew_connection(&connection).await {
                Ok(()) => report.renewed += 1,
                Err(e) => {
                    tracing::warn!(
                        connection = %connection.id,
                        email = %connection.email,
                        error = %e,
                        "watch renewal failed"
                    );
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn renew_connection(&self, connection: &GmailConnection) -> anyhow::Result<()> {
        let mut access_token = connection.access_token.clone();
        if connection.token_expires_at <= Utc::now() {
            match self.oauth.refresh_access_token(&connection.refresh_token).await {
                Ok(refreshed) => {
                    let expires_at = Utc::now() + Duration::seconds(refreshed.expires_in);
                    sqlx::query(
                        "UPDATE gmail_connections
                         SET access_token = $1, token_expires_at = $2, updated_at = now()
                         WHERE id = $3",
                    )
                    .bind(&refreshed.access_token)
                    .bind(expires_at)
                    .bind(connection.id)
                    .execute(&self.pool)
                    .await?;
                    access_token = refreshed.access_token;
                }
                Err(e) => {
                    // A dead refresh token will not come back on its own;
                    // retire the connection instead of retrying it forever.
                    sqlx::query(
                        "UPDATE gmail_connections
                         SET is_active = FALSE, updated_at = now()
                         WHERE id = $1",
                    )
                    .bind(connection.id)
                    .execute(&self.pool)
                    .await?;
                    anyhow::bail!("refresh failed, connection deactivated: {}", e);
                }
            }
        }
        let watch = self
            .gmail
            .register_watch(&access_token, &self.topic, &self.labels)
            .await?;
        match watch.history_id {
            Some(history_id) => {
                // Gmail reports the watch expiry as epoch milliseconds in a
                // string field.
                let watch_expires_at = watch
                    .expiration
                    .as_deref()
                    .and_then(|ms| ms.parse::<i64>().ok())
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
                sqlx::query(
                    "UPDATE gmail_connections
                     SET last_history_id = $1, watch_expires_at = $2, updated_at = now()
                     WHERE id = $3",
                )
                .bind(&history_id)
                .bind(watch_expires_at)
                .bind(connection.id)
                .execute(&self.pool)
                .await?;
                Ok(())
            }
            // Connection stays active; the next pass retries it.
            None => anyhow::bail!("watch response missing historyId"),
        }
    }
}

pub fn spawn_watch_renewal(pool: PgPool) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let renewer = WatchRenewer::from_env(pool);
        let mut ticker = tokio::time::interval(StdDuration::from_secs(
            *config::GMAIL_WATCH_SCAN_INTERVAL_SECS,
        ));
        loop {
            ticker.tick().await;
            match renewer.run_once().await {
                Ok(report) => tracing::info!(
                    renewed = report.renewed,
                    failed = report.failed,
                    "gmail watch renewal pass complete"
                ),
                Err(e) => tracing::error!(error = %e, "gmail watch renewal pass failed"),
            }
        }
    })
}

/// Service-role endpoint mirroring the scheduled job, for external cron
/// triggers and operators.
pub async fn renew_watches(
    _service: ServiceToken,
    Extension(renewer): Extension<Arc<WatchRenewer>>,
) -> AppResult<Json<Value>> {
    let report = renewer.run_once().await?;
    Ok(Json(json!({
        "ok": true,
        "renewed": report.renewed,
        "failed": report.failed,
    })))
}

/// Token columns stay out of this projection; the settings page only needs
/// connection health.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MailboxSummary {
    pub id: Uuid,
    pub email: String,
    pub is_active: bool,
    pub last_history_id: Option<String>,
    pub watch_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub async fn list_mailboxes(
    Extension(pool): Extension<PgPool>,
    auth: AuthUser,
) -> AppResult<Json<Vec<MailboxSummary>>> {
    let mailboxes = sqlx::query_as::<_, MailboxSummary>(
        "SELECT id, email, is_active, last_history_id, watch_expires_at, created_at
         FROM gmail_connections WHERE user_id = $1
         ORDER BY created_at DESC",
    )
    .bind(auth.user_id)
    .fetch_all(&pool)
    .await?;
    Ok(Json(mailboxes))
}

pub async fn disconnect_mailbox(
    Extension(pool): Extension<PgPool>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let result = sqlx::query("DELETE FROM gmail_connections WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(auth.user_id)
        .execute(&pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok(Json(json!({ "deleted": true })))
}
