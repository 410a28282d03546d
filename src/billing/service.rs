use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::models::{
    Customer, Subscription, SubscriptionPlan, SubscriptionStatus, SubscriptionSummary,
    UsageSummary,
};
use super::provider::BillingProvider;

/// Usage rows are keyed by wall-clock month; a new month implicitly starts a
/// fresh counter.
pub fn month_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// Normalized view of a provider subscription lifecycle event, as the
/// reconciler hands it to the store.
#[derive(Debug)]
pub struct SubscriptionUpsert<'a> {
    pub external_subscription_id: &'a str,
    pub external_customer_id: &'a str,
    pub external_product_id: Option<&'a str>,
    pub provider_status: Option<&'a str>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: Option<bool>,
}

pub struct BillingService {
    pool: PgPool,
}

impl BillingService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_customer(&self, user_id: Uuid) -> AppResult<Option<Customer>> {
        let customer = sqlx::query_as::<_, Customer>(
            "SELECT id, user_id, external_billing_id, email, name, created_at
             FROM customers WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(customer)
    }

    /// Returns the user's customer record, creating it remotely and locally
    /// on first use. The local insert and the seed `free` subscription commit
    /// in one transaction, so a customer row never exists without one.
    pub async fn ensure_customer(
        &self,
        user_id: Uuid,
        email: &str,
        name: Option<&str>,
        provider: &dyn BillingProvider,
    ) -> AppResult<Customer> {
        if let Some(existing) = self.find_customer(user_id).await? {
            return Ok(existing);
        }
        let remote = provider
            .create_customer(email, name, &user_id.to_string())
            .await
            .map_err(|e| AppError::Upstream(e.to_string()))?;

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query_as::<_, Customer>(
            "INSERT INTO customers (user_id, external_billing_id, email, name)
             VALUES ($1, $2, $3, $4)
             RETURNING id, user_id, external_billing_id, email, name, created_at",
        )
        .bind(user_id)
        .bind(&remote.id)
        .bind(email)
        .bind(name)
        .fetch_one(&mut tx)
        .await;
        let customer = match inserted {
            Ok(customer) => customer,
            Err(sqlx::Error::Database(db))
                if db.constraint() == Some("customers_user_id_key") =>
            {
                // Lost a race with a concurrent first checkout; the winner's
                // row is authoritative.
                tx.rollback().await?;
                return self
                    .find_customer(user_id)
                    .await?
                    .ok_or_else(|| AppError::Message("customer row missing after unique violation".into()));
            }
            Err(e) => return Err(AppError::Db(e)),
        };
        let free_plan_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM subscription_plans WHERE external_product_id = 'free'",
        )
        .fetch_optional(&mut tx)
        .await?;
        sqlx::query("INSERT INTO subscriptions (customer_id, plan_id, status) VALUES ($1, $2, 'free')")
            .bind(customer.id)
            .bind(free_plan_id)
            .execute(&mut tx)
            .await?;
        tx.commit().await?;
        Ok(customer)
    }

    pub async fn plan_by_external_id(
        &self,
        external_product_id: &str,
    ) -> AppResult<Option<SubscriptionPlan>> {
        let plan = sqlx::query_as::<_, SubscriptionPlan>(
            "SELECT id, external_product_id, name, document_limit, features,
                    price_monthly_cents, price_yearly_cents, is_active
             FROM subscription_plans WHERE external_product_id = $1",
        )
        .bind(external_product_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(plan)
    }

    async fn plan_by_id(&self, plan_id: Uuid) -> AppResult<Option<SubscriptionPlan>> {
        let plan = sqlx::query_as::<_, SubscriptionPlan>(
            "SELECT id, external_product_id, name, document_limit, features,
                    price_monthly_cents, price_yearly_cents, is_active
             FROM subscription_plans WHERE id = $1",
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(plan)
    }

    /// Current subscription, selected by most recent creation. A user with no
    /// persisted row gets a synthetic `free` summary; nothing is written.
    pub async fn current_subscription(&self, user_id: Uuid) -> AppResult<SubscriptionSummary> {
        let row = sqlx::query_as::<_, Subscription>(
            "SELECT s.id, s.customer_id, s.plan_id, s.external_subscription_id, s.status,
                    s.current_period_start, s.current_period_end, s.cancel_at_period_end,
                    s.created_at, s.updated_at
             FROM subscriptions s
             JOIN customers c ON c.id = s.customer_id
             WHERE c.user_id = $1
             ORDER BY s.created_at DESC
             LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(subscription) => {
                let plan = match subscription.plan_id {
                    Some(plan_id) => self.plan_by_id(plan_id).await?,
                    None => None,
                };
                Ok(SubscriptionSummary {
                    status: subscription.status_kind(),
                    plan,
                    current_period_start: subscription.current_period_start,
                    current_period_end: subscription.current_period_end,
                    cancel_at_period_end: subscription.cancel_at_period_end,
                })
            }
            None => {
                let plan = self.plan_by_external_id("free").await?;
                Ok(SubscriptionSummary {
                    status: SubscriptionStatus::Free,
                    plan,
                    current_period_start: None,
                    current_period_end: None,
                    cancel_at_period_end: false,
                })
            }
        }
    }

    /// Effective monthly document limit. `None` means unbounded; a missing or
    /// unmatched plan falls back to the configured conservative default.
    pub async fn document_limit(&self, user_id: Uuid) -> AppResult<Option<i64>> {
        let summary = self.current_subscription(user_id).await?;
        Ok(match summary.plan {
            Some(plan) => plan.document_limit,
            None => Some(*crate::config::DEFAULT_DOCUMENT_LIMIT),
        })
    }

    pub async fn usage_count(&self, user_id: Uuid, month_year: &str) -> AppResult<i64> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT document_count FROM document_usage WHERE user_id = $1 AND month_year = $2",
        )
        .bind(user_id)
        .bind(month_year)
        .fetch_optional(&self.pool)
        .await?;
        Ok(count.unwrap_or(0))
    }

    pub async fn can_upload(&self, user_id: Uuid) -> AppResult<bool> {
        match self.document_limit(user_id).await? {
            None => Ok(true),
            Some(limit) => {
                let used = self.usage_count(user_id, &month_key(Utc::now())).await?;
                Ok(used < limit)
            }
        }
    }

    /// key: billing-usage -> one conditional upsert; the WHERE arm makes
    /// concurrent increments for the same (user, month) serialize in the
    /// database instead of racing a read-modify-write. Returns `false`
    /// without mutating anything once the limit is reached.
    pub async fn try_increment_usage(&self, user_id: Uuid) -> AppResult<bool> {
        let month = month_key(Utc::now());
        match self.document_limit(user_id).await? {
            None => {
                sqlx::query(
                    "INSERT INTO document_usage (user_id, month_year, document_count)
                     VALUES ($1, $2, 1)
                     ON CONFLICT (user_id, month_year)
                     DO UPDATE SET document_count = document_usage.document_count + 1,
                                   updated_at = now()",
                )
                .bind(user_id)
                .bind(&month)
                .execute(&self.pool)
                .await?;
                Ok(true)
            }
            // The unguarded INSERT arm below would admit one document even at
            // limit zero, so short-circuit here.
            Some(limit) if limit <= 0 => Ok(false),
            Some(limit) => {
                let result = sqlx::query(
                    "INSERT INTO document_usage (user_id, month_year, document_count)
                     VALUES ($1, $2, 1)
                     ON CONFLICT (user_id, month_year)
                     DO UPDATE SET document_count = document_usage.document_count + 1,
                                   updated_at = now()
                     WHERE document_usage.document_count < $3",
                )
                .bind(user_id)
                .bind(&month)
                .bind(limit)
                .execute(&self.pool)
                .await?;
                Ok(result.rows_affected() > 0)
            }
        }
    }

    /// Hands a reserved slot back when the registration that consumed it
    /// fails afterwards. Clamped at zero; a missing month row is a no-op.
    pub async fn release_usage(&self, user_id: Uuid) -> AppResult<()> {
        let month = month_key(Utc::now());
        sqlx::query(
            "UPDATE document_usage
             SET document_count = GREATEST(document_count - 1, 0), updated_at = now()
             WHERE user_id = $1 AND month_year = $2",
        )
        .bind(user_id)
        .bind(&month)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn usage_summary(&self, user_id: Uuid) -> AppResult<UsageSummary> {
        let month = month_key(Utc::now());
        let used = self.usage_count(user_id, &month).await?;
        let limit = self.document_limit(user_id).await?;
        let remaining = limit.map(|l| (l - used).max(0));
        Ok(UsageSummary {
            month_year: month,
            document_count: used,
            document_limit: limit,
            remaining,
        })
    }

    /// Audit trail for every webhook delivery, applied or not.
    pub async fn record_event(
        &self,
        event_type: &str,
        external_id: Option<&str>,
        payload: &serde_json::Value,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO billing_events (event_type, external_id, payload) VALUES ($1, $2, $3)",
        )
        .bind(event_type)
        .bind(external_id)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Applies a `subscription.created`/`subscription.updated` event.
    /// Idempotent under redelivery: replaying the same event converges on the
    /// same row. An unknown customer is logged and skipped, never created
    /// here; an unmatched product leaves `plan_id` null rather than failing.
    pub async fn upsert_subscription(&self, event: &SubscriptionUpsert<'_>) -> AppResult<()> {
        let customer = sqlx::query_as::<_, Customer>(
            "SELECT id, user_id, external_billing_id, email, name, created_at
             FROM customers WHERE external_billing_id = $1",
        )
        .bind(event.external_customer_id)
        .fetch_optional(&self.pool)
        .await?;
        let customer = match customer {
            Some(customer) => customer,
            None => {
                tracing::warn!(
                    external_customer_id = %event.external_customer_id,
                    external_subscription_id = %event.external_subscription_id,
                    "subscription event references unknown customer, skipping"
                );
                return Ok(());
            }
        };
        let plan_id: Option<Uuid> = match event.external_product_id {
            Some(product_id) => {
                sqlx::query_scalar(
                    "SELECT id FROM subscription_plans WHERE external_product_id = $1",
                )
                .bind(product_id)
                .fetch_optional(&self.pool)
                .await?
            }
            None => None,
        };
        let status = event
            .provider_status
            .map(SubscriptionStatus::from_provider)
            .unwrap_or(SubscriptionStatus::Free);
        sqlx::query(
            "INSERT INTO subscriptions
                 (customer_id, plan_id, external_subscription_id, status,
                  current_period_start, current_period_end, cancel_at_period_end)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (external_subscription_id)
             DO UPDATE SET customer_id = EXCLUDED.customer_id,
                           plan_id = EXCLUDED.plan_id,
                           status = EXCLUDED.status,
                           current_period_start = EXCLUDED.current_period_start,
                           current_period_end = EXCLUDED.current_period_end,
                           cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                           updated_at = now()",
        )
        .bind(customer.id)
        .bind(plan_id)
        .bind(event.external_subscription_id)
        .bind(status.as_str())
        .bind(event.current_period_start)
        .bind(event.current_period_end)
        .bind(event.cancel_at_period_end.unwrap_or(false))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Cancellation locates the row by `external_subscription_id` alone and
    /// forces `cancel_at_period_end` on, whatever the payload said. Other
    /// fields are left untouched. Returns whether a row was updated.
    pub async fn mark_canceled(&self, external_subscription_id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE subscriptions
             SET status = 'canceled', cancel_at_period_end = TRUE, updated_at = now()
             WHERE external_subscription_id = $1",
        )
        .bind(external_subscription_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
