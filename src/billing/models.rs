use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Local subscription lifecycle vocabulary. Stored as lowercase text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Free,
    Active,
    Canceled,
    PastDue,
    Trialing,
    Incomplete,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Free => "free",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Incomplete => "incomplete",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "free" => Some(SubscriptionStatus::Free),
            "active" => Some(SubscriptionStatus::Active),
            "canceled" => Some(SubscriptionStatus::Canceled),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "trialing" => Some(SubscriptionStatus::Trialing),
            "incomplete" => Some(SubscriptionStatus::Incomplete),
            _ => None,
        }
    }

    /// Total mapping from the provider's status vocabulary. Anything
    /// unrecognized lands on `Free`, so a status the provider adds later can
    /// never grant paid access by accident.
    pub fn from_provider(value: &str) -> Self {
        match value {
            "active" => SubscriptionStatus::Active,
            "canceled" | "revoked" => SubscriptionStatus::Canceled,
            "past_due" | "unpaid" => SubscriptionStatus::PastDue,
            "trialing" => SubscriptionStatus::Trialing,
            "incomplete" | "incomplete_expired" => SubscriptionStatus::Incomplete,
            _ => SubscriptionStatus::Free,
        }
    }
}

/// key: billing-customer -> one row per user linking to the provider identity.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Customer {
    pub id: Uuid,
    pub user_id: Uuid,
    pub external_billing_id: String,
    pub email: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Catalog row. `document_limit` of `NULL` means the plan is unbounded.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub external_product_id: String,
    pub name: String,
    pub document_limit: Option<i64>,
    pub features: serde_json::Value,
    pub price_monthly_cents: Option<i64>,
    pub price_yearly_cents: Option<i64>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub external_subscription_id: Option<String>,
    pub status: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn status_kind(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_str(&self.status).unwrap_or(SubscriptionStatus::Free)
    }
}

/// Caller-facing projection of the current subscription. A customer without
/// any persisted subscription row is reported as a synthetic `free` one.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionSummary {
    pub status: SubscriptionStatus,
    pub plan: Option<SubscriptionPlan>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
}

/// `document_limit`/`remaining` of `None` mean the plan is unbounded.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub month_year: String,
    pub document_count: i64,
    pub document_limit: Option<i64>,
    pub remaining: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            SubscriptionStatus::Free,
            SubscriptionStatus::Active,
            SubscriptionStatus::Canceled,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Trialing,
            SubscriptionStatus::Incomplete,
        ] {
            assert_eq!(SubscriptionStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(SubscriptionStatus::from_str("paused"), None);
    }

    #[test]
    fn provider_statuses_map_onto_local_vocabulary() {
        assert_eq!(
            SubscriptionStatus::from_provider("active"),
            SubscriptionStatus::Active
        );
        assert_eq!(
            SubscriptionStatus::from_provider("revoked"),
            SubscriptionStatus::Canceled
        );
        assert_eq!(
            SubscriptionStatus::from_provider("unpaid"),
            SubscriptionStatus::PastDue
        );
        assert_eq!(
            SubscriptionStatus::from_provider("incomplete_expired"),
            SubscriptionStatus::Incomplete
        );
    }

    #[test]
    fn unknown_provider_status_defaults_to_free() {
        assert_eq!(
            SubscriptionStatus::from_provider("brand_new_state"),
            SubscriptionStatus::Free
        );
        assert_eq!(SubscriptionStatus::from_provider(""), SubscriptionStatus::Free);
    }
}
