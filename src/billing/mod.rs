//! Subscription lifecycle, checkout, and monthly usage metering backed by
//! the Polar billing provider.

pub mod api;
pub mod models;
pub mod provider;
pub mod service;
pub mod webhook;

pub use models::{SubscriptionPlan, SubscriptionStatus, SubscriptionSummary, UsageSummary};
pub use service::{month_key, BillingService, SubscriptionUpsert};
