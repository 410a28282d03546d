use once_cell::sync::Lazy;

/// Secret used for JWT signing. Must be set via the `JWT_SECRET` env variable.
pub static JWT_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"));

/// Shared credential required by service-role endpoints (watch renewal).
pub static SERVICE_TOKEN: Lazy<String> =
    Lazy::new(|| std::env::var("SERVICE_TOKEN").expect("SERVICE_TOKEN must be set"));

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

/// Front-end origin used when a checkout request carries no explicit
/// success/cancel URLs and no `Origin` header.
pub static APP_BASE_URL: Lazy<String> = Lazy::new(|| {
    read_optional_env("APP_BASE_URL").unwrap_or_else(|| "http://localhost:5173".to_string())
});

/// key: billing-config -> Polar API base, overridable for tests
pub static POLAR_API_BASE: Lazy<String> = Lazy::new(|| {
    read_optional_env("POLAR_API_BASE").unwrap_or_else(|| "https://api.polar.sh/v1".to_string())
});

/// Organization access token presented to the Polar API. Required.
pub static POLAR_ACCESS_TOKEN: Lazy<String> =
    Lazy::new(|| std::env::var("POLAR_ACCESS_TOKEN").expect("POLAR_ACCESS_TOKEN must be set"));

/// Shared secret for verifying Polar webhook signatures. Required.
pub static POLAR_WEBHOOK_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("POLAR_WEBHOOK_SECRET").expect("POLAR_WEBHOOK_SECRET must be set"));

/// OAuth token endpoint used for Gmail refresh-token exchanges.
pub static GOOGLE_TOKEN_URL: Lazy<String> = Lazy::new(|| {
    read_optional_env("GOOGLE_TOKEN_URL")
        .unwrap_or_else(|| "https://oauth2.googleapis.com/token".to_string())
});

/// OAuth client id for the Gmail integration. Required.
pub static GOOGLE_CLIENT_ID: Lazy<String> =
    Lazy::new(|| std::env::var("GOOGLE_CLIENT_ID").expect("GOOGLE_CLIENT_ID must be set"));

/// OAuth client secret for the Gmail integration. Required.
pub static GOOGLE_CLIENT_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("GOOGLE_CLIENT_SECRET").expect("GOOGLE_CLIENT_SECRET must be set"));

/// Gmail REST API base, overridable for tests.
pub static GMAIL_API_BASE: Lazy<String> = Lazy::new(|| {
    read_optional_env("GMAIL_API_BASE")
        .unwrap_or_else(|| "https://gmail.googleapis.com".to_string())
});

/// Pub/Sub topic Gmail pushes notifications to. Required; there is no
/// sensible default for someone else's topic.
pub static GMAIL_PUBSUB_TOPIC: Lazy<String> =
    Lazy::new(|| std::env::var("GMAIL_PUBSUB_TOPIC").expect("GMAIL_PUBSUB_TOPIC must be set"));

/// Label filter applied when registering a mailbox watch. Comma-separated,
/// defaults to `INBOX`.
pub static GMAIL_WATCH_LABELS: Lazy<Vec<String>> = Lazy::new(|| {
    std::env::var("GMAIL_WATCH_LABELS")
        .ok()
        .map(|value| {
            value
                .split(',')
                .filter_map(|raw| {
                    let trimmed = raw.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        Some(trimmed.to_string())
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|labels| !labels.is_empty())
        .unwrap_or_else(|| vec!["INBOX".to_string()])
});

/// key: mailbox-config -> watch renewal scan cadence
pub static GMAIL_WATCH_SCAN_INTERVAL_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("GMAIL_WATCH_SCAN_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(3600)
});

/// key: billing-config -> monthly document quota applied when a subscription
/// has no resolvable plan
pub static DEFAULT_DOCUMENT_LIMIT: Lazy<i64> = Lazy::new(|| {
    std::env::var("DEFAULT_DOCUMENT_LIMIT")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value >= 0)
        .unwrap_or(10)
});

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
