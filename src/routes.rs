use axum::routing::{delete, get, patch, post};
use axum::Router;

use crate::{auth, billing, documents, mailbox, upload_links};

async fn root() -> &'static str {
    "factura backend"
}

pub fn api_routes() -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/me", get(auth::me))
        .route("/api/billing/plans", get(billing::api::list_plans))
        .route("/api/billing/subscription", get(billing::api::get_subscription))
        .route("/api/billing/usage", get(billing::api::get_usage))
        .route("/api/billing/checkout", post(billing::api::create_checkout))
        .route("/api/billing/webhook", post(billing::webhook::polar_webhook))
        .route(
            "/api/documents",
            post(documents::submit_document).get(documents::list_documents),
        )
        .route(
            "/api/upload-links",
            post(upload_links::create_upload_link).get(upload_links::list_upload_links),
        )
        .route(
            "/api/upload-links/:id",
            patch(upload_links::update_upload_link).delete(upload_links::delete_upload_link),
        )
        .route("/api/upload-links/verify", post(upload_links::verify_upload_link))
        .route("/api/mailboxes", get(mailbox::list_mailboxes))
        .route("/api/mailboxes/:id", delete(mailbox::disconnect_mailbox))
        .route("/api/mailboxes/renew", post(mailbox::renew_watches))
}
