use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

use factura_backend::billing::provider::{BillingProvider, PolarClient};
use factura_backend::mailbox::{self, WatchRenewer};
use factura_backend::{config, routes};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    dotenvy::dotenv().ok();

    // Touch required configuration now so a bad deploy dies on startup, not
    // on the first request that needs it.
    let _ = config::JWT_SECRET.len();
    let _ = config::SERVICE_TOKEN.len();
    let _ = config::POLAR_ACCESS_TOKEN.len();
    let _ = config::POLAR_WEBHOOK_SECRET.len();
    let _ = config::GOOGLE_CLIENT_ID.len();
    let _ = config::GOOGLE_CLIENT_SECRET.len();
    let _ = config::GMAIL_PUBSUB_TOPIC.len();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("failed to connect to database");
    if let Err(e) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(error = %e, "migrations failed, continuing because ALLOW_MIGRATION_FAILURE is set");
        } else {
            panic!("migrations failed: {}", e);
        }
    }

    let provider: Arc<dyn BillingProvider> = Arc::new(PolarClient::from_env());
    let renewer = Arc::new(WatchRenewer::from_env(pool.clone()));
    mailbox::spawn_watch_renewal(pool.clone());

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::api_routes()
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(Extension(pool))
        .layer(Extension(provider))
        .layer(Extension(renewer))
        .layer(prometheus_layer)
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", *config::BIND_ADDRESS, *config::BIND_PORT)
        .parse()
        .expect("invalid bind address");
    tracing::info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .expect("server error");
}
