use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::billing::BillingService;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Document {
    pub id: Uuid,
    pub user_id: Uuid,
    pub file_name: String,
    pub source: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct SubmitDocumentRequest {
    pub file_name: String,
    #[serde(default)]
    pub source: Option<String>,
}

/// Registers a document for processing. The quota check and the counter bump
/// are one atomic operation, so a burst of concurrent submissions cannot
/// overshoot the plan limit.
pub async fn submit_document(
    Extension(pool): Extension<PgPool>,
    auth: AuthUser,
    Json(req): Json<SubmitDocumentRequest>,
) -> AppResult<Json<Document>> {
    let file_name = req.file_name.trim();
    if file_name.is_empty() {
        return Err(AppError::BadRequest("file_name is required".into()));
    }
    let billing = BillingService::new(pool.clone());
    if !billing.try_increment_usage(auth.user_id).await? {
        return Err(AppError::Forbidden("monthly document limit reached".into()));
    }
    let source = req.source.unwrap_or_else(|| "manual".to_string());
    let inserted = sqlx::query_as::<_, Document>(
        "INSERT INTO documents (user_id, file_name, source, status)
         VALUES ($1, $2, $3, 'pending')
         RETURNING id, user_id, file_name, source, status, created_at",
    )
    .bind(auth.user_id)
    .bind(file_name)
    .bind(source)
    .fetch_one(&pool)
    .await;
    match inserted {
        Ok(document) => Ok(Json(document)),
        Err(e) => {
            // The slot was reserved for a row that never landed; hand it back
            // so the failure does not burn quota.
            if let Err(release_err) = billing.release_usage(auth.user_id).await {
                tracing::warn!(
                    user = %auth.user_id,
                    error = %release_err,
                    "could not release reserved document slot"
                );
            }
            Err(AppError::Db(e))
        }
    }
}

pub async fn list_documents(
    Extension(pool): Extension<PgPool>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Document>>> {
    let documents = sqlx::query_as::<_, Document>(
        "SELECT id, user_id, file_name, source, status, created_at
         FROM documents WHERE user_id = $1
         ORDER BY created_at DESC",
    )
    .bind(auth.user_id)
    .fetch_all(&pool)
    .await?;
    Ok(Json(documents))
}
