use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::extract::Path;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use rand_core::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

const LINK_CODE_LEN: usize = 8;
const LINK_CODE_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct UploadLink {
    pub id: Uuid,
    pub user_id: Uuid,
    pub link_code: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Rejection sampling over the charset keeps the code distribution uniform.
fn generate_link_code() -> String {
    let bound = 256 - (256 % LINK_CODE_CHARSET.len());
    let mut code = String::with_capacity(LINK_CODE_LEN);
    while code.len() < LINK_CODE_LEN {
        let mut buf = [0u8; 16];
        OsRng.fill_bytes(&mut buf);
        for byte in buf {
            if (byte as usize) < bound {
                code.push(LINK_CODE_CHARSET[byte as usize % LINK_CODE_CHARSET.len()] as char);
                if code.len() == LINK_CODE_LEN {
                    break;
                }
            }
        }
    }
    code
}

fn hash_link_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Message(format!("failed to hash password: {}", e)))
}

#[derive(Deserialize)]
pub struct CreateUploadLinkRequest {
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
}

pub async fn create_upload_link(
    Extension(pool): Extension<PgPool>,
    auth: AuthUser,
    Json(req): Json<CreateUploadLinkRequest>,
) -> AppResult<Json<UploadLink>> {
    if req.password.len() < 6 {
        return Err(AppError::BadRequest(
            "password must be at least 6 characters".into(),
        ));
    }
    let password_hash = hash_link_password(&req.password)?;
    // Codes are short, so regenerate on the rare collision.
    for _ in 0..4 {
        let code = generate_link_code();
        let inserted = sqlx::query_as::<_, UploadLink>(
            "INSERT INTO upload_links (user_id, link_code, password_hash, name)
             VALUES ($1, $2, $3, $4)
             RETURNING id, user_id, link_code, password_hash, name, is_active, created_at",
        )
        .bind(auth.user_id)
        .bind(&code)
        .bind(&password_hash)
        .bind(&req.name)
        .fetch_one(&pool)
        .await;
        match inserted {
            Ok(link) => return Ok(Json(link)),
            Err(sqlx::Error::Database(db))
                if db.constraint() == Some("upload_links_link_code_key") =>
            {
                continue;
            }
            Err(e) => return Err(AppError::Db(e)),
        }
    }
    Err(AppError::Message("could not allocate a unique link code".into()))
}

pub async fn list_upload_links(
    Extension(pool): Extension<PgPool>,
    auth: AuthUser,
) -> AppResult<Json<Vec<UploadLink>>> {
    let links = sqlx::query_as::<_, UploadLink>(
        "SELECT id, user_id, link_code, password_hash, name, is_active, created_at
         FROM upload_links WHERE user_id = $1
         ORDER BY created_at DESC",
    )
    .bind(auth.user_id)
    .fetch_all(&pool)
    .await?;
    Ok(Json(links))
}

#[derive(Deserialize)]
pub struct UpdateUploadLinkRequest {
    pub is_active: bool,
}

pub async fn update_upload_link(
    Extension(pool): Extension<PgPool>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateUploadLinkRequest>,
) -> AppResult<Json<UploadLink>> {
    let link = sqlx::query_as::<_, UploadLink>(
        "UPDATE upload_links SET is_active = $1
         WHERE id = $2 AND user_id = $3
         RETURNING id, user_id, link_code, password_hash, name, is_active, created_at",
    )
    .bind(req.is_active)
    .bind(id)
    .bind(auth.user_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound)?;
    Ok(Json(link))
}

pub async fn delete_upload_link(
    Extension(pool): Extension<PgPool>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let result = sqlx::query("DELETE FROM upload_links WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(auth.user_id)
        .execute(&pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok(Json(json!({ "deleted": true })))
}

#[derive(Deserialize)]
pub struct VerifyUploadLinkRequest {
    #[serde(default)]
    pub link_code: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Serialize)]
pub struct VerifyUploadLinkResponse {
    pub user_id: Uuid,
    pub name: Option<String>,
    pub link_code: String,
}

/// Anonymous verification for public uploaders. Disabled links answer exactly
/// like nonexistent ones, so callers cannot enumerate codes.
pub async fn verify_upload_link(
    Extension(pool): Extension<PgPool>,
    Json(req): Json<VerifyUploadLinkRequest>,
) -> AppResult<Json<VerifyUploadLinkResponse>> {
    let (link_code, password) = match (req.link_code.as_deref(), req.password.as_deref()) {
        (Some(code), Some(password)) if !code.is_empty() && !password.is_empty() => {
            (code, password)
        }
        _ => {
            return Err(AppError::BadRequest(
                "link_code and password are required".into(),
            ))
        }
    };
    let link = sqlx::query_as::<_, UploadLink>(
        "SELECT id, user_id, link_code, password_hash, name, is_active, created_at
         FROM upload_links WHERE link_code = $1 AND is_active = TRUE",
    )
    .bind(link_code)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound)?;
    let parsed = PasswordHash::new(&link.password_hash)
        .map_err(|e| AppError::Message(format!("stored hash malformed: {}", e)))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AppError::Unauthorized)?;
    Ok(Json(VerifyUploadLinkResponse {
        user_id: link.user_id,
        name: link.name,
        link_code: link.link_code,
    }))
}
