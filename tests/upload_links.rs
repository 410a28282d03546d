use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
use argon2::Argon2;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::{Extension, Router};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

const JWT_SECRET: &str = "test-secret";

fn test_app(pool: PgPool) -> Router {
    std::env::set_var("JWT_SECRET", JWT_SECRET);
    factura_backend::routes::api_routes().layer(Extension(pool))
}

fn bearer_token(user_id: Uuid) -> String {
    let claims = json!({ "sub": user_id, "exp": 4102444800u64 });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn seed_user(pool: &PgPool, email: &str) -> Uuid {
    sqlx::query_scalar(
        "INSERT INTO users (email, password_hash) VALUES ($1, 'hashed') RETURNING id",
    )
    .bind(email)
    .fetch_one(pool)
    .await
    .unwrap()
}

fn hash(password: &str) -> String {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .unwrap()
        .to_string()
}

async fn seed_link(pool: &PgPool, user_id: Uuid, code: &str, password: &str, active: bool) {
    sqlx::query(
        "INSERT INTO upload_links (user_id, link_code, password_hash, name, is_active)
         VALUES ($1, $2, $3, 'Inbox', $4)",
    )
    .bind(user_id)
    .bind(code)
    .bind(hash(password))
    .bind(active)
    .execute(pool)
    .await
    .unwrap();
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn verify_succeeds_for_active_link_with_right_password(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = seed_user(&pool, "links@example.com").await;
    seed_link(&pool, user_id, "demo1234", "hunter22", true).await;

    let app = test_app(pool.clone());
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/upload-links/verify",
            None,
            json!({ "link_code": "demo1234", "password": "hunter22" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["user_id"], json!(user_id));
    assert_eq!(body["name"], "Inbox");
    assert_eq!(body["link_code"], "demo1234");
    assert!(body.get("password_hash").is_none(), "hashes never leave the server");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn verify_rejects_wrong_password(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = seed_user(&pool, "wrongpw@example.com").await;
    seed_link(&pool, user_id, "wrong123", "hunter22", true).await;

    let app = test_app(pool.clone());
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/upload-links/verify",
            None,
            json!({ "link_code": "wrong123", "password": "letmein" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn disabled_links_look_nonexistent(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = seed_user(&pool, "disabled@example.com").await;
    seed_link(&pool, user_id, "gone1234", "hunter22", false).await;

    let app = test_app(pool.clone());
    // Correct password, disabled link: indistinguishable from a bad code.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/upload-links/verify",
            None,
            json!({ "link_code": "gone1234", "password": "hunter22" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/upload-links/verify",
            None,
            json!({ "link_code": "nosuch00", "password": "hunter22" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn verify_requires_both_fields(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let app = test_app(pool.clone());
    for body in [
        json!({}),
        json!({ "link_code": "demo1234" }),
        json!({ "password": "hunter22" }),
        json!({ "link_code": "", "password": "hunter22" }),
    ] {
        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/upload-links/verify", None, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn owner_can_create_disable_and_delete_links(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = seed_user(&pool, "owner@example.com").await;
    let token = bearer_token(user_id);

    let app = test_app(pool.clone());
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/upload-links",
            Some(&token),
            json!({ "password": "uploads4me", "name": "Supplier portal" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created = body_json(response).await;
    let link_id = created["id"].as_str().unwrap().to_string();
    let link_code = created["link_code"].as_str().unwrap().to_string();
    assert_eq!(link_code.len(), 8);
    assert_eq!(created["is_active"], json!(true));
    assert!(created.get("password_hash").is_none());

    // The fresh link verifies.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/upload-links/verify",
            None,
            json!({ "link_code": link_code, "password": "uploads4me" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Disable, then the verifier reports not-found.
    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/api/upload-links/{}", link_id),
            Some(&token),
            json!({ "is_active": false }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/upload-links/verify",
            None,
            json!({ "link_code": link_code, "password": "uploads4me" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/upload-links/{}", link_id))
                .header("authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM upload_links")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn links_are_scoped_to_their_owner(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let owner = seed_user(&pool, "owner2@example.com").await;
    let other = seed_user(&pool, "other@example.com").await;
    seed_link(&pool, owner, "mine1234", "hunter22", true).await;

    let link_id: Uuid = sqlx::query_scalar("SELECT id FROM upload_links WHERE link_code = 'mine1234'")
        .fetch_one(&pool)
        .await
        .unwrap();

    let app = test_app(pool.clone());
    let other_token = bearer_token(other);
    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/api/upload-links/{}", link_id),
            Some(&other_token),
            json!({ "is_active": false }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND, "foreign links are invisible");

    let listed = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/upload-links")
                .header("authorization", format!("Bearer {}", other_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(listed.status(), StatusCode::OK);
    let body = body_json(listed).await;
    assert_eq!(body.as_array().unwrap().len(), 0);
}
