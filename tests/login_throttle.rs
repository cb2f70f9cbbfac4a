//! Throttle behavior against a real database: lockout ordering, track
//! clearing on success, and the API rate limiter.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use secrecy::SecretString;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use gatehouse::api::handlers::login::{login, LoginRequest};
use gatehouse::security::{
    password::CredentialVerifier, throttle::LoginThrottle, Security, SecurityConfig,
};

const ENCRYPTION_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";
const CLIENT_IP: &str = "203.0.113.9";

fn config() -> SecurityConfig {
    SecurityConfig::new(
        "https://stories.example".to_string(),
        SecretString::from(ENCRYPTION_KEY),
    )
}

async fn seed_user(pool: &PgPool, email: &str, password: &str) -> Uuid {
    let hash = CredentialVerifier::new()
        .hash(password)
        .expect("hashing should succeed");
    let row = sqlx::query("INSERT INTO users (email, password_hash) VALUES ($1, $2) RETURNING id")
        .bind(email)
        .bind(hash)
        .fetch_one(pool)
        .await
        .expect("user insert should succeed");
    row.get("id")
}

async fn attempt_login(
    security: &Arc<Security>,
    pool: &PgPool,
    email: &str,
    password: &str,
) -> StatusCode {
    let mut headers = HeaderMap::new();
    headers.insert("x-forwarded-for", HeaderValue::from_static(CLIENT_IP));
    login(
        headers,
        Extension(security.clone()),
        Extension(pool.clone()),
        Json(LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            remember_me: false,
        }),
    )
    .await
    .into_response()
    .status()
}

async fn attempt_rows(pool: &PgPool) -> i64 {
    sqlx::query("SELECT COUNT(*) AS n FROM login_attempts")
        .fetch_one(pool)
        .await
        .expect("count should succeed")
        .get("n")
}

#[sqlx::test(migrations = "./migrations")]
async fn sixth_attempt_with_correct_password_is_rejected(pool: PgPool) {
    let security = Arc::new(Security::new(pool.clone(), config()).expect("security assembles"));
    seed_user(&pool, "reader@example.com", "correct horse battery staple").await;

    for _ in 0..5 {
        let status = attempt_login(&security, &pool, "reader@example.com", "wrong").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // Lockout fires before the credentials are even looked at.
    let status = attempt_login(
        &security,
        &pool,
        "reader@example.com",
        "correct horse battery staple",
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[sqlx::test(migrations = "./migrations")]
async fn successful_login_clears_both_tracks(pool: PgPool) {
    let security = Arc::new(Security::new(pool.clone(), config()).expect("security assembles"));
    seed_user(&pool, "reader@example.com", "correct horse battery staple").await;

    for _ in 0..3 {
        let status = attempt_login(&security, &pool, "reader@example.com", "wrong").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    assert_eq!(attempt_rows(&pool).await, 2); // one ip row, one email row

    let status = attempt_login(
        &security,
        &pool,
        "reader@example.com",
        "correct horse battery staple",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Full reset, not a decrement.
    assert_eq!(attempt_rows(&pool).await, 0);
    let throttle = security.throttle();
    assert!(!throttle.is_throttled(CLIENT_IP).await.expect("check runs"));
    assert!(!throttle
        .is_user_throttled("reader@example.com")
        .await
        .expect("check runs"));
}

#[sqlx::test(migrations = "./migrations")]
async fn rate_limiter_denies_over_limit_without_recording(pool: PgPool) {
    let throttle = LoginThrottle::new(pool.clone(), &config());

    for _ in 0..3 {
        assert!(throttle
            .check_rate_limit("api_request", "user:42", 3, 3600)
            .await
            .expect("check runs"));
    }
    assert!(!throttle
        .check_rate_limit("api_request", "user:42", 3, 3600)
        .await
        .expect("check runs"));

    // The denied call must not add an event, or the window would never drain.
    let events: i64 = sqlx::query("SELECT COUNT(*) AS n FROM rate_limit_events")
        .fetch_one(&pool)
        .await
        .expect("count should succeed")
        .get("n");
    assert_eq!(events, 3);

    assert!(!throttle
        .check_rate_limit("api_request", "user:42", 3, 3600)
        .await
        .expect("check runs"));

    // Another identifier keeps its own budget.
    assert!(throttle
        .check_rate_limit("api_request", "user:43", 3, 3600)
        .await
        .expect("check runs"));
}
