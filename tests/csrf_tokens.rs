//! CSRF token set behavior against a real database, including the TTL
//! boundary.

use sqlx::PgPool;

use gatehouse::security::csrf::CsrfGuard;

const TTL_SECONDS: i64 = 3600;
const SESSION: &[u8] = b"session-hash-a";

async fn age_tokens(pool: &PgPool, seconds: i64) {
    sqlx::query("UPDATE csrf_tokens SET issued_at = NOW() - ($1 * INTERVAL '1 second')")
        .bind(seconds)
        .execute(pool)
        .await
        .expect("aging update should succeed");
}

#[sqlx::test(migrations = "./migrations")]
async fn token_valid_inside_ttl_boundary(pool: PgPool) {
    let guard = CsrfGuard::new(pool.clone(), TTL_SECONDS);
    let token = guard.generate_token(SESSION).await.expect("token issues");

    age_tokens(&pool, TTL_SECONDS - 1).await;
    assert!(guard
        .validate_token(SESSION, &token)
        .await
        .expect("validation runs"));
}

#[sqlx::test(migrations = "./migrations")]
async fn token_rejected_past_ttl_boundary(pool: PgPool) {
    let guard = CsrfGuard::new(pool.clone(), TTL_SECONDS);
    let token = guard.generate_token(SESSION).await.expect("token issues");

    age_tokens(&pool, TTL_SECONDS + 1).await;
    assert!(!guard
        .validate_token(SESSION, &token)
        .await
        .expect("validation runs"));
}

#[sqlx::test(migrations = "./migrations")]
async fn parallel_tokens_stay_valid_until_rotation(pool: PgPool) {
    let guard = CsrfGuard::new(pool.clone(), TTL_SECONDS);
    let first = guard.generate_token(SESSION).await.expect("token issues");
    let second = guard.generate_token(SESSION).await.expect("token issues");

    // Several tabs, several tokens; issuing one must not kill the other.
    assert!(guard
        .validate_token(SESSION, &first)
        .await
        .expect("validation runs"));
    assert!(guard
        .validate_token(SESSION, &second)
        .await
        .expect("validation runs"));

    // Rotation retires exactly the presented token.
    let fresh = guard
        .rotate_token(SESSION, Some(first.as_str()))
        .await
        .expect("rotation runs");
    assert!(!guard
        .validate_token(SESSION, &first)
        .await
        .expect("validation runs"));
    assert!(guard
        .validate_token(SESSION, &second)
        .await
        .expect("validation runs"));
    assert!(guard
        .validate_token(SESSION, &fresh)
        .await
        .expect("validation runs"));
}

#[sqlx::test(migrations = "./migrations")]
async fn token_scoped_to_its_session(pool: PgPool) {
    let guard = CsrfGuard::new(pool.clone(), TTL_SECONDS);
    let token = guard.generate_token(SESSION).await.expect("token issues");

    assert!(!guard
        .validate_token(b"session-hash-b", &token)
        .await
        .expect("validation runs"));
}
