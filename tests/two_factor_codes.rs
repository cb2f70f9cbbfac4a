//! Two-factor verification against a real database: TOTP acceptance and
//! backup-code consumption.

use std::sync::Arc;

use sqlx::{PgPool, Row};
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

use gatehouse::security::{crypto::EncryptionService, two_factor::TwoFactorVerifier};

async fn seed_user(pool: &PgPool) -> Uuid {
    let row = sqlx::query("INSERT INTO users (email, password_hash) VALUES ($1, $2) RETURNING id")
        .bind("reader@example.com")
        .bind("unused")
        .fetch_one(pool)
        .await
        .expect("user insert should succeed");
    row.get("id")
}

fn verifier(pool: PgPool) -> TwoFactorVerifier {
    let encryption = Arc::new(EncryptionService::new(&[7u8; 32]).expect("key is 32 bytes"));
    TwoFactorVerifier::new(pool, encryption, "gatehouse".to_string())
}

#[sqlx::test(migrations = "./migrations")]
async fn backup_code_is_single_use(pool: PgPool) {
    let user_id = seed_user(&pool).await;
    let verifier = verifier(pool);

    let enrollment = verifier.enable(user_id).await.expect("enrollment runs");
    let code = enrollment.backup_codes[0].clone();

    assert!(verifier.verify(user_id, &code).await.expect("verify runs"));

    // The set was re-encrypted without the consumed code; presenting it
    // again must fail.
    assert!(!verifier.verify(user_id, &code).await.expect("verify runs"));

    // The rest of the set is still live.
    let other = enrollment.backup_codes[1].clone();
    assert!(verifier.verify(user_id, &other).await.expect("verify runs"));
}

#[sqlx::test(migrations = "./migrations")]
async fn totp_code_verifies_for_enrolled_user(pool: PgPool) {
    let user_id = seed_user(&pool).await;
    let verifier = verifier(pool);

    let enrollment = verifier.enable(user_id).await.expect("enrollment runs");
    let secret = Secret::Encoded(enrollment.secret_base32)
        .to_bytes()
        .expect("enrollment secret decodes");
    let totp = TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        secret,
        Some("gatehouse".to_string()),
        "user".to_string(),
    )
    .expect("totp parameters are valid");
    let code = totp.generate_current().expect("clock is readable");

    assert!(verifier.verify(user_id, &code).await.expect("verify runs"));

    let wrong = if code == "000000" { "111111" } else { "000000" };
    assert!(!verifier.verify(user_id, wrong).await.expect("verify runs"));
}

#[sqlx::test(migrations = "./migrations")]
async fn malformed_codes_are_rejected(pool: PgPool) {
    let user_id = seed_user(&pool).await;
    let verifier = verifier(pool);
    verifier.enable(user_id).await.expect("enrollment runs");

    assert!(!verifier.verify(user_id, "12345").await.expect("verify runs"));
    assert!(!verifier
        .verify(user_id, "not-a-code")
        .await
        .expect("verify runs"));
    assert!(!verifier
        .verify(Uuid::new_v4(), "123456")
        .await
        .expect("verify runs"));
}
