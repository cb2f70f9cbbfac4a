//! TOTP and single-use backup code verification.
//!
//! The TOTP secret and the backup-code set are stored encrypted
//! (ChaCha20-Poly1305, AAD bound to the owning user). Backup codes are eight
//! characters so their length alone distinguishes them from six-digit TOTP
//! codes; each code is removed from the set on use and the reduced set is
//! re-encrypted and persisted, which makes replay impossible.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use rand::{rngs::OsRng, RngCore};
use sqlx::{PgPool, Row};
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::{info, Instrument};
use uuid::Uuid;

use super::crypto::EncryptionService;

const BACKUP_CODE_COUNT: usize = 8;
const BACKUP_CODE_LEN: usize = 8;
// No 0/1/I/O: codes get read over the phone and typed by hand.
const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const TOTP_CODE_LEN: usize = 6;

/// Plaintext enrollment material, returned exactly once.
#[derive(Debug)]
pub struct Enrollment {
    pub secret_base32: String,
    pub backup_codes: Vec<String>,
}

pub struct TwoFactorVerifier {
    pool: PgPool,
    encryption: Arc<EncryptionService>,
    issuer: String,
}

impl TwoFactorVerifier {
    #[must_use]
    pub fn new(pool: PgPool, encryption: Arc<EncryptionService>, issuer: String) -> Self {
        Self {
            pool,
            encryption,
            issuer,
        }
    }

    /// Enable 2FA: generate a TOTP secret and 8 single-use backup codes,
    /// persist both encrypted, return the plaintext for enrollment display.
    ///
    /// # Errors
    /// Returns an error if generation, encryption, or persistence fails.
    pub async fn enable(&self, user_id: Uuid) -> Result<Enrollment> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|err| anyhow!("secret generation error: {err:?}"))?;
        let secret_base32 = secret.to_encoded().to_string();

        let backup_codes = generate_backup_codes()?;
        let codes_json = serde_json::to_vec(&backup_codes)
            .context("failed to serialize backup codes")?;

        let secret_ciphertext = self
            .encryption
            .encrypt(&secret_bytes, &secret_aad(user_id))?;
        let codes_ciphertext = self.encryption.encrypt(&codes_json, &codes_aad(user_id))?;

        let query = r"
            INSERT INTO two_factor_secrets
                (user_id, secret_ciphertext, backup_codes_ciphertext)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id)
            DO UPDATE SET secret_ciphertext = EXCLUDED.secret_ciphertext,
                          backup_codes_ciphertext = EXCLUDED.backup_codes_ciphertext,
                          enabled_at = NOW(),
                          updated_at = NOW()
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(&secret_ciphertext)
            .bind(&codes_ciphertext)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to persist 2fa secret")?;

        info!(user_id = %user_id, "two-factor enabled");
        Ok(Enrollment {
            secret_base32,
            backup_codes,
        })
    }

    /// Remove the user's 2FA enrollment.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn disable(&self, user_id: Uuid) -> Result<bool> {
        let query = "DELETE FROM two_factor_secrets WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete 2fa secret")?;
        Ok(result.rows_affected() > 0)
    }

    /// Whether the user has 2FA enabled.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn is_enabled(&self, user_id: Uuid) -> Result<bool> {
        let query = r"
            SELECT EXISTS (
                SELECT 1 FROM two_factor_secrets WHERE user_id = $1
            ) AS enabled
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to check 2fa enrollment")?;
        Ok(row.get("enabled"))
    }

    /// Verify a code: 8 characters is a backup code (consumed on success),
    /// 6 digits is TOTP with the standard time-window tolerance. Anything
    /// else is rejected outright.
    ///
    /// # Errors
    /// Returns an error on store or decryption failure, never for a wrong
    /// code.
    pub async fn verify(&self, user_id: Uuid, code: &str) -> Result<bool> {
        let code = code.trim();
        let row = self.fetch_secrets(user_id).await?;
        let Some((secret_ciphertext, codes_ciphertext)) = row else {
            return Ok(false);
        };

        if code.len() == BACKUP_CODE_LEN {
            return self
                .verify_backup_code(user_id, code, &codes_ciphertext)
                .await;
        }

        if code.len() == TOTP_CODE_LEN && code.bytes().all(|byte| byte.is_ascii_digit()) {
            let secret_bytes = self
                .encryption
                .decrypt(&secret_ciphertext, &secret_aad(user_id))?;
            let totp = TOTP::new(
                Algorithm::SHA1,
                6,
                1,
                30,
                secret_bytes,
                Some(self.issuer.clone()),
                "user".to_string(),
            )
            .map_err(|err| anyhow!("totp init error: {err}"))?;
            return Ok(totp.check_current(code).unwrap_or(false));
        }

        Ok(false)
    }

    async fn verify_backup_code(
        &self,
        user_id: Uuid,
        code: &str,
        codes_ciphertext: &[u8],
    ) -> Result<bool> {
        let plaintext = self
            .encryption
            .decrypt(codes_ciphertext, &codes_aad(user_id))?;
        let mut codes: Vec<String> =
            serde_json::from_slice(&plaintext).context("failed to parse backup code set")?;

        let normalized = code.to_ascii_uppercase();
        let Some(position) = codes.iter().position(|entry| entry == &normalized) else {
            return Ok(false);
        };

        // Remove on match and persist the reduced set before reporting
        // success, so the code can never be presented twice.
        codes.remove(position);
        let reduced_json =
            serde_json::to_vec(&codes).context("failed to serialize reduced backup code set")?;
        let reduced_ciphertext = self.encryption.encrypt(&reduced_json, &codes_aad(user_id))?;

        let query = r"
            UPDATE two_factor_secrets
            SET backup_codes_ciphertext = $2, updated_at = NOW()
            WHERE user_id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(&reduced_ciphertext)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to persist reduced backup code set")?;

        info!(user_id = %user_id, remaining = codes.len(), "backup code consumed");
        Ok(true)
    }

    async fn fetch_secrets(&self, user_id: Uuid) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let query = r"
            SELECT secret_ciphertext, backup_codes_ciphertext
            FROM two_factor_secrets
            WHERE user_id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch 2fa secrets")?;
        Ok(row.map(|row| {
            (
                row.get("secret_ciphertext"),
                row.get("backup_codes_ciphertext"),
            )
        }))
    }
}

fn secret_aad(user_id: Uuid) -> Vec<u8> {
    format!("totp-secret:v1|{user_id}").into_bytes()
}

fn codes_aad(user_id: Uuid) -> Vec<u8> {
    format!("backup-codes:v1|{user_id}").into_bytes()
}

fn generate_backup_codes() -> Result<Vec<String>> {
    let mut codes = Vec::with_capacity(BACKUP_CODE_COUNT);
    for _ in 0..BACKUP_CODE_COUNT {
        let mut raw = [0u8; BACKUP_CODE_LEN];
        OsRng
            .try_fill_bytes(&mut raw)
            .context("failed to generate backup code")?;
        let code: String = raw
            .iter()
            .map(|byte| {
                let idx = usize::from(*byte) % BACKUP_CODE_ALPHABET.len();
                BACKUP_CODE_ALPHABET[idx] as char
            })
            .collect();
        codes.push(code);
    }
    Ok(codes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn backup_codes_have_fixed_shape() {
        let codes = generate_backup_codes().unwrap();
        assert_eq!(codes.len(), BACKUP_CODE_COUNT);
        for code in &codes {
            assert_eq!(code.len(), BACKUP_CODE_LEN);
            assert!(code
                .bytes()
                .all(|byte| BACKUP_CODE_ALPHABET.contains(&byte)));
        }
    }

    #[test]
    fn backup_code_length_differs_from_totp() {
        // verify() dispatches on length; the two code shapes must not collide.
        assert_ne!(BACKUP_CODE_LEN, TOTP_CODE_LEN);
    }

    #[test]
    fn aad_binds_user_and_purpose() {
        let user_a = Uuid::new_v4();
        let user_b = Uuid::new_v4();
        assert_ne!(secret_aad(user_a), secret_aad(user_b));
        assert_ne!(secret_aad(user_a), codes_aad(user_a));
    }

    #[test]
    fn totp_round_trip_with_generated_secret() {
        let secret = Secret::generate_secret();
        let totp = TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret.to_bytes().unwrap(),
            Some("gatehouse".to_string()),
            "user".to_string(),
        )
        .unwrap();
        let code = totp.generate_current().unwrap();
        assert_eq!(code.len(), 6);
        assert!(totp.check_current(&code).unwrap());
    }

    #[test]
    fn encrypted_backup_set_round_trip() {
        let encryption = EncryptionService::new(&[9u8; 32]).unwrap();
        let user_id = Uuid::new_v4();
        let codes = generate_backup_codes().unwrap();
        let json = serde_json::to_vec(&codes).unwrap();
        let ciphertext = encryption.encrypt(&json, &codes_aad(user_id)).unwrap();

        let decrypted = encryption.decrypt(&ciphertext, &codes_aad(user_id)).unwrap();
        let restored: Vec<String> = serde_json::from_slice(&decrypted).unwrap();
        assert_eq!(restored, codes);

        // Ciphertext bound to another user must not decrypt.
        assert!(encryption
            .decrypt(&ciphertext, &codes_aad(Uuid::new_v4()))
            .is_err());
    }
}
