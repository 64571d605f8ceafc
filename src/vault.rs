use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

const NONCE_LEN: usize = 12;
const REFERENCE_PREFIX: &str = "vault:";

/// AES-256-GCM envelope over JSON values. Blob layout: 12-byte nonce,
/// ciphertext, GCM tag.
#[derive(Clone)]
pub struct VaultCipher {
    cipher: Aes256Gcm,
}

impl VaultCipher {
    /// Key is 64 hex chars (32 bytes).
    pub fn from_hex_key(hex_key: &str) -> AppResult<Self> {
        let bytes = hex::decode(hex_key)
            .map_err(|_| AppError::Internal("vault key is not valid hex".into()))?;
        let cipher = Aes256Gcm::new_from_slice(&bytes)
            .map_err(|_| AppError::Internal("vault key must be 32 bytes".into()))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, value: &Value) -> AppResult<Vec<u8>> {
        let plaintext = serde_json::to_vec(value)
            .map_err(|e| AppError::Internal(format!("serializing secret: {e}")))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|_| AppError::Internal("secret encryption failed".into()))?;
        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    pub fn decrypt(&self, blob: &[u8]) -> AppResult<Value> {
        if blob.len() <= NONCE_LEN {
            return Err(AppError::Internal("secret blob too short".into()));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| AppError::Internal("secret decryption failed".into()))?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| AppError::Internal(format!("deserializing secret: {e}")))
    }
}

/// Encrypted secret store backed by the `vault_secrets` table. Values are
/// addressed by opaque `vault:<id>` references.
#[derive(Clone)]
pub struct Vault {
    pool: PgPool,
    cipher: VaultCipher,
}

pub fn is_reference(value: &str) -> bool {
    value.starts_with(REFERENCE_PREFIX)
}

fn parse_reference(reference: &str) -> AppResult<Uuid> {
    reference
        .strip_prefix(REFERENCE_PREFIX)
        .and_then(|id| Uuid::parse_str(id).ok())
        .ok_or(AppError::NotFound)
}

impl Vault {
    pub fn new(pool: PgPool, cipher: VaultCipher) -> Self {
        Self { pool, cipher }
    }

    pub async fn save(&self, value: &Value) -> AppResult<String> {
        let mut conn = self.pool.acquire().await.map_err(AppError::from)?;
        self.save_with(&mut conn, value).await
    }

    /// Transaction-aware save so secret writes commit with their service.
    pub async fn save_with(&self, conn: &mut PgConnection, value: &Value) -> AppResult<String> {
        let id = Uuid::now_v7();
        let blob = self.cipher.encrypt(value)?;
        sqlx::query("INSERT INTO vault_secrets (id, ciphertext, created_at) VALUES ($1, $2, NOW())")
            .bind(id)
            .bind(&blob)
            .execute(conn)
            .await?;
        Ok(format!("{REFERENCE_PREFIX}{id}"))
    }

    pub async fn get(&self, reference: &str) -> AppResult<Value> {
        let id = parse_reference(reference)?;
        let blob: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT ciphertext FROM vault_secrets WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        let blob = blob.ok_or(AppError::NotFound)?;
        self.cipher.decrypt(&blob)
    }

    pub async fn delete(&self, reference: &str) -> AppResult<()> {
        let id = parse_reference(reference)?;
        let result = sqlx::query("DELETE FROM vault_secrets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cipher() -> VaultCipher {
        VaultCipher::from_hex_key(&"ab".repeat(32)).unwrap()
    }

    #[test]
    fn round_trips_every_json_shape() {
        let c = cipher();
        for value in [
            json!("a string"),
            json!(42),
            json!(2.5),
            json!([1, 2, 3]),
            json!({"nested": {"user": "admin", "ports": [22, 443]}}),
        ] {
            let blob = c.encrypt(&value).unwrap();
            assert_eq!(c.decrypt(&blob).unwrap(), value);
        }
    }

    #[test]
    fn blob_is_nonce_then_ciphertext_and_tag() {
        let c = cipher();
        let blob = c.encrypt(&json!("x")).unwrap();
        // 12-byte nonce + ciphertext of `"x"` (3 bytes) + 16-byte tag.
        assert_eq!(blob.len(), 12 + 3 + 16);
    }

    #[test]
    fn tampering_is_detected() {
        let c = cipher();
        let mut blob = c.encrypt(&json!({"k": "v"})).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(c.decrypt(&blob).is_err());
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let blob = cipher().encrypt(&json!("secret")).unwrap();
        let other = VaultCipher::from_hex_key(&"cd".repeat(32)).unwrap();
        assert!(other.decrypt(&blob).is_err());
    }

    #[test]
    fn key_length_is_enforced() {
        assert!(VaultCipher::from_hex_key("abcd").is_err());
        assert!(VaultCipher::from_hex_key("zz").is_err());
    }

    #[test]
    fn references_parse_and_classify() {
        assert!(is_reference("vault:0189f7a0-0000-7000-8000-000000000000"));
        assert!(!is_reference("plain-value"));
        assert!(parse_reference("vault:not-a-uuid").is_err());
    }
}
