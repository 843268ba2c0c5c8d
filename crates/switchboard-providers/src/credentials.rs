//! Tenant-scoped credential storage with encryption at rest.
//!
//! Per-tenant keys are derived from a master key (`SHA-256(master ‖ tenant)`)
//! so one tenant's ciphertext is useless under another tenant's key even if
//! rows were cross-read. A decryption failure surfaces as "not configured":
//! the provider refuses calls instead of guessing.

use std::sync::{Arc, Mutex};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use rusqlite::Connection;
use sha2::{Digest, Sha256};

use switchboard_core::types::TenantId;

use crate::error::{ProviderError, Result};

const NONCE_LEN: usize = 12;

pub struct CredentialStore {
    db: Arc<Mutex<Connection>>,
    master_key: [u8; 32],
}

/// Initialise credential tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS provider_credentials (
            tenant_id     TEXT NOT NULL,
            provider      TEXT NOT NULL,
            encrypted_key TEXT NOT NULL,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL,
            UNIQUE(tenant_id, provider)
        );",
    )
}

impl CredentialStore {
    /// `master_key_b64` is a base64-encoded 32-byte key; anything else is
    /// hashed down to 32 bytes so misconfigured installs still round-trip.
    pub fn new(db: Arc<Mutex<Connection>>, master_key_b64: Option<&str>) -> Self {
        let master_key = master_key_b64
            .and_then(|b64| {
                base64::engine::general_purpose::STANDARD
                    .decode(b64)
                    .ok()
                    .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
            })
            .unwrap_or_else(|| {
                let digest = Sha256::digest(master_key_b64.unwrap_or("switchboard-dev").as_bytes());
                digest.into()
            });
        Self { db, master_key }
    }

    fn tenant_key(&self, tenant: &TenantId) -> Key<Aes256Gcm> {
        let mut hasher = Sha256::new();
        hasher.update(self.master_key);
        hasher.update(tenant.as_str().as_bytes());
        let digest = hasher.finalize();
        Key::<Aes256Gcm>::from(<[u8; 32]>::from(digest))
    }

    pub fn store_key(&self, tenant: &TenantId, provider: &str, plaintext: &str) -> Result<()> {
        let cipher = Aes256Gcm::new(&self.tenant_key(tenant));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| ProviderError::DecryptionFailed {
                tenant: tenant.as_str().to_string(),
                reason: e.to_string(),
            })?;

        let mut blob = nonce.to_vec();
        blob.extend_from_slice(&ciphertext);
        let encoded = base64::engine::general_purpose::STANDARD.encode(blob);

        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO provider_credentials
             (tenant_id, provider, encrypted_key, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(tenant_id, provider) DO UPDATE SET
                encrypted_key = excluded.encrypted_key,
                updated_at = excluded.updated_at",
            rusqlite::params![tenant.as_str(), provider, encoded, now],
        )?;
        Ok(())
    }

    /// Decrypt the tenant's key for a provider. `Ok(None)` means no key is
    /// stored; a decryption failure is an error the caller maps to
    /// `not_configured`.
    pub fn get_key(&self, tenant: &TenantId, provider: &str) -> Result<Option<String>> {
        let encoded: Option<String> = {
            let conn = self.db.lock().unwrap();
            match conn.query_row(
                "SELECT encrypted_key FROM provider_credentials
                 WHERE tenant_id = ?1 AND provider = ?2",
                rusqlite::params![tenant.as_str(), provider],
                |row| row.get(0),
            ) {
                Ok(v) => Some(v),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(e.into()),
            }
        };
        let encoded = match encoded {
            Some(e) => e,
            None => return Ok(None),
        };

        let blob = base64::engine::general_purpose::STANDARD
            .decode(&encoded)
            .map_err(|e| ProviderError::DecryptionFailed {
                tenant: tenant.as_str().to_string(),
                reason: e.to_string(),
            })?;
        if blob.len() <= NONCE_LEN {
            return Err(ProviderError::DecryptionFailed {
                tenant: tenant.as_str().to_string(),
                reason: "ciphertext too short".to_string(),
            });
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(&self.tenant_key(tenant));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| ProviderError::DecryptionFailed {
                tenant: tenant.as_str().to_string(),
                reason: e.to_string(),
            })?;

        String::from_utf8(plaintext)
            .map(Some)
            .map_err(|e| ProviderError::DecryptionFailed {
                tenant: tenant.as_str().to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CredentialStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        CredentialStore::new(Arc::new(Mutex::new(conn)), None)
    }

    #[test]
    fn round_trips_a_key() {
        let s = store();
        let t = TenantId::default_tenant();
        s.store_key(&t, "anthropic", "sk-ant-test123").unwrap();
        assert_eq!(
            s.get_key(&t, "anthropic").unwrap().as_deref(),
            Some("sk-ant-test123")
        );
    }

    #[test]
    fn missing_key_is_none() {
        let s = store();
        assert!(s
            .get_key(&TenantId::default_tenant(), "openai")
            .unwrap()
            .is_none());
    }

    #[test]
    fn tenants_cannot_decrypt_each_other() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));
        let s = CredentialStore::new(Arc::clone(&db), None);

        let a = TenantId::new("tenant-a");
        s.store_key(&a, "anthropic", "secret-a").unwrap();

        // Simulate a cross-tenant row read: move the ciphertext to tenant-b.
        {
            let conn = db.lock().unwrap();
            conn.execute(
                "UPDATE provider_credentials SET tenant_id = 'tenant-b'",
                [],
            )
            .unwrap();
        }
        let b = TenantId::new("tenant-b");
        assert!(s.get_key(&b, "anthropic").is_err());
    }

    #[test]
    fn overwrite_replaces_key() {
        let s = store();
        let t = TenantId::default_tenant();
        s.store_key(&t, "brave", "key-one").unwrap();
        s.store_key(&t, "brave", "key-two").unwrap();
        assert_eq!(s.get_key(&t, "brave").unwrap().as_deref(), Some("key-two"));
    }
}
