use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::roles::Role;
use crate::workflows::accreditation::InstitutionId;

/// Identifier wrapper for stored API keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKeyId(pub String);

impl std::fmt::Display for ApiKeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted credential. Holds the keyed digest of the secret, never the secret itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: ApiKeyId,
    pub service: String,
    pub role: Role,
    pub key_hash: String,
    pub display_prefix: String,
    pub institution_scope: Option<InstitutionId>,
    pub expires_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ApiKeyRecord {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|expires_at| expires_at <= now)
            .unwrap_or(false)
    }

    pub fn summary(&self) -> ApiKeySummary {
        ApiKeySummary {
            id: self.id.clone(),
            service: self.service.clone(),
            role: self.role,
            display_prefix: self.display_prefix.clone(),
            institution_scope: self.institution_scope.clone(),
            expires_at: self.expires_at,
            notes: self.notes.clone(),
            created_at: self.created_at,
            revoked_at: self.revoked_at,
        }
    }
}

/// Listing view of a key without its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeySummary {
    pub id: ApiKeyId,
    pub service: String,
    pub role: Role,
    pub display_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution_scope: Option<InstitutionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Storage abstraction for key records, indexed by digest.
pub trait KeyStore: Send + Sync {
    fn insert(&self, record: ApiKeyRecord) -> Result<(), KeyStoreError>;
    fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, KeyStoreError>;
    /// Stamp `revoked_at` if the key is still live and return the stored record.
    /// An already revoked record is returned unchanged.
    fn revoke(
        &self,
        key_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ApiKeyRecord>, KeyStoreError>;
    fn list(&self) -> Result<Vec<ApiKeyRecord>, KeyStoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyStoreError {
    #[error("key digest already registered")]
    Duplicate,
    #[error("key store unavailable: {0}")]
    Unavailable(String),
}

/// Process-local key store. Revocations are visible to the very next lookup.
#[derive(Default, Clone)]
pub struct InMemoryKeyStore {
    records: Arc<RwLock<HashMap<String, ApiKeyRecord>>>,
}

impl KeyStore for InMemoryKeyStore {
    fn insert(&self, record: ApiKeyRecord) -> Result<(), KeyStoreError> {
        let mut guard = self
            .records
            .write()
            .map_err(|_| KeyStoreError::Unavailable("key store lock poisoned".to_string()))?;
        if guard.contains_key(&record.key_hash) {
            return Err(KeyStoreError::Duplicate);
        }
        guard.insert(record.key_hash.clone(), record);
        Ok(())
    }

    fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, KeyStoreError> {
        let guard = self
            .records
            .read()
            .map_err(|_| KeyStoreError::Unavailable("key store lock poisoned".to_string()))?;
        Ok(guard.get(key_hash).cloned())
    }

    fn revoke(
        &self,
        key_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ApiKeyRecord>, KeyStoreError> {
        let mut guard = self
            .records
            .write()
            .map_err(|_| KeyStoreError::Unavailable("key store lock poisoned".to_string()))?;
        Ok(guard.get_mut(key_hash).map(|record| {
            if record.revoked_at.is_none() {
                record.revoked_at = Some(at);
            }
            record.clone()
        }))
    }

    fn list(&self) -> Result<Vec<ApiKeyRecord>, KeyStoreError> {
        let guard = self
            .records
            .read()
            .map_err(|_| KeyStoreError::Unavailable("key store lock poisoned".to_string()))?;
        let mut records: Vec<ApiKeyRecord> = guard.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }
}

/// Keyed SHA-256 digest over raw keys. The pepper never leaves the process.
#[derive(Clone)]
pub struct KeyHasher {
    pepper: Vec<u8>,
}

impl KeyHasher {
    pub fn new(pepper: impl Into<String>) -> Self {
        Self {
            pepper: pepper.into().into_bytes(),
        }
    }

    pub fn digest(&self, raw_key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.pepper);
        hasher.update(b":");
        hasher.update(raw_key.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Debug for KeyHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyHasher")
            .field("pepper", &"<redacted>")
            .finish()
    }
}
