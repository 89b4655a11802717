use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::keys::{ApiKeyId, ApiKeyRecord, ApiKeySummary, KeyHasher, KeyStore, KeyStoreError};
use super::roles::{Capability, Permissions, Role};
use crate::telemetry::AUDIT_TARGET;
use crate::workflows::accreditation::{Actor, InstitutionId};

const KEY_PREFIX: &str = "acc";
const SECRET_BYTES: usize = 32;
const DISPLAY_HEAD: usize = 12;
const DISPLAY_TAIL: usize = 4;

static KEY_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_key_id() -> ApiKeyId {
    let id = KEY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    ApiKeyId(format!("key-{id:06}"))
}

/// Parameters for issuing a new key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRequest {
    pub service: String,
    pub role: Role,
    #[serde(default)]
    pub institution_scope: Option<InstitutionId>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl KeyRequest {
    pub fn new(service: impl Into<String>, role: Role) -> Self {
        Self {
            service: service.into(),
            role,
            institution_scope: None,
            expires_at: None,
            notes: None,
        }
    }

    pub fn scoped_to(mut self, institution: InstitutionId) -> Self {
        self.institution_scope = Some(institution);
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// Result of key generation. `key` is the only copy of the secret that will ever exist.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedKey {
    pub id: ApiKeyId,
    pub key: String,
    pub display_prefix: String,
    pub role: Role,
    pub permissions: Permissions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution_scope: Option<InstitutionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Authenticated caller derived from a validated key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub key_id: ApiKeyId,
    pub service: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution_scope: Option<InstitutionId>,
    pub permissions: Permissions,
}

impl Principal {
    pub fn can(&self, capability: Capability) -> bool {
        self.permissions.contains(capability)
    }

    /// Fails with an audited `AuthorizationFailure` when the key lacks `capability`.
    pub fn require(&self, capability: Capability) -> Result<(), AccessError> {
        if self.can(capability) {
            return Ok(());
        }
        warn!(
            target: AUDIT_TARGET,
            key_id = %self.key_id,
            role = self.role.label(),
            capability = capability.label(),
            "authorization denied"
        );
        Err(AccessError::AuthorizationFailure { capability })
    }

    pub fn can_access(&self, institution: &InstitutionId) -> bool {
        match &self.institution_scope {
            Some(scope) => scope == institution,
            None => !self.permissions.own_data_only,
        }
    }

    /// Capability check plus the own-data restriction of institution keys.
    pub fn require_for(
        &self,
        capability: Capability,
        institution: &InstitutionId,
    ) -> Result<(), AccessError> {
        self.require(capability)?;
        if self.can_access(institution) {
            return Ok(());
        }
        warn!(
            target: AUDIT_TARGET,
            key_id = %self.key_id,
            role = self.role.label(),
            capability = capability.label(),
            institution = %institution,
            "authorization denied outside key scope"
        );
        Err(AccessError::AuthorizationFailure { capability })
    }

    pub fn actor(&self) -> Actor {
        Actor::new(self.service.clone(), self.role)
    }
}

/// Issues, validates, authorizes, and revokes scoped API keys.
pub struct AccessAuthority<K> {
    store: Arc<K>,
    hasher: KeyHasher,
}

impl<K> AccessAuthority<K>
where
    K: KeyStore + 'static,
{
    pub fn new(store: Arc<K>, hasher: KeyHasher) -> Self {
        Self { store, hasher }
    }

    pub fn generate(&self, request: KeyRequest) -> Result<IssuedKey, AccessError> {
        let service = request.service.trim().to_string();
        if service.is_empty() {
            return Err(AccessError::Validation {
                field: "service",
                message: "service label must not be blank".to_string(),
            });
        }
        match (&request.institution_scope, request.role) {
            (None, Role::Institution) => {
                return Err(AccessError::Validation {
                    field: "institution_scope",
                    message: "institution keys must be scoped to one institution".to_string(),
                })
            }
            (Some(_), role) if role != Role::Institution => {
                return Err(AccessError::Validation {
                    field: "institution_scope",
                    message: format!("{role} keys cannot be scoped to an institution"),
                })
            }
            _ => {}
        }
        let now = Utc::now();
        if matches!(request.expires_at, Some(expires_at) if expires_at <= now) {
            return Err(AccessError::Validation {
                field: "expires_at",
                message: "expiry must lie in the future".to_string(),
            });
        }

        let key = raw_key(request.role);
        let record = ApiKeyRecord {
            id: next_key_id(),
            service,
            role: request.role,
            key_hash: self.hasher.digest(&key),
            display_prefix: display_prefix(&key),
            institution_scope: request.institution_scope,
            expires_at: request.expires_at,
            notes: request
                .notes
                .map(|notes| notes.trim().to_string())
                .filter(|notes| !notes.is_empty()),
            created_at: now,
            revoked_at: None,
        };
        self.store.insert(record.clone())?;

        info!(
            key_id = %record.id,
            service = %record.service,
            role = record.role.label(),
            prefix = %record.display_prefix,
            "api key issued"
        );

        Ok(IssuedKey {
            id: record.id,
            key,
            display_prefix: record.display_prefix,
            role: record.role,
            permissions: record.role.permissions(),
            institution_scope: record.institution_scope,
            expires_at: record.expires_at,
        })
    }

    /// Resolve a presented key into a principal. Every failure mode maps onto the same
    /// `AuthenticationFailure`; the reason only reaches the audit log.
    pub fn validate(&self, raw_key: &str) -> Result<Principal, AccessError> {
        let raw_key = raw_key.trim();
        if !is_well_formed(raw_key) {
            return Err(authentication_failure("malformed", None));
        }

        let record = match self.store.find_by_hash(&self.hasher.digest(raw_key))? {
            Some(record) => record,
            None => return Err(authentication_failure("unknown", None)),
        };
        if record.is_revoked() {
            return Err(authentication_failure("revoked", Some(&record.id)));
        }
        if record.is_expired(Utc::now()) {
            return Err(authentication_failure("expired", Some(&record.id)));
        }

        Ok(Principal {
            permissions: record.role.permissions(),
            key_id: record.id,
            service: record.service,
            role: record.role,
            institution_scope: record.institution_scope,
        })
    }

    pub fn authorize(&self, raw_key: &str, capability: Capability) -> Result<Principal, AccessError> {
        let principal = self.validate(raw_key)?;
        principal.require(capability)?;
        Ok(principal)
    }

    /// Revoke by raw key or by stored digest. Revoking an already revoked key is a no-op.
    pub fn revoke(&self, raw_or_hash: &str) -> Result<ApiKeySummary, AccessError> {
        let candidate = raw_or_hash.trim();
        let key_hash = if is_well_formed(candidate) {
            self.hasher.digest(candidate)
        } else if is_digest(candidate) {
            candidate.to_ascii_lowercase()
        } else {
            return Err(AccessError::UnknownKey);
        };

        let record = self
            .store
            .revoke(&key_hash, Utc::now())?
            .ok_or(AccessError::UnknownKey)?;
        info!(
            target: AUDIT_TARGET,
            key_id = %record.id,
            role = record.role.label(),
            "api key revoked"
        );
        Ok(record.summary())
    }

    pub fn list(&self) -> Result<Vec<ApiKeySummary>, AccessError> {
        Ok(self
            .store
            .list()?
            .iter()
            .map(ApiKeyRecord::summary)
            .collect())
    }
}

fn raw_key(role: Role) -> String {
    let mut secret = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut secret);
    format!("{KEY_PREFIX}_{}_{}", role.tag(), hex::encode(secret))
}

fn display_prefix(raw_key: &str) -> String {
    let head: String = raw_key.chars().take(DISPLAY_HEAD).collect();
    let tail: String = raw_key
        .chars()
        .skip(raw_key.chars().count().saturating_sub(DISPLAY_TAIL))
        .collect();
    format!("{head}...{tail}")
}

fn is_well_formed(raw_key: &str) -> bool {
    let mut parts = raw_key.splitn(3, '_');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(KEY_PREFIX), Some(tag), Some(secret)) => {
            Role::from_tag(tag).is_some() && is_digest(secret)
        }
        _ => false,
    }
}

fn is_digest(candidate: &str) -> bool {
    candidate.len() == SECRET_BYTES * 2 && candidate.chars().all(|c| c.is_ascii_hexdigit())
}

fn authentication_failure(reason: &'static str, key_id: Option<&ApiKeyId>) -> AccessError {
    match key_id {
        Some(key_id) => warn!(
            target: AUDIT_TARGET,
            reason,
            key_id = %key_id,
            "authentication failed"
        ),
        None => warn!(target: AUDIT_TARGET, reason, "authentication failed"),
    }
    AccessError::AuthenticationFailure
}

/// Error raised by the access authority. Messages never reveal whether a presented
/// key exists.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("invalid or missing API key")]
    AuthenticationFailure,
    #[error("API key is not permitted to {capability}")]
    AuthorizationFailure { capability: Capability },
    #[error("API key not found")]
    UnknownKey,
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },
    #[error(transparent)]
    Store(#[from] KeyStoreError),
}
