//! Scoped API keys: issuance, validation, role-based authorization, and revocation.

mod authority;
pub mod keys;
mod roles;

pub use authority::{AccessAuthority, AccessError, IssuedKey, KeyRequest, Principal};
pub use keys::{
    ApiKeyId, ApiKeyRecord, ApiKeySummary, InMemoryKeyStore, KeyHasher, KeyStore, KeyStoreError,
};
pub use roles::{Capability, Permissions, Role};
