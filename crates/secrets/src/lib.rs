//! # Secrets Crate
//!
//! The key/value credential store consumed by the database manager. Role
//! connection strings are written here after provisioning and read back to
//! decide whether a role needs new credentials.
//!
//! ## Public API
//!
//! - `SecretsRepository`: the async get/set contract every store implements.
//! - `SecretLookup`: the outcome of a read, with "not found" as an ordinary value.
//! - `InMemorySecretsRepository`, `FileSecretsRepository`: concrete stores.
//! - `CachedSecretsRepository`: a non-expiring read-through view over another store.

use async_trait::async_trait;

pub mod cached;
pub mod error;
pub mod file;
pub mod memory;

pub use cached::CachedSecretsRepository;
pub use error::SecretsError;
pub use file::FileSecretsRepository;
pub use memory::InMemorySecretsRepository;

/// The result of reading a secret.
#[derive(Debug)]
pub enum SecretLookup {
    Found(String),
    NotFound,
    Error(SecretsError),
}

impl SecretLookup {
    /// Builds a lookup from an optional stored value; empty values count as absent.
    pub fn from_value(value: Option<String>) -> Self {
        match value {
            Some(v) if !v.is_empty() => SecretLookup::Found(v),
            _ => SecretLookup::NotFound,
        }
    }

    pub fn into_result(self) -> Result<Option<String>, SecretsError> {
        match self {
            SecretLookup::Found(v) => Ok(Some(v)),
            SecretLookup::NotFound => Ok(None),
            SecretLookup::Error(e) => Err(e),
        }
    }
}

/// An external store of named secrets. Keys are opaque strings.
#[async_trait]
pub trait SecretsRepository: Send + Sync {
    async fn get_secret_if_exists(&self, key: &str) -> SecretLookup;

    async fn set_secret(&self, key: &str, value: &str) -> Result<(), SecretsError>;
}
