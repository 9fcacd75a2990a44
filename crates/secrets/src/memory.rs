use crate::{SecretLookup, SecretsError, SecretsRepository};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A process-local secret store. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct InMemorySecretsRepository {
    secrets: RwLock<HashMap<String, String>>,
}

impl InMemorySecretsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `entries`.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            secrets: RwLock::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// A copy of every stored secret.
    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.secrets.read().await.clone()
    }
}

#[async_trait]
impl SecretsRepository for InMemorySecretsRepository {
    async fn get_secret_if_exists(&self, key: &str) -> SecretLookup {
        SecretLookup::from_value(self.secrets.read().await.get(key).cloned())
    }

    async fn set_secret(&self, key: &str, value: &str) -> Result<(), SecretsError> {
        self.secrets
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
