use crate::{SecretLookup, SecretsError, SecretsRepository};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A read-through view over another store whose entries never expire.
///
/// Intended for short-lived passes (such as post-upgrade verification) that
/// read the same keys repeatedly. Misses are not cached; writes go to the
/// inner store first and then update the cache.
pub struct CachedSecretsRepository {
    inner: Arc<dyn SecretsRepository>,
    cache: RwLock<HashMap<String, String>>,
}

impl CachedSecretsRepository {
    pub fn new(inner: Arc<dyn SecretsRepository>) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SecretsRepository for CachedSecretsRepository {
    async fn get_secret_if_exists(&self, key: &str) -> SecretLookup {
        if let Some(value) = self.cache.read().await.get(key) {
            return SecretLookup::Found(value.clone());
        }

        let lookup = self.inner.get_secret_if_exists(key).await;
        if let SecretLookup::Found(value) = &lookup {
            self.cache
                .write()
                .await
                .insert(key.to_string(), value.clone());
        }
        lookup
    }

    async fn set_secret(&self, key: &str, value: &str) -> Result<(), SecretsError> {
        self.inner.set_secret(key, value).await?;
        self.cache
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
