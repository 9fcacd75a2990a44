use crate::{SecretLookup, SecretsError, SecretsRepository};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// A secret store backed by a JSON object on disk (`{"key": "value", ...}`).
///
/// Writes go to a sibling temp file that is renamed over the original, so a
/// crash never leaves a half-written file behind.
#[derive(Debug)]
pub struct FileSecretsRepository {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileSecretsRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>, SecretsError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, secrets: &BTreeMap<String, String>) -> Result<(), SecretsError> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let bytes = serde_json::to_vec_pretty(secrets)?;

        // A leftover temp file may carry wider permissions; never reuse it.
        match tokio::fs::remove_file(&tmp).await {
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SecretsRepository for FileSecretsRepository {
    async fn get_secret_if_exists(&self, key: &str) -> SecretLookup {
        let _guard = self.lock.lock().await;
        match self.read_all().await {
            Ok(mut secrets) => SecretLookup::from_value(secrets.remove(key)),
            Err(e) => SecretLookup::Error(e),
        }
    }

    async fn set_secret(&self, key: &str, value: &str) -> Result<(), SecretsError> {
        let _guard = self.lock.lock().await;
        let mut secrets = self.read_all().await?;
        secrets.insert(key.to_string(), value.to_string());
        self.write_all(&secrets).await?;
        tracing::debug!(key = %key, path = %self.path.display(), "Secret written.");
        Ok(())
    }
}
