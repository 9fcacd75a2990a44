use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecretsError {
    #[error("The secret store is unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to read or write the secrets file: {0}")]
    Io(#[from] std::io::Error),

    #[error("The secrets file is not a valid JSON object of strings: {0}")]
    Format(#[from] serde_json::Error),

    #[error("The secret store rejected the request: {0}")]
    Rejected(String),
}

impl SecretsError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SecretsError::Unavailable(_))
    }
}
