use crate::error::ConfigError;
use crate::manager_config::ManagerConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The root configuration structure, deserialized from `pgsteward.toml` plus environment overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Connection string to the server's administrative database.
    /// Falls back to `DATABASE_URL` when absent.
    #[serde(default)]
    pub maintenance_connection_string: Option<String>,
    /// The database this tool provisions and upgrades.
    pub database_name: String,
    /// Development-only password shared by every role.
    #[serde(default)]
    pub shared_password: Option<String>,
    /// Optional NOLOGIN role that owns the database and its schemas.
    #[serde(default)]
    pub owner_role: Option<String>,
    /// Login role name -> secret key holding its connection string.
    #[serde(default)]
    pub roles: BTreeMap<String, String>,
    /// Schemas created before any script runs.
    #[serde(default = "default_schemas")]
    pub schemas: Vec<String>,
    /// Regex patterns that order setup scripts; first match wins, unmatched sort last.
    #[serde(default = "default_setup_priority_patterns")]
    pub setup_priority_patterns: Vec<String>,
    /// Directory scanned for `*.sql` scripts.
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,
    /// JSON file backing the secrets repository used by the CLI.
    #[serde(default = "default_secrets_file")]
    pub secrets_file: PathBuf,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub on_invalid_secret: OnInvalidSecret,
    /// Re-validate every role secret after a successful upgrade.
    #[serde(default)]
    pub verify_after_upgrade: bool,
}

/// Backoff parameters for transient database errors.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    /// Delay added per attempt, in milliseconds.
    #[serde(default = "default_step_ms")]
    pub step_ms: u64,
    /// Attempt number after which the delay stops growing.
    #[serde(default = "default_max_factor")]
    pub max_factor: u32,
    /// `None` retries for as long as the operation is not cancelled.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// What to do when a stored connection string no longer matches or no longer authenticates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum OnInvalidSecret {
    /// Stop and report the inconsistency to the operator.
    #[default]
    Fail,
    /// Log a warning and issue fresh credentials.
    Regenerate,
}

// --- Default Implementations ---

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            step_ms: default_step_ms(),
            max_factor: default_max_factor(),
            max_attempts: None,
        }
    }
}

fn default_schemas() -> Vec<String> {
    vec!["system".to_string(), "api".to_string(), "data".to_string()]
}

fn default_setup_priority_patterns() -> Vec<String> {
    vec!["system".to_string(), "api".to_string()]
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("sql")
}

fn default_secrets_file() -> PathBuf {
    PathBuf::from("secrets.json")
}

fn default_step_ms() -> u64 {
    100
}

fn default_max_factor() -> u32 {
    50
}

impl Settings {
    /// Builds the validated [`ManagerConfig`] described by these settings.
    pub fn manager_config(&self) -> Result<ManagerConfig, ConfigError> {
        let mut config = ManagerConfig::new(&self.database_name)?;
        for (role, secret_key) in &self.roles {
            config = config.with_role(role, secret_key)?;
        }
        if let Some(owner) = &self.owner_role {
            config = config.with_owner_role(owner)?;
        }
        if let Some(password) = &self.shared_password {
            config = config.with_shared_password(password)?;
        }
        for schema in &self.schemas {
            if !crate::manager_config::is_valid_database_name(schema) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid schema name '{schema}'"
                )));
            }
        }
        Ok(config)
    }

    /// The maintenance connection string, falling back to `DATABASE_URL`.
    pub fn resolve_connection_string(&self) -> Result<String, ConfigError> {
        self.maintenance_connection_string
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingConnectionString)
    }
}
