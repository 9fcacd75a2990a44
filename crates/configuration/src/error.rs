use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration from file: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error(
        "Invalid database name '{0}': must start with a letter or underscore and contain at most 63 letters, digits or underscores"
    )]
    InvalidDatabaseName(String),

    #[error(
        "Invalid role name '{0}': must start with a letter or underscore and contain at most 63 letters, digits or underscores"
    )]
    InvalidRoleName(String),

    #[error("Role '{0}' is configured more than once")]
    DuplicateRole(String),

    #[error("Secret key '{secret_key}' is used by both '{first}' and '{second}'")]
    DuplicateSecretKey {
        secret_key: String,
        first: String,
        second: String,
    },

    #[error("Secret key for role '{0}' must not be blank")]
    BlankSecretKey(String),

    #[error("The shared password must not contain '$' (it is dollar-quoted in role DDL)")]
    InvalidSharedPassword,

    #[error(
        "No maintenance connection string configured: set `maintenance_connection_string`, PGSTEWARD__MAINTENANCE_CONNECTION_STRING or DATABASE_URL"
    )]
    MissingConnectionString,

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
