use crate::connection::ConnectionInfo;
use crate::migrator::UpgradeReport;
use configuration::error::ConfigError;
use scripts::ScriptError;
use secrets::SecretsError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("The connection has not been opened")]
    ConnectionNotOpen,

    #[error(
        "Role '{user}' is not allowed to create databases and roles on this server (needs CREATEDB and CREATEROLE)"
    )]
    PermissionDenied { user: String },

    #[error(
        "Stored connection string for role '{role}' (secret '{secret_key}') is invalid: {reason}. Expected {expected}, found {}",
        describe(.actual)
    )]
    SecretInconsistency {
        role: String,
        secret_key: String,
        expected: ConnectionInfo,
        actual: Option<ConnectionInfo>,
        reason: String,
    },

    #[error("Migration '{script_id}' ({path}) failed: {source}")]
    MigrationFailed {
        script_id: String,
        path: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Setup script '{script_id}' ({path}) failed: {source}")]
    SetupFailed {
        script_id: String,
        path: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<DbError>,
    },

    #[error(
        "Upgrade committed ({} applied, {} already deployed) but role verification failed: {source}",
        .report.applied.len(),
        .report.skipped.len()
    )]
    VerificationFailed {
        report: Box<UpgradeReport>,
        #[source]
        source: Box<DbError>,
    },

    #[error("The operation was cancelled")]
    Cancelled,

    #[error(transparent)]
    Secrets(#[from] SecretsError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn describe(info: &Option<ConnectionInfo>) -> String {
    match info {
        Some(info) => info.to_string(),
        None => "an unparseable value".to_string(),
    }
}

impl DbError {
    /// Whether the failed operation may succeed if retried unchanged.
    pub fn is_transient(&self) -> bool {
        match self {
            DbError::Sqlx(e) => is_transient_sqlx(e),
            DbError::Secrets(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Classifies a driver error: lost/refused connections, resource exhaustion,
/// server startup/shutdown, serialization failures and deadlocks are transient.
pub fn is_transient_sqlx(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| is_transient_sqlstate(&code)),
        _ => false,
    }
}

fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08")
        || code.starts_with("53")
        || matches!(code, "57P01" | "57P02" | "57P03" | "40001" | "40P01")
}
