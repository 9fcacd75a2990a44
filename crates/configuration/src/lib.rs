use crate::error::ConfigError;
use crate::settings::Settings;
use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod manager_config;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use manager_config::{ManagerConfig, is_valid_database_name, is_valid_role_name};
pub use settings::{OnInvalidSecret, RetrySettings};

/// Environment variable prefix, e.g. `PGSTEWARD__DATABASE_NAME`.
pub const ENV_PREFIX: &str = "PGSTEWARD";

/// Loads the tool's settings from `path` (TOML), overlaid with `PGSTEWARD__*` environment variables.
///
/// The file is optional: a deployment may configure everything through the environment.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(environment())
        .build()?;

    let settings = builder.try_deserialize::<Settings>()?;
    Ok(settings)
}

/// Parses settings from an in-memory TOML document, without environment overrides.
pub fn parse_settings(toml: &str) -> Result<Settings, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml))
        .build()?;

    Ok(builder.try_deserialize::<Settings>()?)
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
