use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Failed to read script '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Two scripts resolve to the same id '{0}'")]
    DuplicateId(String),

    #[error("Invalid script pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}
