//! # Scripts Crate
//!
//! Discovers SQL scripts on disk, classifies them as migrations or setups,
//! and orders them for the migration runner.

pub mod error;
pub mod ordering;
pub mod script;

pub use error::ScriptError;
pub use ordering::{OrderedScript, ScriptCategory, ScriptClassifier, ScriptPriorityComparer};
pub use script::{Script, discover};
