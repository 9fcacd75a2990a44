//! # Database Crate
//!
//! Lifecycle management for one Postgres database: create it, issue and
//! store credentials for its login roles, apply migration and setup scripts,
//! and tear it down again.
//!
//! ## Architectural Principles
//!
//! - **Driver Seam:** All server access goes through the `DbDriver` and
//!   `DbConnection` traits. `PgDriver` is the production implementation on
//!   top of `sqlx`; tests substitute an in-process fake.
//! - **Convergent Operations:** Every operation checks before it acts, so a
//!   rerun after a partial failure finishes the job instead of failing on
//!   what already exists.
//! - **Retry & Cancellation:** Each server round trip runs under a
//!   `RetryPolicy` (linear backoff on transient errors) and honours a shared
//!   `CancellationToken`.
//!
//! ## Public API
//!
//! - `PgManager`: `create_db`, `drop_db`, `deprovision`, `verify_roles`.
//! - `MigrationRunner`: applies ordered scripts in a single transaction.
//! - `PgDriver`: the `sqlx`-backed driver.
//! - `ConnectionInfo` / `ConnectionOptions`: connection string inspection and rewriting.
//! - `DbError`: the specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod error;
pub mod manager;
pub mod migrator;
pub mod postgres;
pub mod retry;
pub mod sql;

#[cfg(test)]
mod fake;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{ConnectionInfo, ConnectionOptions, DbConnection, DbDriver};
pub use error::DbError;
pub use manager::{PgManager, ProvisionReport, RoleOutcome};
pub use migrator::{MigrationRunner, UpgradeReport};
pub use postgres::PgDriver;
pub use retry::RetryPolicy;
