use crate::connection::{ConnectionInfo, ConnectionOptions, DbConnection, DbDriver};
use crate::error::DbError;
use crate::retry::RetryPolicy;
use crate::sql;
use configuration::{ManagerConfig, OnInvalidSecret};
use rand::Rng;
use rand::distr::Alphanumeric;
use secrets::SecretsRepository;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const GENERATED_PASSWORD_LENGTH: usize = 32;

/// What `create_db` did for a single login role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleOutcome {
    /// The stored connection string was valid; nothing was touched.
    Unchanged,
    /// No connection string was stored; credentials were issued.
    Created,
    /// The stored connection string was invalid and was replaced.
    Rotated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub database_created: bool,
    pub roles: BTreeMap<String, RoleOutcome>,
}

enum SecretState {
    Valid,
    Missing,
    Invalid {
        actual: Option<ConnectionInfo>,
        reason: String,
    },
}

/// Provisions, verifies and tears down one Postgres database and its login roles.
///
/// Every operation converges: running it again after a partial failure picks
/// up where the previous run stopped. Role credentials are written to the
/// secrets repository inside the same transaction that sets the password, so
/// a failed write never leaves an unrecorded password behind.
pub struct PgManager<D: DbDriver> {
    driver: D,
    maintenance_connection_string: String,
    config: ManagerConfig,
    secrets: Arc<dyn SecretsRepository>,
    retry: RetryPolicy,
    on_invalid_secret: OnInvalidSecret,
}

impl<D: DbDriver> PgManager<D> {
    /// Creates a manager. Fails if the maintenance connection string cannot be parsed.
    pub fn new(
        driver: D,
        maintenance_connection_string: impl Into<String>,
        config: ManagerConfig,
        secrets: Arc<dyn SecretsRepository>,
    ) -> Result<Self, DbError> {
        let maintenance_connection_string = maintenance_connection_string.into();
        driver.extract_connection_info(&maintenance_connection_string)?;
        Ok(Self {
            driver,
            maintenance_connection_string,
            config,
            secrets,
            retry: RetryPolicy::default(),
            on_invalid_secret: OnInvalidSecret::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_invalid_secret_policy(mut self, policy: OnInvalidSecret) -> Self {
        self.on_invalid_secret = policy;
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn secrets(&self) -> &Arc<dyn SecretsRepository> {
        &self.secrets
    }

    fn is_transient(&self, error: &DbError) -> bool {
        self.driver.is_transient(error)
    }

    pub(crate) async fn open(&self, connection_string: &str) -> Result<D::Connection, DbError> {
        let mut conn = self.driver.create_connection(connection_string)?;
        conn.open().await?;
        Ok(conn)
    }

    async fn open_maintenance(&self) -> Result<D::Connection, DbError> {
        self.open(&self.maintenance_connection_string).await
    }

    /// The maintenance credentials pointed at the target database.
    pub fn target_admin_connection_string(&self) -> Result<String, DbError> {
        self.driver.construct_connection_string(
            &self.maintenance_connection_string,
            &ConnectionOptions::new().database(self.config.database_name()),
        )
    }

    /// Where a role's stored connection string must point.
    pub fn expected_connection_info(&self, role: &str) -> Result<ConnectionInfo, DbError> {
        Ok(self
            .driver
            .extract_connection_info(&self.maintenance_connection_string)?
            .with_database(self.config.database_name())
            .with_username(role))
    }

    /// Fails with [`DbError::PermissionDenied`] unless the maintenance user can create databases and roles.
    pub async fn ensure_server_admin(&self, cancel: &CancellationToken) -> Result<(), DbError> {
        self.retry
            .run("check server privileges", cancel, |e| self.is_transient(e), move || async move {
                let mut conn = self.open_maintenance().await?;
                let allowed = conn.fetch_bool(sql::IS_SERVER_ADMIN, &[]).await?;
                conn.close().await?;
                if allowed {
                    Ok(())
                } else {
                    let user = self
                        .driver
                        .extract_connection_info(&self.maintenance_connection_string)?
                        .username;
                    Err(DbError::PermissionDenied { user })
                }
            })
            .await
    }

    /// Ensures the database exists and every configured role has working, stored credentials.
    #[tracing::instrument(name = "create_db", skip_all, fields(database = %self.config.database_name()))]
    pub async fn create_db(&self, cancel: &CancellationToken) -> Result<ProvisionReport, DbError> {
        if cancel.is_cancelled() {
            return Err(DbError::Cancelled);
        }
        self.ensure_server_admin(cancel).await?;

        let database_created = self
            .retry
            .run("ensure database exists", cancel, |e| self.is_transient(e), move || async move {
                self.ensure_database_exists().await
            })
            .await?;
        if database_created {
            tracing::info!("Database created.");
        } else {
            tracing::info!("Database already exists.");
        }

        let mut roles = BTreeMap::new();
        for (role, secret_key) in self.config.role_connection_secret_keys() {
            if cancel.is_cancelled() {
                return Err(DbError::Cancelled);
            }
            let outcome = self.provision_role(role, secret_key, cancel).await?;
            roles.insert(role.clone(), outcome);
        }

        Ok(ProvisionReport {
            database_created,
            roles,
        })
    }

    async fn ensure_database_exists(&self) -> Result<bool, DbError> {
        let database = self.config.database_name();
        let owner = self.config.owner_role();

        let mut conn = self.open_maintenance().await?;
        if let Some(owner) = owner {
            conn.execute_script(&sql::ensure_owner_role(owner)).await?;
        }
        let exists = conn.fetch_bool(sql::DATABASE_EXISTS, &[database]).await?;
        if !exists {
            conn.execute_script(&sql::create_database(database, owner)).await?;
        }
        conn.close().await?;
        Ok(!exists)
    }

    #[tracing::instrument(skip(self, cancel))]
    async fn provision_role(
        &self,
        role: &str,
        secret_key: &str,
        cancel: &CancellationToken,
    ) -> Result<RoleOutcome, DbError> {
        let expected = self.expected_connection_info(role)?;

        let outcome = match self
            .check_secret(self.secrets.as_ref(), secret_key, &expected, cancel)
            .await?
        {
            SecretState::Valid => {
                tracing::info!("Stored credentials are valid; nothing to do.");
                return Ok(RoleOutcome::Unchanged);
            }
            SecretState::Missing => RoleOutcome::Created,
            SecretState::Invalid { actual, reason } => match self.on_invalid_secret {
                OnInvalidSecret::Fail => {
                    return Err(DbError::SecretInconsistency {
                        role: role.to_string(),
                        secret_key: secret_key.to_string(),
                        expected,
                        actual,
                        reason,
                    });
                }
                OnInvalidSecret::Regenerate => {
                    tracing::warn!(reason = %reason, "Stored credentials are invalid; issuing new ones.");
                    RoleOutcome::Rotated
                }
            },
        };

        let password = &self.password_for(role);
        self.retry
            .run("issue role credentials", cancel, |e| self.is_transient(e), move || async move {
                self.issue_credentials(role, secret_key, password).await
            })
            .await?;

        tracing::info!(outcome = ?outcome, connection = %expected, "Role credentials issued and stored.");
        Ok(outcome)
    }

    /// A stored connection string is valid only if it points where `expected` says
    /// and a connection can actually be opened with it.
    async fn check_secret(
        &self,
        secrets: &dyn SecretsRepository,
        secret_key: &str,
        expected: &ConnectionInfo,
        cancel: &CancellationToken,
    ) -> Result<SecretState, DbError> {
        let value = self
            .retry
            .run("read secret", cancel, |e| self.is_transient(e), move || async move {
                Ok(secrets.get_secret_if_exists(secret_key).await.into_result()?)
            })
            .await?;
        let Some(value) = value else {
            return Ok(SecretState::Missing);
        };

        let actual = match self.driver.extract_connection_info(&value) {
            Ok(info) => info,
            Err(e) => {
                return Ok(SecretState::Invalid {
                    actual: None,
                    reason: format!("it cannot be parsed ({e})"),
                });
            }
        };
        if actual != *expected {
            return Ok(SecretState::Invalid {
                actual: Some(actual),
                reason: "it points at a different server, database or role".to_string(),
            });
        }

        let value = &value;
        let connected = self
            .retry
            .run("validate stored credentials", cancel, |e| self.is_transient(e), move || async move {
                let mut conn = self.open(value).await?;
                conn.close().await
            })
            .await;

        match connected {
            Ok(()) => Ok(SecretState::Valid),
            Err(e @ (DbError::Cancelled | DbError::RetriesExhausted { .. })) => Err(e),
            Err(e) => Ok(SecretState::Invalid {
                actual: Some(actual),
                reason: format!("it cannot connect ({e})"),
            }),
        }
    }

    fn password_for(&self, role: &str) -> String {
        match self.config.shared_password() {
            Some(shared) => {
                tracing::warn!(role = %role, "Using the shared development password for this role.");
                shared.to_string()
            }
            None => generate_password(),
        }
    }

    /// Sets the role's password and stores its new connection string in one transaction.
    async fn issue_credentials(
        &self,
        role: &str,
        secret_key: &str,
        password: &str,
    ) -> Result<(), DbError> {
        let database = self.config.database_name();
        let mut conn = self.open_maintenance().await?;
        conn.begin().await?;

        let result = async {
            conn.execute_script(&sql::provision_login_role(role, password, database))
                .await?;
            let connection_string = self.driver.construct_connection_string(
                &self.maintenance_connection_string,
                &ConnectionOptions::new()
                    .database(database)
                    .username(role)
                    .password(password),
            )?;
            self.secrets.set_secret(secret_key, &connection_string).await?;
            Ok::<(), DbError>(())
        }
        .await;

        match result {
            Ok(()) => {
                conn.commit().await?;
                conn.close().await
            }
            Err(e) => {
                if let Err(rollback) = conn.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback after failed credential issue also failed.");
                }
                Err(e)
            }
        }
    }

    /// Terminates other sessions on the target database and drops it. Roles are kept.
    #[tracing::instrument(name = "drop_db", skip_all, fields(database = %self.config.database_name()))]
    pub async fn drop_db(&self, cancel: &CancellationToken) -> Result<(), DbError> {
        self.retry
            .run("drop database", cancel, |e| self.is_transient(e), move || async move {
                let mut conn = self.open_maintenance().await?;
                self.drop_database_on(&mut conn).await?;
                conn.close().await
            })
            .await?;
        tracing::info!("Database dropped.");
        Ok(())
    }

    async fn drop_database_on(&self, conn: &mut D::Connection) -> Result<(), DbError> {
        let database = self.config.database_name();
        conn.execute(sql::TERMINATE_BACKENDS, &[database]).await?;
        conn.execute_script(&sql::drop_database(database)).await
    }

    /// Drops the database and then, in one statement, the owner and every login role.
    ///
    /// Postgres commits each DDL statement on its own here, so this is a single
    /// pass rather than an atomic one; rerunning it finishes whatever was left.
    #[tracing::instrument(name = "deprovision", skip_all, fields(database = %self.config.database_name()))]
    pub async fn deprovision(&self, cancel: &CancellationToken) -> Result<(), DbError> {
        if cancel.is_cancelled() {
            return Err(DbError::Cancelled);
        }
        self.ensure_server_admin(cancel).await?;

        let roles = self.config.all_roles();
        let roles = &roles;
        self.retry
            .run("deprovision database", cancel, |e| self.is_transient(e), move || async move {
                let mut conn = self.open_maintenance().await?;
                self.drop_database_on(&mut conn).await?;
                if !roles.is_empty() {
                    conn.execute_script(&sql::drop_roles(roles)).await?;
                }
                conn.close().await
            })
            .await?;
        tracing::info!(roles = roles.len(), "Database and roles dropped.");
        Ok(())
    }

    /// Checks every configured role's stored connection string against `secrets`,
    /// failing on the first one that is missing, mismatched or cannot connect.
    #[tracing::instrument(name = "verify_roles", skip_all, fields(database = %self.config.database_name()))]
    pub async fn verify_roles(
        &self,
        secrets: &dyn SecretsRepository,
        cancel: &CancellationToken,
    ) -> Result<(), DbError> {
        for (role, secret_key) in self.config.role_connection_secret_keys() {
            let expected = self.expected_connection_info(role)?;
            let (actual, reason) = match self.check_secret(secrets, secret_key, &expected, cancel).await? {
                SecretState::Valid => continue,
                SecretState::Missing => (None, "no connection string is stored".to_string()),
                SecretState::Invalid { actual, reason } => (actual, reason),
            };
            return Err(DbError::SecretInconsistency {
                role: role.clone(),
                secret_key: secret_key.clone(),
                expected,
                actual,
                reason,
            });
        }
        tracing::info!("All role credentials verified.");
        Ok(())
    }
}

fn generate_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}
