use crate::connection::{DbConnection, DbDriver};
use crate::error::DbError;
use crate::manager::PgManager;
use crate::sql;
use scripts::{OrderedScript, Script, ScriptCategory, ScriptPriorityComparer};
use secrets::CachedSecretsRepository;
use tokio_util::sync::CancellationToken;

/// Script ids grouped by what the runner did with them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeReport {
    pub applied: Vec<String>,
    /// Migrations already recorded in the journal.
    pub skipped: Vec<String>,
    /// Scripts whose text was blank.
    pub empty: Vec<String>,
}

/// Applies migration and setup scripts to the managed database.
///
/// A whole run shares one transaction: if any script fails, every script
/// applied earlier in the same run is rolled back with it. Scripts must
/// therefore not issue their own `COMMIT`/`ROLLBACK`, nor statements that
/// cannot run inside a transaction block.
pub struct MigrationRunner<'m, D: DbDriver> {
    manager: &'m PgManager<D>,
    comparer: ScriptPriorityComparer,
    schemas: Vec<String>,
    verify_after_upgrade: bool,
}

impl<'m, D: DbDriver> MigrationRunner<'m, D> {
    pub fn new(manager: &'m PgManager<D>, comparer: ScriptPriorityComparer) -> Self {
        Self {
            manager,
            comparer,
            schemas: Vec::new(),
            verify_after_upgrade: false,
        }
    }

    /// Schemas to create (and hand to the owner role, if configured) before any script runs.
    pub fn with_schemas(mut self, schemas: Vec<String>) -> Self {
        self.schemas = schemas;
        self
    }

    /// Re-check every role's stored credentials once the upgrade has committed.
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify_after_upgrade = verify;
        self
    }

    #[tracing::instrument(name = "upgrade", skip_all, fields(database = %self.manager.config().database_name()))]
    pub async fn upgrade(
        &self,
        scripts: Vec<Script>,
        cancel: &CancellationToken,
    ) -> Result<UpgradeReport, DbError> {
        if cancel.is_cancelled() {
            return Err(DbError::Cancelled);
        }
        let ordered = self.comparer.order(scripts);
        tracing::info!(scripts = ordered.len(), "Starting upgrade.");

        let connection_string = &self.manager.target_admin_connection_string()?;
        let manager = self.manager;
        let mut conn = manager
            .retry_policy()
            .run(
                "open upgrade connection",
                cancel,
                |e| manager.driver().is_transient(e),
                move || async move { manager.open(connection_string).await },
            )
            .await?;

        conn.begin().await?;
        let report = match self.apply(&mut conn, &ordered, cancel).await {
            Ok(report) => {
                conn.commit().await?;
                report
            }
            Err(e) => {
                if let Err(rollback) = conn.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback of the upgrade transaction failed.");
                }
                return Err(e);
            }
        };
        conn.close().await?;

        tracing::info!(
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            empty = report.empty.len(),
            "Upgrade committed."
        );

        if self.verify_after_upgrade {
            let view = CachedSecretsRepository::new(self.manager.secrets().clone());
            if let Err(e) = self.manager.verify_roles(&view, cancel).await {
                tracing::warn!(
                    applied = report.applied.len(),
                    error = %e,
                    "Upgrade is committed but role verification failed."
                );
                return Err(DbError::VerificationFailed {
                    report: Box::new(report),
                    source: Box::new(e),
                });
            }
        }

        Ok(report)
    }

    async fn apply(
        &self,
        conn: &mut D::Connection,
        ordered: &[OrderedScript],
        cancel: &CancellationToken,
    ) -> Result<UpgradeReport, DbError> {
        self.bootstrap(conn).await?;

        let mut report = UpgradeReport::default();
        for item in ordered {
            if cancel.is_cancelled() {
                return Err(DbError::Cancelled);
            }
            let id = item.script.id().to_string();
            match self.apply_one(conn, item).await {
                Ok(Applied::Executed) => report.applied.push(id),
                Ok(Applied::AlreadyDeployed) => report.skipped.push(id),
                Ok(Applied::Empty) => report.empty.push(id),
                Err(e) => return Err(script_failure(item, e)),
            }
        }
        Ok(report)
    }

    async fn bootstrap(&self, conn: &mut D::Connection) -> Result<(), DbError> {
        let owner = self.manager.config().owner_role();
        for schema in &self.schemas {
            conn.execute_script(&sql::create_schema(schema, owner)).await?;
        }
        conn.execute_script(sql::CREATE_MIGRATION_LOG).await
    }

    async fn apply_one(
        &self,
        conn: &mut D::Connection,
        item: &OrderedScript,
    ) -> Result<Applied, DbError> {
        let script = &item.script;
        let is_migration = item.category == ScriptCategory::Migration;

        if is_migration
            && conn
                .fetch_bool(sql::MIGRATION_APPLIED, &[script.id()])
                .await?
        {
            tracing::info!(script_id = %script.id(), "Migration already deployed; skipping.");
            return Ok(Applied::AlreadyDeployed);
        }

        let text = script.load().await?;
        if text.trim().is_empty() {
            tracing::warn!(script_id = %script.id(), "Script is empty; skipping.");
            return Ok(Applied::Empty);
        }

        tracing::info!(script_id = %script.id(), category = %item.category, "Applying script.");
        conn.execute_script(&text).await?;
        if is_migration {
            conn.execute(sql::RECORD_MIGRATION, &[script.id()]).await?;
        }
        Ok(Applied::Executed)
    }
}

enum Applied {
    Executed,
    AlreadyDeployed,
    Empty,
}

fn script_failure(item: &OrderedScript, source: DbError) -> DbError {
    let script_id = item.script.id().to_string();
    let path = item.script.path().to_string();
    let source = Box::new(source);
    match item.category {
        ScriptCategory::Migration => DbError::MigrationFailed {
            script_id,
            path,
            source,
        },
        ScriptCategory::Setup => DbError::SetupFailed {
            script_id,
            path,
            source,
        },
    }
}
