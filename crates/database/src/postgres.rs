use crate::connection::{self, ConnectionInfo, ConnectionOptions, DbConnection, DbDriver};
use crate::error::DbError;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};
use std::str::FromStr;
use std::time::Duration;

/// The production driver: `postgres://` URLs and sqlx connections.
#[derive(Debug, Clone)]
pub struct PgDriver {
    connect_timeout: Duration,
}

impl Default for PgDriver {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
        }
    }
}

impl PgDriver {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl DbDriver for PgDriver {
    type Connection = PgSession;

    fn create_connection(&self, connection_string: &str) -> Result<PgSession, DbError> {
        let options = PgConnectOptions::from_str(connection_string)
            .map_err(|e| DbError::InvalidConnectionString(e.to_string()))?
            // Role DDL carries passwords.
            .disable_statement_logging();
        Ok(PgSession {
            options,
            connect_timeout: self.connect_timeout,
            conn: None,
        })
    }

    fn extract_connection_info(&self, connection_string: &str) -> Result<ConnectionInfo, DbError> {
        connection::parse_connection_info(connection_string)
    }

    fn construct_connection_string(
        &self,
        template: &str,
        options: &ConnectionOptions,
    ) -> Result<String, DbError> {
        connection::construct_connection_string(template, options)
    }
}

/// A single sqlx connection, opened on demand.
pub struct PgSession {
    options: PgConnectOptions,
    connect_timeout: Duration,
    conn: Option<PgConnection>,
}

impl PgSession {
    fn conn(&mut self) -> Result<&mut PgConnection, DbError> {
        self.conn.as_mut().ok_or(DbError::ConnectionNotOpen)
    }
}

#[async_trait]
impl DbConnection for PgSession {
    async fn open(&mut self) -> Result<(), DbError> {
        if self.conn.is_some() {
            return Ok(());
        }
        let conn = tokio::time::timeout(self.connect_timeout, PgConnection::connect_with(&self.options))
            .await
            .map_err(|_| {
                sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "timed out connecting to the database",
                ))
            })??;
        self.conn = Some(conn);
        Ok(())
    }

    async fn execute_script(&mut self, sql: &str) -> Result<(), DbError> {
        let conn = self.conn()?;
        sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(sql)).await?;
        Ok(())
    }

    async fn execute(&mut self, sql: &str, params: &[&str]) -> Result<u64, DbError> {
        let conn = self.conn()?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = query.bind(param.to_string());
        }
        let result = query.execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_bool(&mut self, sql: &str, params: &[&str]) -> Result<bool, DbError> {
        let conn = self.conn()?;
        let mut query = sqlx::query_scalar::<_, Option<bool>>(sql);
        for param in params {
            query = query.bind(param.to_string());
        }
        let value = query.fetch_optional(&mut *conn).await?;
        Ok(value.flatten().unwrap_or(false))
    }

    async fn begin(&mut self) -> Result<(), DbError> {
        self.execute_script("BEGIN").await
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.execute_script("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.execute_script("ROLLBACK").await
    }

    async fn close(&mut self) -> Result<(), DbError> {
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
        }
        Ok(())
    }
}
