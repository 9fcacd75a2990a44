use crate::error::DbError;
use async_trait::async_trait;
use std::fmt;
use url::Url;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_DATABASE: &str = "postgres";
pub const DEFAULT_USERNAME: &str = "postgres";

/// The structural part of a connection string: where it points and who it logs in as.
///
/// Two values are equal when host, port and database match exactly and the
/// usernames match case-insensitively.
#[derive(Debug, Clone, Eq)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
}

impl PartialEq for ConnectionInfo {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.database == other.database
            && self.username.eq_ignore_ascii_case(&other.username)
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }
}

impl ConnectionInfo {
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }
}

/// Fields to overlay onto a template connection string. `None` keeps the template's value.
#[derive(Clone, Default)]
pub struct ConnectionOptions {
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A single database session. Created closed; I/O starts at [`DbConnection::open`].
#[async_trait]
pub trait DbConnection: Send {
    async fn open(&mut self) -> Result<(), DbError>;

    /// Runs `sql` as-is over the simple query protocol; may contain several statements.
    async fn execute_script(&mut self, sql: &str) -> Result<(), DbError>;

    /// Runs one parameterized statement and returns the affected row count.
    async fn execute(&mut self, sql: &str, params: &[&str]) -> Result<u64, DbError>;

    /// Runs one parameterized query returning a single boolean.
    async fn fetch_bool(&mut self, sql: &str, params: &[&str]) -> Result<bool, DbError>;

    async fn begin(&mut self) -> Result<(), DbError>;

    async fn commit(&mut self) -> Result<(), DbError>;

    async fn rollback(&mut self) -> Result<(), DbError>;

    async fn close(&mut self) -> Result<(), DbError>;
}

/// Everything the manager needs to know about a particular database driver.
pub trait DbDriver: Send + Sync {
    type Connection: DbConnection;

    /// Returns an unopened connection for `connection_string`.
    fn create_connection(&self, connection_string: &str) -> Result<Self::Connection, DbError>;

    fn extract_connection_info(&self, connection_string: &str) -> Result<ConnectionInfo, DbError>;

    /// Overlays the non-`None` fields of `options` onto `template`.
    fn construct_connection_string(
        &self,
        template: &str,
        options: &ConnectionOptions,
    ) -> Result<String, DbError>;

    fn is_transient(&self, error: &DbError) -> bool {
        error.is_transient()
    }
}

fn parse_url(connection_string: &str) -> Result<Url, DbError> {
    // The connection string carries a password, so it never goes into the error.
    let url = Url::parse(connection_string)
        .map_err(|e| DbError::InvalidConnectionString(format!("not a valid URL ({e})")))?;
    match url.scheme() {
        "postgres" | "postgresql" => Ok(url),
        other => Err(DbError::InvalidConnectionString(format!(
            "unsupported scheme '{other}', expected postgres://"
        ))),
    }
}

/// Reads host, port, database and username from a `postgres://` URL, applying Postgres defaults.
pub fn parse_connection_info(connection_string: &str) -> Result<ConnectionInfo, DbError> {
    let url = parse_url(connection_string)?;

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .unwrap_or(DEFAULT_HOST)
        .to_string();
    let database = match url.path().trim_start_matches('/') {
        "" => DEFAULT_DATABASE.to_string(),
        db => db.to_string(),
    };
    let username = match url.username() {
        "" => DEFAULT_USERNAME.to_string(),
        user => user.to_string(),
    };

    Ok(ConnectionInfo {
        host,
        port: url.port().unwrap_or(DEFAULT_PORT),
        database,
        username,
    })
}

/// Builds a new `postgres://` URL from `template` with `options` applied.
///
/// Query parameters (`sslmode`, ...) are carried over from the template.
pub fn construct_connection_string(
    template: &str,
    options: &ConnectionOptions,
) -> Result<String, DbError> {
    let mut url = parse_url(template)?;

    if let Some(database) = &options.database {
        url.set_path(&format!("/{database}"));
    }
    if let Some(username) = &options.username {
        url.set_username(username).map_err(|_| {
            DbError::InvalidConnectionString("the template has no host to attach a username to".into())
        })?;
    }
    if let Some(password) = &options.password {
        url.set_password(Some(password)).map_err(|_| {
            DbError::InvalidConnectionString("the template has no host to attach a password to".into())
        })?;
    }

    Ok(url.to_string())
}

/// Returns the password embedded in a connection string, if any.
pub fn connection_password(connection_string: &str) -> Result<Option<String>, DbError> {
    Ok(parse_url(connection_string)?.password().map(str::to_string))
}
