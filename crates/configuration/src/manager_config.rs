use crate::error::ConfigError;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

// ASCII only: these names end up in DDL and in connection strings.
static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]{0,62}$").expect("identifier pattern is valid"));

/// Returns `true` if `name` can be used as the target database name.
///
/// A valid name starts with a letter or underscore, followed by up to 62
/// letters, digits or underscores (63 characters total, Postgres' `NAMEDATALEN - 1`).
pub fn is_valid_database_name(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Same rule as [`is_valid_database_name`], applied to role names.
pub fn is_valid_role_name(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// The validated description of the database a manager provisions.
///
/// Every field is checked when it is set, so a `ManagerConfig` that exists
/// is always safe to turn into DDL.
#[derive(Clone)]
pub struct ManagerConfig {
    database_name: String,
    shared_password: Option<String>,
    owner_role: Option<String>,
    /// role name -> key under which the role's connection string is stored.
    role_connection_secret_keys: BTreeMap<String, String>,
}

impl ManagerConfig {
    /// Creates a config for `database_name`, failing immediately if the name is invalid.
    pub fn new(database_name: impl Into<String>) -> Result<Self, ConfigError> {
        let database_name = database_name.into();
        if !is_valid_database_name(&database_name) {
            return Err(ConfigError::InvalidDatabaseName(database_name));
        }
        Ok(Self {
            database_name,
            shared_password: None,
            owner_role: None,
            role_connection_secret_keys: BTreeMap::new(),
        })
    }

    /// Registers a login role whose connection string is persisted under `secret_key`.
    pub fn with_role(
        mut self,
        role: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let role = role.into();
        let secret_key = secret_key.into();

        if !is_valid_role_name(&role) {
            return Err(ConfigError::InvalidRoleName(role));
        }
        if secret_key.trim().is_empty() {
            return Err(ConfigError::BlankSecretKey(role));
        }
        if self.role_connection_secret_keys.contains_key(&role) {
            return Err(ConfigError::DuplicateRole(role));
        }
        if let Some((first, _)) = self
            .role_connection_secret_keys
            .iter()
            .find(|(_, key)| **key == secret_key)
        {
            return Err(ConfigError::DuplicateSecretKey {
                secret_key,
                first: first.clone(),
                second: role,
            });
        }

        self.role_connection_secret_keys.insert(role, secret_key);
        Ok(self)
    }

    /// Sets a single password used for every role. Development use only.
    ///
    /// A blank password is treated as "not configured".
    pub fn with_shared_password(mut self, password: impl Into<String>) -> Result<Self, ConfigError> {
        let password = password.into();
        if password.trim().is_empty() {
            self.shared_password = None;
            return Ok(self);
        }
        if password.contains('$') {
            return Err(ConfigError::InvalidSharedPassword);
        }

        tracing::warn!(
            database = %self.database_name,
            "A shared password is configured: every role will get the same password. Never use this outside development."
        );
        self.shared_password = Some(password);
        Ok(self)
    }

    /// Sets the NOLOGIN role that owns the database and its schemas.
    pub fn with_owner_role(mut self, role: impl Into<String>) -> Result<Self, ConfigError> {
        let role = role.into();
        if !is_valid_role_name(&role) {
            return Err(ConfigError::InvalidRoleName(role));
        }
        if self.role_connection_secret_keys.contains_key(&role) {
            return Err(ConfigError::ValidationError(format!(
                "Owner role '{role}' is also configured as a login role"
            )));
        }
        self.owner_role = Some(role);
        Ok(self)
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn shared_password(&self) -> Option<&str> {
        self.shared_password.as_deref()
    }

    pub fn owner_role(&self) -> Option<&str> {
        self.owner_role.as_deref()
    }

    /// Login roles and their secret keys, ordered by role name.
    pub fn role_connection_secret_keys(&self) -> &BTreeMap<String, String> {
        &self.role_connection_secret_keys
    }

    /// Every role the manager creates for this database: the owner (if any) and all login roles.
    pub fn all_roles(&self) -> Vec<&str> {
        self.owner_role
            .as_deref()
            .into_iter()
            .chain(self.role_connection_secret_keys.keys().map(String::as_str))
            .collect()
    }
}

impl fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("database_name", &self.database_name)
            .field(
                "shared_password",
                &self.shared_password.as_ref().map(|_| "<redacted>"),
            )
            .field("owner_role", &self.owner_role)
            .field("role_connection_secret_keys", &self.role_connection_secret_keys)
            .finish()
    }
}
