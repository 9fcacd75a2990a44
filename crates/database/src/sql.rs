//! SQL text issued by the manager and the migration runner.
//!
//! Identifiers passed in here have already been validated by `configuration`
//! (ASCII letters, digits and underscores), so double-quoting them is enough.

/// Whether the current session may create databases and roles.
pub const IS_SERVER_ADMIN: &str = "SELECT rolsuper OR (rolcreaterole AND rolcreatedb) FROM pg_catalog.pg_roles WHERE rolname = current_user";

pub const DATABASE_EXISTS: &str =
    "SELECT EXISTS(SELECT 1 FROM pg_catalog.pg_database WHERE datname = $1)";

pub const TERMINATE_BACKENDS: &str = "SELECT pg_terminate_backend(pid) FROM pg_catalog.pg_stat_activity WHERE datname = $1 AND pid <> pg_backend_pid()";

pub const CREATE_MIGRATION_LOG: &str = r#"CREATE SCHEMA IF NOT EXISTS system;
CREATE TABLE IF NOT EXISTS system.migration_log (
    sequence_number BIGINT GENERATED ALWAYS AS IDENTITY,
    script_id TEXT PRIMARY KEY,
    created_utc TIMESTAMP NOT NULL DEFAULT (now() AT TIME ZONE 'utc')
);"#;

pub const MIGRATION_APPLIED: &str =
    "SELECT EXISTS(SELECT 1 FROM system.migration_log WHERE script_id = $1)";

pub const RECORD_MIGRATION: &str = "INSERT INTO system.migration_log (script_id) VALUES ($1)";

/// Creates or re-passwords a login role, makes it a member of the session
/// user, and lets it connect to `database`.
pub fn provision_login_role(role: &str, password: &str, database: &str) -> String {
    format!(
        r#"DO $DO$
BEGIN
  IF EXISTS(SELECT 1 FROM pg_catalog.pg_roles WHERE rolname = '{role}') THEN
    ALTER ROLE "{role}" WITH LOGIN PASSWORD $${password}$$;
  ELSE
    CREATE ROLE "{role}" WITH LOGIN PASSWORD $${password}$$;
  END IF;
END;
$DO$;
GRANT "{role}" TO current_user;
GRANT CONNECT ON DATABASE "{database}" TO "{role}";"#
    )
}

/// Creates the database owner role if missing and makes the session user a member,
/// which `CREATE DATABASE ... OWNER` requires.
pub fn ensure_owner_role(role: &str) -> String {
    format!(
        r#"DO $DO$
BEGIN
  IF NOT EXISTS(SELECT 1 FROM pg_catalog.pg_roles WHERE rolname = '{role}') THEN
    CREATE ROLE "{role}" WITH NOLOGIN;
  END IF;
END;
$DO$;
GRANT "{role}" TO current_user;"#
    )
}

pub fn create_database(database: &str, owner: Option<&str>) -> String {
    match owner {
        Some(owner) => format!(r#"CREATE DATABASE "{database}" OWNER "{owner}""#),
        None => format!(r#"CREATE DATABASE "{database}""#),
    }
}

pub fn drop_database(database: &str) -> String {
    format!(r#"DROP DATABASE IF EXISTS "{database}" WITH (FORCE)"#)
}

pub fn drop_roles(roles: &[&str]) -> String {
    let list = roles
        .iter()
        .map(|r| format!(r#""{r}""#))
        .collect::<Vec<_>>()
        .join(", ");
    format!("DROP ROLE IF EXISTS {list}")
}

pub fn create_schema(schema: &str, owner: Option<&str>) -> String {
    match owner {
        Some(owner) => format!(
            r#"CREATE SCHEMA IF NOT EXISTS "{schema}";
ALTER SCHEMA "{schema}" OWNER TO "{owner}";"#
        ),
        None => format!(r#"CREATE SCHEMA IF NOT EXISTS "{schema}";"#),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_role_block_upserts_and_grants() {
        let sql = provision_login_role("app_reader", "pw123", "app");
        assert!(sql.starts_with("DO $DO$"));
        assert!(sql.contains("WHERE rolname = 'app_reader'"));
        assert!(sql.contains(r#"ALTER ROLE "app_reader" WITH LOGIN PASSWORD $$pw123$$;"#));
        assert!(sql.contains(r#"CREATE ROLE "app_reader" WITH LOGIN PASSWORD $$pw123$$;"#));
        assert!(sql.contains(r#"GRANT "app_reader" TO current_user;"#));
        assert!(sql.ends_with(r#"GRANT CONNECT ON DATABASE "app" TO "app_reader";"#));
    }

    #[test]
    fn drop_roles_batches_into_one_statement() {
        assert_eq!(
            drop_roles(&["owner", "reader"]),
            r#"DROP ROLE IF EXISTS "owner", "reader""#
        );
    }

    #[test]
    fn create_database_with_owner() {
        assert_eq!(
            create_database("app", Some("app_owner")),
            r#"CREATE DATABASE "app" OWNER "app_owner""#
        );
        assert_eq!(create_database("app", None), r#"CREATE DATABASE "app""#);
    }
}
