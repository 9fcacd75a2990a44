use crate::error::ScriptError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
enum ScriptBody {
    Inline(String),
    File(PathBuf),
}

/// A single SQL script: an id, the path it was found at, and a lazily loaded body.
#[derive(Debug, Clone)]
pub struct Script {
    id: String,
    path: String,
    body: ScriptBody,
}

impl Script {
    /// A script whose text is already in memory. `path` uses `/` separators.
    pub fn inline(path: impl Into<String>, sql: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            id: id_for(&path),
            path,
            body: ScriptBody::Inline(sql.into()),
        }
    }

    /// A script read from `file` when loaded; `relative_path` is its location under the scripts root.
    pub fn from_file(relative_path: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        let path = relative_path.into();
        Self {
            id: id_for(&path),
            path,
            body: ScriptBody::File(file.into()),
        }
    }

    /// The journal key: the path with separators replaced by `.`.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn load(&self) -> Result<String, ScriptError> {
        match &self.body {
            ScriptBody::Inline(sql) => Ok(sql.clone()),
            ScriptBody::File(file) => {
                tokio::fs::read_to_string(file)
                    .await
                    .map_err(|source| ScriptError::Io {
                        path: file.clone(),
                        source,
                    })
            }
        }
    }
}

fn id_for(path: &str) -> String {
    path.trim_start_matches(['/', '\\']).replace(['/', '\\'], ".")
}

/// Recursively collects every `*.sql` file under `root`, in file-name order.
///
/// Symlinks are not followed. Fails if two files map to the same script id.
pub fn discover(root: &Path) -> Result<Vec<Script>, ScriptError> {
    let mut scripts = Vec::new();
    let mut seen = HashSet::new();

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| ScriptError::Io {
            path: e.path().unwrap_or(root).to_path_buf(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"))
        {
            continue;
        }

        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let script = Script::from_file(relative, path);
        if !seen.insert(script.id().to_string()) {
            return Err(ScriptError::DuplicateId(script.id().to_string()));
        }
        scripts.push(script);
    }

    tracing::debug!(root = %root.display(), count = scripts.len(), "Discovered scripts.");
    Ok(scripts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_replaces_separators() {
        let script = Script::inline("migrations/2024/001_init.sql", "select 1");
        assert_eq!(script.id(), "migrations.2024.001_init.sql");
        assert_eq!(script.path(), "migrations/2024/001_init.sql");
    }

    #[tokio::test]
    async fn discovers_sql_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("migrations")).unwrap();
        std::fs::create_dir_all(dir.path().join("setup/api")).unwrap();
        std::fs::write(dir.path().join("migrations/001.sql"), "create table t();").unwrap();
        std::fs::write(dir.path().join("setup/api/views.SQL"), "create view v as select 1;").unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let scripts = discover(dir.path()).unwrap();
        let ids: Vec<_> = scripts.iter().map(Script::id).collect();
        assert_eq!(ids, vec!["migrations.001.sql", "setup.api.views.SQL"]);
        assert_eq!(scripts[0].load().await.unwrap(), "create table t();");
    }

    #[test]
    fn missing_root_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = discover(&dir.path().join("nope"));
        assert!(matches!(result, Err(ScriptError::Io { .. })));
    }

    #[test]
    fn colliding_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("setup")).unwrap();
        std::fs::write(dir.path().join("setup/a.sql"), "").unwrap();
        std::fs::write(dir.path().join("setup.a.sql"), "").unwrap();

        assert!(matches!(discover(dir.path()), Err(ScriptError::DuplicateId(_))));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_are_not_walked() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("setup")).unwrap();
        std::fs::write(dir.path().join("setup/a.sql"), "select 1;").unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("setup/loop")).unwrap();
        std::os::unix::fs::symlink(
            dir.path().join("setup/a.sql"),
            dir.path().join("setup/b.sql"),
        )
        .unwrap();

        let scripts = discover(dir.path()).unwrap();
        let ids: Vec<_> = scripts.iter().map(Script::id).collect();
        assert_eq!(ids, vec!["setup.a.sql"]);
    }
}
