// マイグレーション定義の読み込み元
//
// ディレクトリ（`{name}/up.sql`, `{name}/down.sql`）またはプロセス内レジストリから
// マイグレーション定義を列挙し、名前の昇順で返す。

use crate::adapters::sql_script::{calculate_checksum, SqlScript};
use crate::core::error::MigrationEngineError;
use crate::core::migration::MigrationDefinition;
use crate::core::naming::{migration_name, split_migration_name, DOWN_SQL_FILE, UP_SQL_FILE};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// マイグレーション定義の読み込み元
pub trait MigrationSource: Send + Sync {
    /// 全マイグレーション定義を名前の昇順で返す
    fn list_all(&self) -> Result<Vec<MigrationDefinition>, MigrationEngineError>;

    /// 空の up / down を持つ新しいマイグレーションを作成し、その名前を返す
    ///
    /// レジャーには触れない。
    fn create(&self, human_name: &str) -> Result<String, MigrationEngineError>;
}

/// ディレクトリベースの読み込み元
///
/// 各マイグレーションは `{name}` ディレクトリで、`up.sql` と任意の `down.sql` を含む。
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

/// スキャンで見つかったマイグレーションディレクトリ
#[derive(Debug, Clone)]
struct MigrationDir {
    version: String,
    name: String,
    path: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// マイグレーションディレクトリをスキャンする
    ///
    /// - `.` で始まるディレクトリはスキップ
    /// - `{version}_{description}` 形式でないディレクトリは警告を出してスキップ
    /// - 同じバージョンのディレクトリが複数ある場合は `DuplicateMigration`
    fn scan(&self) -> Result<Vec<MigrationDir>, MigrationEngineError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| self.unavailable(&self.dir, e))?;

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| self.unavailable(&self.dir, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let Some(dir_name) = path.file_name().and_then(|n| n.to_str()) else {
                warn!(path = ?path, "Skipping migration directory with a non UTF-8 name");
                continue;
            };

            if dir_name.starts_with('.') {
                continue;
            }

            let Some((version, _)) = split_migration_name(dir_name) else {
                warn!(
                    directory = %dir_name,
                    "Skipping directory: does not match expected format '{{version}}_{{description}}'"
                );
                continue;
            };

            found.push(MigrationDir {
                version: version.to_string(),
                name: dir_name.to_string(),
                path: path.clone(),
            });
        }

        found.sort_by(|a, b| a.version.cmp(&b.version).then_with(|| a.name.cmp(&b.name)));

        for window in found.windows(2) {
            if window[0].version == window[1].version {
                return Err(MigrationEngineError::DuplicateMigration {
                    name: window[0].version.clone(),
                    detail: Some(format!(
                        "directories: '{}' and '{}'",
                        window[0].name, window[1].name
                    )),
                });
            }
        }

        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    /// 1つのマイグレーションディレクトリから定義を読み込む
    fn load_definition(&self, dir: &MigrationDir) -> Result<MigrationDefinition, MigrationEngineError> {
        let up_path = dir.path.join(UP_SQL_FILE);
        if !up_path.is_file() {
            return Err(MigrationEngineError::InvalidDefinition {
                name: dir.name.clone(),
                reason: format!("missing {}", UP_SQL_FILE),
            });
        }
        let up_sql = fs::read_to_string(&up_path).map_err(|e| self.unavailable(&up_path, e))?;

        let down_path = dir.path.join(DOWN_SQL_FILE);
        let down_sql = if down_path.is_file() {
            Some(fs::read_to_string(&down_path).map_err(|e| self.unavailable(&down_path, e))?)
        } else {
            None
        };

        let checksum = calculate_checksum(&up_sql, down_sql.as_deref());
        let mut definition = MigrationDefinition::new(dir.name.clone(), Arc::new(SqlScript::new(up_sql)))
            .with_checksum(checksum);
        if let Some(down_sql) = down_sql {
            definition = definition.with_down(Arc::new(SqlScript::new(down_sql)));
        }

        Ok(definition)
    }

    fn unavailable(&self, path: &Path, error: std::io::Error) -> MigrationEngineError {
        MigrationEngineError::SourceUnavailable {
            path: path.to_path_buf(),
            cause: error.to_string(),
        }
    }
}

impl MigrationSource for DirectorySource {
    fn list_all(&self) -> Result<Vec<MigrationDefinition>, MigrationEngineError> {
        let dirs = self.scan()?;
        debug!(dir = %self.dir.display(), count = dirs.len(), "Discovered migration directories");

        dirs.iter().map(|dir| self.load_definition(dir)).collect()
    }

    fn create(&self, human_name: &str) -> Result<String, MigrationEngineError> {
        self.create_at(Utc::now(), human_name)
    }
}

impl DirectorySource {
    /// 指定時刻のタイムスタンプでマイグレーションの雛形を作成
    pub fn create_at(
        &self,
        at: DateTime<Utc>,
        human_name: &str,
    ) -> Result<String, MigrationEngineError> {
        fs::create_dir_all(&self.dir).map_err(|e| self.unavailable(&self.dir, e))?;

        let name = migration_name(at, human_name);
        let version = split_migration_name(&name).map(|(version, _)| version.to_string());

        if let Some(version) = version {
            if let Some(existing) = self.scan()?.into_iter().find(|dir| dir.version == version) {
                return Err(MigrationEngineError::DuplicateMigration {
                    name: name.clone(),
                    detail: Some(format!("version already used by '{}'", existing.name)),
                });
            }
        }

        let path = self.dir.join(&name);
        fs::create_dir(&path).map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => MigrationEngineError::DuplicateMigration {
                name: name.clone(),
                detail: None,
            },
            _ => self.unavailable(&path, e),
        })?;

        let up_path = path.join(UP_SQL_FILE);
        fs::write(&up_path, format!("-- {}: forward schema change\n", name))
            .map_err(|e| self.unavailable(&up_path, e))?;
        let down_path = path.join(DOWN_SQL_FILE);
        fs::write(&down_path, format!("-- {}: revert the forward change\n", name))
            .map_err(|e| self.unavailable(&down_path, e))?;

        debug!(name = %name, path = %path.display(), "Created migration stub");
        Ok(name)
    }
}

/// プロセス内レジストリ
///
/// コードで定義したマイグレーション（名前 + ステップオブジェクト）を保持する。
#[derive(Default)]
pub struct MigrationRegistry {
    definitions: Mutex<BTreeMap<String, MigrationDefinition>>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 定義を登録する（同名の定義がある場合は `DuplicateMigration`）
    pub fn register(&self, definition: MigrationDefinition) -> Result<(), MigrationEngineError> {
        if definition.name.trim().is_empty() || definition.name.chars().any(char::is_whitespace) {
            return Err(MigrationEngineError::InvalidDefinition {
                name: definition.name.clone(),
                reason: "migration names must be non-empty and contain no whitespace".to_string(),
            });
        }

        let mut definitions = self.definitions();
        if definitions.contains_key(&definition.name) {
            return Err(MigrationEngineError::DuplicateMigration {
                name: definition.name.clone(),
                detail: None,
            });
        }
        definitions.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// 複数の定義をまとめて登録したレジストリを作成
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = MigrationDefinition>,
    ) -> Result<Self, MigrationEngineError> {
        let registry = Self::new();
        for definition in definitions {
            registry.register(definition)?;
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.definitions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions().is_empty()
    }

    fn definitions(&self) -> MutexGuard<'_, BTreeMap<String, MigrationDefinition>> {
        self.definitions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("names", &self.definitions().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MigrationSource for MigrationRegistry {
    fn list_all(&self) -> Result<Vec<MigrationDefinition>, MigrationEngineError> {
        // BTreeMap のため名前の昇順
        Ok(self.definitions().values().cloned().collect())
    }

    fn create(&self, human_name: &str) -> Result<String, MigrationEngineError> {
        let name = migration_name(Utc::now(), human_name);
        let definition = MigrationDefinition::new(name.clone(), Arc::new(SqlScript::new("")))
            .with_down(Arc::new(SqlScript::new("")));
        self.register(definition)?;
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn write_migration(root: &Path, name: &str, up: &str, down: Option<&str>) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(UP_SQL_FILE), up).unwrap();
        if let Some(down) = down {
            fs::write(dir.join(DOWN_SQL_FILE), down).unwrap();
        }
    }

    #[test]
    fn test_list_all_sorted_by_name() {
        let temp_dir = TempDir::new().unwrap();
        write_migration(temp_dir.path(), "0002_add_email", "ALTER TABLE users ADD COLUMN email TEXT;", None);
        write_migration(
            temp_dir.path(),
            "0001_create_users",
            "CREATE TABLE users (id INTEGER PRIMARY KEY);",
            Some("DROP TABLE users;"),
        );

        let source = DirectorySource::new(temp_dir.path());
        let definitions = source.list_all().unwrap();

        let names: Vec<&str> = definitions.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["0001_create_users", "0002_add_email"]);
        assert!(definitions[0].is_reversible());
        assert!(!definitions[1].is_reversible());
        assert_eq!(definitions[0].checksum.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn test_list_all_skips_hidden_and_malformed_directories() {
        let temp_dir = TempDir::new().unwrap();
        write_migration(temp_dir.path(), "0001_create_users", "SELECT 1;", None);
        fs::create_dir(temp_dir.path().join(".git")).unwrap();
        fs::create_dir(temp_dir.path().join("notes")).unwrap();
        fs::write(temp_dir.path().join("README.md"), "docs").unwrap();

        let definitions = DirectorySource::new(temp_dir.path()).list_all().unwrap();

        assert_eq!(definitions.len(), 1);
    }

    #[test]
    fn test_list_all_missing_directory_is_source_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let source = DirectorySource::new(temp_dir.path().join("missing"));

        let result = source.list_all();

        assert!(matches!(
            result,
            Err(MigrationEngineError::SourceUnavailable { .. })
        ));
    }

    #[test]
    fn test_list_all_duplicate_version() {
        let temp_dir = TempDir::new().unwrap();
        write_migration(temp_dir.path(), "0001_create_users", "SELECT 1;", None);
        write_migration(temp_dir.path(), "0001_create_posts", "SELECT 1;", None);

        let result = DirectorySource::new(temp_dir.path()).list_all();

        match result {
            Err(MigrationEngineError::DuplicateMigration { name, detail }) => {
                assert_eq!(name, "0001");
                assert!(detail.unwrap().contains("0001_create_posts"));
            }
            other => panic!("expected DuplicateMigration, got {:?}", other),
        }
    }

    #[test]
    fn test_list_all_missing_up_sql_is_invalid() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("0001_empty")).unwrap();

        let result = DirectorySource::new(temp_dir.path()).list_all();

        assert!(matches!(
            result,
            Err(MigrationEngineError::InvalidDefinition { ref name, .. }) if name == "0001_empty"
        ));
    }

    #[test]
    fn test_create_writes_stub_files() {
        let temp_dir = TempDir::new().unwrap();
        let migrations_dir = temp_dir.path().join("migrations");
        let source = DirectorySource::new(&migrations_dir);

        let name = source.create("Create users").unwrap();

        assert!(name.ends_with("_create_users"));
        assert!(migrations_dir.join(&name).join(UP_SQL_FILE).exists());
        assert!(migrations_dir.join(&name).join(DOWN_SQL_FILE).exists());

        let definitions = source.list_all().unwrap();
        assert_eq!(definitions.len(), 1);
        assert!(definitions[0].is_reversible());
    }

    #[test]
    fn test_create_same_version_twice_is_duplicate() {
        let temp_dir = TempDir::new().unwrap();
        let source = DirectorySource::new(temp_dir.path());
        let at = Utc.with_ymd_and_hms(2026, 1, 21, 12, 0, 0).unwrap();

        let first = source.create_at(at, "create users").unwrap();
        assert_eq!(first, "20260121120000_create_users");

        let same_name = source.create_at(at, "create users");
        assert!(matches!(
            same_name,
            Err(MigrationEngineError::DuplicateMigration { .. })
        ));

        let same_version = source.create_at(at, "create posts");
        assert!(matches!(
            same_version,
            Err(MigrationEngineError::DuplicateMigration { .. })
        ));
        assert_eq!(source.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let registry = MigrationRegistry::new();
        registry
            .register(MigrationDefinition::new("0001_a", Arc::new(SqlScript::new("SELECT 1"))))
            .unwrap();

        let result =
            registry.register(MigrationDefinition::new("0001_a", Arc::new(SqlScript::new("SELECT 2"))));

        assert!(matches!(
            result,
            Err(MigrationEngineError::DuplicateMigration { .. })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_lists_in_name_order_and_creates_stubs() {
        let registry = MigrationRegistry::from_definitions(vec![
            MigrationDefinition::new("0002_b", Arc::new(SqlScript::new("SELECT 1"))),
            MigrationDefinition::new("0001_a", Arc::new(SqlScript::new("SELECT 1"))),
        ])
        .unwrap();

        let created = registry.create("seed data").unwrap();
        let names: Vec<String> = registry.list_all().unwrap().into_iter().map(|d| d.name).collect();

        assert_eq!(names[0], "0001_a");
        assert_eq!(names[1], "0002_b");
        assert_eq!(names[2], created);
        assert!(created.ends_with("_seed_data"));
    }

    #[test]
    fn test_registry_rejects_blank_names() {
        let registry = MigrationRegistry::new();
        let result = registry.register(MigrationDefinition::new(" ", Arc::new(SqlScript::new(""))));
        assert!(matches!(
            result,
            Err(MigrationEngineError::InvalidDefinition { .. })
        ));
        assert!(registry.is_empty());
    }
}
