// コマンド共通コンテキスト
//
// 設定ファイル読み込みやパス解決、Runner の組み立ての重複をCLI層で集約する。

use crate::adapters::database::DatabaseConnectionService;
use crate::core::config::{Config, DatabaseConfig, Dialect, LockConfig};
use crate::services::config_loader::ConfigLoader;
use crate::services::database_config_resolver::DatabaseConfigResolver;
use crate::services::migration_runner::MigrationRunner;
use crate::services::migration_source::{DirectorySource, MigrationSource};
use anyhow::{anyhow, Context, Result};
use sqlx::AnyPool;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// CLIコマンド共通の実行コンテキスト
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub project_path: PathBuf,
    pub config_path: PathBuf,
    pub config: Config,
}

impl CommandContext {
    /// プロジェクトルートから設定を読み込んでコンテキストを作成
    pub fn load(project_path: PathBuf) -> Result<Self> {
        Self::load_with_config(project_path, None)
    }

    /// カスタム設定ファイルパスを指定してコンテキストを作成
    pub fn load_with_config(
        project_path: PathBuf,
        custom_config_path: Option<PathBuf>,
    ) -> Result<Self> {
        let config_path = custom_config_path
            .unwrap_or_else(|| project_path.join(Config::DEFAULT_CONFIG_PATH));

        if !config_path.exists() {
            return Err(anyhow!(
                "Config file not found: {:?}. Please initialize the project first with the `init` command.",
                config_path
            ));
        }

        let config =
            ConfigLoader::from_file(&config_path).with_context(|| "Failed to read config file")?;

        Ok(Self {
            project_path,
            config_path,
            config,
        })
    }

    /// マイグレーションディレクトリの絶対パス
    pub fn migrations_dir(&self) -> PathBuf {
        self.project_path.join(&self.config.migrations_dir)
    }

    /// 環境に応じたデータベース設定を取得（環境変数上書き込み）
    pub fn database_config(&self, env: &str) -> Result<DatabaseConfig> {
        let config = self
            .config
            .get_database_config(env)
            .with_context(|| format!("Config for environment '{}' not found", env))?;
        let mut config = DatabaseConfigResolver::apply_env_overrides(&config);

        // SQLite の相対パスはプロジェクトルート基準で解決する
        if self.config.dialect == Dialect::SQLite {
            let path = PathBuf::from(&config.database);
            if path.is_relative() && !config.database.starts_with(':') {
                config.database = self.project_path.join(path).to_string_lossy().to_string();
            }
        }

        Ok(config)
    }

    /// データベース方言を取得
    pub fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    /// ロック設定を取得（タイムアウトの上書きがあれば適用）
    pub fn lock_config(&self, lock_timeout: Option<u64>) -> LockConfig {
        let mut lock = self.config.lock.clone();
        if let Some(secs) = lock_timeout {
            lock.timeout_secs = secs;
        }
        lock
    }

    /// マイグレーション定義の読み込み元
    pub fn migration_source(&self) -> Arc<dyn MigrationSource> {
        Arc::new(DirectorySource::new(self.migrations_dir()))
    }

    /// 接続プールを作成
    pub async fn connect_pool(&self, env: &str) -> Result<AnyPool> {
        let db_config = self.database_config(env)?;
        debug!(env = %env, dialect = %self.config.dialect, "Connecting to database");
        let db_service = DatabaseConnectionService::new();
        db_service
            .create_pool(self.config.dialect, &db_config)
            .await
            .with_context(|| "Failed to connect to database")
    }

    /// DB接続を確立し、MigrationRunner を組み立てる
    pub async fn runner(&self, env: &str, lock_timeout: Option<u64>) -> Result<MigrationRunner> {
        let pool = self.connect_pool(env).await?;
        Ok(MigrationRunner::new(
            pool,
            self.config.dialect,
            self.migration_source(),
            self.lock_config(lock_timeout),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(project: &std::path::Path) {
        fs::write(
            project.join(Config::DEFAULT_CONFIG_PATH),
            r#"version: "1.0"
dialect: sqlite
lock:
  timeout_secs: 10
environments:
  development:
    database: dev.db
"#,
        )
        .unwrap();
    }

    #[test]
    fn test_load_without_config_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = CommandContext::load(temp_dir.path().to_path_buf());
        assert!(result.unwrap_err().to_string().contains("Config file not found"));
    }

    #[test]
    #[serial]
    fn test_sqlite_path_is_resolved_against_project() {
        let temp_dir = TempDir::new().unwrap();
        write_config(temp_dir.path());

        let context = CommandContext::load(temp_dir.path().to_path_buf()).unwrap();
        let db_config = context.database_config("development").unwrap();

        assert_eq!(
            PathBuf::from(db_config.database),
            temp_dir.path().join("dev.db")
        );
        assert_eq!(context.migrations_dir(), temp_dir.path().join("migrations"));
    }

    #[test]
    fn test_lock_timeout_override() {
        let temp_dir = TempDir::new().unwrap();
        write_config(temp_dir.path());
        let context = CommandContext::load(temp_dir.path().to_path_buf()).unwrap();

        assert_eq!(context.lock_config(None).timeout_secs, 10);
        assert_eq!(context.lock_config(Some(3)).timeout_secs, 3);
    }

    #[test]
    #[serial]
    fn test_unknown_environment() {
        let temp_dir = TempDir::new().unwrap();
        write_config(temp_dir.path());
        let context = CommandContext::load(temp_dir.path().to_path_buf()).unwrap();

        let message = format!("{:#}", context.database_config("production").unwrap_err());
        assert!(message.contains("production"));
        assert!(message.contains("development"));
    }
}
