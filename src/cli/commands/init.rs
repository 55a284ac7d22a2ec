// initコマンドハンドラー
//
// プロジェクトの初期化処理を実装します。
// - マイグレーションディレクトリの作成
// - デフォルト設定ファイルの生成（.keel.yaml）
// - 初期化済みプロジェクトの検出

use crate::cli::commands::{render_output, CommandOutput};
use crate::cli::OutputFormat;
use crate::core::config::{Config, DatabaseConfig, Dialect, LockConfig};
use crate::services::config_serializer::ConfigSerializer;
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// initコマンドの出力構造体
#[derive(Debug, Clone, Serialize)]
pub struct InitOutput {
    pub dialect: Dialect,
    pub config_path: PathBuf,
    pub migrations_dir: PathBuf,
    #[serde(skip)]
    pub message: String,
}

impl CommandOutput for InitOutput {
    fn to_text(&self) -> String {
        self.message.clone()
    }
}

/// initコマンドの入力パラメータ
#[derive(Debug, Clone)]
pub struct InitCommand {
    /// プロジェクトのルートパス
    pub project_path: PathBuf,
    /// データベース方言
    pub dialect: Dialect,
    /// 強制的に初期化（既存の設定を上書き）
    pub force: bool,
    /// 出力フォーマット
    pub format: OutputFormat,
}

/// initコマンドハンドラー
#[derive(Debug, Clone, Default)]
pub struct InitCommandHandler {}

impl InitCommandHandler {
    /// 新しいInitCommandHandlerを作成
    pub fn new() -> Self {
        Self {}
    }

    /// initコマンドを実行
    pub fn execute(&self, command: &InitCommand) -> Result<String> {
        let config_path = command.project_path.join(Config::DEFAULT_CONFIG_PATH);

        if config_path.exists() && !command.force {
            return Err(anyhow!(
                "Project is already initialized. Use --force option to force re-initialization."
            ));
        }

        let config = self.default_config(command.dialect);
        let migrations_dir = command.project_path.join(&config.migrations_dir);

        fs::create_dir_all(&migrations_dir).with_context(|| {
            format!("Failed to create migrations directory: {:?}", migrations_dir)
        })?;
        self.write_config(&config_path, &config)?;

        let message = format!(
            "Project initialized.\n  config:     {}\n  migrations: {}\n\nNext: keel create \"<name>\"",
            config_path.display(),
            migrations_dir.display()
        );

        let output = InitOutput {
            dialect: command.dialect,
            config_path,
            migrations_dir,
            message,
        };
        render_output(&output, &command.format)
    }

    /// 方言ごとのデフォルト設定
    fn default_config(&self, dialect: Dialect) -> Config {
        let development = match dialect {
            Dialect::SQLite => DatabaseConfig {
                host: String::new(),
                database: "keel_dev.db".to_string(),
                ..Default::default()
            },
            Dialect::PostgreSQL => DatabaseConfig {
                database: "keel_dev".to_string(),
                user: Some("postgres".to_string()),
                ..Default::default()
            },
            Dialect::MySQL => DatabaseConfig {
                database: "keel_dev".to_string(),
                user: Some("root".to_string()),
                ..Default::default()
            },
        };

        let mut environments = HashMap::new();
        environments.insert("development".to_string(), development);

        Config {
            version: "1.0".to_string(),
            dialect,
            migrations_dir: PathBuf::from("migrations"),
            lock: LockConfig::default(),
            environments,
        }
    }

    fn write_config(&self, path: &Path, config: &Config) -> Result<()> {
        let yaml = ConfigSerializer::to_yaml(config)?;
        fs::write(path, yaml).with_context(|| format!("Failed to write config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::config_loader::ConfigLoader;
    use tempfile::TempDir;

    fn command(project: &Path, dialect: Dialect, force: bool) -> InitCommand {
        InitCommand {
            project_path: project.to_path_buf(),
            dialect,
            force,
            format: OutputFormat::Text,
        }
    }

    #[test]
    fn test_init_creates_config_and_migrations_dir() {
        let temp_dir = TempDir::new().unwrap();
        let handler = InitCommandHandler::new();

        let output = handler
            .execute(&command(temp_dir.path(), Dialect::SQLite, false))
            .unwrap();

        assert!(output.contains("Project initialized"));
        assert!(temp_dir.path().join("migrations").is_dir());

        let config = ConfigLoader::from_file(&temp_dir.path().join(".keel.yaml")).unwrap();
        assert_eq!(config.dialect, Dialect::SQLite);
        assert_eq!(
            config.get_database_config("development").unwrap().database,
            "keel_dev.db"
        );
    }

    #[test]
    fn test_init_twice_requires_force() {
        let temp_dir = TempDir::new().unwrap();
        let handler = InitCommandHandler::new();
        handler
            .execute(&command(temp_dir.path(), Dialect::SQLite, false))
            .unwrap();

        let result = handler.execute(&command(temp_dir.path(), Dialect::PostgreSQL, false));
        assert!(result.unwrap_err().to_string().contains("already initialized"));

        handler
            .execute(&command(temp_dir.path(), Dialect::PostgreSQL, true))
            .unwrap();
        let config = ConfigLoader::from_file(&temp_dir.path().join(".keel.yaml")).unwrap();
        assert_eq!(config.dialect, Dialect::PostgreSQL);
    }
}
