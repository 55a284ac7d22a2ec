// 設定ファイル管理
//
// プロジェクトの設定ファイル（YAML形式）の構造、検証、
// 環境別のデータベース接続設定と実行ロックの設定を扱います。

use crate::core::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// データベース方言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[serde(rename = "postgresql")]
    PostgreSQL,
    #[serde(rename = "mysql")]
    MySQL,
    #[serde(rename = "sqlite")]
    SQLite,
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::PostgreSQL => write!(f, "postgresql"),
            Dialect::MySQL => write!(f, "mysql"),
            Dialect::SQLite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for Dialect {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgresql" | "postgres" => Ok(Dialect::PostgreSQL),
            "mysql" => Ok(Dialect::MySQL),
            "sqlite" => Ok(Dialect::SQLite),
            other => Err(ConfigError::UnsupportedDialect {
                name: other.to_string(),
            }),
        }
    }
}

impl Dialect {
    /// Dialectに応じたデフォルトポートを返す
    ///
    /// - PostgreSQL: 5432
    /// - MySQL: 3306
    /// - SQLite: None（ファイルベースのためポート不要）
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Dialect::PostgreSQL => Some(5432),
            Dialect::MySQL => Some(3306),
            Dialect::SQLite => None,
        }
    }

    /// DDLをトランザクション内でロールバックできるか
    ///
    /// MySQLのDDLは暗黙的にコミットされるため、マイグレーション途中で失敗した場合に
    /// スキーマ変更が部分的に残る可能性がある。
    pub fn supports_transactional_ddl(&self) -> bool {
        match self {
            Dialect::PostgreSQL | Dialect::SQLite => true,
            Dialect::MySQL => false,
        }
    }

    /// n番目（1始まり）のバインドパラメータのプレースホルダー
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::PostgreSQL => format!("${}", index),
            Dialect::MySQL | Dialect::SQLite => "?".to_string(),
        }
    }
}

/// プロジェクト設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 設定ファイルのバージョン
    pub version: String,

    /// データベース方言
    pub dialect: Dialect,

    /// マイグレーションディレクトリ
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,

    /// 実行ロックの設定
    #[serde(default)]
    pub lock: LockConfig,

    /// 環境別のデータベース設定
    pub environments: HashMap<String, DatabaseConfig>,
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

impl Config {
    /// デフォルトの設定ファイルパス
    pub const DEFAULT_CONFIG_PATH: &'static str = crate::core::naming::CONFIG_FILE;

    /// 指定された環境のデータベース設定を取得
    pub fn get_database_config(&self, environment: &str) -> Result<DatabaseConfig, ConfigError> {
        self.environments.get(environment).cloned().ok_or_else(|| {
            let mut available: Vec<String> = self.environments.keys().cloned().collect();
            available.sort();
            ConfigError::EnvironmentNotFound {
                name: environment.to_string(),
                available,
            }
        })
    }

    /// 設定の妥当性を検証
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version.is_empty() {
            return Err(ConfigError::MissingVersion);
        }

        if self.environments.is_empty() {
            return Err(ConfigError::NoEnvironments);
        }

        self.lock.validate()?;

        for (env_name, db_config) in &self.environments {
            db_config
                .validate()
                .map_err(|source| ConfigError::InvalidEnvironment {
                    environment: env_name.clone(),
                    source: Box::new(source),
                })?;
        }

        Ok(())
    }
}

/// 実行ロック設定
///
/// 複数プロセスが同時に apply / rollback を実行した場合の排他制御に使用します。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// ロック取得の最大待ち時間（秒）
    #[serde(default = "default_lock_timeout_secs")]
    pub timeout_secs: u64,

    /// ロックのリース期間（秒）。保持プロセスがクラッシュしても期限切れで回収される
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,

    /// ロック取得を再試行する間隔（ミリ秒）
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_lock_timeout_secs() -> u64 {
    30
}

fn default_lease_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_lock_timeout_secs(),
            lease_secs: default_lease_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidLock {
                reason: "timeout_secs must be greater than 0".to_string(),
            });
        }
        if self.lease_secs == 0 {
            return Err(ConfigError::InvalidLock {
                reason: "lease_secs must be greater than 0".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidLock {
                reason: "poll_interval_ms must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// データベース接続設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// ホスト名（SQLiteの場合は不要）
    #[serde(default = "default_host", skip_serializing_if = "String::is_empty")]
    pub host: String,

    /// ポート番号（Noneの場合はDialectのデフォルトポートを使用）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// データベース名（SQLiteの場合はファイルパス）
    pub database: String,

    /// ユーザー名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// パスワード
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// 接続タイムアウト（秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// 最大コネクション数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

fn default_host() -> String {
    "localhost".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            database: String::new(),
            user: None,
            password: None,
            timeout: None,
            max_connections: None,
        }
    }
}

impl DatabaseConfig {
    /// Dialectに応じた解決済みポート番号を取得
    ///
    /// portがSomeの場合はその値を返し、Noneの場合はDialectのデフォルトポートを返します。
    /// SQLiteなどデフォルトポートがないDialectの場合は0を返します。
    pub fn resolved_port(&self, dialect: Dialect) -> u16 {
        self.port
            .unwrap_or_else(|| dialect.default_port().unwrap_or(0))
    }

    /// Validate database configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.is_empty() {
            return Err(ConfigError::MissingDatabaseName);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        let mut environments = HashMap::new();
        environments.insert(
            "development".to_string(),
            DatabaseConfig {
                database: "dev.db".to_string(),
                ..Default::default()
            },
        );
        Config {
            version: "1.0".to_string(),
            dialect: Dialect::SQLite,
            migrations_dir: default_migrations_dir(),
            lock: LockConfig::default(),
            environments,
        }
    }

    #[test]
    fn test_dialect_display_and_parse() {
        assert_eq!(Dialect::PostgreSQL.to_string(), "postgresql");
        assert_eq!(Dialect::MySQL.to_string(), "mysql");
        assert_eq!(Dialect::SQLite.to_string(), "sqlite");

        assert_eq!("postgres".parse::<Dialect>().unwrap(), Dialect::PostgreSQL);
        assert_eq!("sqlite".parse::<Dialect>().unwrap(), Dialect::SQLite);
        assert!("oracle".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_dialect_default_port() {
        assert_eq!(Dialect::PostgreSQL.default_port(), Some(5432));
        assert_eq!(Dialect::MySQL.default_port(), Some(3306));
        assert_eq!(Dialect::SQLite.default_port(), None);
    }

    #[test]
    fn test_transactional_ddl_support() {
        assert!(Dialect::PostgreSQL.supports_transactional_ddl());
        assert!(Dialect::SQLite.supports_transactional_ddl());
        assert!(!Dialect::MySQL.supports_transactional_ddl());
    }

    #[test]
    fn test_placeholder() {
        assert_eq!(Dialect::PostgreSQL.placeholder(2), "$2");
        assert_eq!(Dialect::MySQL.placeholder(2), "?");
        assert_eq!(Dialect::SQLite.placeholder(1), "?");
    }

    #[test]
    fn test_resolved_port() {
        let config = DatabaseConfig {
            database: "test".to_string(),
            ..Default::default()
        };
        assert_eq!(config.resolved_port(Dialect::PostgreSQL), 5432);
        assert_eq!(config.resolved_port(Dialect::SQLite), 0);

        let explicit = DatabaseConfig {
            port: Some(5433),
            ..config
        };
        assert_eq!(explicit.resolved_port(Dialect::MySQL), 5433);
    }

    #[test]
    fn test_validate_ok() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_lock_timeout() {
        let mut config = sample_config();
        config.lock.timeout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLock { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_database() {
        let mut config = sample_config();
        config
            .environments
            .get_mut("development")
            .unwrap()
            .database
            .clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("development"));
    }

    #[test]
    fn test_get_database_config_lists_available() {
        let err = sample_config().get_database_config("production").unwrap_err();
        assert!(err.to_string().contains("production"));
        assert!(err.to_string().contains("development"));
    }
}
