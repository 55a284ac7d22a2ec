// エラー型定義
//
// アプリケーション全体で使用されるカスタムエラー型を提供します。
// thiserrorを使用して、MigrationEngineError, DatabaseError, ConfigError を定義します。

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// マイグレーションエンジンのエラー
///
/// Runner / Discoverer / Ledger の全操作がこの型で失敗を報告します。
/// 失敗したマイグレーション名と原因は常にペイロードに含まれます。
#[derive(Debug, Error)]
pub enum MigrationEngineError {
    /// マイグレーション定義の読み込み元にアクセスできない（実行全体にとって致命的）
    #[error("Migration source unavailable: {path:?} ({cause})")]
    SourceUnavailable {
        /// 読み込み元のパス
        path: PathBuf,
        /// エラー原因
        cause: String,
    },

    /// マイグレーション名の衝突
    #[error("Duplicate migration: '{name}'{}", format_detail_opt(.detail))]
    DuplicateMigration {
        /// 衝突したマイグレーション名
        name: String,
        /// 補足情報
        detail: Option<String>,
    },

    /// マイグレーション定義が不正
    #[error("Invalid migration definition '{name}': {reason}")]
    InvalidDefinition {
        /// マイグレーション名
        name: String,
        /// 不正な理由
        reason: String,
    },

    /// up の実行またはコミットに失敗
    #[error("Migration {name} failed: {cause}{}", format_atomicity(.atomic))]
    MigrationFailed {
        /// 失敗したマイグレーション名
        name: String,
        /// エラー原因
        cause: String,
        /// スキーマ変更が確実にロールバックされたか
        atomic: bool,
    },

    /// down が定義されていない
    #[error("Migration {name} is not rollback-able: no down action is defined")]
    NotRollbackable {
        /// マイグレーション名
        name: String,
    },

    /// down の実行またはコミットに失敗（レジャーは変更されない）
    #[error("Rollback of migration {name} failed: {cause}{}; ledger entry was kept, manual reconciliation is required", format_atomicity(.atomic))]
    RollbackFailed {
        /// 失敗したマイグレーション名
        name: String,
        /// エラー原因
        cause: String,
        /// スキーマ変更が確実にロールバックされたか
        atomic: bool,
    },

    /// 実行ロックを時間内に取得できなかった（再試行可能）
    #[error("Could not acquire the migration lock {}", describe_lock_wait(.waited, .holder, .last_error))]
    LockTimeout {
        /// 待機した時間
        waited: Duration,
        /// 最後に観測したロック保持者
        holder: Option<String>,
        /// 最後に発生した取得エラー
        last_error: Option<String>,
    },

    /// 実行中にリースが失効し、他のプロセスにロックを奪われた
    #[error("Migration lock lease held by {owner} expired and was lost")]
    LockLost {
        /// 失効したロック所有者
        owner: String,
    },

    /// レジャーまたは定義に対象が存在しない
    #[error("Migration not found: {name}")]
    NotFound {
        /// マイグレーション名
        name: String,
    },

    /// データベース操作エラー
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl MigrationEngineError {
    /// 失敗に関係するマイグレーション名
    pub fn migration_name(&self) -> Option<&str> {
        match self {
            MigrationEngineError::DuplicateMigration { name, .. }
            | MigrationEngineError::InvalidDefinition { name, .. }
            | MigrationEngineError::MigrationFailed { name, .. }
            | MigrationEngineError::NotRollbackable { name }
            | MigrationEngineError::RollbackFailed { name, .. }
            | MigrationEngineError::NotFound { name } => Some(name),
            MigrationEngineError::SourceUnavailable { .. }
            | MigrationEngineError::LockTimeout { .. }
            | MigrationEngineError::LockLost { .. }
            | MigrationEngineError::Database(_) => None,
        }
    }

    /// 呼び出し側が後で再試行すべきエラーかどうか
    pub fn is_retryable(&self) -> bool {
        matches!(self, MigrationEngineError::LockTimeout { .. })
    }

    /// CLI の終了コード
    ///
    /// ロックタイムアウトは EX_TEMPFAIL(75)、それ以外は 1。
    pub fn exit_code(&self) -> i32 {
        if self.is_retryable() {
            75
        } else {
            1
        }
    }
}

fn format_detail_opt(detail: &Option<String>) -> String {
    detail
        .as_ref()
        .map_or(String::new(), |d| format!(" ({})", d))
}

fn format_atomicity(atomic: &bool) -> String {
    if *atomic {
        String::new()
    } else {
        "; DDL is not transactional on this database, schema changes may have been partially committed"
            .to_string()
    }
}

fn describe_lock_wait(
    waited: &Duration,
    holder: &Option<String>,
    last_error: &Option<String>,
) -> String {
    format!(
        "within {}s (held by {}){}",
        waited.as_secs(),
        holder.as_deref().unwrap_or("unknown"),
        format_detail_opt(last_error)
    )
}

/// データベースエラー
///
/// データベース操作時に発生するエラーを表現します。
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Connection error
    #[error("Database connection error: {message} (cause: {cause})")]
    Connection {
        /// エラーメッセージ
        message: String,
        /// エラー原因
        cause: String,
    },

    /// Query execution error
    #[error("Query execution error: {message}")]
    Query {
        /// エラーメッセージ
        message: String,
        /// 失敗したSQL
        sql: Option<String>,
    },

    /// Transaction error
    #[error("Transaction error: {message}")]
    Transaction {
        /// エラーメッセージ
        message: String,
    },
}

impl DatabaseError {
    /// 接続エラーかどうか
    pub fn is_connection(&self) -> bool {
        matches!(self, DatabaseError::Connection { .. })
    }

    /// クエリエラーかどうか
    pub fn is_query(&self) -> bool {
        matches!(self, DatabaseError::Query { .. })
    }

    /// 失敗したSQL（存在する場合）
    pub fn sql(&self) -> Option<&str> {
        match self {
            DatabaseError::Query { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }
}

/// 設定エラー
#[derive(Debug, Error)]
pub enum ConfigError {
    /// バージョン未指定
    #[error("Config file version is not specified")]
    MissingVersion,

    /// 環境設定なし
    #[error("At least one environment configuration is required")]
    NoEnvironments,

    /// 環境が見つからない
    #[error("Environment '{name}' not found. Available environments: {available:?}")]
    EnvironmentNotFound {
        /// 指定された環境名
        name: String,
        /// 利用可能な環境名リスト
        available: Vec<String>,
    },

    /// データベース名未指定
    #[error("Database name is not specified")]
    MissingDatabaseName,

    /// 未対応のデータベース方言
    #[error("Unsupported database dialect: {name}. Please specify one of: postgresql, mysql, sqlite.")]
    UnsupportedDialect {
        /// 指定された方言名
        name: String,
    },

    /// ロック設定が不正
    #[error("Invalid lock config: {reason}")]
    InvalidLock {
        /// 不正な理由
        reason: String,
    },

    /// 環境別設定の検証エラー
    #[error("Invalid config for environment '{environment}': {source}")]
    InvalidEnvironment {
        /// 環境名
        environment: String,
        /// 原因
        #[source]
        source: Box<ConfigError>,
    },
}
