// 統合テスト共通ヘルパー
//
// テスト全体で共有されるユーティリティ関数を集約する。
// テストファイルから `mod common;` で利用可能。

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use keel::core::config::{Config, DatabaseConfig, Dialect, LockConfig};
use keel::core::migration::{MigrationDefinition, MigrationStep};
use keel::services::config_serializer::ConfigSerializer;
use keel::adapters::sql_script::SqlScript;
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::{AnyConnection, AnyPool, Row};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// 一時ディレクトリ内のファイルベースSQLiteに接続する
///
/// `:memory:` は接続ごとに別のデータベースになるため使用しない。
pub async fn sqlite_pool(temp_dir: &TempDir, file_name: &str) -> AnyPool {
    install_default_drivers();
    let db_path = temp_dir.path().join(file_name);
    AnyPoolOptions::new()
        .max_connections(4)
        .connect(&format!("sqlite://{}?mode=rwc", db_path.to_str().unwrap()))
        .await
        .unwrap()
}

/// テスト用の短いロック設定
pub fn fast_lock() -> LockConfig {
    LockConfig {
        timeout_secs: 10,
        lease_secs: 60,
        poll_interval_ms: 20,
    }
}

/// SQLスクリプトのステップ
pub fn sql(text: &str) -> Arc<dyn MigrationStep> {
    Arc::new(SqlScript::new(text))
}

/// up / down を持つ定義
pub fn reversible(name: &str, up: &str, down: &str) -> MigrationDefinition {
    MigrationDefinition::new(name, sql(up)).with_down(sql(down))
}

/// テーブルが存在するか
pub async fn table_exists(pool: &AnyPool, table: &str) -> bool {
    let row = sqlx::query("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
        .bind(table.to_string())
        .fetch_one(pool)
        .await
        .unwrap();
    row.try_get::<i64, _>(0).unwrap() > 0
}

/// カラムが存在するか
pub async fn column_exists(pool: &AnyPool, table: &str, column: &str) -> bool {
    let sql = format!("SELECT COUNT(*) FROM pragma_table_info('{}') WHERE name = ?", table);
    let row = sqlx::query(&sql)
        .bind(column.to_string())
        .fetch_one(pool)
        .await
        .unwrap();
    row.try_get::<i64, _>(0).unwrap() > 0
}

/// 実行回数を数えるステップ
///
/// 実行時にテーブルを作成するため、2回実行されると2回目は失敗する。
pub struct CountingStep {
    pub table: String,
    pub runs: Arc<AtomicUsize>,
    pub delay: Duration,
}

#[async_trait]
impl MigrationStep for CountingStep {
    async fn run(&self, conn: &mut AnyConnection) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        sqlx::query(&format!("CREATE TABLE {} (id INTEGER PRIMARY KEY)", self.table))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

/// テスト用のConfig作成ヘルパー
pub fn create_test_config(dialect: Dialect, database_path: &str) -> Config {
    let mut environments = HashMap::new();
    environments.insert(
        "development".to_string(),
        DatabaseConfig {
            host: String::new(),
            database: database_path.to_string(),
            ..Default::default()
        },
    );

    Config {
        version: "1.0".to_string(),
        dialect,
        migrations_dir: PathBuf::from("migrations"),
        lock: fast_lock(),
        environments,
    }
}

/// テスト用のプロジェクトディレクトリを作成（SQLite）
pub fn setup_test_project() -> Result<(TempDir, PathBuf)> {
    let temp_dir = TempDir::new()?;
    let project_path = temp_dir.path().to_path_buf();

    let config = create_test_config(Dialect::SQLite, "keel_test.db");
    let config_yaml = ConfigSerializer::to_yaml(&config)?;
    fs::write(project_path.join(Config::DEFAULT_CONFIG_PATH), config_yaml)?;
    fs::create_dir_all(project_path.join("migrations"))?;

    Ok((temp_dir, project_path))
}

/// マイグレーションディレクトリを作成
pub fn write_migration(project_path: &Path, name: &str, up: &str, down: Option<&str>) {
    let dir = project_path.join("migrations").join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("up.sql"), up).unwrap();
    if let Some(down) = down {
        fs::write(dir.join("down.sql"), down).unwrap();
    }
}
