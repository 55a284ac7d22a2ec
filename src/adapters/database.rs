// データベース接続アダプター
//
// SQLxを使用したデータベース接続の管理を行います。
// PostgreSQL、MySQL、SQLiteに対応した統一されたインターフェースを提供します。

use crate::adapters::connection_string::build_connection_string;
use crate::core::config::{DatabaseConfig, Dialect};
use crate::core::error::DatabaseError;
use sqlx::pool::PoolOptions;
use sqlx::{Any, AnyPool};
use std::time::Duration;
use tracing::debug;

/// データベース接続サービス
///
/// データベース接続プールの初期化と管理を行います。
#[derive(Debug, Clone, Default)]
pub struct DatabaseConnectionService {}

impl DatabaseConnectionService {
    /// 新しいDatabaseConnectionServiceを作成
    pub fn new() -> Self {
        Self {}
    }

    /// データベース接続プールを作成
    ///
    /// # Arguments
    ///
    /// * `dialect` - データベース方言
    /// * `config` - データベース設定
    ///
    /// # Returns
    ///
    /// 接続プールまたはエラー
    pub async fn create_pool(
        &self,
        dialect: Dialect,
        config: &DatabaseConfig,
    ) -> Result<AnyPool, DatabaseError> {
        sqlx::any::install_default_drivers();

        let connection_string = build_connection_string(dialect, config);
        debug!(dialect = %dialect, database = %config.database, "Connecting to database");

        self.create_pool_options(config)
            .connect(&connection_string)
            .await
            .map_err(|e| DatabaseError::Connection {
                message: format!("Failed to create connection pool for {}", dialect),
                cause: e.to_string(),
            })
    }

    /// 接続テストを実行
    pub async fn test_connection(&self, pool: &AnyPool) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1")
            .execute(pool)
            .await
            .map(|_| ())
            .map_err(|e| DatabaseError::Connection {
                message: "Connection test failed".to_string(),
                cause: e.to_string(),
            })
    }

    /// 設定に応じたプールオプションを作成
    pub fn create_pool_options(&self, config: &DatabaseConfig) -> PoolOptions<Any> {
        let timeout = config.timeout.unwrap_or(30);
        PoolOptions::new()
            .max_connections(config.max_connections.unwrap_or(5))
            .acquire_timeout(Duration::from_secs(timeout))
    }

    /// 接続プールを閉じる
    pub async fn close_pool(&self, pool: AnyPool) {
        pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_service() {
        let service = DatabaseConnectionService::new();
        assert!(format!("{:?}", service).contains("DatabaseConnectionService"));
    }

    #[test]
    fn test_create_pool_options() {
        let service = DatabaseConnectionService::new();
        let config = DatabaseConfig {
            database: "test.db".to_string(),
            timeout: Some(60),
            max_connections: Some(2),
            ..Default::default()
        };

        let pool_options = service.create_pool_options(&config);

        assert_eq!(pool_options.get_max_connections(), 2);
        assert_eq!(pool_options.get_acquire_timeout(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_create_sqlite_pool_creates_file() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let config = DatabaseConfig {
            host: String::new(),
            database: db_path.to_string_lossy().to_string(),
            ..Default::default()
        };

        let service = DatabaseConnectionService::new();
        let pool = service.create_pool(Dialect::SQLite, &config).await.unwrap();
        service.test_connection(&pool).await.unwrap();
        service.close_pool(pool).await;

        assert!(db_path.exists());
    }
}
