// レジャーストア
//
// 適用履歴テーブル（keel_migrations）の管理を担当するアダプター。
// データベース固有のSQL構文を抽象化し、記録・削除は呼び出し側のトランザクション上で行います。

use crate::core::config::Dialect;
use crate::core::error::{DatabaseError, MigrationEngineError};
use crate::core::migration::LedgerEntry;
use crate::core::naming::LEDGER_TABLE;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{AnyConnection, AnyPool, Row};
use tracing::debug;

/// レジャーストア
///
/// 「どのマイグレーションが適用済みか」の唯一の情報源です。
#[derive(Debug, Clone)]
pub struct LedgerStore {
    dialect: Dialect,
}

impl LedgerStore {
    /// 新しいLedgerStoreを作成
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// レジャーテーブル作成SQLを生成
    ///
    /// `id` は記録順を保持するための自動採番列。
    pub fn generate_create_table_sql(&self) -> String {
        match self.dialect {
            Dialect::PostgreSQL => format!(
                r#"CREATE TABLE IF NOT EXISTS {} (
    id BIGSERIAL PRIMARY KEY,
    name VARCHAR(255) NOT NULL UNIQUE,
    executed_at VARCHAR(64) NOT NULL,
    checksum VARCHAR(64) NOT NULL
)"#,
                LEDGER_TABLE
            ),
            Dialect::MySQL => format!(
                r#"CREATE TABLE IF NOT EXISTS {} (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    name VARCHAR(255) NOT NULL UNIQUE,
    executed_at VARCHAR(64) NOT NULL,
    checksum VARCHAR(64) NOT NULL
)"#,
                LEDGER_TABLE
            ),
            Dialect::SQLite => format!(
                r#"CREATE TABLE IF NOT EXISTS {} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    executed_at TEXT NOT NULL,
    checksum TEXT NOT NULL
)"#,
                LEDGER_TABLE
            ),
        }
    }

    /// 適用済み一覧取得SQLを生成（記録順）
    pub fn generate_list_sql(&self) -> String {
        format!(
            "SELECT name, executed_at, checksum FROM {} ORDER BY id",
            LEDGER_TABLE
        )
    }

    /// レジャーテーブルの存在確認SQLを生成（カタログ参照のみ）
    pub fn generate_table_exists_sql(&self) -> String {
        match self.dialect {
            Dialect::PostgreSQL => format!(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = current_schema() AND table_name = {}",
                self.dialect.placeholder(1)
            ),
            Dialect::MySQL => format!(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = DATABASE() AND table_name = {}",
                self.dialect.placeholder(1)
            ),
            Dialect::SQLite => format!(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = {}",
                self.dialect.placeholder(1)
            ),
        }
    }

    /// 存在確認SQLを生成
    pub fn generate_count_by_name_sql(&self) -> String {
        format!(
            "SELECT COUNT(*) FROM {} WHERE name = {}",
            LEDGER_TABLE,
            self.dialect.placeholder(1)
        )
    }

    /// 記録用INSERT SQLを生成
    pub fn generate_insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (name, executed_at, checksum) VALUES ({}, {}, {})",
            LEDGER_TABLE,
            self.dialect.placeholder(1),
            self.dialect.placeholder(2),
            self.dialect.placeholder(3)
        )
    }

    /// 削除用DELETE SQLを生成
    pub fn generate_delete_sql(&self) -> String {
        format!(
            "DELETE FROM {} WHERE name = {}",
            LEDGER_TABLE,
            self.dialect.placeholder(1)
        )
    }

    /// レジャーテーブルを作成（存在しない場合のみ）
    ///
    /// 起動のたびに呼び出しても安全です。
    pub async fn ensure_schema(&self, pool: &AnyPool) -> Result<(), DatabaseError> {
        let sql = self.generate_create_table_sql();

        sqlx::query(&sql)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::Query {
                message: format!("Failed to create migration ledger table: {}", e),
                sql: Some(sql),
            })?;

        Ok(())
    }

    /// レジャーテーブルが存在するか
    pub async fn table_exists(&self, pool: &AnyPool) -> Result<bool, DatabaseError> {
        let sql = self.generate_table_exists_sql();
        let row = sqlx::query(&sql)
            .bind(LEDGER_TABLE.to_string())
            .fetch_one(pool)
            .await
            .map_err(|e| DatabaseError::Query {
                message: format!("Failed to look up migration ledger table: {}", e),
                sql: Some(sql.clone()),
            })?;
        let count: i64 = row.try_get(0).map_err(|e| decode_error(&sql, e))?;
        Ok(count > 0)
    }

    /// 適用済みマイグレーションを取得（テーブルが未作成なら空）
    ///
    /// DDL を発行しないため、読み取り専用のロールやレプリカでも使用できます。
    pub async fn list_executed_if_present(
        &self,
        pool: &AnyPool,
    ) -> Result<Vec<LedgerEntry>, DatabaseError> {
        if !self.table_exists(pool).await? {
            debug!("Migration ledger table does not exist yet");
            return Ok(Vec::new());
        }
        self.list_executed(pool).await
    }

    /// 適用済みマイグレーションを記録順に取得
    pub async fn list_executed(&self, pool: &AnyPool) -> Result<Vec<LedgerEntry>, DatabaseError> {
        let sql = self.generate_list_sql();

        let rows = sqlx::query(&sql)
            .fetch_all(pool)
            .await
            .map_err(|e| DatabaseError::Query {
                message: format!("Failed to read migration ledger: {}", e),
                sql: Some(sql.clone()),
            })?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get(0).map_err(|e| decode_error(&sql, e))?;
                let executed_at: String = row.try_get(1).map_err(|e| decode_error(&sql, e))?;
                let checksum: String = row.try_get(2).map_err(|e| decode_error(&sql, e))?;

                let executed_at = DateTime::parse_from_rfc3339(&executed_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| DatabaseError::Query {
                        message: format!(
                            "Invalid executed_at '{}' for migration {}: {}",
                            executed_at, name, e
                        ),
                        sql: Some(sql.clone()),
                    })?;

                Ok(LedgerEntry::new(name, executed_at, checksum))
            })
            .collect()
    }

    /// マイグレーションの適用を記録
    ///
    /// Runner のトランザクション上で呼び出すこと。既に記録済みの場合は
    /// `DuplicateMigration` で失敗します（二重適用の防止）。
    pub async fn record(
        &self,
        conn: &mut AnyConnection,
        name: &str,
        executed_at: DateTime<Utc>,
        checksum: &str,
    ) -> Result<(), MigrationEngineError> {
        if self.exists(conn, name).await? {
            return Err(MigrationEngineError::DuplicateMigration {
                name: name.to_string(),
                detail: Some("already recorded in the ledger".to_string()),
            });
        }

        let sql = self.generate_insert_sql();
        sqlx::query(&sql)
            .bind(name.to_string())
            .bind(executed_at.to_rfc3339_opts(SecondsFormat::Micros, true))
            .bind(checksum.to_string())
            .execute(&mut *conn)
            .await
            .map_err(|e| DatabaseError::Query {
                message: format!("Failed to record migration {}: {}", name, e),
                sql: Some(sql),
            })?;

        debug!(name = %name, "Recorded migration in ledger");
        Ok(())
    }

    /// マイグレーションの記録を削除
    ///
    /// Runner のトランザクション上で呼び出すこと。記録が無い場合は `NotFound` で失敗します。
    pub async fn remove(
        &self,
        conn: &mut AnyConnection,
        name: &str,
    ) -> Result<(), MigrationEngineError> {
        let sql = self.generate_delete_sql();
        let result = sqlx::query(&sql)
            .bind(name.to_string())
            .execute(&mut *conn)
            .await
            .map_err(|e| DatabaseError::Query {
                message: format!("Failed to remove migration {} from ledger: {}", name, e),
                sql: Some(sql),
            })?;

        if result.rows_affected() == 0 {
            return Err(MigrationEngineError::NotFound {
                name: name.to_string(),
            });
        }

        debug!(name = %name, "Removed migration from ledger");
        Ok(())
    }

    async fn exists(&self, conn: &mut AnyConnection, name: &str) -> Result<bool, DatabaseError> {
        let sql = self.generate_count_by_name_sql();
        let row = sqlx::query(&sql)
            .bind(name.to_string())
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| DatabaseError::Query {
                message: format!("Failed to look up migration {} in ledger: {}", name, e),
                sql: Some(sql.clone()),
            })?;
        let count: i64 = row.try_get(0).map_err(|e| decode_error(&sql, e))?;
        Ok(count > 0)
    }
}

fn decode_error(sql: &str, e: sqlx::Error) -> DatabaseError {
    DatabaseError::Query {
        message: format!("Failed to decode migration ledger row: {}", e),
        sql: Some(sql.to_string()),
    }
}
