// 実行ロックアダプター
//
// 複数プロセス（ローリングデプロイ中のインスタンスなど）が同時に apply / rollback を
// 実行しないよう、専用テーブルの1行をコンペア・アンド・セットで確保するリース型ロック。
// 保持プロセスがクラッシュした場合はリース期限切れで他のプロセスが回収できる。

use crate::core::config::{Dialect, LockConfig};
use crate::core::error::{DatabaseError, MigrationEngineError};
use crate::core::naming::LOCK_TABLE;
use chrono::Utc;
use sqlx::{AnyConnection, AnyPool, Row};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// ロック行のID（テーブルには常にこの1行のみ存在する）
const LOCK_ROW_ID: i64 = 1;

/// 実行ロック
#[derive(Debug, Clone)]
pub struct RunLock {
    dialect: Dialect,
    config: LockConfig,
}

/// ロック行の現在の状態
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockState {
    /// 保持者（未保持の場合は None）
    pub owner: Option<String>,
    /// リース期限（UNIXミリ秒）
    pub expires_at_ms: i64,
}

impl RunLock {
    /// 新しいRunLockを作成
    pub fn new(dialect: Dialect, config: LockConfig) -> Self {
        Self { dialect, config }
    }

    /// ロックテーブル作成SQLを生成
    pub fn generate_create_table_sql(&self) -> String {
        let owner_type = match self.dialect {
            Dialect::SQLite => "TEXT",
            Dialect::PostgreSQL | Dialect::MySQL => "VARCHAR(255)",
        };
        format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
    id BIGINT NOT NULL PRIMARY KEY,
    owner {} NULL,
    expires_at BIGINT NOT NULL
)"#,
            LOCK_TABLE, owner_type
        )
    }

    /// ロック行の初期化SQLを生成（既に存在する場合は何もしない）
    pub fn generate_seed_row_sql(&self) -> String {
        match self.dialect {
            Dialect::PostgreSQL => format!(
                "INSERT INTO {} (id, owner, expires_at) VALUES ({}, NULL, 0) ON CONFLICT (id) DO NOTHING",
                LOCK_TABLE, LOCK_ROW_ID
            ),
            Dialect::MySQL => format!(
                "INSERT IGNORE INTO {} (id, owner, expires_at) VALUES ({}, NULL, 0)",
                LOCK_TABLE, LOCK_ROW_ID
            ),
            Dialect::SQLite => format!(
                "INSERT OR IGNORE INTO {} (id, owner, expires_at) VALUES ({}, NULL, 0)",
                LOCK_TABLE, LOCK_ROW_ID
            ),
        }
    }

    /// ロック確保（コンペア・アンド・セット）SQLを生成
    ///
    /// 未保持、またはリースが期限切れの場合のみ更新される。
    pub fn generate_claim_sql(&self) -> String {
        format!(
            "UPDATE {} SET owner = {}, expires_at = {} WHERE id = {} AND (owner IS NULL OR expires_at < {})",
            LOCK_TABLE,
            self.dialect.placeholder(1),
            self.dialect.placeholder(2),
            LOCK_ROW_ID,
            self.dialect.placeholder(3)
        )
    }

    /// リース延長SQLを生成
    pub fn generate_refresh_sql(&self) -> String {
        format!(
            "UPDATE {} SET expires_at = {} WHERE id = {} AND owner = {}",
            LOCK_TABLE,
            self.dialect.placeholder(1),
            LOCK_ROW_ID,
            self.dialect.placeholder(2)
        )
    }

    /// ロック解放SQLを生成
    pub fn generate_release_sql(&self) -> String {
        format!(
            "UPDATE {} SET owner = NULL, expires_at = 0 WHERE id = {} AND owner = {}",
            LOCK_TABLE,
            LOCK_ROW_ID,
            self.dialect.placeholder(1)
        )
    }

    /// ロック状態取得SQLを生成
    pub fn generate_inspect_sql(&self) -> String {
        format!(
            "SELECT owner, expires_at FROM {} WHERE id = {}",
            LOCK_TABLE, LOCK_ROW_ID
        )
    }

    /// ロックテーブルとロック行を作成（存在しない場合のみ）
    pub async fn ensure_schema(&self, pool: &AnyPool) -> Result<(), DatabaseError> {
        for sql in [self.generate_create_table_sql(), self.generate_seed_row_sql()] {
            sqlx::query(&sql)
                .execute(pool)
                .await
                .map_err(|e| DatabaseError::Query {
                    message: format!("Failed to prepare migration lock table: {}", e),
                    sql: Some(sql.clone()),
                })?;
        }
        Ok(())
    }

    /// ロックの現在の状態を取得
    pub async fn inspect(&self, pool: &AnyPool) -> Result<LockState, DatabaseError> {
        let mut conn = acquire_connection(pool).await?;
        self.read_state(&mut conn).await
    }

    async fn read_state(&self, conn: &mut AnyConnection) -> Result<LockState, DatabaseError> {
        let sql = self.generate_inspect_sql();
        let row = sqlx::query(&sql)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| DatabaseError::Query {
                message: format!("Failed to read migration lock: {}", e),
                sql: Some(sql.clone()),
            })?;

        let owner: Option<String> = row.try_get(0).map_err(|e| DatabaseError::Query {
            message: format!("Failed to decode migration lock owner: {}", e),
            sql: Some(sql.clone()),
        })?;
        let expires_at_ms: i64 = row.try_get(1).map_err(|e| DatabaseError::Query {
            message: format!("Failed to decode migration lock expiry: {}", e),
            sql: Some(sql.clone()),
        })?;

        Ok(LockState {
            owner,
            expires_at_ms,
        })
    }

    /// ロックを1回だけ確保を試みる
    ///
    /// 確保できた場合は Some(LockGuard)、他のプロセスが保持中の場合は None。
    pub async fn try_acquire(&self, pool: &AnyPool) -> Result<Option<LockGuard>, DatabaseError> {
        let owner = new_owner_id();
        let now_ms = Utc::now().timestamp_millis();
        let expires_at_ms = now_ms + duration_ms(self.config.lease());

        let sql = self.generate_claim_sql();
        let result = sqlx::query(&sql)
            .bind(owner.clone())
            .bind(expires_at_ms)
            .bind(now_ms)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::Query {
                message: format!("Failed to claim migration lock: {}", e),
                sql: Some(sql.clone()),
            })?;

        if result.rows_affected() == 1 {
            debug!(owner = %owner, "Acquired migration lock");
            Ok(Some(LockGuard {
                pool: pool.clone(),
                lock: self.clone(),
                owner,
                released: false,
            }))
        } else {
            Ok(None)
        }
    }

    /// タイムアウトまでロック確保を再試行する
    ///
    /// 時間内に確保できなければ `LockTimeout`（再試行可能）で失敗する。
    /// 確保の試行中に発生したエラーは競合とみなして再試行し、最後のエラーを報告に含める。
    pub async fn acquire(&self, pool: &AnyPool) -> Result<LockGuard, MigrationEngineError> {
        let timeout = self.config.timeout();
        let started = Instant::now();
        let mut last_error: Option<String> = None;

        loop {
            match self.try_acquire(pool).await {
                Ok(Some(guard)) => return Ok(guard),
                Ok(None) => {
                    debug!(waited_ms = started.elapsed().as_millis() as u64, "Migration lock is held, waiting");
                }
                Err(e) => {
                    warn!(error = %e, "Migration lock claim attempt failed, retrying");
                    last_error = Some(e.to_string());
                }
            }

            if started.elapsed() >= timeout {
                let holder = self.inspect(pool).await.ok().and_then(|state| state.owner);
                return Err(MigrationEngineError::LockTimeout {
                    waited: started.elapsed(),
                    holder,
                    last_error,
                });
            }

            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// 所有者のリースを延長し、まだ所有しているかを返す
    async fn extend_lease(&self, conn: &mut AnyConnection, owner: &str) -> Result<bool, DatabaseError> {
        let expires_at_ms = Utc::now().timestamp_millis() + duration_ms(self.config.lease());
        let sql = self.generate_refresh_sql();
        let result = sqlx::query(&sql)
            .bind(expires_at_ms)
            .bind(owner.to_string())
            .execute(&mut *conn)
            .await
            .map_err(|e| DatabaseError::Query {
                message: format!("Failed to refresh migration lock: {}", e),
                sql: Some(sql),
            })?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        // MySQL は値が変わらない UPDATE の影響行数を 0 と報告するため、保持者を再確認する
        let state = self.read_state(conn).await?;
        Ok(state.owner.as_deref() == Some(owner))
    }
}

/// 確保済みの実行ロック
///
/// `release` で明示的に解放する。解放されずに破棄された場合はバックグラウンドで解放を試み、
/// それも失敗した場合はリース期限切れで回収される。
#[derive(Debug)]
pub struct LockGuard {
    pool: AnyPool,
    lock: RunLock,
    owner: String,
    released: bool,
}

impl LockGuard {
    /// ロック所有者ID
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// リースを延長する
    ///
    /// リースが失効して他のプロセスに奪われていた場合は `LockLost` で失敗する。
    pub async fn refresh(&self) -> Result<(), MigrationEngineError> {
        let mut conn = acquire_connection(&self.pool).await?;
        self.refresh_on(&mut conn).await
    }

    /// 指定のコネクション上でリースを延長する
    ///
    /// コミット直前に Runner のトランザクション上で呼び出し、ロック行の更新と
    /// マイグレーションのコミットを同じトランザクションに含める。
    pub async fn refresh_on(&self, conn: &mut AnyConnection) -> Result<(), MigrationEngineError> {
        if self.lock.extend_lease(conn, &self.owner).await? {
            Ok(())
        } else {
            Err(MigrationEngineError::LockLost {
                owner: self.owner.clone(),
            })
        }
    }

    /// リースを定期的に延長するハートビートを開始する
    ///
    /// マイグレーションの実行がリース期間より長くかかっても他のプロセスに奪われないよう、
    /// リース期間の1/3ごとに延長する。戻り値が破棄されると停止する。
    pub fn heartbeat(&self) -> LeaseHeartbeat {
        let pool = self.pool.clone();
        let lock = self.lock.clone();
        let owner = self.owner.clone();
        let interval = (lock.config.lease() / 3).max(Duration::from_millis(10));

        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let extended = match acquire_connection(&pool).await {
                    Ok(mut conn) => lock.extend_lease(&mut conn, &owner).await,
                    Err(e) => Err(e),
                };
                match extended {
                    Ok(true) => debug!(owner = %owner, "Extended migration lock lease"),
                    Ok(false) => {
                        warn!(owner = %owner, "Migration lock was taken over; the running migration will not be committed");
                        break;
                    }
                    Err(e) => warn!(owner = %owner, error = %e, "Failed to extend migration lock lease"),
                }
            }
        });

        LeaseHeartbeat { task }
    }

    /// ロックを解放する
    pub async fn release(mut self) -> Result<(), DatabaseError> {
        self.released = true;
        release_owner(&self.pool, &self.lock, &self.owner).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(owner = %self.owner, "Migration lock dropped outside a runtime; it will expire with its lease");
            return;
        };
        let pool = self.pool.clone();
        let lock = self.lock.clone();
        let owner = self.owner.clone();
        handle.spawn(async move {
            if let Err(e) = release_owner(&pool, &lock, &owner).await {
                warn!(owner = %owner, error = %e, "Failed to release dropped migration lock");
            }
        });
    }
}

/// 実行中のリース延長タスク
///
/// `stop` または破棄で停止する。
#[derive(Debug)]
pub struct LeaseHeartbeat {
    task: JoinHandle<()>,
}

impl LeaseHeartbeat {
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for LeaseHeartbeat {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn acquire_connection(
    pool: &AnyPool,
) -> Result<sqlx::pool::PoolConnection<sqlx::Any>, DatabaseError> {
    pool.acquire().await.map_err(|e| DatabaseError::Connection {
        message: "Failed to acquire connection for migration lock".to_string(),
        cause: e.to_string(),
    })
}

async fn release_owner(pool: &AnyPool, lock: &RunLock, owner: &str) -> Result<(), DatabaseError> {
    let sql = lock.generate_release_sql();
    sqlx::query(&sql)
        .bind(owner.to_string())
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::Query {
            message: format!("Failed to release migration lock: {}", e),
            sql: Some(sql),
        })?;
    debug!(owner = %owner, "Released migration lock");
    Ok(())
}

fn new_owner_id() -> String {
    format!("pid{}-{}", std::process::id(), Uuid::new_v4())
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
