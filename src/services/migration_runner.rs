// マイグレーションランナー
//
// 発見済み定義とレジャーの差分から未適用マイグレーションを求め、
// 1件ずつトランザクション内で実行してレジャーを更新する。
// apply / rollback は実行ロックで保護され、どの終了経路でもロックを解放する。

use crate::adapters::ledger_store::LedgerStore;
use crate::adapters::run_lock::{LockGuard, RunLock};
use crate::core::config::{Dialect, LockConfig};
use crate::core::error::{DatabaseError, MigrationEngineError};
use crate::core::migration::{
    AppliedMigration, LedgerEntry, MigrationDefinition, MigrationStep, RollbackOutcome,
    RunReport, RunState,
};
use crate::services::migration_source::MigrationSource;
use chrono::Utc;
use serde::Serialize;
use sqlx::{Any, AnyPool, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// マイグレーションの状態スナップショット
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MigrationStatus {
    /// 適用済みエントリ（記録順）
    pub executed: Vec<LedgerEntry>,

    /// 未適用マイグレーション名（昇順）
    pub pending: Vec<String>,

    /// 警告（チェックサム不一致、レジャーの欠落、定義の欠落）
    pub warnings: Vec<String>,
}

impl MigrationStatus {
    /// 適用済みマイグレーション名（記録順）
    pub fn executed_names(&self) -> Vec<&str> {
        self.executed.iter().map(|e| e.name.as_str()).collect()
    }

    /// 未適用のマイグレーションがないか
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

/// マイグレーションランナー
pub struct MigrationRunner {
    pool: AnyPool,
    dialect: Dialect,
    source: Arc<dyn MigrationSource>,
    ledger: LedgerStore,
    lock: RunLock,
}

impl std::fmt::Debug for MigrationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRunner")
            .field("dialect", &self.dialect)
            .field("lock", &self.lock)
            .finish()
    }
}

impl MigrationRunner {
    /// 新しいMigrationRunnerを作成
    ///
    /// # Arguments
    ///
    /// * `pool` - 対象データベースの接続プール
    /// * `dialect` - データベース方言
    /// * `source` - マイグレーション定義の読み込み元
    /// * `lock_config` - 実行ロックの設定
    pub fn new(
        pool: AnyPool,
        dialect: Dialect,
        source: Arc<dyn MigrationSource>,
        lock_config: LockConfig,
    ) -> Self {
        Self {
            pool,
            dialect,
            source,
            ledger: LedgerStore::new(dialect),
            lock: RunLock::new(dialect, lock_config),
        }
    }

    /// 未適用マイグレーション名（昇順）。副作用なし
    pub async fn pending(&self) -> Result<Vec<String>, MigrationEngineError> {
        let (definitions, entries) = self.load().await?;
        Ok(RunState::compute(&definitions, &entries).pending)
    }

    /// 適用済み / 未適用のスナップショット。ロックは取得しない
    pub async fn status(&self) -> Result<MigrationStatus, MigrationEngineError> {
        let (definitions, entries) = self.load().await?;
        let state = RunState::compute(&definitions, &entries);
        let warnings = collect_warnings(&definitions, &entries, &state);

        Ok(MigrationStatus {
            executed: entries,
            pending: state.pending,
            warnings,
        })
    }

    /// 新しいマイグレーションの雛形を作成（レジャーには触れない）
    pub fn create(&self, human_name: &str) -> Result<String, MigrationEngineError> {
        self.source.create(human_name)
    }

    /// 未適用マイグレーションを昇順に全て適用する
    ///
    /// 各マイグレーションは up の実行とレジャーへの記録を同一トランザクションで行う。
    /// 最初の失敗で停止し、そのマイグレーションのトランザクションはロールバックされる。
    pub async fn run_pending(&self) -> Result<RunReport, MigrationEngineError> {
        let guard = self.acquire_lock().await?;
        let result = self.apply_pending(&guard).await;
        self.release_lock(guard).await;
        result
    }

    /// 最後に記録されたマイグレーションを1件ロールバックする
    pub async fn rollback_last(&self) -> Result<RollbackOutcome, MigrationEngineError> {
        let guard = self.acquire_lock().await?;
        let result = self.rollback_latest(&guard).await;
        self.release_lock(guard).await;
        result
    }

    async fn load(
        &self,
    ) -> Result<(Vec<MigrationDefinition>, Vec<LedgerEntry>), MigrationEngineError> {
        let definitions = self.source.list_all()?;
        let entries = self.ledger.list_executed_if_present(&self.pool).await?;
        debug!(
            discovered = definitions.len(),
            executed = entries.len(),
            "Loaded migration state"
        );
        Ok((definitions, entries))
    }

    async fn acquire_lock(&self) -> Result<LockGuard, MigrationEngineError> {
        self.lock.ensure_schema(&self.pool).await?;
        let guard = self.lock.acquire(&self.pool).await?;
        debug!(owner = %guard.owner(), "Migration lock acquired");
        Ok(guard)
    }

    async fn release_lock(&self, guard: LockGuard) {
        let owner = guard.owner().to_string();
        if let Err(e) = guard.release().await {
            warn!(owner = %owner, error = %e, "Failed to release migration lock; it will expire with its lease");
        }
    }

    async fn apply_pending(&self, guard: &LockGuard) -> Result<RunReport, MigrationEngineError> {
        self.ledger.ensure_schema(&self.pool).await?;
        let (definitions, entries) = self.load().await?;
        let state = RunState::compute(&definitions, &entries);
        let warnings = collect_warnings(&definitions, &entries, &state);

        if state.pending.is_empty() {
            info!("No pending migrations");
            return Ok(RunReport {
                applied: Vec::new(),
                warnings,
            });
        }

        let by_name: HashMap<&str, &MigrationDefinition> = definitions
            .iter()
            .map(|definition| (definition.name.as_str(), definition))
            .collect();

        info!(count = state.pending.len(), "Applying pending migrations");

        let mut applied = Vec::with_capacity(state.pending.len());
        for name in &state.pending {
            let Some(definition) = by_name.get(name.as_str()) else {
                return Err(MigrationEngineError::NotFound { name: name.clone() });
            };

            // リースを失っていた場合はスキーマに触れる前に停止する
            guard.refresh().await?;

            applied.push(self.apply_one(guard, definition).await?);
        }

        Ok(RunReport { applied, warnings })
    }

    async fn apply_one(
        &self,
        guard: &LockGuard,
        definition: &MigrationDefinition,
    ) -> Result<AppliedMigration, MigrationEngineError> {
        let name = definition.name.as_str();
        info!(migration = %name, "Applying migration");
        let started = Instant::now();
        let heartbeat = guard.heartbeat();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| self.migration_failed(name, format!("failed to begin transaction: {}", e)))?;

        if let Err(e) = definition.up.run(&mut *tx).await {
            self.abort(tx, name).await;
            return Err(self.migration_failed(name, format!("{:#}", e)));
        }

        let executed_at = Utc::now();
        let checksum = definition.checksum.as_deref().unwrap_or_default();
        if let Err(e) = self.ledger.record(&mut *tx, name, executed_at, checksum).await {
            self.abort(tx, name).await;
            return Err(self.migration_failed(name, e.to_string()));
        }

        // リースを失っていた場合はコミットしない
        heartbeat.stop();
        if let Err(e) = guard.refresh_on(&mut *tx).await {
            self.abort(tx, name).await;
            return Err(e);
        }

        tx.commit()
            .await
            .map_err(|e| self.migration_failed(name, format!("failed to commit: {}", e)))?;

        let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        info!(migration = %name, duration_ms, "Applied migration");

        Ok(AppliedMigration {
            name: name.to_string(),
            executed_at,
            duration_ms,
        })
    }

    async fn rollback_latest(
        &self,
        guard: &LockGuard,
    ) -> Result<RollbackOutcome, MigrationEngineError> {
        self.ledger.ensure_schema(&self.pool).await?;
        let entries = self.ledger.list_executed(&self.pool).await?;

        let Some(last) = entries.last() else {
            info!("Ledger is empty, nothing to roll back");
            return Ok(RollbackOutcome::NothingToRollBack);
        };
        let name = last.name.clone();

        let definitions = self.source.list_all()?;
        let definition = definitions
            .iter()
            .find(|definition| definition.name == name)
            .ok_or_else(|| MigrationEngineError::NotFound { name: name.clone() })?;

        let down = definition
            .down
            .as_ref()
            .ok_or_else(|| MigrationEngineError::NotRollbackable { name: name.clone() })?;

        guard.refresh().await?;
        self.revert_one(guard, &name, &**down).await?;

        Ok(RollbackOutcome::RolledBack(name))
    }

    async fn revert_one(
        &self,
        guard: &LockGuard,
        name: &str,
        down: &dyn MigrationStep,
    ) -> Result<(), MigrationEngineError> {
        info!(migration = %name, "Rolling back migration");
        let heartbeat = guard.heartbeat();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| self.rollback_failed(name, format!("failed to begin transaction: {}", e)))?;

        if let Err(e) = down.run(&mut *tx).await {
            self.abort(tx, name).await;
            return Err(self.rollback_failed(name, format!("{:#}", e)));
        }

        if let Err(e) = self.ledger.remove(&mut *tx, name).await {
            self.abort(tx, name).await;
            return Err(self.rollback_failed(name, e.to_string()));
        }

        heartbeat.stop();
        if let Err(e) = guard.refresh_on(&mut *tx).await {
            self.abort(tx, name).await;
            return Err(e);
        }

        tx.commit()
            .await
            .map_err(|e| self.rollback_failed(name, format!("failed to commit: {}", e)))?;

        info!(migration = %name, "Rolled back migration");
        Ok(())
    }

    /// トランザクションを明示的にロールバックする
    async fn abort(&self, tx: Transaction<'static, Any>, name: &str) {
        if let Err(e) = tx.rollback().await {
            let error = DatabaseError::Transaction {
                message: e.to_string(),
            };
            warn!(migration = %name, error = %error, "Failed to roll back transaction");
        }
        if !self.dialect.supports_transactional_ddl() {
            warn!(
                migration = %name,
                dialect = %self.dialect,
                "DDL is not transactional on this database; schema changes may have been partially committed"
            );
        }
    }

    fn migration_failed(&self, name: &str, cause: String) -> MigrationEngineError {
        MigrationEngineError::MigrationFailed {
            name: name.to_string(),
            cause,
            atomic: self.dialect.supports_transactional_ddl(),
        }
    }

    fn rollback_failed(&self, name: &str, cause: String) -> MigrationEngineError {
        MigrationEngineError::RollbackFailed {
            name: name.to_string(),
            cause,
            atomic: self.dialect.supports_transactional_ddl(),
        }
    }
}

/// 適用済みマイグレーションの整合性に関する警告を収集する
///
/// - 記録されたチェックサムと現在の定義のチェックサムの不一致
/// - 適用済みより前に並ぶ未適用マイグレーション（レジャーの欠落）
/// - 定義が見つからない適用済みマイグレーション
fn collect_warnings(
    definitions: &[MigrationDefinition],
    entries: &[LedgerEntry],
    state: &RunState,
) -> Vec<String> {
    let mut warnings = Vec::new();

    let checksums: HashMap<&str, &str> = definitions
        .iter()
        .filter_map(|d| d.checksum.as_deref().map(|c| (d.name.as_str(), c)))
        .collect();
    for entry in entries {
        if let Some(expected) = checksums.get(entry.name.as_str()) {
            if !entry.verify_checksum(expected) {
                warnings.push(format!(
                    "Checksum mismatch for applied migration {}: the definition changed after it was applied",
                    entry.name
                ));
            }
        }
    }

    for name in state.gaps() {
        warnings.push(format!(
            "Migration {} is pending but sorts before already applied migrations; it will be applied out of order",
            name
        ));
    }

    for name in state.orphaned(definitions) {
        warnings.push(format!(
            "Applied migration {} has no definition in the migration source",
            name
        ));
    }

    for warning in &warnings {
        warn!("{}", warning);
    }

    warnings
}
