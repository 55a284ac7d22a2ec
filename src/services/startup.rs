// サービス起動時のマイグレーション
//
// API サービスの起動処理から呼び出し、未適用マイグレーションを適用してから
// リクエストの受付を開始するためのフック。

use crate::core::config::{Dialect, LockConfig};
use crate::core::error::MigrationEngineError;
use crate::core::migration::RunReport;
use crate::services::migration_runner::MigrationRunner;
use crate::services::migration_source::MigrationSource;
use sqlx::AnyPool;
use std::sync::Arc;
use tracing::{info, warn};

/// 起動時マイグレーションのオプション
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupOptions {
    /// 実行ロックの設定
    pub lock: LockConfig,

    /// ロック取得がタイムアウトした場合の再試行回数
    pub lock_retries: u32,
}

impl Default for StartupOptions {
    fn default() -> Self {
        Self {
            lock: LockConfig::default(),
            lock_retries: 2,
        }
    }
}

/// 起動時に未適用マイグレーションを適用する
///
/// ローリングデプロイで複数インスタンスが同時に起動した場合、ロックを取れなかった
/// インスタンスは `lock_retries` 回まで待ち直す。適用は1インスタンスのみが行い、
/// 他のインスタンスはロック取得後に何もせず完了する。
pub async fn run_startup_migrations(
    pool: &AnyPool,
    dialect: Dialect,
    source: Arc<dyn MigrationSource>,
    options: StartupOptions,
) -> Result<RunReport, MigrationEngineError> {
    let runner = MigrationRunner::new(pool.clone(), dialect, source, options.lock.clone());

    let mut attempt = 0;
    loop {
        match runner.run_pending().await {
            Ok(report) => {
                if report.is_noop() {
                    info!("Schema is up to date");
                } else {
                    info!(applied = report.applied.len(), "Startup migrations applied");
                }
                return Ok(report);
            }
            Err(e) if e.is_retryable() && attempt < options.lock_retries => {
                attempt += 1;
                warn!(attempt, error = %e, "Migration lock busy at startup, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}
