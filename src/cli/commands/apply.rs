// applyコマンドハンドラー
//
// マイグレーションの適用機能を実装します。
// - データベース接続の確立と MigrationRunner の組み立て
// - 未適用マイグレーションの順次実行（Runner が実行ロックとトランザクションを管理）
// - 実行結果と警告の表示

use crate::cli::command_context::CommandContext;
use crate::cli::commands::{render_output, CommandOutput};
use crate::cli::OutputFormat;
use crate::core::migration::{AppliedMigration, RunReport};
use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;

/// applyコマンドの出力構造体
#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutput {
    /// 適用されたマイグレーション数
    pub applied_count: usize,
    /// 各マイグレーションの結果
    pub migrations: Vec<AppliedMigration>,
    /// 合計実行時間（ミリ秒）
    pub total_duration_ms: i64,
    /// 警告メッセージ
    pub warnings: Vec<String>,
    /// メッセージ
    #[serde(skip)]
    pub message: String,
}

impl CommandOutput for ApplyOutput {
    fn to_text(&self) -> String {
        self.message.clone()
    }
}

impl ApplyOutput {
    fn from_report(report: RunReport) -> Self {
        let total_duration_ms = report.applied.iter().map(|m| m.duration_ms).sum();
        let message = generate_summary(&report);
        Self {
            applied_count: report.applied.len(),
            migrations: report.applied,
            total_duration_ms,
            warnings: report.warnings,
            message,
        }
    }
}

/// applyコマンドの入力パラメータ
#[derive(Debug, Clone)]
pub struct ApplyCommand {
    /// プロジェクトのルートパス
    pub project_path: PathBuf,
    /// カスタム設定ファイルパス
    pub config_path: Option<PathBuf>,
    /// 対象環境
    pub env: String,
    /// ロック取得のタイムアウト（秒）
    pub lock_timeout: Option<u64>,
    /// 出力フォーマット
    pub format: OutputFormat,
}

/// applyコマンドハンドラー
#[derive(Debug, Default)]
pub struct ApplyCommandHandler {}

impl ApplyCommandHandler {
    /// 新しいApplyCommandHandlerを作成
    pub fn new() -> Self {
        Self {}
    }

    /// applyコマンドを実行
    ///
    /// # Arguments
    ///
    /// * `command` - applyコマンドのパラメータ
    ///
    /// # Returns
    ///
    /// 成功時は適用されたマイグレーションの概要、失敗時は失敗したマイグレーション名と原因
    pub async fn execute(&self, command: &ApplyCommand) -> Result<String> {
        let context = CommandContext::load_with_config(
            command.project_path.clone(),
            command.config_path.clone(),
        )?;
        debug!(migrations_dir = %context.migrations_dir().display(), "Resolved migrations directory");

        let runner = context.runner(&command.env, command.lock_timeout).await?;
        let report = runner.run_pending().await?;

        render_output(&ApplyOutput::from_report(report), &command.format)
    }
}

/// 適用結果のサマリーを生成
fn generate_summary(report: &RunReport) -> String {
    let mut summary = String::new();

    for warning in &report.warnings {
        summary.push_str(&format!("{} {}\n", "warning:".yellow().bold(), warning));
    }

    if report.is_noop() {
        summary.push_str("No pending migrations to apply. Database is up to date.");
        return summary;
    }

    summary.push_str("=== Migration Apply Complete ===\n");
    summary.push_str(&format!(
        "{} migration(s) applied:\n\n",
        report.applied.len()
    ));
    for migration in &report.applied {
        summary.push_str(&format!(
            "{} {} ({}ms)\n",
            "✓".green(),
            migration.name,
            migration.duration_ms
        ));
    }

    summary
}
