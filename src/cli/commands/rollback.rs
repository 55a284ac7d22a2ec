// rollbackコマンドハンドラー
//
// 最後に適用されたマイグレーションを1件ロールバックする。
// down の実行とレジャーからの削除は同一トランザクションで行われる。

use crate::cli::command_context::CommandContext;
use crate::cli::commands::{render_output, CommandOutput};
use crate::cli::OutputFormat;
use crate::core::migration::RollbackOutcome;
use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

/// rollbackコマンドの出力構造体
#[derive(Debug, Clone, Serialize)]
pub struct RollbackOutput {
    /// ロールバックされたマイグレーション名（何もしなかった場合は None）
    pub rolled_back: Option<String>,
    #[serde(skip)]
    pub message: String,
}

impl CommandOutput for RollbackOutput {
    fn to_text(&self) -> String {
        self.message.clone()
    }
}

impl From<RollbackOutcome> for RollbackOutput {
    fn from(outcome: RollbackOutcome) -> Self {
        match outcome {
            RollbackOutcome::NothingToRollBack => Self {
                rolled_back: None,
                message: "No applied migrations. Nothing to roll back.".to_string(),
            },
            RollbackOutcome::RolledBack(name) => Self {
                message: format!("{} Rolled back {}", "✓".green(), name),
                rolled_back: Some(name),
            },
        }
    }
}

/// rollbackコマンドの入力パラメータ
#[derive(Debug, Clone)]
pub struct RollbackCommand {
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

/// rollbackコマンドハンドラー
#[derive(Debug, Default)]
pub struct RollbackCommandHandler {}

impl RollbackCommandHandler {
    /// 新しいRollbackCommandHandlerを作成
    pub fn new() -> Self {
        Self {}
    }

    /// rollbackコマンドを実行
    pub async fn execute(&self, command: &RollbackCommand) -> Result<String> {
        let context = CommandContext::load_with_config(
            command.project_path.clone(),
            command.config_path.clone(),
        )?;

        let runner = context.runner(&command.env, command.lock_timeout).await?;
        let outcome = runner.rollback_last().await?;

        render_output(&RollbackOutput::from(outcome), &command.format)
    }
}
