// createコマンドハンドラー
//
// 空の up.sql / down.sql を持つマイグレーションの雛形を作成する。
// データベースには接続しない。

use crate::cli::command_context::CommandContext;
use crate::cli::commands::{render_output, CommandOutput};
use crate::cli::OutputFormat;
use crate::core::naming::{DOWN_SQL_FILE, UP_SQL_FILE};
use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

/// createコマンドの出力構造体
#[derive(Debug, Clone, Serialize)]
pub struct CreateOutput {
    /// 作成されたマイグレーション名
    pub name: String,
    /// マイグレーションディレクトリ
    pub path: PathBuf,
    #[serde(skip)]
    pub message: String,
}

impl CommandOutput for CreateOutput {
    fn to_text(&self) -> String {
        self.message.clone()
    }
}

/// createコマンドの入力パラメータ
#[derive(Debug, Clone)]
pub struct CreateCommand {
    /// プロジェクトのルートパス
    pub project_path: PathBuf,
    /// カスタム設定ファイルパス
    pub config_path: Option<PathBuf>,
    /// マイグレーションの説明
    pub name: String,
    /// 出力フォーマット
    pub format: OutputFormat,
}

/// createコマンドハンドラー
#[derive(Debug, Default)]
pub struct CreateCommandHandler {}

impl CreateCommandHandler {
    /// 新しいCreateCommandHandlerを作成
    pub fn new() -> Self {
        Self {}
    }

    /// createコマンドを実行
    pub fn execute(&self, command: &CreateCommand) -> Result<String> {
        let context = CommandContext::load_with_config(
            command.project_path.clone(),
            command.config_path.clone(),
        )?;

        let name = context.migration_source().create(&command.name)?;
        let path = context.migrations_dir().join(&name);

        let message = format!(
            "Created migration {}\n  {}\n  {}",
            name,
            path.join(UP_SQL_FILE).display(),
            path.join(DOWN_SQL_FILE).display()
        );

        let output = CreateOutput {
            name,
            path,
            message,
        };
        render_output(&output, &command.format)
    }
}
