// コマンドハンドラー層
// 各CLIコマンドの実装

pub mod apply;
pub mod create;
pub mod init;
pub mod rollback;
pub mod status;

use crate::cli::OutputFormat;
use anyhow::{Context, Result};
use serde::Serialize;

/// コマンド出力（テキスト / JSON の両方で描画できる）
pub trait CommandOutput: Serialize {
    /// テキスト形式の出力
    fn to_text(&self) -> String;
}

/// 出力フォーマットに応じてコマンド出力を描画
pub fn render_output<T: CommandOutput>(output: &T, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(output.to_text()),
        OutputFormat::Json => serde_json::to_string_pretty(output)
            .with_context(|| "Failed to serialize command output as JSON"),
    }
}
