// statusコマンドハンドラー
//
// マイグレーション状態の確認機能を実装します。
// - 適用済み / 未適用 / 定義の欠落したマイグレーションの一覧（テーブル形式）
// - チェックサム不一致やレジャーの欠落の警告

use crate::cli::command_context::CommandContext;
use crate::cli::commands::{render_output, CommandOutput};
use crate::cli::OutputFormat;
use crate::services::migration_runner::MigrationStatus;
use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// statusコマンドの出力構造体
#[derive(Debug, Clone, Serialize)]
pub struct StatusOutput {
    /// マイグレーション一覧
    pub migrations: Vec<MigrationStatusEntry>,
    /// サマリー情報
    pub summary: StatusSummary,
    /// 警告メッセージ
    pub warnings: Vec<String>,
    /// テキスト出力メッセージ
    #[serde(skip)]
    pub text_message: String,
}

/// マイグレーションのステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatusValue {
    Applied,
    Pending,
}

/// マイグレーションステータスエントリ
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatusEntry {
    pub name: String,
    pub status: MigrationStatusValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

/// ステータスサマリー
#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub total: usize,
    pub applied: usize,
    pub pending: usize,
}

impl CommandOutput for StatusOutput {
    fn to_text(&self) -> String {
        self.text_message.clone()
    }
}

impl From<MigrationStatus> for StatusOutput {
    fn from(status: MigrationStatus) -> Self {
        let mut entries: BTreeMap<String, MigrationStatusEntry> = BTreeMap::new();
        for entry in &status.executed {
            entries.insert(
                entry.name.clone(),
                MigrationStatusEntry {
                    name: entry.name.clone(),
                    status: MigrationStatusValue::Applied,
                    executed_at: Some(entry.executed_at),
                },
            );
        }
        for name in &status.pending {
            entries.insert(
                name.clone(),
                MigrationStatusEntry {
                    name: name.clone(),
                    status: MigrationStatusValue::Pending,
                    executed_at: None,
                },
            );
        }

        let migrations: Vec<MigrationStatusEntry> = entries.into_values().collect();
        let summary = StatusSummary {
            total: migrations.len(),
            applied: status.executed.len(),
            pending: status.pending.len(),
        };
        let text_message = format_migration_status(&migrations, &summary, &status.warnings);

        Self {
            migrations,
            summary,
            warnings: status.warnings,
            text_message,
        }
    }
}

/// statusコマンドの入力パラメータ
#[derive(Debug, Clone)]
pub struct StatusCommand {
    /// プロジェクトのルートパス
    pub project_path: PathBuf,
    /// カスタム設定ファイルパス
    pub config_path: Option<PathBuf>,
    /// 環境名
    pub env: String,
    /// 出力フォーマット
    pub format: OutputFormat,
}

/// statusコマンドハンドラー
#[derive(Debug, Default)]
pub struct StatusCommandHandler {}

impl StatusCommandHandler {
    /// 新しいStatusCommandHandlerを作成
    pub fn new() -> Self {
        Self {}
    }

    /// statusコマンドを実行
    pub async fn execute(&self, command: &StatusCommand) -> Result<String> {
        let context = CommandContext::load_with_config(
            command.project_path.clone(),
            command.config_path.clone(),
        )?;

        let runner = context.runner(&command.env, None).await?;
        let status = runner.status().await?;

        render_output(&StatusOutput::from(status), &command.format)
    }
}

/// マイグレーション状態をフォーマット
fn format_migration_status(
    migrations: &[MigrationStatusEntry],
    summary: &StatusSummary,
    warnings: &[String],
) -> String {
    let mut output = String::new();
    output.push_str("=== Migration Status ===\n\n");

    if migrations.is_empty() {
        output.push_str("No migrations found.\n");
        output.push_str("\nUse the `create` command to add a migration.\n");
        return output;
    }

    output.push_str(&format!("{:<50} {:<10} {}\n", "Name", "Status", "Executed At"));
    output.push_str(&format!("{}\n", "-".repeat(90)));

    for migration in migrations {
        let status = match migration.status {
            MigrationStatusValue::Applied => format!("{:<10}", "Applied").green(),
            MigrationStatusValue::Pending => format!("{:<10}", "Pending").yellow(),
        };
        let executed_at = migration
            .executed_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        output.push_str(&format!("{:<50} {} {}\n", migration.name, status, executed_at));
    }

    output.push_str(&format!(
        "\nTotal: {}, Applied: {}, Pending: {}\n",
        summary.total, summary.applied, summary.pending
    ));

    for warning in warnings {
        output.push_str(&format!("{} {}\n", "warning:".yellow().bold(), warning));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::migration::LedgerEntry;

    #[test]
    fn test_status_output_merges_applied_and_pending() {
        colored::control::set_override(false);
        let status = MigrationStatus {
            executed: vec![
                LedgerEntry::new("0001_a".to_string(), Utc::now(), String::new()),
                LedgerEntry::new("0003_c".to_string(), Utc::now(), String::new()),
            ],
            pending: vec!["0002_b".to_string()],
            warnings: vec!["Migration 0002_b is pending but sorts before already applied migrations".to_string()],
        };

        let output = StatusOutput::from(status);

        let names: Vec<&str> = output.migrations.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["0001_a", "0002_b", "0003_c"]);
        assert_eq!(output.migrations[1].status, MigrationStatusValue::Pending);
        assert_eq!(output.summary.applied, 2);
        assert_eq!(output.summary.pending, 1);
        assert!(output.text_message.contains("Total: 3, Applied: 2, Pending: 1"));
        assert!(output.text_message.contains("warning:"));
    }

    #[test]
    fn test_status_output_when_empty() {
        colored::control::set_override(false);
        let output = StatusOutput::from(MigrationStatus::default());

        assert_eq!(output.summary.total, 0);
        assert!(output.text_message.contains("No migrations found"));
    }
}
