// マイグレーションドメインモデル
//
// マイグレーション定義、適用履歴（レジャー）エントリ、
// 実行状態（executed / pending）の導出を表現する型システム。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::AnyConnection;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// マイグレーションのアクション（up / down）
///
/// Runner が開いたトランザクション上のコネクションを受け取り、スキーマを変更します。
/// アクションはトランザクションをコミット・ロールバックしてはいけません。
#[async_trait]
pub trait MigrationStep: Send + Sync {
    /// アクションを実行
    async fn run(&self, conn: &mut AnyConnection) -> anyhow::Result<()>;
}

/// マイグレーション定義
///
/// 名前・up・任意の down からなる不変のスキーマ変更単位。
/// 名前の辞書順がそのまま適用順になります。
#[derive(Clone)]
pub struct MigrationDefinition {
    /// マイグレーション名（一意・辞書順ソート可能）
    pub name: String,

    /// アップグレードアクション
    pub up: Arc<dyn MigrationStep>,

    /// ダウングレードアクション（None の場合はロールバック不可）
    pub down: Option<Arc<dyn MigrationStep>>,

    /// 定義本文のチェックサム（SHA-256、コード定義の場合は None）
    pub checksum: Option<String>,
}

impl MigrationDefinition {
    /// 新しいマイグレーション定義を作成
    pub fn new(name: impl Into<String>, up: Arc<dyn MigrationStep>) -> Self {
        Self {
            name: name.into(),
            up,
            down: None,
            checksum: None,
        }
    }

    /// down アクションを設定
    pub fn with_down(mut self, down: Arc<dyn MigrationStep>) -> Self {
        self.down = Some(down);
        self
    }

    /// チェックサムを設定
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// ロールバック可能かどうか
    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }
}

impl fmt::Debug for MigrationDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationDefinition")
            .field("name", &self.name)
            .field("reversible", &self.is_reversible())
            .field("checksum", &self.checksum)
            .finish()
    }
}

/// レジャーエントリ
///
/// 適用履歴テーブルに保存されるレコードに対応します。
/// エントリが存在する ⇔ そのマイグレーションの up が確定（コミット）済み。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// マイグレーション名
    pub name: String,

    /// 適用日時
    pub executed_at: DateTime<Utc>,

    /// 適用時点の定義チェックサム（不明な場合は空文字）
    pub checksum: String,
}

impl LedgerEntry {
    /// 新しいレジャーエントリを作成
    pub fn new(name: String, executed_at: DateTime<Utc>, checksum: String) -> Self {
        Self {
            name,
            executed_at,
            checksum,
        }
    }

    /// チェックサムが一致するか確認
    ///
    /// 記録側・定義側のいずれかが空の場合は比較できないため一致とみなす。
    pub fn verify_checksum(&self, expected_checksum: &str) -> bool {
        self.checksum.is_empty()
            || expected_checksum.is_empty()
            || self.checksum == expected_checksum
    }
}

/// 実行状態
///
/// レジャーと発見済み定義から導出される（永続化されない）。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RunState {
    /// 適用済みマイグレーション名（記録順）
    pub executed: Vec<String>,

    /// 未適用マイグレーション名（昇順）
    pub pending: Vec<String>,
}

impl RunState {
    /// 発見済み定義（昇順）とレジャーから実行状態を計算
    pub fn compute(discovered: &[MigrationDefinition], ledger: &[LedgerEntry]) -> Self {
        let executed: Vec<String> = ledger.iter().map(|entry| entry.name.clone()).collect();
        let executed_set: HashSet<&str> = executed.iter().map(String::as_str).collect();

        let pending = discovered
            .iter()
            .filter(|definition| !executed_set.contains(definition.name.as_str()))
            .map(|definition| definition.name.clone())
            .collect();

        Self { executed, pending }
    }

    /// 適用済みの名前より辞書順で小さい未適用マイグレーション（レジャーの欠落）
    pub fn gaps(&self) -> Vec<&str> {
        let Some(latest) = self.executed.iter().max() else {
            return Vec::new();
        };
        self.pending
            .iter()
            .filter(|name| name.as_str() < latest.as_str())
            .map(String::as_str)
            .collect()
    }

    /// レジャーに記録されているが定義が見つからないマイグレーション
    pub fn orphaned<'a>(&'a self, discovered: &[MigrationDefinition]) -> Vec<&'a str> {
        let known: HashSet<&str> = discovered.iter().map(|d| d.name.as_str()).collect();
        self.executed
            .iter()
            .filter(|name| !known.contains(name.as_str()))
            .map(String::as_str)
            .collect()
    }
}

/// 適用済みマイグレーション
///
/// 1回の run で適用されたマイグレーションの実行情報を表現します。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedMigration {
    /// マイグレーション名
    pub name: String,

    /// 適用日時
    pub executed_at: DateTime<Utc>,

    /// 実行時間（ミリ秒）
    pub duration_ms: i64,
}

/// run_pending の実行結果
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RunReport {
    /// 今回適用されたマイグレーション（適用順）
    pub applied: Vec<AppliedMigration>,

    /// 警告（チェックサム不一致、レジャーの欠落など）
    pub warnings: Vec<String>,
}

impl RunReport {
    /// 何も適用されなかったか
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }

    /// 適用されたマイグレーション名
    pub fn applied_names(&self) -> Vec<&str> {
        self.applied.iter().map(|m| m.name.as_str()).collect()
    }
}

/// rollback_last の実行結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "name", rename_all = "snake_case")]
pub enum RollbackOutcome {
    /// レジャーが空で何もしなかった
    NothingToRollBack,
    /// 指定のマイグレーションをロールバックした
    RolledBack(String),
}

impl fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackOutcome::NothingToRollBack => write!(f, "nothing to roll back"),
            RollbackOutcome::RolledBack(name) => write!(f, "rolled back {}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl MigrationStep for Noop {
        async fn run(&self, _conn: &mut AnyConnection) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn definition(name: &str) -> MigrationDefinition {
        MigrationDefinition::new(name, Arc::new(Noop))
    }

    fn entry(name: &str) -> LedgerEntry {
        LedgerEntry::new(name.to_string(), Utc::now(), String::new())
    }

    #[test]
    fn test_compute_pending_preserves_ascending_order() {
        let discovered = vec![
            definition("0001_a"),
            definition("0002_b"),
            definition("0003_c"),
            definition("0004_d"),
        ];
        let ledger = vec![entry("0001_a"), entry("0003_c")];

        let state = RunState::compute(&discovered, &ledger);

        assert_eq!(state.executed, vec!["0001_a", "0003_c"]);
        assert_eq!(state.pending, vec!["0002_b", "0004_d"]);
    }

    #[test]
    fn test_compute_with_empty_ledger() {
        let discovered = vec![definition("0001_a"), definition("0002_b")];
        let state = RunState::compute(&discovered, &[]);

        assert!(state.executed.is_empty());
        assert_eq!(state.pending, vec!["0001_a", "0002_b"]);
        assert!(state.gaps().is_empty());
    }

    #[test]
    fn test_gaps_detects_out_of_order_ledger() {
        let discovered = vec![
            definition("2024-01-01_a"),
            definition("2024-01-02_b"),
            definition("2024-01-03_c"),
        ];
        let ledger = vec![entry("2024-01-01_a"), entry("2024-01-03_c")];

        let state = RunState::compute(&discovered, &ledger);

        assert_eq!(state.gaps(), vec!["2024-01-02_b"]);
    }

    #[test]
    fn test_orphaned_entries() {
        let discovered = vec![definition("0001_a")];
        let ledger = vec![entry("0001_a"), entry("0002_removed")];

        let state = RunState::compute(&discovered, &ledger);

        assert_eq!(state.orphaned(&discovered), vec!["0002_removed"]);
    }

    #[test]
    fn test_verify_checksum() {
        let mut record = entry("0001_a");
        assert!(record.verify_checksum("abc"));

        record.checksum = "abc".to_string();
        assert!(record.verify_checksum("abc"));
        assert!(!record.verify_checksum("def"));
        assert!(record.verify_checksum(""));
    }

    #[test]
    fn test_definition_reversibility() {
        let up_only = definition("0001_a");
        assert!(!up_only.is_reversible());

        let reversible = definition("0002_b").with_down(Arc::new(Noop));
        assert!(reversible.is_reversible());
        assert!(format!("{:?}", reversible).contains("0002_b"));
    }

    #[test]
    fn test_rollback_outcome_serialization() {
        let json = serde_json::to_value(RollbackOutcome::RolledBack("0001_a".to_string())).unwrap();
        assert_eq!(json["outcome"], "rolled_back");
        assert_eq!(json["name"], "0001_a");

        let json = serde_json::to_value(RollbackOutcome::NothingToRollBack).unwrap();
        assert_eq!(json["outcome"], "nothing_to_roll_back");
    }
}
