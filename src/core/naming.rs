// 命名ポリシー
//
// アプリケーション名、関連パス、マイグレーション名の規約を一箇所に集約します。

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// 現行アプリケーション名
pub const APP_NAME: &str = "keel";

/// 既定の設定ファイル名
pub const CONFIG_FILE: &str = ".keel.yaml";

/// バイナリ名
pub const BINARY_NAME: &str = "keel";

/// 適用履歴（レジャー）テーブル名
pub const LEDGER_TABLE: &str = "keel_migrations";

/// 実行ロックテーブル名
pub const LOCK_TABLE: &str = "keel_migrations_lock";

/// アップグレードSQLのファイル名
pub const UP_SQL_FILE: &str = "up.sql";

/// ダウングレードSQLのファイル名
pub const DOWN_SQL_FILE: &str = "down.sql";

/// マイグレーション名のタイムスタンプ部の書式（YYYYMMDDHHmmss）
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// タイムスタンプと説明からマイグレーション名を生成
///
/// 形式: `{YYYYMMDDHHmmss}_{slug}`。辞書順が作成順と一致する。
pub fn migration_name(at: DateTime<Utc>, human_name: &str) -> String {
    let slug = slugify(human_name);
    let timestamp = at.format(TIMESTAMP_FORMAT);
    if slug.is_empty() {
        format!("{}_migration", timestamp)
    } else {
        format!("{}_{}", timestamp, slug)
    }
}

/// 説明文をマイグレーション名用にサニタイズ
///
/// 英数字以外は `_` に置き換え、連続する `_` は1つにまとめる。
pub fn slugify(human_name: &str) -> String {
    let mut slug = String::with_capacity(human_name.len());
    let mut last_was_separator = true;

    for c in human_name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_was_separator = false;
        } else if !last_was_separator {
            slug.push('_');
            last_was_separator = true;
        }
    }

    while slug.ends_with('_') {
        slug.pop();
    }

    slug
}

/// マイグレーション名の形式: `{数字で始まるバージョン}_{説明}`
static MIGRATION_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<version>[0-9][0-9A-Za-z-]*)_(?P<description>.+)$")
        .expect("migration name pattern is valid")
});

/// マイグレーション名をバージョン部と説明部に分割
///
/// 先頭が数字で `_` を含む名前のみ有効。`2024-01-01_a` のような日付形式も受け付ける。
pub fn split_migration_name(name: &str) -> Option<(&str, &str)> {
    let captures = MIGRATION_NAME_REGEX.captures(name)?;
    let version = captures.name("version")?.as_str();
    let description = captures.name("description")?.as_str();
    Some((version, description))
}
