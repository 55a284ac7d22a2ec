// SQLスクリプトアクション
//
// up.sql / down.sql の本文を文単位に分割し、Runner のトランザクション上で順に実行する。

use crate::core::migration::MigrationStep;
use anyhow::Context;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::AnyConnection;
use tracing::debug;

/// SQLスクリプトで定義されたマイグレーションアクション
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlScript {
    sql: String,
}

impl SqlScript {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }

    /// 実行対象の文（空文を除く）
    pub fn statements(&self) -> Vec<String> {
        split_sql_statements(&self.sql)
    }
}

#[async_trait]
impl MigrationStep for SqlScript {
    async fn run(&self, conn: &mut AnyConnection) -> anyhow::Result<()> {
        let statements = self.statements();
        let total = statements.len();

        for (index, statement) in statements.iter().enumerate() {
            debug!(statement = index + 1, total, "Executing SQL statement");
            sqlx::query(statement)
                .execute(&mut *conn)
                .await
                .with_context(|| {
                    format!(
                        "statement {} of {} failed\nSQL: {}",
                        index + 1,
                        total,
                        statement
                    )
                })?;
        }

        Ok(())
    }
}

/// up / down のSQL本文からチェックサム（SHA-256, 16進）を計算
pub fn calculate_checksum(up_sql: &str, down_sql: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(up_sql.as_bytes());
    hasher.update(b"\n--down--\n");
    if let Some(down_sql) = down_sql {
        hasher.update(down_sql.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// SQLを文単位に分割
///
/// 文字列リテラル、引用識別子、ドル引用（`$tag$ ... $tag$`）内の `;` は区切りとみなさない。
/// `--` 行コメントのみの文は除外する。
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let bytes = sql.as_bytes();
    let mut i = 0;
    let mut in_single = false;
    let mut in_double = false;
    let mut in_line_comment = false;
    let mut dollar_tag: Option<String> = None;

    while i < bytes.len() {
        let c = bytes[i] as char;

        if in_line_comment {
            if c == '\n' {
                in_line_comment = false;
                current.push(c);
            }
            i += 1;
            continue;
        }

        if let Some(tag) = dollar_tag.as_ref() {
            if c == '$' && sql[i..].starts_with(tag.as_str()) {
                current.push_str(tag);
                i += tag.len();
                dollar_tag = None;
                continue;
            }
            push_char(&mut current, sql, &mut i);
            continue;
        }

        if in_single {
            if c == '\'' {
                if i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
                    current.push_str("''");
                    i += 2;
                    continue;
                }
                in_single = false;
            }
            push_char(&mut current, sql, &mut i);
            continue;
        }

        if in_double {
            if c == '"' {
                if i + 1 < bytes.len() && bytes[i + 1] == b'"' {
                    current.push_str("\"\"");
                    i += 2;
                    continue;
                }
                in_double = false;
            }
            push_char(&mut current, sql, &mut i);
            continue;
        }

        match c {
            '\'' => {
                in_single = true;
                current.push(c);
                i += 1;
            }
            '"' => {
                in_double = true;
                current.push(c);
                i += 1;
            }
            '-' if sql[i..].starts_with("--") => {
                in_line_comment = true;
                i += 2;
            }
            '$' => {
                if let Some(end) = sql[i + 1..].find('$') {
                    let tag = &sql[i..=i + end + 1];
                    let inner = &tag[1..tag.len() - 1];
                    if inner
                        .chars()
                        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
                    {
                        dollar_tag = Some(tag.to_string());
                        current.push_str(tag);
                        i += tag.len();
                    } else {
                        current.push(c);
                        i += 1;
                    }
                } else {
                    current.push(c);
                    i += 1;
                }
            }
            ';' => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    statements.push(trimmed.to_string());
                }
                current.clear();
                i += 1;
            }
            _ => push_char(&mut current, sql, &mut i),
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }

    statements
}

// マルチバイト文字を壊さないよう、UTF-8 の1文字単位で進める
fn push_char(current: &mut String, sql: &str, i: &mut usize) {
    if let Some(ch) = sql[*i..].chars().next() {
        current.push(ch);
        *i += ch.len_utf8();
    } else {
        *i += 1;
    }
}
