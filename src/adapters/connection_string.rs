// 接続文字列ビルダー
//
// DatabaseConfig と Dialect から接続文字列を生成する。

use crate::core::config::{DatabaseConfig, Dialect};
use urlencoding::encode;

/// 接続文字列を生成
///
/// ユーザー名とパスワードはパーセントエンコードされます。
/// SQLite はファイルが存在しない場合に作成されるよう `mode=rwc` を付与します。
pub fn build_connection_string(dialect: Dialect, config: &DatabaseConfig) -> String {
    match dialect {
        Dialect::PostgreSQL => {
            let user = config.user.as_deref().unwrap_or("postgres");
            let auth = build_auth(user, config.password.as_deref());
            let port = config.resolved_port(dialect);
            format!(
                "postgresql://{}@{}:{}/{}",
                auth, config.host, port, config.database
            )
        }
        Dialect::MySQL => {
            let user = config.user.as_deref().unwrap_or("root");
            let auth = build_auth(user, config.password.as_deref());
            let port = config.resolved_port(dialect);
            format!(
                "mysql://{}@{}:{}/{}",
                auth, config.host, port, config.database
            )
        }
        Dialect::SQLite => {
            if config.database.contains('?') {
                format!("sqlite://{}", config.database)
            } else {
                format!("sqlite://{}?mode=rwc", config.database)
            }
        }
    }
}

fn build_auth(user: &str, password: Option<&str>) -> String {
    let encoded_user = encode(user);
    match password {
        Some(password) if !password.is_empty() => {
            format!("{}:{}", encoded_user, encode(password))
        }
        _ => encoded_user.to_string(),
    }
}
