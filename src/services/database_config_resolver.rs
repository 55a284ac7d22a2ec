// データベース設定の解決サービス
//
// 環境変数による上書きをCLI/サービス層で扱い、coreは純粋な構造体に保つ。

use crate::core::config::DatabaseConfig;
use tracing::warn;

/// データベース設定の解決ユーティリティ
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfigResolver;

impl DatabaseConfigResolver {
    /// 環境変数による上書きを適用
    ///
    /// DB_HOST, DB_PORT, DB_DATABASE, DB_USER, DB_PASSWORD を参照する。
    pub fn apply_env_overrides(base: &DatabaseConfig) -> DatabaseConfig {
        let mut config = base.clone();

        if let Ok(host) = std::env::var("DB_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("DB_PORT") {
            match port.parse::<u16>() {
                Ok(port_num) => config.port = Some(port_num),
                Err(_) => warn!(value = %port, "Ignoring invalid DB_PORT override"),
            }
        }
        if let Ok(database) = std::env::var("DB_DATABASE") {
            config.database = database;
        }
        if let Ok(user) = std::env::var("DB_USER") {
            config.user = Some(user);
        }
        if let Ok(password) = std::env::var("DB_PASSWORD") {
            config.password = Some(password);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 5] = ["DB_HOST", "DB_PORT", "DB_DATABASE", "DB_USER", "DB_PASSWORD"];

    fn clear_vars() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_no_overrides_keeps_config() {
        clear_vars();
        let base = DatabaseConfig {
            host: "db".to_string(),
            database: "app".to_string(),
            ..Default::default()
        };

        let resolved = DatabaseConfigResolver::apply_env_overrides(&base);

        assert_eq!(resolved.host, "db");
        assert_eq!(resolved.database, "app");
        assert_eq!(resolved.port, None);
    }

    #[test]
    #[serial]
    fn test_env_overrides_are_applied() {
        clear_vars();
        std::env::set_var("DB_HOST", "override-host");
        std::env::set_var("DB_PORT", "6543");
        std::env::set_var("DB_USER", "migrator");
        std::env::set_var("DB_PASSWORD", "secret");

        let base = DatabaseConfig {
            database: "app".to_string(),
            ..Default::default()
        };
        let resolved = DatabaseConfigResolver::apply_env_overrides(&base);
        clear_vars();

        assert_eq!(resolved.host, "override-host");
        assert_eq!(resolved.port, Some(6543));
        assert_eq!(resolved.user.as_deref(), Some("migrator"));
        assert_eq!(resolved.password.as_deref(), Some("secret"));
        assert_eq!(resolved.database, "app");
    }

    #[test]
    #[serial]
    fn test_invalid_port_is_ignored() {
        clear_vars();
        std::env::set_var("DB_PORT", "not-a-port");

        let base = DatabaseConfig {
            database: "app".to_string(),
            port: Some(5432),
            ..Default::default()
        };
        let resolved = DatabaseConfigResolver::apply_env_overrides(&base);
        clear_vars();

        assert_eq!(resolved.port, Some(5432));
    }
}
