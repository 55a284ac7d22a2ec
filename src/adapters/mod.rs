// Adapters Layer
// データベース接続、レジャー、実行ロック、SQLスクリプト実行のアダプター

pub mod connection_string;
pub mod database;
pub mod ledger_store;
pub mod run_lock;
pub mod sql_script;
