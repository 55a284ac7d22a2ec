// Keelライブラリのエントリーポイント
//
// モジュール構造:
// - cli: CLIレイヤー（ユーザー入力の受付とコマンドルーティング）
// - core: ドメインモデル（マイグレーション定義、レジャー、設定、エラー）
// - adapters: データベースアクセス（接続、レジャーテーブル、実行ロック、SQLスクリプト）
// - services: 定義の発見、マイグレーションの実行、起動時フック

pub mod adapters;
pub mod cli;
pub mod core;
pub mod services;

pub use crate::core::error::MigrationEngineError;
pub use crate::core::migration::{MigrationDefinition, MigrationStep, RollbackOutcome, RunReport};
pub use crate::services::migration_runner::{MigrationRunner, MigrationStatus};
pub use crate::services::migration_source::{DirectorySource, MigrationRegistry, MigrationSource};
pub use crate::services::startup::{run_startup_migrations, StartupOptions};
