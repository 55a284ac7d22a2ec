// Services Layer
// 定義の発見、マイグレーションの実行、設定の読み込みを行うサービス層

pub mod config_loader;
pub mod config_serializer;
pub mod database_config_resolver;
pub mod migration_runner;
pub mod migration_source;
pub mod startup;
