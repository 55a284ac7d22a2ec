// 起動時マイグレーションのテスト
//
// ローリングデプロイで複数インスタンスが同時に起動した状況を模擬する。

mod common;

use common::*;
use keel::core::config::Dialect;
use keel::core::migration::MigrationDefinition;
use keel::{run_startup_migrations, MigrationRegistry, MigrationSource, StartupOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn counted_source(runs: &Arc<AtomicUsize>) -> Arc<dyn MigrationSource> {
    let registry = MigrationRegistry::from_definitions(vec![
        MigrationDefinition::new(
            "0001_counted",
            Arc::new(CountingStep {
                table: "counted".to_string(),
                runs: Arc::clone(runs),
                delay: Duration::from_millis(300),
            }),
        ),
        reversible("0002_users", "CREATE TABLE users (id INTEGER)", "DROP TABLE users"),
    ])
    .unwrap();
    Arc::new(registry)
}

#[tokio::test]
async fn test_instances_starting_together_apply_once() {
    let temp_dir = TempDir::new().unwrap();
    let pool_a = sqlite_pool(&temp_dir, "startup.db").await;
    let pool_b = sqlite_pool(&temp_dir, "startup.db").await;
    let runs = Arc::new(AtomicUsize::new(0));

    let options = StartupOptions {
        lock: fast_lock(),
        lock_retries: 2,
    };

    let (a, b) = tokio::join!(
        run_startup_migrations(&pool_a, Dialect::SQLite, counted_source(&runs), options.clone()),
        run_startup_migrations(&pool_b, Dialect::SQLite, counted_source(&runs), options.clone()),
    );

    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(a.applied.len() + b.applied.len(), 2);
    assert!(a.is_noop() || b.is_noop());
    assert!(table_exists(&pool_a, "users").await);
}
