// CLI Layer
// ユーザー入力の受付とコマンドルーティング

pub mod command_context;
pub mod commands;

use crate::core::error::MigrationEngineError;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// 出力フォーマット
#[derive(Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output (default)
    #[default]
    Text,
    /// Structured JSON output
    Json,
}

/// Keel - Schema Migration Engine
///
/// Applies ordered, transactional schema migrations exactly once.
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(author = "Keel Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Schema migration engine")]
#[command(long_about = "Keel - Schema Migration Engine

Evolves a relational database schema over the lifetime of a service.
Each migration is applied exactly once, in name order, inside a transaction,
and recorded in a ledger table. Concurrent runs are serialized by a lock row.

Supported databases: PostgreSQL, MySQL, SQLite")]
#[command(propagate_version = true)]
#[command(after_help = "GETTING STARTED:
  1. Initialize a new project:     keel init --dialect sqlite
  2. Create a migration:           keel create \"create users\"
  3. Edit up.sql / down.sql:       migrations/<name>/
  4. Apply migrations:             keel apply
  5. Check migration status:       keel status

EXIT CODES:
  0   success (including nothing to do)
  75  the migration lock could not be acquired in time; retry later
  1   any other error

For detailed help on each command, use: keel <command> --help")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Output format (text or json)
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new migration project
    ///
    /// Creates the configuration file and the migrations directory.
    ///
    /// EXAMPLES:
    ///   # Initialize with SQLite
    ///   keel init --dialect sqlite
    ///
    ///   # Force re-initialization
    ///   keel init --dialect postgresql --force
    Init {
        /// Database dialect (postgresql, mysql, sqlite)
        #[arg(short, long, value_name = "DIALECT")]
        dialect: String,

        /// Force initialization even if config exists
        #[arg(short, long)]
        force: bool,
    },

    /// Create a new empty migration
    ///
    /// Writes `<timestamp>_<name>/up.sql` and `down.sql` stubs.
    /// The ledger is not touched.
    ///
    /// EXAMPLES:
    ///   keel create "add email to users"
    Create {
        /// Human readable migration name
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Apply pending migrations to the database
    ///
    /// Executes all unapplied migrations in name order. Each migration runs
    /// in its own transaction together with its ledger entry. The run stops
    /// at the first failure.
    ///
    /// EXAMPLES:
    ///   # Apply to development environment
    ///   keel apply
    ///
    ///   # Apply to production, waiting up to 120s for the lock
    ///   keel apply --env production --lock-timeout 120
    Apply {
        /// Target environment
        #[arg(short, long, value_name = "ENV", default_value = "development")]
        env: String,

        /// Maximum time to wait for the migration lock (in seconds)
        #[arg(long, value_name = "SECONDS")]
        lock_timeout: Option<u64>,
    },

    /// Roll back the most recently applied migration
    ///
    /// Runs the down script of the last recorded migration and removes its
    /// ledger entry in the same transaction.
    ///
    /// EXAMPLES:
    ///   keel rollback
    ///   keel rollback --env staging
    Rollback {
        /// Target environment
        #[arg(short, long, value_name = "ENV", default_value = "development")]
        env: String,

        /// Maximum time to wait for the migration lock (in seconds)
        #[arg(long, value_name = "SECONDS")]
        lock_timeout: Option<u64>,
    },

    /// Show applied and pending migrations
    ///
    /// EXAMPLES:
    ///   keel status
    ///   keel status --env production --format json
    Status {
        /// Target environment
        #[arg(short, long, value_name = "ENV", default_value = "development")]
        env: String,
    },
}

/// エラーに対応する終了コード
///
/// エラーチェーン中の `MigrationEngineError` から決定し、見つからなければ 1。
pub fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<MigrationEngineError>())
        .map_or(1, MigrationEngineError::exit_code)
}
